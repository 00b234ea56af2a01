pub mod accounts;
pub mod availability;
pub mod calls;
pub mod drivers;
pub mod lifecycle;
pub mod pricing;
pub mod tracking;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::engine::calls::advisory;
use crate::error::AppError;
use crate::geo::GeoProvider;
use crate::models::driver::Driver;
use crate::models::event::ParcelEvent;
use crate::models::parcel::Parcel;
use crate::notify::{NotificationKind, Notifier, NotifyError};
use crate::observability::metrics::Metrics;
use crate::store::ParcelStore;

#[derive(Debug, Clone)]
pub struct Policy {
    pub duplicate_guard: bool,
    pub geocode_timeout: Duration,
    pub notify_timeout: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            duplicate_guard: true,
            geocode_timeout: Duration::from_secs(5),
            notify_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn ParcelStore>,
    pub geo: Arc<dyn GeoProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub metrics: Metrics,
    pub events_tx: broadcast::Sender<ParcelEvent>,
    pub policy: Policy,
}

impl Context {
    pub fn new(
        store: Arc<dyn ParcelStore>,
        geo: Arc<dyn GeoProvider>,
        notifier: Arc<dyn Notifier>,
        policy: Policy,
        event_buffer_size: usize,
    ) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        Self {
            store,
            geo,
            notifier,
            metrics: Metrics::new(),
            events_tx,
            policy,
        }
    }

    pub(crate) async fn parcel(&self, id: Uuid) -> Result<Parcel, AppError> {
        self.store
            .get_parcel(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("parcel {id} not found")))
    }

    pub(crate) async fn live_driver(&self, id: Uuid) -> Result<Driver, AppError> {
        self.store
            .get_driver(id)
            .await?
            .filter(|driver| !driver.is_archived())
            .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))
    }

    pub(crate) fn publish(&self, parcel: &Parcel) {
        self.metrics.record_transition(parcel.status.as_str());
        let _ = self.events_tx.send(ParcelEvent::from(parcel));
    }

    pub(crate) async fn notify_best_effort<F>(&self, kind: NotificationKind, call: F)
    where
        F: Future<Output = Result<(), NotifyError>>,
    {
        let outcome = match advisory(kind.as_str(), self.policy.notify_timeout, call).await {
            Some(()) => "sent",
            None => "failed",
        };
        self.metrics.record_notification(kind.as_str(), outcome);
    }

    pub(crate) fn observe(&self, operation: &str, started: Instant) {
        self.metrics
            .observe_latency(operation, started.elapsed().as_secs_f64());
    }
}
