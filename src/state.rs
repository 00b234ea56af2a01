use std::sync::Arc;

use tokio::sync::broadcast;

use crate::engine::accounts::AccountService;
use crate::engine::drivers::DriverService;
use crate::engine::lifecycle::ParcelService;
use crate::engine::{Context, Policy};
use crate::geo::GeoProvider;
use crate::models::event::ParcelEvent;
use crate::notify::Notifier;
use crate::observability::metrics::Metrics;
use crate::store::ParcelStore;

pub struct AppState {
    pub store: Arc<dyn ParcelStore>,
    pub parcels: ParcelService,
    pub drivers: DriverService,
    pub accounts: AccountService,
    pub events_tx: broadcast::Sender<ParcelEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ParcelStore>,
        geo: Arc<dyn GeoProvider>,
        notifier: Arc<dyn Notifier>,
        policy: Policy,
        event_buffer_size: usize,
    ) -> Self {
        let ctx = Context::new(store.clone(), geo, notifier, policy, event_buffer_size);

        Self {
            store,
            parcels: ParcelService::new(ctx.clone()),
            drivers: DriverService::new(ctx.clone()),
            accounts: AccountService::new(ctx.clone()),
            events_tx: ctx.events_tx.clone(),
            metrics: ctx.metrics,
        }
    }
}
