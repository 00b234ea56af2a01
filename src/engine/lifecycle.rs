use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::Context;
use crate::engine::calls::critical;
use crate::engine::pricing::price;
use crate::engine::tracking::generate_unique_tracking_id;
use crate::error::AppError;
use crate::models::driver::Driver;
use crate::models::parcel::{NewParcel, Parcel, ParcelStatus, ParcelSummary};
use crate::models::status_log::ParcelStatusLog;
use crate::notify::NotificationKind;
use crate::store::WriteBatch;

const RECENT_PARCELS: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct DashboardMetrics {
    pub total_earned: u64,
    pub total_users: usize,
    pub active_drivers: usize,
    pub parcels_in_flight: usize,
    pub parcels_completed: usize,
    pub recent_parcels: Vec<ParcelSummary>,
}

pub fn check_transition(parcel: &Parcel, next: ParcelStatus) -> Result<(), AppError> {
    let current = parcel.status;

    if current.is_terminal() {
        return Err(AppError::BadRequest(format!(
            "parcel {} is {} and can no longer change status",
            parcel.id,
            current.as_str()
        )));
    }

    if current == ParcelStatus::Delivered && next != ParcelStatus::CollectedByReceiver {
        return Err(AppError::BadRequest(format!(
            "delivered parcel {} can only be collected by the receiver",
            parcel.id
        )));
    }

    if next == ParcelStatus::Pending && parcel.driver_id.is_some() {
        return Err(AppError::BadRequest(format!(
            "parcel {} has an assigned driver; unassign it instead",
            parcel.id
        )));
    }

    if next.requires_driver() && parcel.driver_id.is_none() {
        return Err(AppError::BadRequest(format!(
            "parcel {} has no assigned driver",
            parcel.id
        )));
    }

    Ok(())
}

#[derive(Clone)]
pub struct ParcelService {
    ctx: Context,
}

impl ParcelService {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub async fn create_parcel(&self, new_parcel: NewParcel, caller: Option<Uuid>) -> Result<Parcel, AppError> {
        let started = Instant::now();
        new_parcel.validate().map_err(AppError::BadRequest)?;

        let store = &self.ctx.store;

        if self.ctx.policy.duplicate_guard {
            if let Some(existing) = store.find_parcel_by_fingerprint(&new_parcel.fingerprint()).await? {
                return Err(AppError::Conflict(format!(
                    "an identical parcel already exists ({})",
                    existing.tracking_id
                )));
            }
        }

        let sender_id = match caller {
            Some(id) => Some(id),
            None => store
                .find_user_by_email(&new_parcel.sender_email)
                .await?
                .map(|user| user.id),
        };
        let receiver_id = store
            .find_user_by_email(&new_parcel.receiver_email)
            .await?
            .map(|user| user.id);

        let tracking_id = generate_unique_tracking_id(store.as_ref()).await?;

        let limit = self.ctx.policy.geocode_timeout;
        let geo = &self.ctx.geo;
        let (origin_point, destination_point) = tokio::try_join!(
            critical("geocode origin", limit, geo.geocode(&new_parcel.origin)),
            critical("geocode destination", limit, geo.geocode(&new_parcel.destination)),
        )?;
        let distance_km = critical(
            "route distance",
            limit,
            geo.distance_km(&origin_point, &destination_point),
        )
        .await?;

        let price = price(new_parcel.parcel_type, new_parcel.weight, distance_km, new_parcel.mode);
        let now = Utc::now();

        let parcel = Parcel {
            id: Uuid::new_v4(),
            tracking_id,
            sender_name: new_parcel.sender_name,
            sender_email: new_parcel.sender_email,
            receiver_name: new_parcel.receiver_name,
            receiver_email: new_parcel.receiver_email,
            sender_id,
            receiver_id,
            origin: new_parcel.origin,
            destination: new_parcel.destination,
            origin_point: Some(origin_point),
            destination_point: Some(destination_point),
            parcel_type: new_parcel.parcel_type,
            weight: new_parcel.weight,
            mode: new_parcel.mode,
            distance_km,
            price,
            description: new_parcel.description,
            status: ParcelStatus::Pending,
            driver_id: None,
            sent_at: now,
            picked_at: None,
            delivered_at: None,
            updated_at: now,
            version: 0,
        };

        let log = ParcelStatusLog::new(parcel.id, ParcelStatus::Pending, now);
        let parcel = store
            .insert_parcel(parcel, log, self.ctx.policy.duplicate_guard)
            .await?;

        info!(
            parcel_id = %parcel.id,
            tracking_id = %parcel.tracking_id,
            distance_km,
            price,
            "parcel created"
        );
        self.ctx.publish(&parcel);
        self.ctx.observe("create_parcel", started);

        Ok(parcel)
    }

    pub async fn assign_driver(&self, parcel_id: Uuid, driver_id: Uuid) -> Result<Parcel, AppError> {
        let started = Instant::now();
        let mut parcel = self.ctx.parcel(parcel_id).await?;
        let mut driver = self.ctx.live_driver(driver_id).await?;

        if !driver.accepts_assignments() {
            return Err(AppError::BadRequest(format!(
                "driver {} cannot receive assignments (status {:?})",
                driver.id, driver.status
            )));
        }

        if !matches!(parcel.status, ParcelStatus::Pending | ParcelStatus::Assigned) {
            return Err(AppError::Conflict(format!(
                "parcel {} is {} and cannot be assigned",
                parcel.id,
                parcel.status.as_str()
            )));
        }

        let previous_driver = parcel.driver_id.filter(|id| *id != driver.id);
        let now = Utc::now();

        parcel.driver_id = Some(driver.id);
        let log = parcel.apply_status(ParcelStatus::Assigned, now);
        driver.engage(now);

        let mut batch = WriteBatch::new()
            .with_parcel(parcel)
            .with_driver(driver)
            .with_log(log);
        if let Some(previous) = previous_driver {
            batch = batch.reconciling(previous);
        }

        let committed = self.ctx.store.commit(batch).await?;
        let (Some(parcel), Some(driver)) = (committed.parcel, committed.driver) else {
            return Err(AppError::Internal("assignment commit returned no entities".to_string()));
        };

        info!(parcel_id = %parcel.id, driver_id = %driver.id, "driver assigned");
        self.ctx.publish(&parcel);

        self.ctx
            .notify_best_effort(
                NotificationKind::Assignment,
                self.ctx.notifier.send_assignment_notification(&driver, &parcel),
            )
            .await;
        self.ctx.observe("assign_driver", started);

        Ok(parcel)
    }

    pub async fn unassign_driver(&self, parcel_id: Uuid) -> Result<Parcel, AppError> {
        let mut parcel = self.ctx.parcel(parcel_id).await?;

        let Some(driver_id) = parcel.driver_id else {
            return Err(AppError::BadRequest(format!(
                "parcel {} has no assigned driver",
                parcel.id
            )));
        };

        if parcel.status.is_handled() || parcel.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "parcel {} is {}; the driver can no longer be removed",
                parcel.id,
                parcel.status.as_str()
            )));
        }

        let now = Utc::now();
        parcel.driver_id = None;
        let log = parcel.apply_status(ParcelStatus::Pending, now);

        let mut batch = WriteBatch::new().with_parcel(parcel).with_log(log);
        match self.ctx.store.get_driver(driver_id).await? {
            Some(mut driver) => {
                driver.release(now);
                batch = batch.with_driver(driver);
            }
            None => warn!(%driver_id, "unassigning a driver that no longer exists"),
        }

        let committed = self.ctx.store.commit(batch).await?;
        let parcel = committed
            .parcel
            .ok_or_else(|| AppError::Internal("unassignment commit returned no parcel".to_string()))?;

        info!(parcel_id = %parcel.id, %driver_id, "driver unassigned");
        self.ctx.publish(&parcel);

        Ok(parcel)
    }

    pub async fn update_parcel_status(
        &self,
        parcel_id: Uuid,
        status: ParcelStatus,
        driver_id: Uuid,
    ) -> Result<Parcel, AppError> {
        let parcel = self.ctx.parcel(parcel_id).await?;

        if parcel.driver_id != Some(driver_id) {
            return Err(AppError::BadRequest(format!(
                "driver {driver_id} is not assigned to parcel {parcel_id}"
            )));
        }

        self.transition(parcel, status).await
    }

    pub async fn update_parcel_status_general(
        &self,
        parcel_id: Uuid,
        status: ParcelStatus,
    ) -> Result<Parcel, AppError> {
        let parcel = self.ctx.parcel(parcel_id).await?;
        self.transition(parcel, status).await
    }

    async fn transition(&self, mut parcel: Parcel, status: ParcelStatus) -> Result<Parcel, AppError> {
        check_transition(&parcel, status)?;

        let from = parcel.status;
        let log = parcel.apply_status(status, Utc::now());
        let driver_id = parcel.driver_id;

        let mut batch = WriteBatch::new().with_parcel(parcel).with_log(log);
        if let Some(driver_id) = driver_id.filter(|_| status.releases_driver()) {
            batch = batch.reconciling(driver_id);
        }

        let committed = self.ctx.store.commit(batch).await?;
        let parcel = committed
            .parcel
            .ok_or_else(|| AppError::Internal("status commit returned no parcel".to_string()))?;

        info!(
            parcel_id = %parcel.id,
            from = from.as_str(),
            to = status.as_str(),
            "parcel status changed"
        );
        if let Some(driver) = &committed.released_driver {
            info!(driver_id = %driver.id, "driver available again");
        }
        self.ctx.publish(&parcel);

        if status == ParcelStatus::Delivered {
            self.ctx
                .notify_best_effort(
                    NotificationKind::Delivery,
                    self.ctx.notifier.send_delivery_notification(&parcel),
                )
                .await;
        }

        Ok(parcel)
    }

    pub async fn mark_parcel_collected_by_receiver(
        &self,
        parcel_id: Uuid,
        user_id: Uuid,
    ) -> Result<Parcel, AppError> {
        let mut parcel = self.ctx.parcel(parcel_id).await?;

        if parcel.receiver_id != Some(user_id) {
            return Err(AppError::BadRequest(format!(
                "user {user_id} is not the receiver of parcel {parcel_id}"
            )));
        }

        if parcel.status != ParcelStatus::Delivered {
            return Err(AppError::BadRequest(format!(
                "parcel {} is {} and not ready for collection",
                parcel.id,
                parcel.status.as_str()
            )));
        }

        let log = parcel.apply_status(ParcelStatus::CollectedByReceiver, Utc::now());
        let driver_id = parcel.driver_id;

        let mut batch = WriteBatch::new().with_parcel(parcel);
        if let Some(driver_id) = driver_id {
            batch = batch.reconciling(driver_id);
        }

        let committed = self.ctx.store.commit(batch).await?;
        let parcel = committed
            .parcel
            .ok_or_else(|| AppError::Internal("collection commit returned no parcel".to_string()))?;

        self.append_log_after_commit(log).await;

        info!(parcel_id = %parcel.id, %user_id, "parcel collected by receiver");
        if let Some(driver) = &committed.released_driver {
            info!(driver_id = %driver.id, "driver available again");
        }
        self.ctx.publish(&parcel);

        Ok(parcel)
    }

    /// The history row trails an already committed change; losing it is
    /// reported but does not undo the change.
    async fn append_log_after_commit(&self, log: ParcelStatusLog) {
        let parcel_id = log.parcel_id;

        if let Err(first) = self.ctx.store.append_status_log(log.clone()).await {
            warn!(%parcel_id, error = %first, "status log append failed; retrying");

            if let Err(err) = self.ctx.store.append_status_log(log).await {
                error!(
                    %parcel_id,
                    error = %err,
                    "status log entry lost after committed transition"
                );
            }
        }
    }

    pub async fn get_dashboard_metrics(&self) -> Result<DashboardMetrics, AppError> {
        let store = &self.ctx.store;
        let (parcels, total_users, active_drivers) = tokio::try_join!(
            store.list_parcels(),
            store.count_users(),
            store.count_active_drivers(),
        )?;

        let total_earned = parcels
            .iter()
            .filter(|parcel| parcel.status.is_processed())
            .map(|parcel| parcel.price)
            .sum();
        let parcels_in_flight = parcels.iter().filter(|p| p.status.is_in_flight()).count();
        let parcels_completed = parcels.iter().filter(|p| p.status.is_completed()).count();

        let mut recent: Vec<&Parcel> = parcels.iter().collect();
        recent.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let recent_parcels = recent
            .into_iter()
            .take(RECENT_PARCELS)
            .map(Parcel::summary)
            .collect();

        Ok(DashboardMetrics {
            total_earned,
            total_users,
            active_drivers,
            parcels_in_flight,
            parcels_completed,
            recent_parcels,
        })
    }

    pub async fn get_parcel(&self, parcel_id: Uuid) -> Result<Parcel, AppError> {
        self.ctx.parcel(parcel_id).await
    }

    pub async fn get_parcel_by_tracking_id(&self, tracking_id: &str) -> Result<Parcel, AppError> {
        self.ctx
            .store
            .find_parcel_by_tracking_id(tracking_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("parcel {tracking_id} not found")))
    }

    pub async fn list_parcels(&self) -> Result<Vec<Parcel>, AppError> {
        let mut parcels = self.ctx.store.list_parcels().await?;
        parcels.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        Ok(parcels)
    }

    pub async fn status_history(&self, parcel_id: Uuid) -> Result<Vec<ParcelStatusLog>, AppError> {
        self.ctx.parcel(parcel_id).await?;
        Ok(self.ctx.store.status_history(parcel_id).await?)
    }

    pub async fn notify(&self, parcel_id: Uuid, kind: NotificationKind) -> Result<(), AppError> {
        let parcel = self.ctx.parcel(parcel_id).await?;
        let limit = self.ctx.policy.notify_timeout;
        let notifier = &self.ctx.notifier;

        let result = match kind {
            NotificationKind::Assignment => {
                let driver = self.assigned_driver(&parcel).await?;
                critical(
                    kind.as_str(),
                    limit,
                    notifier.send_assignment_notification(&driver, &parcel),
                )
                .await
            }
            NotificationKind::Delivery => {
                critical(kind.as_str(), limit, notifier.send_delivery_notification(&parcel)).await
            }
            NotificationKind::LocationUpdate => {
                let driver = self.assigned_driver(&parcel).await?;
                let location = driver.current_location.ok_or_else(|| {
                    AppError::BadRequest(format!("driver {} has not reported a location", driver.id))
                })?;
                critical(
                    kind.as_str(),
                    limit,
                    notifier.send_location_update_notification(&parcel, &location),
                )
                .await
            }
        };

        let outcome = if result.is_ok() { "sent" } else { "failed" };
        self.ctx.metrics.record_notification(kind.as_str(), outcome);
        info!(%parcel_id, kind = kind.as_str(), outcome, "manual notification");

        result
    }

    async fn assigned_driver(&self, parcel: &Parcel) -> Result<Driver, AppError> {
        let driver_id = parcel.driver_id.ok_or_else(|| {
            AppError::BadRequest(format!("parcel {} has no assigned driver", parcel.id))
        })?;
        self.ctx.live_driver(driver_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::{ParcelService, check_transition};
    use crate::engine::{Context, Policy};
    use crate::error::AppError;
    use crate::geo::{GeoError, GeoProvider, Gazetteer, MockGeoProvider};
    use crate::models::driver::{DriverStatus, GeoPoint};
    use crate::models::parcel::{DeliveryMode, Parcel, ParcelStatus};
    use crate::models::status_log::ParcelStatusLog;
    use crate::notify::{MockNotifier, NotificationKind, NotifyError};
    use crate::store::{Committed, MockParcelStore, ParcelStore, StoreError};
    use crate::test_support::{RecordingNotifier, TestHarness, driver, gazetteer, new_parcel, parcel};

    struct SlowGeocoder(Gazetteer);

    #[async_trait]
    impl GeoProvider for SlowGeocoder {
        async fn geocode(&self, place: &str) -> Result<GeoPoint, GeoError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.0.geocode(place).await
        }
    }

    // `append_status_log` fails `failures` times, then succeeds.
    async fn collect_with_flaky_log(
        failures: usize,
    ) -> (Result<Parcel, AppError>, Option<uuid::Uuid>, Vec<ParcelStatusLog>, usize) {
        let receiver = uuid::Uuid::new_v4();
        let mut dana = driver();
        dana.engage(Utc::now());
        let mut delivered = parcel(ParcelStatus::Delivered, Some(dana.id));
        delivered.receiver_id = Some(receiver);

        let mut store = MockParcelStore::new();
        let stored = delivered.clone();
        store
            .expect_get_parcel()
            .returning(move |_| Ok(Some(stored.clone())));

        let reconciled = Arc::new(Mutex::new(None));
        let seen = reconciled.clone();
        let released = dana.clone();
        store.expect_commit().times(1).returning(move |batch| {
            *seen.lock().unwrap() = batch.reconcile_driver;
            let mut freed = released.clone();
            freed.release(Utc::now());
            Ok(Committed {
                parcel: batch.parcel.map(|mut p| {
                    p.version += 1;
                    p
                }),
                driver: None,
                released_driver: Some(freed),
            })
        });

        let attempts = Arc::new(AtomicUsize::new(0));
        let written = Arc::new(Mutex::new(Vec::new()));
        let (counter, rows) = (attempts.clone(), written.clone());
        store.expect_append_status_log().returning(move |log| {
            if counter.fetch_add(1, Ordering::SeqCst) < failures {
                return Err(StoreError::Unavailable("log table locked".to_string()));
            }
            rows.lock().unwrap().push(log);
            Ok(())
        });

        let ctx = Context::new(
            Arc::new(store),
            Arc::new(gazetteer()),
            Arc::new(RecordingNotifier::default()),
            Policy::default(),
            16,
        );
        let result = ParcelService::new(ctx)
            .mark_parcel_collected_by_receiver(delivered.id, receiver)
            .await;

        let reconciled = *reconciled.lock().unwrap();
        let written = written.lock().unwrap().clone();
        (result, reconciled, written, attempts.load(Ordering::SeqCst))
    }

    fn statuses(log: &[ParcelStatusLog]) -> Vec<ParcelStatus> {
        log.iter().map(|row| row.status).collect()
    }

    #[tokio::test]
    async fn create_prices_and_logs_pending_parcel() {
        let harness = TestHarness::new();
        let service = ParcelService::new(harness.ctx.clone());

        let created = service.create_parcel(new_parcel(), None).await.unwrap();

        assert_eq!(created.status, ParcelStatus::Pending);
        assert!(created.tracking_id.starts_with("PKG-"));
        assert!((created.distance_km - 10.0).abs() < 0.01);
        assert_eq!(created.price, 490);
        assert!(created.destination_point.is_some());

        let history = harness.store.status_history(created.id).await.unwrap();
        assert_eq!(statuses(&history), vec![ParcelStatus::Pending]);
    }

    #[tokio::test]
    async fn express_parcel_costs_half_again() {
        let harness = TestHarness::new();
        let service = ParcelService::new(harness.ctx.clone());
        let mut express = new_parcel();
        express.mode = DeliveryMode::Express;

        let created = service.create_parcel(express, None).await.unwrap();

        assert_eq!(created.price, 735);
    }

    #[tokio::test]
    async fn create_links_known_accounts_by_email() {
        let harness = TestHarness::new();
        let receiver = harness.seed_user("riley@example.com").await;
        let service = ParcelService::new(harness.ctx.clone());

        let created = service.create_parcel(new_parcel(), None).await.unwrap();

        assert_eq!(created.receiver_id, Some(receiver.id));
        assert_eq!(created.sender_id, None);
    }

    #[tokio::test]
    async fn identical_submission_is_a_conflict() {
        let harness = TestHarness::new();
        let service = ParcelService::new(harness.ctx.clone());

        service.create_parcel(new_parcel(), None).await.unwrap();
        let err = service.create_parcel(new_parcel(), None).await.unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn simultaneous_identical_submissions_store_one_parcel() {
        let harness = TestHarness::with_geo(SlowGeocoder(gazetteer()));
        let service = ParcelService::new(harness.ctx.clone());

        let (first, second) = tokio::join!(
            service.create_parcel(new_parcel(), None),
            service.create_parcel(new_parcel(), None),
        );

        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            outcomes
                .iter()
                .any(|r| matches!(r, Err(AppError::Conflict(_))))
        );
        assert_eq!(harness.store.list_parcels().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_guard_can_be_switched_off() {
        let mut harness = TestHarness::new();
        harness.ctx.policy.duplicate_guard = false;
        let service = ParcelService::new(harness.ctx.clone());

        let first = service.create_parcel(new_parcel(), None).await.unwrap();
        let second = service.create_parcel(new_parcel(), None).await.unwrap();

        assert_ne!(first.tracking_id, second.tracking_id);
    }

    #[tokio::test]
    async fn geocoding_failure_persists_nothing() {
        let mut geo = MockGeoProvider::new();
        geo.expect_geocode()
            .returning(|_| Err(GeoError::Provider("upstream 503".to_string())));
        let harness = TestHarness::with_geo(geo);
        let service = ParcelService::new(harness.ctx.clone());

        let err = service.create_parcel(new_parcel(), None).await.unwrap_err();

        assert!(matches!(err, AppError::Internal(_)), "got {err:?}");
        assert!(harness.store.list_parcels().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_place_is_bad_request() {
        let harness = TestHarness::new();
        let service = ParcelService::new(harness.ctx.clone());
        let mut lost = new_parcel();
        lost.destination = "Atlantis".to_string();

        let err = service.create_parcel(lost, None).await.unwrap_err();

        assert!(matches!(err, AppError::BadRequest(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn assign_available_driver() {
        let harness = TestHarness::new();
        let service = ParcelService::new(harness.ctx.clone());
        let created = service.create_parcel(new_parcel(), None).await.unwrap();
        let dana = harness.store.insert_driver(driver()).await.unwrap();

        let assigned = service.assign_driver(created.id, dana.id).await.unwrap();

        assert_eq!(assigned.status, ParcelStatus::Assigned);
        assert_eq!(assigned.driver_id, Some(dana.id));
        let history = harness.store.status_history(created.id).await.unwrap();
        assert_eq!(statuses(&history), vec![ParcelStatus::Pending, ParcelStatus::Assigned]);

        let stored_driver = harness.store.get_driver(dana.id).await.unwrap().unwrap();
        assert_eq!(stored_driver.status, DriverStatus::OnDelivery);
        assert!(!stored_driver.can_receive_assignments);
        assert_eq!(harness.notifications(), vec![(NotificationKind::Assignment, created.tracking_id)]);
    }

    #[tokio::test]
    async fn unavailable_driver_is_refused() {
        let harness = TestHarness::new();
        let service = ParcelService::new(harness.ctx.clone());
        let pending = harness.seed_parcel(parcel(ParcelStatus::Pending, None)).await;

        for status in [
            DriverStatus::OnDelivery,
            DriverStatus::OutSick,
            DriverStatus::OnLeave,
            DriverStatus::Suspended,
        ] {
            let mut off_duty = driver();
            off_duty.set_status(status, Utc::now());
            let off_duty = harness.store.insert_driver(off_duty).await.unwrap();

            let err = service.assign_driver(pending.id, off_duty.id).await.unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)), "{status:?}: got {err:?}");
        }

        let mut flagged = driver();
        flagged.can_receive_assignments = false;
        let flagged = harness.store.insert_driver(flagged).await.unwrap();
        let err = service.assign_driver(pending.id, flagged.id).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)), "got {err:?}");

        let unchanged = harness.store.get_parcel(pending.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, ParcelStatus::Pending);
        assert_eq!(unchanged.driver_id, None);
    }

    #[tokio::test]
    async fn assign_missing_entities_is_not_found() {
        let harness = TestHarness::new();
        let service = ParcelService::new(harness.ctx.clone());
        let pending = harness.seed_parcel(parcel(ParcelStatus::Pending, None)).await;
        let dana = harness.store.insert_driver(driver()).await.unwrap();

        let err = service.assign_driver(uuid::Uuid::new_v4(), dana.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let err = service.assign_driver(pending.id, uuid::Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn failed_assignment_notification_keeps_assignment() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send_assignment_notification()
            .times(1)
            .returning(|_, _| Err(NotifyError::Transport("smtp down".to_string())));
        let harness = TestHarness::with_notifier(notifier);
        let service = ParcelService::new(harness.ctx.clone());
        let pending = harness.seed_parcel(parcel(ParcelStatus::Pending, None)).await;
        let dana = harness.store.insert_driver(driver()).await.unwrap();

        let assigned = service.assign_driver(pending.id, dana.id).await.unwrap();

        assert_eq!(assigned.status, ParcelStatus::Assigned);
        let stored = harness.store.get_parcel(pending.id).await.unwrap().unwrap();
        assert_eq!(stored.driver_id, Some(dana.id));
    }

    #[tokio::test]
    async fn reassignment_frees_previous_driver() {
        let harness = TestHarness::new();
        let service = ParcelService::new(harness.ctx.clone());
        let pending = harness.seed_parcel(parcel(ParcelStatus::Pending, None)).await;
        let first = harness.store.insert_driver(driver()).await.unwrap();
        let second = harness.store.insert_driver(driver()).await.unwrap();

        service.assign_driver(pending.id, first.id).await.unwrap();
        let reassigned = service.assign_driver(pending.id, second.id).await.unwrap();

        assert_eq!(reassigned.driver_id, Some(second.id));
        let first_after = harness.store.get_driver(first.id).await.unwrap().unwrap();
        assert_eq!(first_after.status, DriverStatus::Available);
    }

    #[tokio::test]
    async fn unassign_resets_parcel_and_driver() {
        let harness = TestHarness::new();
        let service = ParcelService::new(harness.ctx.clone());
        let pending = harness.seed_parcel(parcel(ParcelStatus::Pending, None)).await;
        let dana = harness.store.insert_driver(driver()).await.unwrap();
        service.assign_driver(pending.id, dana.id).await.unwrap();

        let reverted = service.unassign_driver(pending.id).await.unwrap();

        assert_eq!(reverted.status, ParcelStatus::Pending);
        assert_eq!(reverted.driver_id, None);
        let dana_after = harness.store.get_driver(dana.id).await.unwrap().unwrap();
        assert_eq!(dana_after.status, DriverStatus::Available);
        assert!(dana_after.can_receive_assignments);

        let history = harness.store.status_history(pending.id).await.unwrap();
        assert_eq!(
            statuses(&history),
            vec![ParcelStatus::Pending, ParcelStatus::Assigned, ParcelStatus::Pending]
        );
    }

    #[tokio::test]
    async fn unassign_without_driver_is_bad_request() {
        let harness = TestHarness::new();
        let service = ParcelService::new(harness.ctx.clone());
        let pending = harness.seed_parcel(parcel(ParcelStatus::Pending, None)).await;

        let err = service.unassign_driver(pending.id).await.unwrap_err();

        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn unassign_after_pickup_is_conflict() {
        let harness = TestHarness::new();
        let service = ParcelService::new(harness.ctx.clone());
        let dana = harness.store.insert_driver(driver()).await.unwrap();

        for status in [
            ParcelStatus::PickedUpByDriver,
            ParcelStatus::InTransit,
            ParcelStatus::Delivered,
            ParcelStatus::CollectedByReceiver,
        ] {
            let handled = harness.seed_parcel(parcel(status, Some(dana.id))).await;

            let err = service.unassign_driver(handled.id).await.unwrap_err();
            assert!(matches!(err, AppError::Conflict(_)), "{status:?}: got {err:?}");

            let unchanged = harness.store.get_parcel(handled.id).await.unwrap().unwrap();
            assert_eq!(unchanged.status, status);
            assert_eq!(unchanged.driver_id, Some(dana.id));
        }
    }

    #[tokio::test]
    async fn driver_update_requires_assigned_driver() {
        let harness = TestHarness::new();
        let service = ParcelService::new(harness.ctx.clone());
        let dana = harness.store.insert_driver(driver()).await.unwrap();
        let assigned = harness.seed_parcel(parcel(ParcelStatus::Assigned, Some(dana.id))).await;

        let err = service
            .update_parcel_status(assigned.id, ParcelStatus::InTransit, uuid::Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let picked = service
            .update_parcel_status(assigned.id, ParcelStatus::PickedUpByDriver, dana.id)
            .await
            .unwrap();
        assert_eq!(picked.status, ParcelStatus::PickedUpByDriver);
        assert!(picked.picked_at.is_some());

        let history = harness.store.status_history(assigned.id).await.unwrap();
        let last = history.last().unwrap();
        assert_eq!(last.status, ParcelStatus::PickedUpByDriver);
        assert_eq!(Some(last.updated_at), picked.picked_at);
    }

    #[tokio::test]
    async fn driver_delivery_stamps_and_notifies() {
        let harness = TestHarness::new();
        let service = ParcelService::new(harness.ctx.clone());
        let dana = harness.store.insert_driver(driver()).await.unwrap();
        let moving = harness.seed_parcel(parcel(ParcelStatus::InTransit, Some(dana.id))).await;

        let delivered = service
            .update_parcel_status(moving.id, ParcelStatus::Delivered, dana.id)
            .await
            .unwrap();

        assert_eq!(delivered.delivered_at, Some(delivered.updated_at));
        assert_eq!(harness.notifications(), vec![(NotificationKind::Delivery, moving.tracking_id)]);
    }

    #[tokio::test]
    async fn delivered_only_moves_to_collected() {
        let harness = TestHarness::new();
        let service = ParcelService::new(harness.ctx.clone());
        let dana = harness.store.insert_driver(driver()).await.unwrap();
        let delivered = harness.seed_parcel(parcel(ParcelStatus::Delivered, Some(dana.id))).await;

        for next in [
            ParcelStatus::Pending,
            ParcelStatus::Assigned,
            ParcelStatus::PickedUpByDriver,
            ParcelStatus::InTransit,
            ParcelStatus::Delivered,
            ParcelStatus::Cancelled,
        ] {
            let err = service
                .update_parcel_status_general(delivered.id, next)
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)), "{next:?}: got {err:?}");
        }

        let collected = service
            .update_parcel_status_general(delivered.id, ParcelStatus::CollectedByReceiver)
            .await
            .unwrap();
        assert_eq!(collected.status, ParcelStatus::CollectedByReceiver);
    }

    #[tokio::test]
    async fn cancelled_is_absorbing() {
        let harness = TestHarness::new();
        let service = ParcelService::new(harness.ctx.clone());
        let pending = harness.seed_parcel(parcel(ParcelStatus::Pending, None)).await;

        service
            .update_parcel_status_general(pending.id, ParcelStatus::Cancelled)
            .await
            .unwrap();
        let err = service
            .update_parcel_status_general(pending.id, ParcelStatus::Pending)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn completing_frees_driver_without_other_active_parcels() {
        let harness = TestHarness::new();
        let service = ParcelService::new(harness.ctx.clone());
        let mut dana = driver();
        dana.engage(Utc::now());
        let dana = harness.store.insert_driver(dana).await.unwrap();
        let delivered = harness.seed_parcel(parcel(ParcelStatus::Delivered, Some(dana.id))).await;

        service
            .update_parcel_status_general(delivered.id, ParcelStatus::CollectedByReceiver)
            .await
            .unwrap();

        let dana_after = harness.store.get_driver(dana.id).await.unwrap().unwrap();
        assert_eq!(dana_after.status, DriverStatus::Available);
        assert!(dana_after.can_receive_assignments);
    }

    #[tokio::test]
    async fn completing_keeps_driver_with_other_active_parcel() {
        let harness = TestHarness::new();
        let service = ParcelService::new(harness.ctx.clone());
        let mut dana = driver();
        dana.engage(Utc::now());
        let dana = harness.store.insert_driver(dana).await.unwrap();
        let assigned = harness.seed_parcel(parcel(ParcelStatus::Assigned, Some(dana.id))).await;
        harness
            .seed_parcel(parcel(ParcelStatus::InTransit, Some(dana.id)))
            .await;

        service
            .update_parcel_status_general(assigned.id, ParcelStatus::Cancelled)
            .await
            .unwrap();

        let dana_after = harness.store.get_driver(dana.id).await.unwrap().unwrap();
        assert_eq!(dana_after.status, DriverStatus::OnDelivery);
    }

    #[test]
    fn status_requiring_driver_needs_one() {
        let pending = parcel(ParcelStatus::Pending, None);

        assert!(check_transition(&pending, ParcelStatus::InTransit).is_err());
        assert!(check_transition(&pending, ParcelStatus::Cancelled).is_ok());
    }

    #[tokio::test]
    async fn receiver_collects_delivered_parcel() {
        let harness = TestHarness::new();
        let service = ParcelService::new(harness.ctx.clone());
        let riley = harness.seed_user("riley@example.com").await;
        let mut dana = driver();
        dana.engage(Utc::now());
        let dana = harness.store.insert_driver(dana).await.unwrap();
        let mut delivered = parcel(ParcelStatus::Delivered, Some(dana.id));
        delivered.receiver_id = Some(riley.id);
        let delivered = harness.seed_parcel(delivered).await;

        let collected = service
            .mark_parcel_collected_by_receiver(delivered.id, riley.id)
            .await
            .unwrap();

        assert_eq!(collected.status, ParcelStatus::CollectedByReceiver);
        let history = harness.store.status_history(delivered.id).await.unwrap();
        assert_eq!(
            statuses(&history),
            vec![ParcelStatus::Delivered, ParcelStatus::CollectedByReceiver]
        );
        let dana_after = harness.store.get_driver(dana.id).await.unwrap().unwrap();
        assert_eq!(dana_after.status, DriverStatus::Available);
    }

    #[tokio::test]
    async fn collection_retries_a_failed_log_append_once() {
        let (result, reconciled, written, attempts) = collect_with_flaky_log(1).await;

        let collected = result.unwrap();
        assert_eq!(collected.status, ParcelStatus::CollectedByReceiver);
        assert_eq!(reconciled, collected.driver_id);
        assert_eq!(attempts, 2);
        assert_eq!(statuses(&written), vec![ParcelStatus::CollectedByReceiver]);
    }

    #[tokio::test]
    async fn collection_succeeds_when_log_append_keeps_failing() {
        let (result, reconciled, written, attempts) = collect_with_flaky_log(2).await;

        let collected = result.unwrap();
        assert_eq!(collected.status, ParcelStatus::CollectedByReceiver);
        assert_eq!(reconciled, collected.driver_id);
        assert_eq!(attempts, 2);
        assert!(written.is_empty());
    }

    #[tokio::test]
    async fn general_update_cannot_reset_an_assigned_parcel() {
        let harness = TestHarness::new();
        let service = ParcelService::new(harness.ctx.clone());
        let mut dana = driver();
        dana.engage(Utc::now());
        let dana = harness.store.insert_driver(dana).await.unwrap();
        let assigned = harness.seed_parcel(parcel(ParcelStatus::Assigned, Some(dana.id))).await;

        let err = service
            .update_parcel_status_general(assigned.id, ParcelStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)), "got {err:?}");

        let unchanged = harness.store.get_parcel(assigned.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, ParcelStatus::Assigned);
        assert_eq!(unchanged.driver_id, Some(dana.id));

        let reset = service.unassign_driver(assigned.id).await.unwrap();
        assert_eq!(reset.status, ParcelStatus::Pending);
        let dana_after = harness.store.get_driver(dana.id).await.unwrap().unwrap();
        assert_eq!(dana_after.status, DriverStatus::Available);
    }

    #[tokio::test]
    async fn only_receiver_collects_and_only_when_delivered() {
        let harness = TestHarness::new();
        let service = ParcelService::new(harness.ctx.clone());
        let riley = harness.seed_user("riley@example.com").await;
        let dana = harness.store.insert_driver(driver()).await.unwrap();

        let mut moving = parcel(ParcelStatus::InTransit, Some(dana.id));
        moving.receiver_id = Some(riley.id);
        let moving = harness.seed_parcel(moving).await;

        let err = service
            .mark_parcel_collected_by_receiver(moving.id, riley.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err = service
            .mark_parcel_collected_by_receiver(moving.id, uuid::Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn dashboard_aggregates_processed_parcels() {
        let harness = TestHarness::new();
        let service = ParcelService::new(harness.ctx.clone());
        harness.seed_user("riley@example.com").await;
        let dana = harness.store.insert_driver(driver()).await.unwrap();
        let mut archived = driver();
        archived.deleted_at = Some(Utc::now());
        harness.store.insert_driver(archived).await.unwrap();

        for (status, price) in [
            (ParcelStatus::Pending, 1_000),
            (ParcelStatus::Cancelled, 1_000),
            (ParcelStatus::Assigned, 100),
            (ParcelStatus::InTransit, 200),
            (ParcelStatus::PickedUpByDriver, 300),
            (ParcelStatus::Delivered, 400),
            (ParcelStatus::CollectedByReceiver, 500),
        ] {
            let driver_id = status.requires_driver().then_some(dana.id);
            let mut seeded = parcel(status, driver_id);
            seeded.price = price;
            harness.seed_parcel(seeded).await;
        }

        let metrics = service.get_dashboard_metrics().await.unwrap();

        assert_eq!(metrics.total_earned, 1_500);
        assert_eq!(metrics.total_users, 1);
        assert_eq!(metrics.active_drivers, 1);
        assert_eq!(metrics.parcels_in_flight, 2);
        assert_eq!(metrics.parcels_completed, 2);
        assert_eq!(metrics.recent_parcels.len(), 5);
    }

    #[tokio::test]
    async fn manual_notification_surfaces_failure() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send_delivery_notification()
            .returning(|_| Err(NotifyError::Rejected(500)));
        let harness = TestHarness::with_notifier(notifier);
        let service = ParcelService::new(harness.ctx.clone());
        let pending = harness.seed_parcel(parcel(ParcelStatus::Delivered, None)).await;

        let err = service
            .notify(pending.id, NotificationKind::Delivery)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Internal(_)));
    }

    #[tokio::test]
    async fn history_of_unknown_parcel_is_not_found() {
        let harness = TestHarness::new();
        let service = ParcelService::new(harness.ctx.clone());

        let err = service.status_history(uuid::Uuid::new_v4()).await.unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
    }
}
