use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::engine::{Context, Policy};
use crate::geo::{Gazetteer, GeoProvider};
use crate::models::driver::{Driver, GeoPoint, VehicleMode};
use crate::models::parcel::{DeliveryMode, NewParcel, Parcel, ParcelStatus, ParcelType};
use crate::models::status_log::ParcelStatusLog;
use crate::models::user::{Role, User};
use crate::notify::{NotificationKind, Notifier, NotifyError};
use crate::store::{MemoryStore, ParcelStore};

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn driver() -> Driver {
    Driver::new(
        "Dana".to_string(),
        format!("driver-{}@example.com", Uuid::new_v4().simple()),
        VehicleMode::Van,
        Utc::now(),
    )
}

pub fn parcel(status: ParcelStatus, driver_id: Option<Uuid>) -> Parcel {
    let now = Utc::now();

    Parcel {
        id: Uuid::new_v4(),
        tracking_id: format!("TEST-{}", Uuid::new_v4().simple()),
        sender_name: "Sam".to_string(),
        sender_email: "sam@example.com".to_string(),
        receiver_name: "Riley".to_string(),
        receiver_email: "riley@example.com".to_string(),
        sender_id: None,
        receiver_id: None,
        origin: "Lagos".to_string(),
        destination: "Ibadan".to_string(),
        origin_point: Some(GeoPoint { lat: 0.0, lng: 0.0 }),
        destination_point: Some(ten_km_north()),
        parcel_type: ParcelType::BoxedPackage,
        weight: 2.0,
        mode: DeliveryMode::Standard,
        distance_km: 10.0,
        price: 490,
        description: None,
        status,
        driver_id,
        sent_at: now,
        picked_at: None,
        delivered_at: None,
        updated_at: now,
        version: 0,
    }
}

pub fn new_parcel() -> NewParcel {
    NewParcel {
        sender_name: "Sam".to_string(),
        sender_email: "sam@example.com".to_string(),
        receiver_name: "Riley".to_string(),
        receiver_email: "riley@example.com".to_string(),
        origin: "Lagos".to_string(),
        destination: "Ibadan".to_string(),
        parcel_type: ParcelType::BoxedPackage,
        weight: 2.0,
        mode: DeliveryMode::Standard,
        description: Some("books".to_string()),
    }
}

fn ten_km_north() -> GeoPoint {
    GeoPoint {
        lat: (10.0 / EARTH_RADIUS_KM).to_degrees(),
        lng: 0.0,
    }
}

pub fn gazetteer() -> Gazetteer {
    Gazetteer::new()
        .with_place("Lagos", GeoPoint { lat: 0.0, lng: 0.0 })
        .with_place("Ibadan", ten_km_north())
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(NotificationKind, String)>>,
}

impl RecordingNotifier {
    fn record(&self, kind: NotificationKind, parcel: &Parcel) {
        self.sent
            .lock()
            .unwrap()
            .push((kind, parcel.tracking_id.clone()));
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_assignment_notification(&self, _driver: &Driver, parcel: &Parcel) -> Result<(), NotifyError> {
        self.record(NotificationKind::Assignment, parcel);
        Ok(())
    }

    async fn send_delivery_notification(&self, parcel: &Parcel) -> Result<(), NotifyError> {
        self.record(NotificationKind::Delivery, parcel);
        Ok(())
    }

    async fn send_location_update_notification(
        &self,
        parcel: &Parcel,
        _location: &str,
    ) -> Result<(), NotifyError> {
        self.record(NotificationKind::LocationUpdate, parcel);
        Ok(())
    }
}

pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub ctx: Context,
    recorder: Arc<RecordingNotifier>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_geo(gazetteer())
    }

    pub fn with_geo(geo: impl GeoProvider + 'static) -> Self {
        let recorder = Arc::new(RecordingNotifier::default());
        Self::build(Arc::new(geo), recorder.clone(), recorder)
    }

    pub fn with_notifier(notifier: impl Notifier + 'static) -> Self {
        Self::build(
            Arc::new(gazetteer()),
            Arc::new(notifier),
            Arc::new(RecordingNotifier::default()),
        )
    }

    fn build(geo: Arc<dyn GeoProvider>, notifier: Arc<dyn Notifier>, recorder: Arc<RecordingNotifier>) -> Self {
        let store = Arc::new(MemoryStore::new(100_000));
        let ctx = Context::new(store.clone(), geo, notifier, Policy::default(), 16);

        Self { store, ctx, recorder }
    }

    pub fn notifications(&self) -> Vec<(NotificationKind, String)> {
        self.recorder.sent.lock().unwrap().clone()
    }

    pub async fn seed_parcel(&self, parcel: Parcel) -> Parcel {
        let log = ParcelStatusLog::new(parcel.id, parcel.status, parcel.updated_at);
        self.store.insert_parcel(parcel, log, false).await.unwrap()
    }

    pub async fn seed_user(&self, email: &str) -> User {
        self.store
            .insert_user(User {
                id: Uuid::new_v4(),
                name: "Riley".to_string(),
                email: email.to_string(),
                role: Role::User,
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }
}
