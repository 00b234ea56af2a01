pub mod memory;

use async_trait::async_trait;
use mockall::automock;
use thiserror::Error;
use uuid::Uuid;

use crate::models::driver::Driver;
use crate::models::parcel::{Parcel, ParcelFingerprint};
use crate::models::status_log::ParcelStatusLog;
use crate::models::user::User;

pub use memory::MemoryStore;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} was modified concurrently")]
    StaleWrite(String),

    #[error("{0} already exists")]
    Duplicate(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub parcel: Option<Parcel>,
    pub driver: Option<Driver>,
    pub reconcile_driver: Option<Uuid>,
    pub log: Option<ParcelStatusLog>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parcel(mut self, parcel: Parcel) -> Self {
        self.parcel = Some(parcel);
        self
    }

    pub fn with_driver(mut self, driver: Driver) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Re-evaluates the driver's availability after the rest of the batch is
    /// applied, inside the same commit.
    pub fn reconciling(mut self, driver_id: Uuid) -> Self {
        self.reconcile_driver = Some(driver_id);
        self
    }

    pub fn with_log(mut self, log: ParcelStatusLog) -> Self {
        self.log = Some(log);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Committed {
    pub parcel: Option<Parcel>,
    pub driver: Option<Driver>,
    pub released_driver: Option<Driver>,
}

#[automock]
#[async_trait]
pub trait ParcelStore: Send + Sync {
    async fn insert_user(&self, user: User) -> Result<User, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    async fn count_users(&self) -> Result<usize, StoreError>;

    async fn insert_driver(&self, driver: Driver) -> Result<Driver, StoreError>;

    async fn get_driver(&self, id: Uuid) -> Result<Option<Driver>, StoreError>;

    async fn list_drivers(&self) -> Result<Vec<Driver>, StoreError>;

    async fn count_active_drivers(&self) -> Result<usize, StoreError>;

    async fn delete_driver(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Inserts a new parcel with its first history row. Fails with
    /// [`StoreError::Duplicate`] when the tracking id is taken or, with
    /// `unique_fingerprint`, when an identical parcel already exists.
    async fn insert_parcel(
        &self,
        parcel: Parcel,
        log: ParcelStatusLog,
        unique_fingerprint: bool,
    ) -> Result<Parcel, StoreError>;

    async fn get_parcel(&self, id: Uuid) -> Result<Option<Parcel>, StoreError>;

    async fn find_parcel_by_tracking_id(&self, tracking_id: &str) -> Result<Option<Parcel>, StoreError>;

    async fn find_parcel_by_fingerprint(
        &self,
        fingerprint: &ParcelFingerprint,
    ) -> Result<Option<Parcel>, StoreError>;

    async fn list_parcels(&self) -> Result<Vec<Parcel>, StoreError>;

    async fn list_parcels_for_driver(&self, driver_id: Uuid) -> Result<Vec<Parcel>, StoreError>;

    async fn tracking_id_exists(&self, tracking_id: &str) -> Result<bool, StoreError>;

    async fn next_tracking_sequence(&self) -> Result<u64, StoreError>;

    async fn commit(&self, batch: WriteBatch) -> Result<Committed, StoreError>;

    async fn append_status_log(&self, log: ParcelStatusLog) -> Result<(), StoreError>;

    async fn status_history(&self, parcel_id: Uuid) -> Result<Vec<ParcelStatusLog>, StoreError>;
}
