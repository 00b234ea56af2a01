use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::driver::Driver;
use crate::models::parcel::{Parcel, ParcelFingerprint};
use crate::models::status_log::ParcelStatusLog;
use crate::models::user::User;
use crate::store::{Committed, ParcelStore, StoreError, WriteBatch};

pub struct MemoryStore {
    users: DashMap<Uuid, User>,
    drivers: DashMap<Uuid, Driver>,
    parcels: DashMap<Uuid, Parcel>,
    tracking_ids: DashMap<String, Uuid>,
    status_logs: DashMap<Uuid, Vec<ParcelStatusLog>>,
    tracking_sequence: AtomicU64,
    commit_lock: Mutex<()>,
}

impl MemoryStore {
    pub fn new(tracking_seed: u64) -> Self {
        Self {
            users: DashMap::new(),
            drivers: DashMap::new(),
            parcels: DashMap::new(),
            tracking_ids: DashMap::new(),
            status_logs: DashMap::new(),
            tracking_sequence: AtomicU64::new(tracking_seed),
            commit_lock: Mutex::new(()),
        }
    }

    fn active_parcels_for(&self, driver_id: Uuid, excluding: Option<Uuid>) -> usize {
        self.parcels
            .iter()
            .filter(|entry| {
                let parcel = entry.value();
                parcel.driver_id == Some(driver_id)
                    && Some(parcel.id) != excluding
                    && parcel.status.is_active()
            })
            .count()
    }

    fn push_log(&self, log: ParcelStatusLog) {
        self.status_logs.entry(log.parcel_id).or_default().push(log);
    }
}

fn check_version(kind: &str, id: Uuid, stored: Option<u64>, incoming: u64) -> Result<(), StoreError> {
    match stored {
        None => Err(StoreError::NotFound(format!("{kind} {id}"))),
        Some(version) if version != incoming => Err(StoreError::StaleWrite(format!("{kind} {id}"))),
        Some(_) => Ok(()),
    }
}

#[async_trait]
impl ParcelStore for MemoryStore {
    async fn insert_user(&self, user: User) -> Result<User, StoreError> {
        let _guard = self.commit_lock.lock().await;

        let email_taken = self
            .users
            .iter()
            .any(|entry| entry.value().email.eq_ignore_ascii_case(&user.email));
        if email_taken {
            return Err(StoreError::Duplicate(format!("user {}", user.email)));
        }

        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .iter()
            .find(|entry| entry.value().email.eq_ignore_ascii_case(email))
            .map(|entry| entry.value().clone()))
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.users.iter().map(|entry| entry.value().clone()).collect())
    }

    async fn count_users(&self) -> Result<usize, StoreError> {
        Ok(self.users.len())
    }

    async fn insert_driver(&self, driver: Driver) -> Result<Driver, StoreError> {
        let _guard = self.commit_lock.lock().await;

        let email_taken = self.drivers.iter().any(|entry| {
            let existing = entry.value();
            !existing.is_archived() && existing.email.eq_ignore_ascii_case(&driver.email)
        });
        if email_taken {
            return Err(StoreError::Duplicate(format!("driver {}", driver.email)));
        }

        self.drivers.insert(driver.id, driver.clone());
        Ok(driver)
    }

    async fn get_driver(&self, id: Uuid) -> Result<Option<Driver>, StoreError> {
        Ok(self.drivers.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list_drivers(&self) -> Result<Vec<Driver>, StoreError> {
        Ok(self.drivers.iter().map(|entry| entry.value().clone()).collect())
    }

    async fn count_active_drivers(&self) -> Result<usize, StoreError> {
        Ok(self
            .drivers
            .iter()
            .filter(|entry| !entry.value().is_archived())
            .count())
    }

    async fn delete_driver(&self, id: Uuid) -> Result<bool, StoreError> {
        let _guard = self.commit_lock.lock().await;
        Ok(self.drivers.remove(&id).is_some())
    }

    async fn insert_parcel(
        &self,
        parcel: Parcel,
        log: ParcelStatusLog,
        unique_fingerprint: bool,
    ) -> Result<Parcel, StoreError> {
        let _guard = self.commit_lock.lock().await;

        if self.tracking_ids.contains_key(&parcel.tracking_id) {
            return Err(StoreError::Duplicate(format!("tracking id {}", parcel.tracking_id)));
        }

        if unique_fingerprint {
            let fingerprint = parcel.fingerprint();
            if let Some(existing) = self
                .parcels
                .iter()
                .find(|entry| entry.value().fingerprint() == fingerprint)
            {
                return Err(StoreError::Duplicate(format!(
                    "identical parcel {}",
                    existing.value().tracking_id
                )));
            }
        }

        self.tracking_ids.insert(parcel.tracking_id.clone(), parcel.id);
        self.parcels.insert(parcel.id, parcel.clone());
        self.push_log(log);

        Ok(parcel)
    }

    async fn get_parcel(&self, id: Uuid) -> Result<Option<Parcel>, StoreError> {
        Ok(self.parcels.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_parcel_by_tracking_id(&self, tracking_id: &str) -> Result<Option<Parcel>, StoreError> {
        let Some(id) = self.tracking_ids.get(tracking_id).map(|entry| *entry.value()) else {
            return Ok(None);
        };

        Ok(self.parcels.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_parcel_by_fingerprint(
        &self,
        fingerprint: &ParcelFingerprint,
    ) -> Result<Option<Parcel>, StoreError> {
        Ok(self
            .parcels
            .iter()
            .find(|entry| entry.value().fingerprint() == *fingerprint)
            .map(|entry| entry.value().clone()))
    }

    async fn list_parcels(&self) -> Result<Vec<Parcel>, StoreError> {
        Ok(self.parcels.iter().map(|entry| entry.value().clone()).collect())
    }

    async fn list_parcels_for_driver(&self, driver_id: Uuid) -> Result<Vec<Parcel>, StoreError> {
        Ok(self
            .parcels
            .iter()
            .filter(|entry| entry.value().driver_id == Some(driver_id))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn tracking_id_exists(&self, tracking_id: &str) -> Result<bool, StoreError> {
        Ok(self.tracking_ids.contains_key(tracking_id))
    }

    async fn next_tracking_sequence(&self) -> Result<u64, StoreError> {
        Ok(self.tracking_sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<Committed, StoreError> {
        let _guard = self.commit_lock.lock().await;

        if let Some(parcel) = &batch.parcel {
            let stored = self.parcels.get(&parcel.id).map(|entry| entry.value().version);
            check_version("parcel", parcel.id, stored, parcel.version)?;
        }
        if let Some(driver) = &batch.driver {
            let stored = self.drivers.get(&driver.id).map(|entry| entry.value().version);
            check_version("driver", driver.id, stored, driver.version)?;
        }

        let mut committed = Committed::default();

        if let Some(mut parcel) = batch.parcel {
            parcel.version += 1;
            self.parcels.insert(parcel.id, parcel.clone());
            committed.parcel = Some(parcel);
        }

        if let Some(mut driver) = batch.driver {
            driver.version += 1;
            self.drivers.insert(driver.id, driver.clone());
            committed.driver = Some(driver);
        }

        if let Some(log) = batch.log {
            self.push_log(log);
        }

        if let Some(driver_id) = batch.reconcile_driver {
            let excluding = committed.parcel.as_ref().map(|parcel| parcel.id);
            let other_active = self.active_parcels_for(driver_id, excluding);

            if let Some(mut entry) = self.drivers.get_mut(&driver_id) {
                let driver = entry.value_mut();
                if driver.reconcile_availability(other_active, Utc::now()) {
                    driver.version += 1;
                    committed.released_driver = Some(driver.clone());
                }
            }

            if let Some(released) = &committed.released_driver {
                if committed.driver.as_ref().is_some_and(|driver| driver.id == released.id) {
                    committed.driver = Some(released.clone());
                }
            }
        }

        Ok(committed)
    }

    async fn append_status_log(&self, log: ParcelStatusLog) -> Result<(), StoreError> {
        if !self.parcels.contains_key(&log.parcel_id) {
            return Err(StoreError::NotFound(format!("parcel {}", log.parcel_id)));
        }

        self.push_log(log);
        Ok(())
    }

    async fn status_history(&self, parcel_id: Uuid) -> Result<Vec<ParcelStatusLog>, StoreError> {
        let mut history = self
            .status_logs
            .get(&parcel_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        history.sort_by_key(|log| log.updated_at);
        Ok(history)
    }
}
