use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleMode {
    Bike,
    Motorbike,
    Car,
    Van,
    Truck,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverStatus {
    Available,
    OnDelivery,
    OutSick,
    OnLeave,
    Suspended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub mode: VehicleMode,
    pub status: DriverStatus,
    pub can_receive_assignments: bool,
    pub current_location: Option<String>,
    pub current_point: Option<GeoPoint>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl Driver {
    pub fn new(name: String, email: String, mode: VehicleMode, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            email,
            mode,
            status: DriverStatus::Available,
            can_receive_assignments: true,
            current_location: None,
            current_point: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            version: 0,
        }
    }

    pub fn is_archived(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn accepts_assignments(&self) -> bool {
        !self.is_archived()
            && self.status == DriverStatus::Available
            && self.can_receive_assignments
    }

    pub fn set_status(&mut self, status: DriverStatus, now: DateTime<Utc>) {
        self.status = status;
        self.can_receive_assignments = status == DriverStatus::Available;
        self.updated_at = now;
    }

    pub fn engage(&mut self, now: DateTime<Utc>) {
        self.set_status(DriverStatus::OnDelivery, now);
    }

    pub fn release(&mut self, now: DateTime<Utc>) {
        self.set_status(DriverStatus::Available, now);
    }

    /// Frees a driver that is out on delivery once none of their parcels are
    /// still in flight. Statuses set by an admin are left alone. Returns
    /// whether the driver changed.
    pub fn reconcile_availability(&mut self, other_active_parcels: usize, now: DateTime<Utc>) -> bool {
        if other_active_parcels > 0 || self.is_archived() || self.status != DriverStatus::OnDelivery {
            return false;
        }

        self.release(now);
        true
    }
}
