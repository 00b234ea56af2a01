use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::parcel::{Parcel, ParcelStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParcelEvent {
    pub parcel_id: Uuid,
    pub tracking_id: String,
    pub status: ParcelStatus,
    pub driver_id: Option<Uuid>,
    pub at: DateTime<Utc>,
}

impl From<&Parcel> for ParcelEvent {
    fn from(parcel: &Parcel) -> Self {
        Self {
            parcel_id: parcel.id,
            tracking_id: parcel.tracking_id.clone(),
            status: parcel.status,
            driver_id: parcel.driver_id,
            at: parcel.updated_at,
        }
    }
}
