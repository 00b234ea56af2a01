use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::parcel::ParcelStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParcelStatusLog {
    pub id: Uuid,
    pub parcel_id: Uuid,
    pub status: ParcelStatus,
    pub updated_at: DateTime<Utc>,
}

impl ParcelStatusLog {
    pub fn new(parcel_id: Uuid, status: ParcelStatus, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            parcel_id,
            status,
            updated_at,
        }
    }
}
