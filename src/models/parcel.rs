use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::GeoPoint;
use crate::models::status_log::ParcelStatusLog;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParcelType {
    BoxedPackage,
    Envelope,
    Bag,
    Suitcase,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryMode {
    Standard,
    Express,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParcelStatus {
    Pending,
    Assigned,
    PickedUpByDriver,
    InTransit,
    Delivered,
    CollectedByReceiver,
    Cancelled,
}

impl ParcelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Assigned => "ASSIGNED",
            Self::PickedUpByDriver => "PICKED_UP_BY_DRIVER",
            Self::InTransit => "IN_TRANSIT",
            Self::Delivered => "DELIVERED",
            Self::CollectedByReceiver => "COLLECTED_BY_RECEIVER",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn requires_driver(self) -> bool {
        matches!(
            self,
            Self::Assigned | Self::PickedUpByDriver | Self::InTransit | Self::Delivered
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::PickedUpByDriver | Self::InTransit | Self::Delivered)
    }

    pub fn is_processed(self) -> bool {
        !matches!(self, Self::Pending | Self::Cancelled)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::PickedUpByDriver | Self::InTransit)
    }

    pub fn is_completed(self) -> bool {
        matches!(self, Self::Delivered | Self::CollectedByReceiver)
    }

    pub fn is_handled(self) -> bool {
        matches!(
            self,
            Self::PickedUpByDriver | Self::InTransit | Self::Delivered | Self::CollectedByReceiver
        )
    }

    pub fn is_location_trackable(self) -> bool {
        matches!(self, Self::Assigned | Self::PickedUpByDriver | Self::InTransit)
    }

    pub fn releases_driver(self) -> bool {
        matches!(self, Self::CollectedByReceiver | Self::Cancelled)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::CollectedByReceiver | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parcel {
    pub id: Uuid,
    pub tracking_id: String,
    pub sender_name: String,
    pub sender_email: String,
    pub receiver_name: String,
    pub receiver_email: String,
    pub sender_id: Option<Uuid>,
    pub receiver_id: Option<Uuid>,
    pub origin: String,
    pub destination: String,
    pub origin_point: Option<GeoPoint>,
    pub destination_point: Option<GeoPoint>,
    pub parcel_type: ParcelType,
    pub weight: f64,
    pub mode: DeliveryMode,
    pub distance_km: f64,
    pub price: u64,
    pub description: Option<String>,
    pub status: ParcelStatus,
    pub driver_id: Option<Uuid>,
    pub sent_at: DateTime<Utc>,
    pub picked_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Parcel {
    pub fn apply_status(&mut self, status: ParcelStatus, at: DateTime<Utc>) -> ParcelStatusLog {
        self.status = status;
        self.updated_at = at;

        match status {
            ParcelStatus::PickedUpByDriver => self.picked_at = Some(at),
            ParcelStatus::Delivered => self.delivered_at = Some(at),
            _ => {}
        }

        ParcelStatusLog::new(self.id, status, at)
    }

    pub fn fingerprint(&self) -> ParcelFingerprint {
        ParcelFingerprint {
            sender_name: self.sender_name.clone(),
            sender_email: self.sender_email.clone(),
            receiver_name: self.receiver_name.clone(),
            receiver_email: self.receiver_email.clone(),
            origin: self.origin.clone(),
            destination: self.destination.clone(),
            parcel_type: self.parcel_type,
            weight: self.weight,
            mode: self.mode,
            description: self.description.clone(),
        }
    }

    pub fn summary(&self) -> ParcelSummary {
        ParcelSummary {
            id: self.id,
            tracking_id: self.tracking_id.clone(),
            sender_name: self.sender_name.clone(),
            receiver_name: self.receiver_name.clone(),
            destination: self.destination.clone(),
            status: self.status,
            price: self.price,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParcelFingerprint {
    pub sender_name: String,
    pub sender_email: String,
    pub receiver_name: String,
    pub receiver_email: String,
    pub origin: String,
    pub destination: String,
    pub parcel_type: ParcelType,
    pub weight: f64,
    pub mode: DeliveryMode,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewParcel {
    pub sender_name: String,
    pub sender_email: String,
    pub receiver_name: String,
    pub receiver_email: String,
    pub origin: String,
    pub destination: String,
    pub parcel_type: ParcelType,
    pub weight: f64,
    pub mode: DeliveryMode,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewParcel {
    pub fn validate(&self) -> Result<(), String> {
        let required = [
            ("sender_name", &self.sender_name),
            ("sender_email", &self.sender_email),
            ("receiver_name", &self.receiver_name),
            ("receiver_email", &self.receiver_email),
            ("origin", &self.origin),
            ("destination", &self.destination),
        ];

        if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(format!("{field} cannot be empty"));
        }

        if !self.weight.is_finite() || self.weight <= 0.0 {
            return Err("weight must be > 0".to_string());
        }

        Ok(())
    }

    pub fn fingerprint(&self) -> ParcelFingerprint {
        ParcelFingerprint {
            sender_name: self.sender_name.clone(),
            sender_email: self.sender_email.clone(),
            receiver_name: self.receiver_name.clone(),
            receiver_email: self.receiver_email.clone(),
            origin: self.origin.clone(),
            destination: self.destination.clone(),
            parcel_type: self.parcel_type,
            weight: self.weight,
            mode: self.mode,
            description: self.description.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParcelSummary {
    pub id: Uuid,
    pub tracking_id: String,
    pub sender_name: String,
    pub receiver_name: String,
    pub destination: String,
    pub status: ParcelStatus,
    pub price: u64,
    pub updated_at: DateTime<Utc>,
}
