use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::models::driver::Driver;
use crate::models::parcel::Parcel;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Assignment,
    Delivery,
    LocationUpdate,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Assignment => "assignment",
            NotificationKind::Delivery => "delivery",
            NotificationKind::LocationUpdate => "location_update",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum NotifyError {
    #[error("notification transport failed: {0}")]
    Transport(String),

    #[error("notification rejected with status {0}")]
    Rejected(u16),
}

#[automock]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_assignment_notification(&self, driver: &Driver, parcel: &Parcel) -> Result<(), NotifyError>;

    async fn send_delivery_notification(&self, parcel: &Parcel) -> Result<(), NotifyError>;

    async fn send_location_update_notification(
        &self,
        parcel: &Parcel,
        location: &str,
    ) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_assignment_notification(&self, driver: &Driver, parcel: &Parcel) -> Result<(), NotifyError> {
        info!(
            to = %driver.email,
            tracking_id = %parcel.tracking_id,
            "assignment notification"
        );
        Ok(())
    }

    async fn send_delivery_notification(&self, parcel: &Parcel) -> Result<(), NotifyError> {
        info!(
            sender = %parcel.sender_email,
            receiver = %parcel.receiver_email,
            tracking_id = %parcel.tracking_id,
            "delivery notification"
        );
        Ok(())
    }

    async fn send_location_update_notification(
        &self,
        parcel: &Parcel,
        location: &str,
    ) -> Result<(), NotifyError> {
        info!(
            receiver = %parcel.receiver_email,
            tracking_id = %parcel.tracking_id,
            location,
            "location update notification"
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| NotifyError::Transport(format!("failed to build client: {err}")))?;

        Ok(Self { client, url })
    }

    async fn post(&self, payload: serde_json::Value) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|err| NotifyError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_assignment_notification(&self, driver: &Driver, parcel: &Parcel) -> Result<(), NotifyError> {
        self.post(json!({
            "kind": NotificationKind::Assignment,
            "to": [driver.email],
            "driver_name": driver.name,
            "tracking_id": parcel.tracking_id,
            "origin": parcel.origin,
            "destination": parcel.destination,
        }))
        .await
    }

    async fn send_delivery_notification(&self, parcel: &Parcel) -> Result<(), NotifyError> {
        self.post(json!({
            "kind": NotificationKind::Delivery,
            "to": [parcel.sender_email, parcel.receiver_email],
            "tracking_id": parcel.tracking_id,
            "destination": parcel.destination,
            "delivered_at": parcel.delivered_at,
        }))
        .await
    }

    async fn send_location_update_notification(
        &self,
        parcel: &Parcel,
        location: &str,
    ) -> Result<(), NotifyError> {
        self.post(json!({
            "kind": NotificationKind::LocationUpdate,
            "to": [parcel.sender_email, parcel.receiver_email],
            "tracking_id": parcel.tracking_id,
            "location": location,
            "status": parcel.status,
        }))
        .await
    }
}
