use async_trait::async_trait;
use thiserror::Error;

use crate::render::Notification;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Invalid recipient id: {0}")]
    InvalidRecipient(String),
    #[error("Telegram API error: {0}")]
    Transport(#[from] teloxide::RequestError),
}

/// Delivers a rendered alert to one subscriber.
#[async_trait]
pub trait NotifySink: Send + Sync {
    async fn deliver(
        &self,
        subscriber_id: &str,
        notification: &Notification,
    ) -> Result<(), DeliveryError>;
}
