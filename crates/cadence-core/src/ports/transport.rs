//! MailTransport port - 実際の送信（外部）

use async_trait::async_trait;

use crate::domain::{ScheduledMessage, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub provider_message_id: String,
    /// Provider confirmed delivery synchronously.
    pub confirmed: bool,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &ScheduledMessage) -> Result<DeliveryReceipt, TransportError>;
}
