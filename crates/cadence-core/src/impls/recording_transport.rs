//! RecordingTransport - 送信内容を記録するだけの MailTransport
//!
//! Failures can be scripted per call, which is how retry and permanent-failure
//! paths are exercised without a real provider.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{MessageId, ScheduledMessage, TransportError};
use crate::ports::{DeliveryReceipt, MailTransport};

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<ScheduledMessage>>,
    script: Mutex<VecDeque<TransportError>>,
    confirm_synchronously: bool,
    counter: AtomicU64,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receipts report delivery as confirmed (message goes straight to DELIVERED).
    pub fn confirming() -> Self {
        Self {
            confirm_synchronously: true,
            ..Self::default()
        }
    }

    /// Queue failures returned by the next `send` calls, in order.
    pub async fn fail_next(&self, errors: impl IntoIterator<Item = TransportError>) {
        self.script.lock().await.extend(errors);
    }

    pub async fn sent(&self) -> Vec<ScheduledMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_ids(&self) -> Vec<MessageId> {
        self.sent.lock().await.iter().map(|m| m.id).collect()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, message: &ScheduledMessage) -> Result<DeliveryReceipt, TransportError> {
        if let Some(error) = self.script.lock().await.pop_front() {
            return Err(error);
        }
        self.sent.lock().await.push(message.clone());
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(DeliveryReceipt {
            provider_message_id: format!("rec-{n}"),
            confirmed: self.confirm_synchronously,
        })
    }
}
