//! Scheduled message record and its status machine.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::constraint::ConstraintConfig;
use super::errors::CadenceError;
use super::ids::{ExecutionId, MessageId, SequenceId, TargetId, TenantId};

/// Delivery priority. Ordering is significant: `Urgent` sorts highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Message status.
///
/// State transitions:
/// - Queued -> Sending -> Sent -> Delivered
/// - Queued -> Sending -> Queued (transient failure with retries left, or
///   hard constraints no longer hold at send time)
/// - Queued -> Sending -> Failed
/// - Queued -> Cancelled
/// - Failed -> Queued (explicit reschedule only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Queued,
    Sending,
    Sent,
    Delivered,
    Failed,
    Cancelled,
}

impl MessageStatus {
    /// The transition table. Everything not listed here is rejected.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Queued, Sending)
                | (Queued, Cancelled)
                | (Sending, Sent)
                | (Sending, Failed)
                | (Sending, Queued)
                | (Sent, Delivered)
                | (Failed, Queued)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MessageStatus::Delivered | MessageStatus::Failed | MessageStatus::Cancelled
        )
    }

    /// Counts towards rate windows and success rate.
    pub fn is_sent(self) -> bool {
        matches!(self, MessageStatus::Sent | MessageStatus::Delivered)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageStatus::Queued => "QUEUED",
            MessageStatus::Sending => "SENDING",
            MessageStatus::Sent => "SENT",
            MessageStatus::Delivered => "DELIVERED",
            MessageStatus::Failed => "FAILED",
            MessageStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Email recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub address: String,
    pub name: Option<String>,
}

impl Recipient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Lower-cased address used for suppression and contact-frequency keys.
    pub fn normalized_address(&self) -> String {
        self.address.trim().to_ascii_lowercase()
    }
}

/// Ties a message back to the sequence step that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceLink {
    pub sequence_id: SequenceId,
    pub execution_id: ExecutionId,
    pub step_number: u32,
}

/// Input to `DispatchQueue::schedule`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub tenant_id: TenantId,
    pub target_id: TargetId,
    pub recipient: Recipient,
    pub subject: String,
    pub body: String,
    pub language: String,
    #[serde(default)]
    pub priority: Priority,
    /// Desired send moment. `None` means "as soon as allowed".
    #[serde(default)]
    pub requested_at: Option<DateTime<Utc>>,
    /// Falls back to the queue's configured default.
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub sequence: Option<SequenceLink>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl NewMessage {
    pub fn new(
        tenant_id: TenantId,
        target_id: TargetId,
        recipient: Recipient,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            target_id,
            recipient,
            subject: subject.into(),
            body: body.into(),
            language: "en".to_string(),
            priority: Priority::Normal,
            requested_at: None,
            max_retries: None,
            sequence: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn requested_at(mut self, at: DateTime<Utc>) -> Self {
        self.requested_at = Some(at);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn linked_to(mut self, link: SequenceLink) -> Self {
        self.sequence = Some(link);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Persisted queue entry.
///
/// Design:
/// - This is the single source of truth for a message's delivery state.
/// - All status changes go through `transition`, which enforces the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledMessage {
    pub id: MessageId,
    pub tenant_id: TenantId,
    pub target_id: TargetId,
    pub recipient: Recipient,
    pub subject: String,
    pub body: String,
    pub language: String,
    pub priority: Priority,
    pub scheduled_for: DateTime<Utc>,
    pub status: MessageStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub sequence: Option<SequenceLink>,
    pub metadata: BTreeMap<String, String>,

    /// Constraints the send time was resolved against; re-checked at send time.
    pub constraints: Option<ConstraintConfig>,

    pub last_error: Option<String>,
    pub provider_message_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set while SENDING; a worker that dies leaves it behind for the reclaim sweep.
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl ScheduledMessage {
    pub fn queued(
        id: MessageId,
        input: NewMessage,
        scheduled_for: DateTime<Utc>,
        max_retries: u32,
        constraints: Option<ConstraintConfig>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id: input.tenant_id,
            target_id: input.target_id,
            recipient: input.recipient,
            subject: input.subject,
            body: input.body,
            language: input.language,
            priority: input.priority,
            scheduled_for,
            status: MessageStatus::Queued,
            retry_count: 0,
            max_retries,
            sequence: input.sequence,
            metadata: input.metadata,
            constraints,
            last_error: None,
            provider_message_id: None,
            created_at: now,
            updated_at: now,
            claimed_at: None,
            sent_at: None,
            delivered_at: None,
        }
    }

    /// Apply a status change, rejecting anything outside the transition table.
    pub fn transition(&mut self, next: MessageStatus, now: DateTime<Utc>) -> Result<(), CadenceError> {
        if !self.status.can_transition_to(next) {
            return Err(CadenceError::InvalidTransition {
                entity: "message",
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = now;
        self.claimed_at = (next == MessageStatus::Sending).then_some(now);
        Ok(())
    }

    pub fn mark_sent(
        &mut self,
        provider_message_id: String,
        now: DateTime<Utc>,
    ) -> Result<(), CadenceError> {
        self.transition(MessageStatus::Sent, now)?;
        self.provider_message_id = Some(provider_message_id);
        self.sent_at = Some(now);
        Ok(())
    }

    pub fn mark_delivered(&mut self, now: DateTime<Utc>) -> Result<(), CadenceError> {
        self.transition(MessageStatus::Delivered, now)?;
        self.delivered_at = Some(now);
        Ok(())
    }

    pub fn mark_failed(&mut self, error: String, now: DateTime<Utc>) -> Result<(), CadenceError> {
        self.transition(MessageStatus::Failed, now)?;
        self.last_error = Some(error);
        Ok(())
    }

    /// Sending -> Queued after a transient failure. Consumes one retry.
    pub fn schedule_retry(
        &mut self,
        next_attempt_at: DateTime<Utc>,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<(), CadenceError> {
        if self.retry_count >= self.max_retries {
            return Err(CadenceError::Validation(format!(
                "retry budget exhausted for {} ({}/{})",
                self.id, self.retry_count, self.max_retries
            )));
        }
        self.transition(MessageStatus::Queued, now)?;
        self.retry_count += 1;
        self.scheduled_for = next_attempt_at;
        self.last_error = Some(error);
        Ok(())
    }

    /// Sending -> Queued without consuming a retry (lost rate reservation or
    /// constraint re-validation).
    pub fn requeue(&mut self, at: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), CadenceError> {
        self.transition(MessageStatus::Queued, now)?;
        self.scheduled_for = at;
        Ok(())
    }

    /// SENDING since before `cutoff`: the claiming worker is presumed dead.
    pub fn is_stale_claim(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == MessageStatus::Sending && self.claimed_at.is_none_or(|at| at <= cutoff)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == MessageStatus::Queued && self.scheduled_for <= now
    }

    pub fn execution_id(&self) -> Option<ExecutionId> {
        self.sequence.map(|link| link.execution_id)
    }
}
