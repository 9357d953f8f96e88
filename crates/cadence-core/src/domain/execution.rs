//! Sequence execution record and its append-only step log.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::CadenceError;
use super::ids::{ExecutionId, LogEntryId, MessageId, SequenceId, TargetId, TenantId};

/// Execution status.
///
/// Active -> Completed | Stopped | Cancelled. Terminal states accept nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Active,
    Completed,
    Stopped,
    Cancelled,
}

impl ExecutionStatus {
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        self == ExecutionStatus::Active && next != ExecutionStatus::Active
    }

    pub fn is_terminal(self) -> bool {
        self != ExecutionStatus::Active
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Active => "ACTIVE",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Stopped => "STOPPED",
            ExecutionStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// What started an execution. Recorded for reporting only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    #[default]
    Manual,
    /// Target passed its due date.
    Overdue,
    /// Started by an upstream integration (webhook, import, ...).
    Api(String),
}

/// One run of a sequence against one target.
///
/// Design:
/// - `version` is bumped on every write; stores replace only when the caller
///   saw the current version.
/// - `current_step` counts executed steps, so `current_step + 1` is next.
/// - While a step is being dispatched, `claimed_step` names it and
///   `next_step_due_at` holds the claim deadline, so an abandoned claim comes
///   due again instead of stranding the execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceExecution {
    pub id: ExecutionId,
    pub tenant_id: TenantId,
    pub sequence_id: SequenceId,
    pub target_id: TargetId,
    pub status: ExecutionStatus,
    pub current_step: u32,
    pub total_steps: u32,
    pub stop_reason: Option<String>,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub last_execution_at: Option<DateTime<Utc>>,
    pub next_step_due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub claimed_step: Option<u32>,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl SequenceExecution {
    pub fn new(
        id: ExecutionId,
        tenant_id: TenantId,
        sequence_id: SequenceId,
        target_id: TargetId,
        total_steps: u32,
        trigger: Trigger,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            sequence_id,
            target_id,
            status: ExecutionStatus::Active,
            current_step: 0,
            total_steps,
            stop_reason: None,
            trigger,
            started_at: now,
            last_execution_at: None,
            next_step_due_at: None,
            claimed_step: None,
            version: 0,
            updated_at: now,
        }
    }

    pub fn steps_remaining(&self) -> u32 {
        self.total_steps.saturating_sub(self.current_step)
    }

    pub fn next_step(&self) -> u32 {
        self.current_step + 1
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ExecutionStatus::Active
            && self.next_step_due_at.is_some_and(|due| due <= now)
    }

    /// A step claim whose deadline has not passed yet.
    pub fn has_live_claim(&self, now: DateTime<Utc>) -> bool {
        self.claimed_step.is_some() && self.next_step_due_at.is_some_and(|deadline| deadline > now)
    }

    /// Move to a terminal status. Does not touch `version`; the store write does.
    pub fn finish(
        &mut self,
        status: ExecutionStatus,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), CadenceError> {
        if !self.status.can_transition_to(status) {
            return Err(CadenceError::InvalidTransition {
                entity: "execution",
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        self.status = status;
        self.stop_reason = reason;
        self.next_step_due_at = None;
        self.claimed_step = None;
        self.updated_at = now;
        Ok(())
    }

    /// Copy with the version bumped, ready for a conditional replace.
    pub fn next_version(&self) -> Self {
        let mut next = self.clone();
        next.version += 1;
        next
    }
}

/// Immutable record of one dispatched step, one per language variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub id: LogEntryId,
    pub execution_id: ExecutionId,
    pub sequence_id: SequenceId,
    pub step_number: u32,
    pub language: String,
    pub subject: String,
    pub body: String,
    pub message_id: MessageId,
    pub dispatched_at: DateTime<Utc>,
}
