//! Outcome model: what public operations and sweeps report back.
//!
//! Business-rule failures land in `errors`; callers never have to match on
//! an `Err` to learn that a target was already paid.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::CadenceError;
use super::execution::ExecutionStatus;
use super::ids::{ExecutionId, MessageId};

/// Common result envelope of the public operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult<T = ()> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<T>,
}

impl<T> OperationResult<T> {
    pub fn ok(ids: Vec<String>) -> Self {
        Self {
            success: true,
            ids,
            errors: Vec::new(),
            detail: None,
        }
    }

    pub fn rejected(error: &CadenceError) -> Self {
        Self {
            success: false,
            ids: Vec::new(),
            errors: vec![error.to_string()],
            detail: None,
        }
    }

    /// Operation ran but had nothing to act on (cancel twice, stop when idle).
    pub fn noop(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            ids: Vec::new(),
            errors: vec![reason.into()],
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: T) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Result of one `process_due` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessReport {
    pub processed: u32,
    pub sent: u32,
    pub failed: u32,
    /// Returned to QUEUED with a later time (retry backoff or re-validation).
    pub rescheduled: u32,
    /// Due but left for a later pass because of rate limits.
    pub deferred: u32,
    pub errors: Vec<String>,
}

/// State of an execution after `start` or `continue`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    /// Messages dispatched by this call.
    #[serde(default)]
    pub dispatched: Vec<MessageId>,
    pub steps_remaining: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step_due_at: Option<DateTime<Utc>>,
}

/// Result of one `continue_due` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinueReport {
    pub examined: u32,
    pub advanced: u32,
    pub completed: u32,
    pub stopped: u32,
    pub dispatched: u32,
    pub errors: Vec<String>,
}

impl ContinueReport {
    pub fn absorb(&mut self, report: &ExecutionReport) {
        if !report.dispatched.is_empty() {
            self.advanced += 1;
            self.dispatched += report.dispatched.len() as u32;
        }
        match report.status {
            ExecutionStatus::Completed => self.completed += 1,
            ExecutionStatus::Stopped | ExecutionStatus::Cancelled => self.stopped += 1,
            ExecutionStatus::Active => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::TenantId;
    use ulid::Ulid;

    #[test]
    fn rejected_carries_error_text() {
        let err = CadenceError::TenantSuspended(TenantId::new("acme"));
        let result: OperationResult = OperationResult::rejected(&err);
        assert!(!result.success);
        assert_eq!(result.errors, vec!["tenant acme is suspended and may not send"]);
    }

    #[test]
    fn continue_report_counts_dispatches_and_terminals() {
        let mut report = ContinueReport::default();
        report.absorb(&ExecutionReport {
            execution_id: ExecutionId::from_ulid(Ulid::nil()),
            status: ExecutionStatus::Completed,
            stop_reason: None,
            dispatched: vec![MessageId::from_ulid(Ulid::nil()); 2],
            steps_remaining: 0,
            next_step_due_at: None,
        });
        assert_eq!(report.advanced, 1);
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.completed, 1);
    }

    #[test]
    fn empty_fields_are_omitted_from_json() {
        let result: OperationResult = OperationResult::ok(vec!["msg-1".into()]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "ids": ["msg-1"]}));
    }
}
