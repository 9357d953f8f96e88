//! Errors - エラー型と分類
//!
//! Business-rule failures are values the public surface folds into
//! `OperationResult::errors`; infrastructure failures propagate as `Err`.

use thiserror::Error;

use super::ids::{ExecutionId, MessageId, SequenceId, TargetId, TenantId};

/// ErrorKind は運用上の分類
///
/// - Validation: malformed input or configuration, fail fast, never retried
/// - Rejected: a business rule said no (suspended tenant, target already paid, ...)
/// - Conflict: another worker got there first
/// - Infrastructure: a port (store, directory) is unavailable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Rejected,
    Conflict,
    Infrastructure,
}

/// Failure reported by a store or directory adapter.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("record already exists: {0}")]
    Duplicate(String),

    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
}

/// Failure reported by the mail transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Worth retrying (timeouts, throttling, 4xx-ish provider hiccups).
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Retrying cannot help (bad address, content refused).
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

#[derive(Debug, Error)]
pub enum CadenceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("tenant {0} is suspended and may not send")]
    TenantSuspended(TenantId),

    #[error("message {0} not found")]
    MessageNotFound(MessageId),

    #[error("sequence {0} not found")]
    SequenceNotFound(SequenceId),

    #[error("sequence {0} is not active")]
    SequenceInactive(SequenceId),

    #[error("execution {0} not found")]
    ExecutionNotFound(ExecutionId),

    #[error("target {0} not found")]
    TargetNotFound(TargetId),

    #[error("target {target} is already {status}")]
    TargetResolved { target: TargetId, status: String },

    #[error("an execution of {sequence} is already running for target {target}")]
    AlreadyRunning { sequence: SequenceId, target: TargetId },

    #[error("recipient {0} is suppressed")]
    RecipientSuppressed(String),

    #[error("recipient {address} already received {sent} messages in the last {window_hours}h")]
    ContactLimitExceeded {
        address: String,
        sent: u32,
        window_hours: u32,
    },

    #[error("step {requested} of {execution} cannot run: last logged step is {last_logged:?}")]
    StepOutOfOrder {
        execution: ExecutionId,
        requested: u32,
        last_logged: Option<u32>,
    },

    #[error("content rejected by validator: {}", .0.join("; "))]
    ContentRejected(Vec<String>),

    #[error("illegal {entity} transition {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("concurrent update lost on {0}")]
    Conflict(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CadenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CadenceError::Validation(_)
            | CadenceError::ContentRejected(_)
            | CadenceError::InvalidTransition { .. }
            | CadenceError::Config(_) => ErrorKind::Validation,
            CadenceError::Conflict(_) => ErrorKind::Conflict,
            CadenceError::Store(_) => ErrorKind::Infrastructure,
            _ => ErrorKind::Rejected,
        }
    }

    /// Infrastructure failures propagate; everything else is a reportable outcome.
    pub fn is_infrastructure(&self) -> bool {
        self.kind() == ErrorKind::Infrastructure
    }
}
