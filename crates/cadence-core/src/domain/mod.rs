//! Domain model (IDs, messages, constraints, sequences, executions, outcomes).

pub mod constraint;
pub mod decision;
pub mod errors;
pub mod events;
pub mod execution;
pub mod ids;
pub mod message;
pub mod outcome;
pub mod sequence;
pub mod target;

pub use constraint::{ConstraintConfig, DayRules, HolyPeriod, HourRange, QuietWindow, Tone};
pub use decision::{Decider, Decision, DefaultDecider};
pub use errors::{CadenceError, ErrorKind, StoreError, TransportError};
pub use events::{EngagementEvent, EngagementKind};
pub use execution::{ExecutionLogEntry, ExecutionStatus, SequenceExecution, Trigger};
pub use ids::{ExecutionId, LogEntryId, MessageId, SequenceId, TargetId, TenantId};
pub use message::{
    MessageStatus, NewMessage, Priority, Recipient, ScheduledMessage, SequenceLink,
};
pub use outcome::{ContinueReport, ExecutionReport, OperationResult, ProcessReport};
pub use sequence::{SequenceDefinition, SequenceStep, StepTemplate, StopCondition};
pub use target::{LineItem, TargetEntity, TargetStatus};
