//! Domain identifiers (strongly-typed IDs).
//!
//! Internal records use ULID-based ids wrapped in `Id<T>`, where `T` is a
//! zero-sized marker. Records that belong to the surrounding system (tenants,
//! targets) arrive as opaque strings and get their own newtypes.
//!
//! ## Phantom Type パターン
//! `Id<T>` の `T` は実行時には使わないマーカー型。
//! `MessageId` と `ExecutionId` はコンパイル時に混同できない。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"msg-", "exec-" など）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Error returned when a prefixed id string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id `{value}`: expected prefix `{expected_prefix}` followed by a ULID")]
pub struct ParseIdError {
    pub value: String,
    pub expected_prefix: &'static str,
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseIdError {
            value: s.to_string(),
            expected_prefix: T::prefix(),
        };
        let raw = s.strip_prefix(T::prefix()).ok_or_else(err)?;
        Ulid::from_string(raw).map(Self::from_ulid).map_err(|_| err())
    }
}

// ========================================
// マーカー型の定義
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Message {}

impl IdMarker for Message {
    fn prefix() -> &'static str {
        "msg-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Sequence {}

impl IdMarker for Sequence {
    fn prefix() -> &'static str {
        "seq-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Execution {}

impl IdMarker for Execution {
    fn prefix() -> &'static str {
        "exec-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogEntry {}

impl IdMarker for LogEntry {
    fn prefix() -> &'static str {
        "log-"
    }
}

/// Identifier of a ScheduledMessage (one queued email).
pub type MessageId = Id<Message>;

/// Identifier of a SequenceDefinition.
pub type SequenceId = Id<Sequence>;

/// Identifier of one run of a sequence against one target.
pub type ExecutionId = Id<Execution>;

/// Identifier of an ExecutionLogEntry.
pub type LogEntryId = Id<LogEntry>;

/// Owning tenant (organisation) of messages and sequences.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Reference to the entity a reminder is about (an invoice, or a consolidated
/// bundle of invoices for one customer).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let ulid = Ulid::new();

        let message = MessageId::from_ulid(ulid);
        let execution = ExecutionId::from_ulid(ulid);

        assert_eq!(message.as_ulid(), execution.as_ulid());
        assert!(message.to_string().starts_with("msg-"));
        assert!(execution.to_string().starts_with("exec-"));
        // let _: MessageId = execution; // <- does not compile
    }

    #[test]
    fn display_parses_back() {
        let id = SequenceId::from_ulid(Ulid::new());
        let parsed: SequenceId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn parse_rejects_wrong_prefix() {
        let id = MessageId::from_ulid(Ulid::new());
        let err = id.to_string().parse::<ExecutionId>().unwrap_err();
        assert_eq!(err.expected_prefix, "exec-");
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<MessageId>(), size_of::<Ulid>());
        assert_eq!(size_of::<LogEntryId>(), 16);
    }

    #[test]
    fn external_ids_serialize_as_plain_strings() {
        let tenant = TenantId::new("acme");
        assert_eq!(serde_json::to_string(&tenant).unwrap(), "\"acme\"");
    }
}
