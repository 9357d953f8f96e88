//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）
//! - **SequentialIdGenerator**: 連番（テスト用、決定的）

use std::sync::atomic::{AtomicU64, Ordering};

use ulid::Ulid;

use crate::domain::ids::{ExecutionId, LogEntryId, MessageId, SequenceId};
use crate::ports::Clock;

/// IdGenerator は分散システムで使える ID を生成
///
/// Only `next_ulid` is required; the typed helpers wrap it.
pub trait IdGenerator: Send + Sync {
    fn next_ulid(&self) -> Ulid;

    fn message_id(&self) -> MessageId {
        MessageId::from(self.next_ulid())
    }

    fn sequence_id(&self) -> SequenceId {
        SequenceId::from(self.next_ulid())
    }

    fn execution_id(&self) -> ExecutionId {
        ExecutionId::from(self.next_ulid())
    }

    fn log_entry_id(&self) -> LogEntryId {
        LogEntryId::from(self.next_ulid())
    }
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Timestamp bits come from the injected clock, random bits from `rand`.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

/// Counter-based ids: `1, 2, 3, ...` in the random bits, fixed timestamp.
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_ulid(&self) -> Ulid {
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        Ulid::from_parts(0, u128::from(n))
    }
}
