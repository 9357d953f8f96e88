//! SequenceStore port - 定義・実行・ログ・エンゲージメントの正本
//!
//! # 設計原則
//! - (sequence, target) ごとに ACTIVE な実行は最大 1 件（insert 時に保証）
//! - 実行の更新は version による楽観ロック
//! - ログは追記のみ

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    EngagementEvent, ExecutionId, ExecutionLogEntry, MessageId, SequenceDefinition,
    SequenceExecution, SequenceId, StoreError, TargetId,
};

#[async_trait]
pub trait SequenceStore: Send + Sync {
    async fn put_definition(&self, definition: SequenceDefinition) -> Result<(), StoreError>;

    async fn definition(&self, id: SequenceId) -> Result<Option<SequenceDefinition>, StoreError>;

    /// Insert unless a non-terminal execution already exists for the same
    /// (sequence, target) pair. Returns false in that case.
    async fn insert_execution(&self, execution: SequenceExecution) -> Result<bool, StoreError>;

    async fn execution(&self, id: ExecutionId) -> Result<Option<SequenceExecution>, StoreError>;

    async fn active_execution(
        &self,
        sequence_id: SequenceId,
        target_id: &TargetId,
    ) -> Result<Option<SequenceExecution>, StoreError>;

    /// Replace only if the stored version equals `expected_version`.
    async fn replace_execution(
        &self,
        execution: SequenceExecution,
        expected_version: u64,
    ) -> Result<bool, StoreError>;

    /// ACTIVE executions whose next step is due, earliest first.
    async fn due_executions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SequenceExecution>, StoreError>;

    async fn executions_for_sequence(
        &self,
        sequence_id: SequenceId,
    ) -> Result<Vec<SequenceExecution>, StoreError>;

    async fn append_log(&self, entry: ExecutionLogEntry) -> Result<(), StoreError>;

    /// Log of one execution in append order.
    async fn log_for(&self, execution_id: ExecutionId)
    -> Result<Vec<ExecutionLogEntry>, StoreError>;

    async fn logs_for_sequence(
        &self,
        sequence_id: SequenceId,
    ) -> Result<Vec<ExecutionLogEntry>, StoreError>;

    async fn record_engagement(&self, event: EngagementEvent) -> Result<(), StoreError>;

    async fn engagements_for(
        &self,
        message_ids: &[MessageId],
    ) -> Result<Vec<EngagementEvent>, StoreError>;
}
