//! MessageStore port - ScheduledMessage の正本（source of truth）
//!
//! # 設計原則
//! - claim は条件付き遷移（QUEUED -> SENDING）を一つの操作で行う
//! - 更新は「期待する現在ステータス」付きの条件付き置換
//! - 負けた側は false / None を受け取るだけで、エラーにはならない

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    ExecutionId, MessageId, MessageStatus, ScheduledMessage, StoreError, TenantId,
};

/// Listing filter; empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub tenant_id: Option<TenantId>,
    pub execution_id: Option<ExecutionId>,
    pub statuses: Vec<MessageStatus>,
}

impl MessageFilter {
    pub fn for_tenant(tenant_id: Option<TenantId>) -> Self {
        Self {
            tenant_id,
            ..Self::default()
        }
    }

    pub fn queued_for_execution(execution_id: ExecutionId) -> Self {
        Self {
            execution_id: Some(execution_id),
            statuses: vec![MessageStatus::Queued],
            ..Self::default()
        }
    }

    pub fn matches(&self, message: &ScheduledMessage) -> bool {
        self.tenant_id
            .as_ref()
            .is_none_or(|tenant| &message.tenant_id == tenant)
            && self
                .execution_id
                .is_none_or(|exec| message.execution_id() == Some(exec))
            && (self.statuses.is_empty() || self.statuses.contains(&message.status))
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert(&self, message: ScheduledMessage) -> Result<(), StoreError>;

    async fn get(&self, id: MessageId) -> Result<Option<ScheduledMessage>, StoreError>;

    /// Atomically move a due QUEUED message to SENDING.
    /// `None` means another worker won (or the message is no longer queued).
    async fn claim(
        &self,
        id: MessageId,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduledMessage>, StoreError>;

    /// Replace the stored record only if its status is still `expected`.
    async fn update_if(
        &self,
        message: ScheduledMessage,
        expected: MessageStatus,
    ) -> Result<bool, StoreError>;

    /// QUEUED messages with `scheduled_for <= now`, highest priority first,
    /// then earliest scheduled time.
    async fn due(&self, now: DateTime<Utc>, limit: usize)
    -> Result<Vec<ScheduledMessage>, StoreError>;

    async fn list(&self, filter: &MessageFilter) -> Result<Vec<ScheduledMessage>, StoreError>;

    /// Return SENDING messages claimed at or before `claimed_before` to QUEUED,
    /// keeping their send time and retry count. Returns the reclaimed ids.
    async fn reclaim_stale(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<MessageId>, StoreError>;
}
