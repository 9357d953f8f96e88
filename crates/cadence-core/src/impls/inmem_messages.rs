//! InMemoryMessageStore - 開発・テスト用の MessageStore
//!
//! # 学習ポイント
//! - tokio::sync::Mutex 一つで claim / update_if を原子的にする
//! - ロックを保持したまま await しない（すべて同期処理で完結）

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{MessageId, MessageStatus, ScheduledMessage, StoreError};
use crate::ports::{MessageFilter, MessageStore};

#[derive(Default)]
pub struct InMemoryMessageStore {
    messages: Mutex<HashMap<MessageId, ScheduledMessage>>,
    unavailable: AtomicBool,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `StoreError::Unavailable` (outage simulation).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("message store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert(&self, message: ScheduledMessage) -> Result<(), StoreError> {
        self.check()?;
        let mut messages = self.messages.lock().await;
        if messages.contains_key(&message.id) {
            return Err(StoreError::Duplicate(message.id.to_string()));
        }
        messages.insert(message.id, message);
        Ok(())
    }

    async fn get(&self, id: MessageId) -> Result<Option<ScheduledMessage>, StoreError> {
        self.check()?;
        Ok(self.messages.lock().await.get(&id).cloned())
    }

    async fn claim(
        &self,
        id: MessageId,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduledMessage>, StoreError> {
        self.check()?;
        let mut messages = self.messages.lock().await;
        let Some(message) = messages.get_mut(&id) else {
            return Ok(None);
        };
        if message.status != MessageStatus::Queued {
            return Ok(None);
        }
        message
            .transition(MessageStatus::Sending, now)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(Some(message.clone()))
    }

    async fn update_if(
        &self,
        message: ScheduledMessage,
        expected: MessageStatus,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut messages = self.messages.lock().await;
        match messages.get_mut(&message.id) {
            Some(current) if current.status == expected => {
                *current = message;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledMessage>, StoreError> {
        self.check()?;
        let messages = self.messages.lock().await;
        let mut due: Vec<ScheduledMessage> =
            messages.values().filter(|m| m.is_due(now)).cloned().collect();
        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.scheduled_for.cmp(&b.scheduled_for))
                .then(a.id.cmp(&b.id))
        });
        due.truncate(limit);
        Ok(due)
    }

    async fn list(&self, filter: &MessageFilter) -> Result<Vec<ScheduledMessage>, StoreError> {
        self.check()?;
        let messages = self.messages.lock().await;
        let mut listed: Vec<ScheduledMessage> =
            messages.values().filter(|m| filter.matches(m)).cloned().collect();
        listed.sort_by_key(|m| (m.created_at, m.id));
        Ok(listed)
    }

    async fn reclaim_stale(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<MessageId>, StoreError> {
        self.check()?;
        let mut messages = self.messages.lock().await;
        let mut reclaimed = Vec::new();
        for message in messages.values_mut() {
            if !message.is_stale_claim(claimed_before) {
                continue;
            }
            let at = message.scheduled_for;
            message
                .requeue(at, now)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            reclaimed.push(message.id);
        }
        reclaimed.sort();
        Ok(reclaimed)
    }
}
