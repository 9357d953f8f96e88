//! InMemorySequenceStore - 開発・テスト用の SequenceStore
//!
//! 一つの Mutex に全状態を置き、「ACTIVE は一件まで」と version 比較を
//! ロック内で判定する。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    EngagementEvent, ExecutionId, ExecutionLogEntry, MessageId, SequenceDefinition,
    SequenceExecution, SequenceId, StoreError, TargetId,
};
use crate::ports::SequenceStore;

#[derive(Default)]
struct State {
    definitions: HashMap<SequenceId, SequenceDefinition>,
    executions: HashMap<ExecutionId, SequenceExecution>,
    /// Append order is the audit order.
    log: Vec<ExecutionLogEntry>,
    engagements: Vec<EngagementEvent>,
}

#[derive(Default)]
pub struct InMemorySequenceStore {
    state: Mutex<State>,
}

impl InMemorySequenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SequenceStore for InMemorySequenceStore {
    async fn put_definition(&self, definition: SequenceDefinition) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .definitions
            .insert(definition.id, definition);
        Ok(())
    }

    async fn definition(&self, id: SequenceId) -> Result<Option<SequenceDefinition>, StoreError> {
        Ok(self.state.lock().await.definitions.get(&id).cloned())
    }

    async fn insert_execution(&self, execution: SequenceExecution) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if state.executions.contains_key(&execution.id) {
            return Err(StoreError::Duplicate(execution.id.to_string()));
        }
        let running = state.executions.values().any(|e| {
            e.sequence_id == execution.sequence_id
                && e.target_id == execution.target_id
                && !e.status.is_terminal()
        });
        if running {
            return Ok(false);
        }
        state.executions.insert(execution.id, execution);
        Ok(true)
    }

    async fn execution(&self, id: ExecutionId) -> Result<Option<SequenceExecution>, StoreError> {
        Ok(self.state.lock().await.executions.get(&id).cloned())
    }

    async fn active_execution(
        &self,
        sequence_id: SequenceId,
        target_id: &TargetId,
    ) -> Result<Option<SequenceExecution>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .executions
            .values()
            .find(|e| {
                e.sequence_id == sequence_id
                    && &e.target_id == target_id
                    && !e.status.is_terminal()
            })
            .cloned())
    }

    async fn replace_execution(
        &self,
        execution: SequenceExecution,
        expected_version: u64,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.executions.get_mut(&execution.id) {
            Some(current) if current.version == expected_version => {
                *current = execution;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::Corrupt(format!(
                "execution {} vanished",
                execution.id
            ))),
        }
    }

    async fn due_executions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SequenceExecution>, StoreError> {
        let state = self.state.lock().await;
        let mut due: Vec<SequenceExecution> = state
            .executions
            .values()
            .filter(|e| e.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|e| (e.next_step_due_at, e.id));
        due.truncate(limit);
        Ok(due)
    }

    async fn executions_for_sequence(
        &self,
        sequence_id: SequenceId,
    ) -> Result<Vec<SequenceExecution>, StoreError> {
        let state = self.state.lock().await;
        let mut executions: Vec<SequenceExecution> = state
            .executions
            .values()
            .filter(|e| e.sequence_id == sequence_id)
            .cloned()
            .collect();
        executions.sort_by_key(|e| (e.started_at, e.id));
        Ok(executions)
    }

    async fn append_log(&self, entry: ExecutionLogEntry) -> Result<(), StoreError> {
        self.state.lock().await.log.push(entry);
        Ok(())
    }

    async fn log_for(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<ExecutionLogEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .log
            .iter()
            .filter(|entry| entry.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn logs_for_sequence(
        &self,
        sequence_id: SequenceId,
    ) -> Result<Vec<ExecutionLogEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .log
            .iter()
            .filter(|entry| entry.sequence_id == sequence_id)
            .cloned()
            .collect())
    }

    async fn record_engagement(&self, event: EngagementEvent) -> Result<(), StoreError> {
        self.state.lock().await.engagements.push(event);
        Ok(())
    }

    async fn engagements_for(
        &self,
        message_ids: &[MessageId],
    ) -> Result<Vec<EngagementEvent>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .engagements
            .iter()
            .filter(|event| message_ids.contains(&event.message_id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExecutionStatus;
    use crate::fixtures;

    #[tokio::test]
    async fn only_one_active_execution_per_pair() {
        let store = InMemorySequenceStore::new();
        let first = fixtures::execution(1, 3);
        let second = fixtures::execution(2, 3);

        assert!(store.insert_execution(first.clone()).await.unwrap());
        assert!(!store.insert_execution(second.clone()).await.unwrap());

        let mut done = first.next_version();
        done.finish(ExecutionStatus::Stopped, None, fixtures::now())
            .unwrap();
        assert!(store.replace_execution(done, first.version).await.unwrap());
        assert!(store.insert_execution(second).await.unwrap());
    }

    #[tokio::test]
    async fn stale_version_loses() {
        let store = InMemorySequenceStore::new();
        let exec = fixtures::execution(1, 3);
        store.insert_execution(exec.clone()).await.unwrap();

        let winner = exec.next_version();
        assert!(store.replace_execution(winner, exec.version).await.unwrap());

        let loser = exec.next_version();
        assert!(!store.replace_execution(loser, exec.version).await.unwrap());
    }

    #[tokio::test]
    async fn due_executions_skip_future_and_terminal() {
        let store = InMemorySequenceStore::new();
        let now = fixtures::now();

        let mut due = fixtures::execution(1, 3);
        due.next_step_due_at = Some(now);
        let mut later = fixtures::execution(2, 3);
        later.target_id = TargetId::new("other");
        later.next_step_due_at = Some(now + chrono::Duration::days(1));

        store.insert_execution(due.clone()).await.unwrap();
        store.insert_execution(later).await.unwrap();

        let found = store.due_executions(now, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);
    }
}
