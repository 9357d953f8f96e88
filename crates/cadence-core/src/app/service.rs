//! CadenceService - 公開操作の表面
//!
//! # 設計原則
//! - 業務ルールによる失敗は `OperationResult::errors` に畳み込む
//! - インフラ障害（ストア停止など）だけを `Err` で返す

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::domain::{
    CadenceError, EngagementEvent, EngagementKind, ExecutionId, ExecutionReport, MessageId,
    NewMessage, OperationResult, ProcessReport, SequenceDefinition, SequenceId, TargetId,
    TenantId,
};
use crate::ports::{Clock, SequenceStore};
use crate::queue::{DispatchQueue, QueueMetrics, ScheduleOptions};
use crate::sequence::{SequenceAnalytics, SequenceEngine, StartOptions};

pub struct CadenceService {
    queue: Arc<DispatchQueue>,
    engine: Arc<SequenceEngine>,
    sequences: Arc<dyn SequenceStore>,
    clock: Arc<dyn Clock>,
}

impl CadenceService {
    pub fn new(
        queue: Arc<DispatchQueue>,
        engine: Arc<SequenceEngine>,
        sequences: Arc<dyn SequenceStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            engine,
            sequences,
            clock,
        }
    }

    pub fn queue(&self) -> &Arc<DispatchQueue> {
        &self.queue
    }

    pub fn engine(&self) -> &Arc<SequenceEngine> {
        &self.engine
    }

    /// Validate and store a sequence definition.
    pub async fn register_sequence(
        &self,
        definition: SequenceDefinition,
    ) -> Result<OperationResult, CadenceError> {
        let id = definition.id;
        if let Err(e) = definition.validate() {
            return Ok(OperationResult::rejected(&e));
        }
        self.sequences.put_definition(definition).await?;
        info!(sequence_id = %id, "sequence registered");
        Ok(OperationResult::ok(vec![id.to_string()]))
    }

    pub async fn schedule_email(
        &self,
        input: NewMessage,
        options: ScheduleOptions,
    ) -> Result<OperationResult, CadenceError> {
        fold(self.queue.schedule(input, options).await, |id| {
            OperationResult::ok(vec![id.to_string()])
        })
    }

    pub async fn cancel_scheduled_email(
        &self,
        id: MessageId,
    ) -> Result<OperationResult, CadenceError> {
        fold(self.queue.cancel(id).await, |cancelled| {
            flag(cancelled, id.to_string(), || format!("message {id} is not queued"))
        })
    }

    pub async fn reschedule_email(
        &self,
        id: MessageId,
        new_time: DateTime<Utc>,
        reset_retry_count: bool,
    ) -> Result<OperationResult, CadenceError> {
        fold(
            self.queue.reschedule(id, new_time, reset_retry_count).await,
            |moved| {
                flag(moved, id.to_string(), || {
                    format!("message {id} is not queued or failed")
                })
            },
        )
    }

    pub async fn confirm_delivery(&self, id: MessageId) -> Result<OperationResult, CadenceError> {
        fold(self.queue.confirm_delivery(id).await, |confirmed| {
            flag(confirmed, id.to_string(), || format!("message {id} is not sent"))
        })
    }

    pub async fn start_sequence_execution(
        &self,
        sequence_id: SequenceId,
        target_id: TargetId,
        options: StartOptions,
    ) -> Result<OperationResult<ExecutionReport>, CadenceError> {
        fold(
            self.engine.start(sequence_id, target_id, options).await,
            execution_result,
        )
    }

    pub async fn continue_sequence_execution(
        &self,
        execution_id: ExecutionId,
    ) -> Result<OperationResult<ExecutionReport>, CadenceError> {
        fold(
            self.engine.continue_execution(execution_id).await,
            execution_result,
        )
    }

    pub async fn stop_sequence_execution(
        &self,
        sequence_id: SequenceId,
        target_id: TargetId,
        reason: impl Into<String>,
    ) -> Result<OperationResult, CadenceError> {
        fold(
            self.engine.stop(sequence_id, &target_id, reason).await,
            |stopped| {
                flag(stopped, target_id.to_string(), || {
                    format!("no active execution of {sequence_id} for {target_id}")
                })
            },
        )
    }

    pub async fn cancel_sequence_execution(
        &self,
        execution_id: ExecutionId,
    ) -> Result<OperationResult, CadenceError> {
        fold(
            self.engine.cancel_execution(execution_id).await,
            |cancelled| {
                flag(cancelled, execution_id.to_string(), || {
                    format!("execution {execution_id} is not active")
                })
            },
        )
    }

    pub async fn get_queue_metrics(
        &self,
        tenant_id: Option<&TenantId>,
    ) -> Result<QueueMetrics, CadenceError> {
        self.queue.queue_metrics(tenant_id).await
    }

    pub async fn get_sequence_analytics(
        &self,
        sequence_id: SequenceId,
    ) -> Result<OperationResult<SequenceAnalytics>, CadenceError> {
        fold(self.engine.analytics(sequence_id).await, |analytics| {
            OperationResult::ok(vec![sequence_id.to_string()]).with_detail(analytics)
        })
    }

    /// Attach an engagement signal to a sent message.
    pub async fn record_engagement(
        &self,
        message_id: MessageId,
        kind: EngagementKind,
        occurred_at: Option<DateTime<Utc>>,
    ) -> Result<OperationResult, CadenceError> {
        let Some(message) = self.queue.get(message_id).await? else {
            return Ok(OperationResult::rejected(&CadenceError::MessageNotFound(
                message_id,
            )));
        };
        if !message.status.is_sent() {
            return Ok(OperationResult::noop(format!(
                "message {message_id} is {}, not sent",
                message.status
            )));
        }
        let at = occurred_at.unwrap_or_else(|| self.clock.now());
        self.sequences
            .record_engagement(EngagementEvent::new(message_id, kind, at))
            .await?;
        Ok(OperationResult::ok(vec![message_id.to_string()]))
    }

    /// One dispatch pass over due messages.
    pub async fn process_due(&self) -> Result<ProcessReport, CadenceError> {
        self.queue.process_due().await
    }
}

/// Business errors become a rejected result; infrastructure errors stay `Err`.
fn fold<T, D>(
    result: Result<T, CadenceError>,
    on_ok: impl FnOnce(T) -> OperationResult<D>,
) -> Result<OperationResult<D>, CadenceError> {
    match result {
        Ok(value) => Ok(on_ok(value)),
        Err(e) if e.is_infrastructure() => Err(e),
        Err(e) => Ok(OperationResult::rejected(&e)),
    }
}

fn flag(done: bool, id: String, reason: impl FnOnce() -> String) -> OperationResult {
    if done {
        OperationResult::ok(vec![id])
    } else {
        OperationResult::noop(reason())
    }
}

fn execution_result(report: ExecutionReport) -> OperationResult<ExecutionReport> {
    let ids = std::iter::once(report.execution_id.to_string())
        .chain(report.dispatched.iter().map(ToString::to_string))
        .collect();
    OperationResult::ok(ids).with_detail(report)
}
