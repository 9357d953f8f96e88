//! Sequence execution engine.
//!
//! One execution per (sequence, target) pair, advanced one step per call.
//!
//! # 設計原則
//! - 実行状態はすべて SequenceStore に永続化（メモリ上の継続を持たない）
//! - ステップは version の CAS で確保してから送信する
//! - ステップ k+1 は、直近のログがステップ k の場合のみ実行できる

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::analytics::SequenceAnalytics;
use super::render::{RenderedContent, render};
use crate::domain::{
    CadenceError, ContinueReport, ErrorKind, ExecutionId, ExecutionLogEntry, ExecutionReport,
    ExecutionStatus, MessageId, NewMessage, SequenceDefinition, SequenceExecution, SequenceId,
    SequenceLink, StopCondition, TargetEntity, TargetId, Trigger,
};
use crate::ports::{
    Clock, ContentValidator, IdGenerator, RateCounter, RateScope, SequenceStore, TargetDirectory,
};
use crate::queue::{DispatchQueue, ScheduleOptions};
use crate::schedule::Resolver;

pub const PAYMENT_RECEIVED: &str = "Payment received";

/// CAS attempts for stop/cancel before giving up with a conflict.
const TERMINATE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct SequenceSettings {
    /// Messages to one recipient allowed within `contact_window_hours`.
    pub contact_limit: u32,
    pub contact_window_hours: u32,
    pub block_on_validation_failure: bool,
    pub due_batch_size: usize,
    /// How long a step claim may stay unfinished before another pickup settles it.
    pub claim_timeout: Duration,
}

impl Default for SequenceSettings {
    fn default() -> Self {
        Self {
            contact_limit: 3,
            contact_window_hours: 24,
            block_on_validation_failure: false,
            due_batch_size: 100,
            claim_timeout: Duration::minutes(10),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Run step 1 now instead of after its delay.
    pub dispatch_immediately: bool,
    pub trigger: Trigger,
}

impl StartOptions {
    pub fn immediate() -> Self {
        Self {
            dispatch_immediately: true,
            trigger: Trigger::default(),
        }
    }
}

#[derive(Clone)]
pub struct EnginePorts {
    pub sequences: Arc<dyn SequenceStore>,
    pub directory: Arc<dyn TargetDirectory>,
    pub rates: Arc<dyn RateCounter>,
    pub validator: Arc<dyn ContentValidator>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

pub struct SequenceEngine {
    ports: EnginePorts,
    queue: Arc<DispatchQueue>,
    resolver: Resolver,
    settings: SequenceSettings,
}

/// Content for one language variant, rendered and checked before the step is claimed.
struct Prepared {
    language: String,
    content: RenderedContent,
}

/// How an abandoned step claim was settled.
enum Recovery {
    /// The step reached the log; the execution moved past it.
    Advanced(ExecutionReport),
    /// Nothing was logged; the claim is released and the step can run again.
    Released(SequenceExecution),
}

impl SequenceEngine {
    pub fn new(
        ports: EnginePorts,
        queue: Arc<DispatchQueue>,
        resolver: Resolver,
        settings: SequenceSettings,
    ) -> Self {
        Self {
            ports,
            queue,
            resolver,
            settings,
        }
    }

    pub fn settings(&self) -> &SequenceSettings {
        &self.settings
    }

    pub async fn execution(
        &self,
        id: ExecutionId,
    ) -> Result<Option<SequenceExecution>, CadenceError> {
        Ok(self.ports.sequences.execution(id).await?)
    }

    pub async fn log(&self, id: ExecutionId) -> Result<Vec<ExecutionLogEntry>, CadenceError> {
        Ok(self.ports.sequences.log_for(id).await?)
    }

    /// Start a new execution of `sequence_id` against `target_id`.
    #[tracing::instrument(skip(self, options), fields(%sequence_id, %target_id))]
    pub async fn start(
        &self,
        sequence_id: SequenceId,
        target_id: TargetId,
        options: StartOptions,
    ) -> Result<ExecutionReport, CadenceError> {
        let definition = self.load_definition(sequence_id).await?;
        if !definition.active {
            return Err(CadenceError::SequenceInactive(sequence_id));
        }
        definition.validate()?;

        let target = self.load_target(&target_id).await?;
        if target.tenant_id != definition.tenant_id {
            return Err(CadenceError::Validation(format!(
                "target {target_id} belongs to tenant {}, sequence to {}",
                target.tenant_id, definition.tenant_id
            )));
        }
        if target.status.is_terminal() || target.is_fully_paid() {
            return Err(CadenceError::TargetResolved {
                target: target_id,
                status: target.status.to_string(),
            });
        }
        if self
            .ports
            .directory
            .is_tenant_suspended(&definition.tenant_id)
            .await?
        {
            return Err(CadenceError::TenantSuspended(definition.tenant_id));
        }
        if self
            .ports
            .sequences
            .active_execution(sequence_id, &target_id)
            .await?
            .is_some()
        {
            return Err(CadenceError::AlreadyRunning {
                sequence: sequence_id,
                target: target_id,
            });
        }

        let address = target.recipient.normalized_address();
        if self.ports.directory.is_suppressed(&address).await? {
            return Err(CadenceError::RecipientSuppressed(address));
        }
        let now = self.ports.clock.now();
        self.check_contact_frequency(&address, now).await?;

        let mut execution = SequenceExecution::new(
            self.ports.ids.execution_id(),
            definition.tenant_id.clone(),
            sequence_id,
            target_id.clone(),
            definition.total_steps(),
            options.trigger,
            now,
        );
        execution.next_step_due_at = Some(if options.dispatch_immediately {
            now
        } else {
            self.next_due(&definition, 1, now)
        });

        if !self
            .ports
            .sequences
            .insert_execution(execution.clone())
            .await?
        {
            return Err(CadenceError::AlreadyRunning {
                sequence: sequence_id,
                target: target_id,
            });
        }
        info!(
            execution_id = %execution.id,
            total_steps = execution.total_steps,
            next_step_due_at = ?execution.next_step_due_at,
            "execution started"
        );

        if !options.dispatch_immediately {
            return Ok(report(&execution, Vec::new()));
        }
        match self
            .run_step(execution.clone(), &definition, &target, now)
            .await
        {
            // A first step that cannot run must not hold the pair.
            Err(e) if !e.is_infrastructure() && e.kind() != ErrorKind::Conflict => {
                warn!(execution_id = %execution.id, error = %e, "first step failed");
                self.terminate(
                    execution,
                    ExecutionStatus::Cancelled,
                    Some(format!("First step failed: {e}")),
                )
                .await?;
                Err(e)
            }
            other => other,
        }
    }

    /// Advance an execution by one step, or report why it cannot move.
    #[tracing::instrument(skip(self))]
    pub async fn continue_execution(
        &self,
        execution_id: ExecutionId,
    ) -> Result<ExecutionReport, CadenceError> {
        let execution = self
            .ports
            .sequences
            .execution(execution_id)
            .await?
            .ok_or(CadenceError::ExecutionNotFound(execution_id))?;

        if execution.status.is_terminal() {
            debug!(status = %execution.status, "execution already terminal");
            return Ok(report(&execution, Vec::new()));
        }

        let now = self.ports.clock.now();
        let execution = match execution.claimed_step {
            Some(step) if execution.has_live_claim(now) => {
                return Err(CadenceError::Conflict(format!(
                    "step {step} of {execution_id} is being dispatched"
                )));
            }
            Some(step) => match self.recover_claim(execution, step, now).await? {
                Recovery::Advanced(report) => return Ok(report),
                Recovery::Released(released) => released,
            },
            None => execution,
        };

        if execution.current_step >= execution.total_steps {
            let mut done = execution.next_version();
            done.finish(ExecutionStatus::Completed, None, now)?;
            return self.write_terminal(done, execution.version).await;
        }

        let definition = self.load_definition(execution.sequence_id).await?;
        let target = self.load_target(&execution.target_id).await?;
        let step_number = execution.next_step();
        let step = definition.step(step_number).ok_or_else(|| {
            CadenceError::Validation(format!(
                "sequence {} has no step {step_number}",
                definition.id
            ))
        })?;

        if let Some(reason) = stop_reason(&step.stop_conditions, &target) {
            info!(step = step_number, %reason, "stop condition met");
            self.terminate(execution, ExecutionStatus::Stopped, Some(reason))
                .await?;
            let stopped = self
                .ports
                .sequences
                .execution(execution_id)
                .await?
                .ok_or(CadenceError::ExecutionNotFound(execution_id))?;
            return Ok(report(&stopped, Vec::new()));
        }

        self.run_step(execution, &definition, &target, now).await
    }

    /// Stop the active execution for a pair. False when nothing was active.
    #[tracing::instrument(skip(self, reason))]
    pub async fn stop(
        &self,
        sequence_id: SequenceId,
        target_id: &TargetId,
        reason: impl Into<String>,
    ) -> Result<bool, CadenceError> {
        let Some(execution) = self
            .ports
            .sequences
            .active_execution(sequence_id, target_id)
            .await?
        else {
            return Ok(false);
        };
        self.terminate(execution, ExecutionStatus::Stopped, Some(reason.into()))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel_execution(&self, execution_id: ExecutionId) -> Result<bool, CadenceError> {
        let Some(execution) = self.ports.sequences.execution(execution_id).await? else {
            return Ok(false);
        };
        self.terminate(execution, ExecutionStatus::Cancelled, None)
            .await
    }

    /// Sweep entry point: continue every execution whose next step is due.
    #[tracing::instrument(skip(self))]
    pub async fn continue_due(&self) -> Result<ContinueReport, CadenceError> {
        let now = self.ports.clock.now();
        let due = self
            .ports
            .sequences
            .due_executions(now, self.settings.due_batch_size)
            .await?;

        let mut summary = ContinueReport::default();
        for execution in due {
            summary.examined += 1;
            match self.continue_execution(execution.id).await {
                Ok(r) => summary.absorb(&r),
                Err(e) if e.is_infrastructure() => return Err(e),
                Err(e) if e.kind() == ErrorKind::Conflict => {
                    debug!(execution_id = %execution.id, "step claimed elsewhere");
                }
                Err(e) => {
                    warn!(execution_id = %execution.id, error = %e, "continue failed");
                    summary.errors.push(format!("{}: {e}", execution.id));
                }
            }
        }
        if summary.examined > 0 {
            info!(
                examined = summary.examined,
                advanced = summary.advanced,
                completed = summary.completed,
                stopped = summary.stopped,
                "due executions continued"
            );
        }
        Ok(summary)
    }

    /// Per-step funnel and conversion for one sequence.
    pub async fn analytics(
        &self,
        sequence_id: SequenceId,
    ) -> Result<SequenceAnalytics, CadenceError> {
        self.load_definition(sequence_id).await?;
        let executions = self
            .ports
            .sequences
            .executions_for_sequence(sequence_id)
            .await?;
        let logs = self.ports.sequences.logs_for_sequence(sequence_id).await?;
        let message_ids: Vec<MessageId> = logs.iter().map(|e| e.message_id).collect();
        let events = self.ports.sequences.engagements_for(&message_ids).await?;

        let mut paid = Vec::new();
        for execution in &executions {
            if let Some(target) = self.ports.directory.target(&execution.target_id).await?
                && target.is_fully_paid()
            {
                paid.push(execution.target_id.clone());
            }
        }
        Ok(SequenceAnalytics::compute(
            sequence_id,
            &executions,
            &logs,
            &events,
            &paid,
        ))
    }

    /// Render, claim, dispatch and log the next step of `execution`.
    async fn run_step(
        &self,
        execution: SequenceExecution,
        definition: &SequenceDefinition,
        target: &TargetEntity,
        now: DateTime<Utc>,
    ) -> Result<ExecutionReport, CadenceError> {
        let step_number = execution.next_step();
        self.check_order(&execution, step_number).await?;
        let prepared = self.prepare(definition, step_number, target).await?;

        let mut claimed = execution.next_version();
        claimed.claimed_step = Some(step_number);
        claimed.last_execution_at = Some(now);
        claimed.next_step_due_at = Some(now + self.settings.claim_timeout);
        claimed.updated_at = now;
        if !self
            .ports
            .sequences
            .replace_execution(claimed.clone(), execution.version)
            .await?
        {
            return Err(CadenceError::Conflict(format!(
                "step {step_number} of {} already claimed",
                execution.id
            )));
        }

        let mut dispatched = Vec::new();
        for Prepared { language, content } in prepared {
            let input = NewMessage::new(
                definition.tenant_id.clone(),
                target.id.clone(),
                target.recipient.clone(),
                content.subject.clone(),
                content.body.clone(),
            )
            .with_language(language.clone())
            .with_priority(definition.priority)
            .linked_to(SequenceLink {
                sequence_id: definition.id,
                execution_id: execution.id,
                step_number,
            });

            let message_id = match self
                .queue
                .schedule(input, ScheduleOptions::constrained(definition.constraints.clone()))
                .await
            {
                Ok(id) => id,
                Err(e) if dispatched.is_empty() => {
                    self.rollback(&claimed, &execution).await?;
                    return Err(e);
                }
                Err(e) if e.is_infrastructure() => return Err(e),
                Err(e) => {
                    warn!(step = step_number, %language, error = %e, "variant not dispatched");
                    continue;
                }
            };

            self.ports
                .sequences
                .append_log(ExecutionLogEntry {
                    id: self.ports.ids.log_entry_id(),
                    execution_id: execution.id,
                    sequence_id: definition.id,
                    step_number,
                    language,
                    subject: content.subject,
                    body: content.body,
                    message_id,
                    dispatched_at: now,
                })
                .await?;
            dispatched.push(message_id);
        }

        let mut advanced = claimed.next_version();
        advanced.current_step = step_number;
        advanced.claimed_step = None;
        if step_number >= claimed.total_steps {
            advanced.finish(ExecutionStatus::Completed, None, now)?;
        } else {
            advanced.next_step_due_at = Some(self.next_due(definition, step_number + 1, now));
        }

        if !self
            .ports
            .sequences
            .replace_execution(advanced.clone(), claimed.version)
            .await?
        {
            // Stopped or cancelled while the step was being dispatched.
            warn!(execution_id = %execution.id, step = step_number, "execution changed during step");
            let current = self
                .ports
                .sequences
                .execution(execution.id)
                .await?
                .ok_or(CadenceError::ExecutionNotFound(execution.id))?;
            if current.status.is_terminal() {
                // The terminating call cancelled before these were queued.
                let cancelled = self.queue.cancel_for_execution(execution.id).await?;
                info!(execution_id = %execution.id, status = %current.status, cancelled, "late dispatches cancelled");
            }
            return Ok(report(&current, dispatched));
        }

        info!(
            execution_id = %execution.id,
            step = step_number,
            dispatched = dispatched.len(),
            status = %advanced.status,
            "step executed"
        );
        Ok(report(&advanced, dispatched))
    }

    /// Step k+1 runs only when step k is the most recent log entry.
    async fn check_order(
        &self,
        execution: &SequenceExecution,
        step_number: u32,
    ) -> Result<(), CadenceError> {
        let log = self.ports.sequences.log_for(execution.id).await?;
        let last_logged = log.last().map(|entry| entry.step_number);
        let expected = step_number.checked_sub(1).filter(|n| *n > 0);
        if last_logged != expected {
            return Err(CadenceError::StepOutOfOrder {
                execution: execution.id,
                requested: step_number,
                last_logged,
            });
        }
        Ok(())
    }

    async fn prepare(
        &self,
        definition: &SequenceDefinition,
        step_number: u32,
        target: &TargetEntity,
    ) -> Result<Vec<Prepared>, CadenceError> {
        let step = definition.step(step_number).ok_or_else(|| {
            CadenceError::Validation(format!(
                "sequence {} has no step {step_number}",
                definition.id
            ))
        })?;

        let mut prepared = Vec::with_capacity(definition.languages.len());
        let mut issues = Vec::new();
        for language in &definition.languages {
            let template = step.templates.get(language).ok_or_else(|| {
                CadenceError::Validation(format!(
                    "step {step_number} has no `{language}` template"
                ))
            })?;
            let content = render(template, target);
            let check = self
                .ports
                .validator
                .validate(&content.subject, &content.body)
                .await;
            if !check.valid {
                warn!(step = step_number, %language, issues = ?check.issues, "content check failed");
                issues.extend(check.issues.into_iter().map(|i| format!("{language}: {i}")));
            }
            prepared.push(Prepared {
                language: language.clone(),
                content,
            });
        }

        if !issues.is_empty() && self.settings.block_on_validation_failure {
            return Err(CadenceError::ContentRejected(issues));
        }
        Ok(prepared)
    }

    /// Settle a claim whose deadline passed without the step being finished.
    async fn recover_claim(
        &self,
        execution: SequenceExecution,
        step_number: u32,
        now: DateTime<Utc>,
    ) -> Result<Recovery, CadenceError> {
        let log = self.ports.sequences.log_for(execution.id).await?;
        let logged = log.last().filter(|entry| entry.step_number == step_number);

        let mut settled = execution.next_version();
        settled.claimed_step = None;
        settled.updated_at = now;
        let recovery = match logged {
            Some(entry) => {
                settled.current_step = step_number;
                if step_number >= settled.total_steps {
                    settled.finish(ExecutionStatus::Completed, None, now)?;
                } else {
                    let definition = self.load_definition(execution.sequence_id).await?;
                    settled.next_step_due_at =
                        Some(self.next_due(&definition, step_number + 1, entry.dispatched_at));
                }
                Recovery::Advanced(report(&settled, Vec::new()))
            }
            None => {
                // Queued but unlogged variants would go out twice once the step reruns.
                self.queue.cancel_for_step(execution.id, step_number).await?;
                settled.next_step_due_at = Some(now);
                Recovery::Released(settled.clone())
            }
        };

        if !self
            .ports
            .sequences
            .replace_execution(settled, execution.version)
            .await?
        {
            return Err(CadenceError::Conflict(format!(
                "execution {} changed while settling step {step_number}",
                execution.id
            )));
        }
        warn!(
            execution_id = %execution.id,
            step = step_number,
            logged = logged.is_some(),
            "abandoned step claim settled"
        );
        Ok(recovery)
    }

    /// Undo a step claim when nothing could be dispatched.
    async fn rollback(
        &self,
        claimed: &SequenceExecution,
        original: &SequenceExecution,
    ) -> Result<(), CadenceError> {
        let mut restored = original.clone();
        restored.version = claimed.version + 1;
        if !self
            .ports
            .sequences
            .replace_execution(restored, claimed.version)
            .await?
        {
            warn!(execution_id = %original.id, "step claim could not be rolled back");
        }
        Ok(())
    }

    /// Cancel queued dispatches, then move to a terminal status.
    async fn terminate(
        &self,
        mut execution: SequenceExecution,
        status: ExecutionStatus,
        reason: Option<String>,
    ) -> Result<bool, CadenceError> {
        for _ in 0..TERMINATE_ATTEMPTS {
            if execution.status.is_terminal() {
                return Ok(false);
            }
            let cancelled = self.queue.cancel_for_execution(execution.id).await?;

            let mut next = execution.next_version();
            next.finish(status, reason.clone(), self.ports.clock.now())?;
            if self
                .ports
                .sequences
                .replace_execution(next, execution.version)
                .await?
            {
                info!(
                    execution_id = %execution.id,
                    %status,
                    reason = reason.as_deref().unwrap_or(""),
                    cancelled,
                    "execution terminated"
                );
                return Ok(true);
            }

            execution = self
                .ports
                .sequences
                .execution(execution.id)
                .await?
                .ok_or(CadenceError::ExecutionNotFound(execution.id))?;
        }
        Err(CadenceError::Conflict(format!(
            "execution {} kept changing while terminating",
            execution.id
        )))
    }

    async fn write_terminal(
        &self,
        execution: SequenceExecution,
        expected_version: u64,
    ) -> Result<ExecutionReport, CadenceError> {
        if !self
            .ports
            .sequences
            .replace_execution(execution.clone(), expected_version)
            .await?
        {
            return Err(CadenceError::Conflict(format!(
                "execution {} changed concurrently",
                execution.id
            )));
        }
        Ok(report(&execution, Vec::new()))
    }

    async fn check_contact_frequency(
        &self,
        address: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CadenceError> {
        let window_hours = self.settings.contact_window_hours;
        let since = now - Duration::hours(i64::from(window_hours));
        let sent = self
            .ports
            .rates
            .usage(&RateScope::Recipient(address.to_string()), since)
            .await?;
        if sent >= self.settings.contact_limit {
            return Err(CadenceError::ContactLimitExceeded {
                address: address.to_string(),
                sent,
                window_hours,
            });
        }
        Ok(())
    }

    /// Resolved due time of `step_number`, counted from `from`.
    fn next_due(
        &self,
        definition: &SequenceDefinition,
        step_number: u32,
        from: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let delay = definition
            .step(step_number)
            .map_or(0, |step| i64::from(step.delay_days));
        self.resolver.resolve(
            from + Duration::days(delay),
            &definition.constraints,
            definition.priority,
        )
    }

    async fn load_definition(
        &self,
        sequence_id: SequenceId,
    ) -> Result<SequenceDefinition, CadenceError> {
        self.ports
            .sequences
            .definition(sequence_id)
            .await?
            .ok_or(CadenceError::SequenceNotFound(sequence_id))
    }

    async fn load_target(&self, target_id: &TargetId) -> Result<TargetEntity, CadenceError> {
        self.ports
            .directory
            .target(target_id)
            .await?
            .ok_or_else(|| CadenceError::TargetNotFound(target_id.clone()))
    }
}

/// First stop condition the target currently meets, as a stop reason.
fn stop_reason(conditions: &[StopCondition], target: &TargetEntity) -> Option<String> {
    conditions.iter().find_map(|condition| match condition {
        StopCondition::PaymentReceived if target.is_fully_paid() => {
            Some(PAYMENT_RECEIVED.to_string())
        }
        StopCondition::TargetResolved if target.status.is_terminal() => {
            Some(format!("Target {}", target.status))
        }
        _ => None,
    })
}

fn report(execution: &SequenceExecution, dispatched: Vec<MessageId>) -> ExecutionReport {
    ExecutionReport {
        execution_id: execution.id,
        status: execution.status,
        stop_reason: execution.stop_reason.clone(),
        dispatched,
        steps_remaining: execution.steps_remaining(),
        next_step_due_at: execution.next_step_due_at,
    }
}
