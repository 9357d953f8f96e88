//! Rate-limited dispatch queue.
//!
//! # 学習ポイント
//! - 状態遷移はすべて store の条件付き操作で行う（claim / update_if）
//! - レート枠は送信前に予約し、失敗時に返却する
//! - 負けた claim はエラーではなくスキップ

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::metrics::{HealthThresholds, QueueMetrics};
use super::retry::RetryPolicy;
use crate::domain::{
    CadenceError, ConstraintConfig, Decider, Decision, DefaultDecider, ExecutionId, MessageId,
    MessageStatus, NewMessage, ProcessReport, ScheduledMessage, TenantId,
};
use crate::ports::{
    Clock, IdGenerator, MailTransport, MessageFilter, MessageStore, RateCounter, RateLimits,
    RateScope, TargetDirectory,
};
use crate::schedule::{ResolveOptions, Resolver};

/// Which counter a send is charged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateScopeMode {
    #[default]
    Global,
    PerTenant,
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub limits: RateLimits,
    pub rate_scope: RateScopeMode,
    /// Messages resolved to within this much of now are sent right away.
    pub near_term_threshold: Duration,
    pub default_max_retries: u32,
    pub max_retries_cap: u32,
    /// Upper bound on messages examined per `process_due` pass.
    pub batch_size: usize,
    /// A SENDING claim older than this belongs to a dead worker.
    pub claim_timeout: Duration,
    pub retry: RetryPolicy,
    pub health: HealthThresholds,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            limits: RateLimits {
                per_hour: 100,
                per_day: 1000,
                burst: 10,
                burst_window: Duration::minutes(1),
            },
            rate_scope: RateScopeMode::Global,
            near_term_threshold: Duration::minutes(5),
            default_max_retries: 3,
            max_retries_cap: 10,
            batch_size: 500,
            claim_timeout: Duration::minutes(10),
            retry: RetryPolicy::default(),
            health: HealthThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    /// Resolve the send time against these; `None` keeps the requested time.
    pub constraints: Option<ConstraintConfig>,
    pub bypass_hard_constraints: bool,
}

impl ScheduleOptions {
    pub fn constrained(constraints: ConstraintConfig) -> Self {
        Self {
            constraints: Some(constraints),
            bypass_hard_constraints: false,
        }
    }
}

/// Port handles the queue needs.
#[derive(Clone)]
pub struct DispatchPorts {
    pub store: Arc<dyn MessageStore>,
    pub rates: Arc<dyn RateCounter>,
    pub transport: Arc<dyn MailTransport>,
    pub directory: Arc<dyn TargetDirectory>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

/// What happened to one message in a dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    Retried,
    Failed,
    /// Hard constraints no longer held at send time; moved without penalty.
    Rescheduled,
    /// No rate capacity; left QUEUED.
    Deferred,
    /// Another worker claimed it first.
    Skipped,
}

pub struct DispatchQueue {
    ports: DispatchPorts,
    decider: Arc<dyn Decider>,
    resolver: Resolver,
    settings: DispatchSettings,
}

impl DispatchQueue {
    pub fn new(ports: DispatchPorts, resolver: Resolver, settings: DispatchSettings) -> Self {
        let decider = Arc::new(DefaultDecider::new(settings.retry.clone()));
        Self {
            ports,
            decider,
            resolver,
            settings,
        }
    }

    pub fn with_decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = decider;
        self
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub async fn get(&self, id: MessageId) -> Result<Option<ScheduledMessage>, CadenceError> {
        Ok(self.ports.store.get(id).await?)
    }

    /// Validate, resolve the send time and persist a QUEUED message.
    #[tracing::instrument(
        skip(self, input, options),
        fields(tenant_id = %input.tenant_id, target_id = %input.target_id)
    )]
    pub async fn schedule(
        &self,
        input: NewMessage,
        options: ScheduleOptions,
    ) -> Result<MessageId, CadenceError> {
        self.validate(&input)?;
        if self
            .ports
            .directory
            .is_tenant_suspended(&input.tenant_id)
            .await?
        {
            return Err(CadenceError::TenantSuspended(input.tenant_id));
        }

        let now = self.ports.clock.now();
        let candidate = input.requested_at.map_or(now, |at| at.max(now));
        let (scheduled_for, constraints) = match options.constraints {
            Some(config) => {
                let resolution = self.resolver.resolve_with(
                    candidate,
                    &config,
                    ResolveOptions {
                        priority: input.priority,
                        bypass_hard_constraints: options.bypass_hard_constraints,
                    },
                );
                debug!(
                    iterations = resolution.iterations,
                    fell_back = resolution.fell_back,
                    bypassed = resolution.bypassed,
                    "send time resolved"
                );
                // A bypassed send must not be pushed back by send-time re-validation.
                let kept = (!resolution.bypassed).then_some(config);
                (resolution.at, kept)
            }
            None => (candidate, None),
        };

        let max_retries = input
            .max_retries
            .unwrap_or(self.settings.default_max_retries);
        let id = self.ports.ids.message_id();
        let message =
            ScheduledMessage::queued(id, input, scheduled_for, max_retries, constraints, now);
        self.ports.store.insert(message.clone()).await?;
        info!(message_id = %id, %scheduled_for, priority = ?message.priority, "message scheduled");

        if scheduled_for - now <= self.settings.near_term_threshold {
            match self.dispatch_one(message, now).await {
                Ok(outcome) => debug!(message_id = %id, ?outcome, "near-term dispatch"),
                Err(e) if e.is_infrastructure() => return Err(e),
                Err(e) => warn!(message_id = %id, error = %e, "near-term dispatch failed"),
            }
        }
        Ok(id)
    }

    /// Send every due message the rate windows allow.
    #[tracing::instrument(skip(self))]
    pub async fn process_due(&self) -> Result<ProcessReport, CadenceError> {
        let now = self.ports.clock.now();
        let due = self.ports.store.due(now, self.settings.batch_size).await?;
        if due.is_empty() {
            return Ok(ProcessReport::default());
        }

        let capacity = match self.settings.rate_scope {
            RateScopeMode::Global => self
                .ports
                .rates
                .remaining(&RateScope::Global, &self.settings.limits, now)
                .await? as usize,
            // Each tenant has its own windows; reservation decides per message.
            RateScopeMode::PerTenant => due.len(),
        };

        let mut report = ProcessReport::default();
        let (selected, overflow) = due.split_at(capacity.min(due.len()));
        report.deferred += overflow.len() as u32;

        for message in selected {
            let id = message.id;
            match self.dispatch_one(message.clone(), now).await {
                Ok(outcome) => tally(&mut report, outcome),
                Err(e) if e.is_infrastructure() => return Err(e),
                Err(e) => {
                    warn!(message_id = %id, error = %e, "dispatch failed");
                    report.errors.push(format!("{id}: {e}"));
                }
            }
        }

        info!(
            processed = report.processed,
            sent = report.sent,
            failed = report.failed,
            rescheduled = report.rescheduled,
            deferred = report.deferred,
            "due messages processed"
        );
        Ok(report)
    }

    /// Claim, reserve capacity, re-validate and send one message.
    async fn dispatch_one(
        &self,
        message: ScheduledMessage,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, CadenceError> {
        let Some(mut claimed) = self.ports.store.claim(message.id, now).await? else {
            debug!(message_id = %message.id, "claim lost");
            return Ok(DispatchOutcome::Skipped);
        };

        let scope = self.scope_for(&claimed);
        let Some(reservation) = self
            .ports
            .rates
            .try_acquire(&scope, &self.settings.limits, now)
            .await?
        else {
            let at = claimed.scheduled_for;
            claimed.requeue(at, now)?;
            self.ports
                .store
                .update_if(claimed, MessageStatus::Sending)
                .await?;
            debug!(message_id = %message.id, %scope, "rate capacity exhausted");
            return Ok(DispatchOutcome::Deferred);
        };

        if let Some(config) = claimed.constraints.clone()
            && !Resolver::satisfies_hard_constraints(now, &config)
        {
            self.ports.rates.release(&reservation).await?;
            let next = self.resolver.resolve(now, &config, claimed.priority);
            claimed.requeue(next, now)?;
            self.ports
                .store
                .update_if(claimed, MessageStatus::Sending)
                .await?;
            info!(message_id = %message.id, %next, "constraints no longer hold, rescheduled");
            return Ok(DispatchOutcome::Rescheduled);
        }

        match self.ports.transport.send(&claimed).await {
            Ok(receipt) => {
                claimed.mark_sent(receipt.provider_message_id, now)?;
                if receipt.confirmed {
                    claimed.mark_delivered(now)?;
                }
                let recipient = RateScope::Recipient(claimed.recipient.normalized_address());
                if !self
                    .ports
                    .store
                    .update_if(claimed, MessageStatus::Sending)
                    .await?
                {
                    warn!(message_id = %message.id, "message changed while sending");
                }
                self.ports.rates.record(&recipient, now).await?;
                info!(message_id = %message.id, "message sent");
                Ok(DispatchOutcome::Sent)
            }
            Err(transport_error) => {
                self.ports.rates.release(&reservation).await?;
                let outcome = match self.decider.decide(&claimed, &transport_error) {
                    Decision::Retry { delay, reason } => {
                        let delay = Duration::from_std(delay).unwrap_or_else(|_| Duration::zero());
                        claimed.schedule_retry(now + delay, transport_error.to_string(), now)?;
                        warn!(message_id = %message.id, %reason, "send failed, retry scheduled");
                        DispatchOutcome::Retried
                    }
                    Decision::Fail { reason } => {
                        error!(message_id = %message.id, %reason, "send failed permanently");
                        claimed.mark_failed(reason, now)?;
                        DispatchOutcome::Failed
                    }
                };
                self.ports
                    .store
                    .update_if(claimed, MessageStatus::Sending)
                    .await?;
                Ok(outcome)
            }
        }
    }

    /// Put messages whose SENDING claim outlived `claim_timeout` back in the queue.
    ///
    /// The dead worker's rate reservation is not released; it ages out of the windows.
    #[tracing::instrument(skip(self))]
    pub async fn reclaim_stale(&self) -> Result<u32, CadenceError> {
        let now = self.ports.clock.now();
        let reclaimed = self
            .ports
            .store
            .reclaim_stale(now - self.settings.claim_timeout, now)
            .await?;
        if !reclaimed.is_empty() {
            warn!(count = reclaimed.len(), ids = ?reclaimed, "stale claims returned to queue");
        }
        Ok(reclaimed.len() as u32)
    }

    /// QUEUED -> CANCELLED. False for anything else, including a second call.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, id: MessageId) -> Result<bool, CadenceError> {
        let Some(mut message) = self.ports.store.get(id).await? else {
            return Ok(false);
        };
        if message.status != MessageStatus::Queued {
            return Ok(false);
        }
        message.transition(MessageStatus::Cancelled, self.ports.clock.now())?;
        let cancelled = self
            .ports
            .store
            .update_if(message, MessageStatus::Queued)
            .await?;
        if cancelled {
            info!(message_id = %id, "message cancelled");
        }
        Ok(cancelled)
    }

    /// Move a QUEUED or FAILED message to a new time, re-resolved against its
    /// constraints.
    #[tracing::instrument(skip(self))]
    pub async fn reschedule(
        &self,
        id: MessageId,
        new_time: DateTime<Utc>,
        reset_retry_count: bool,
    ) -> Result<bool, CadenceError> {
        let Some(mut message) = self.ports.store.get(id).await? else {
            return Ok(false);
        };
        let now = self.ports.clock.now();
        let expected = message.status;
        match expected {
            MessageStatus::Queued => {}
            MessageStatus::Failed => message.transition(MessageStatus::Queued, now)?,
            _ => return Ok(false),
        }

        let candidate = new_time.max(now);
        message.scheduled_for = match &message.constraints {
            Some(config) => self.resolver.resolve(candidate, config, message.priority),
            None => candidate,
        };
        if reset_retry_count {
            message.retry_count = 0;
        }
        message.updated_at = now;
        let scheduled_for = message.scheduled_for;

        let moved = self.ports.store.update_if(message, expected).await?;
        if moved {
            info!(message_id = %id, %scheduled_for, "message rescheduled");
        }
        Ok(moved)
    }

    /// SENT -> DELIVERED.
    pub async fn confirm_delivery(&self, id: MessageId) -> Result<bool, CadenceError> {
        let Some(mut message) = self.ports.store.get(id).await? else {
            return Ok(false);
        };
        if message.status != MessageStatus::Sent {
            return Ok(false);
        }
        message.mark_delivered(self.ports.clock.now())?;
        Ok(self
            .ports
            .store
            .update_if(message, MessageStatus::Sent)
            .await?)
    }

    /// Cancel every QUEUED message produced by one execution.
    pub async fn cancel_for_execution(&self, execution_id: ExecutionId) -> Result<u32, CadenceError> {
        self.cancel_linked(execution_id, None).await
    }

    /// Cancel the QUEUED messages of a single step of one execution.
    pub async fn cancel_for_step(
        &self,
        execution_id: ExecutionId,
        step_number: u32,
    ) -> Result<u32, CadenceError> {
        self.cancel_linked(execution_id, Some(step_number)).await
    }

    async fn cancel_linked(
        &self,
        execution_id: ExecutionId,
        step_number: Option<u32>,
    ) -> Result<u32, CadenceError> {
        let now = self.ports.clock.now();
        let queued = self
            .ports
            .store
            .list(&MessageFilter::queued_for_execution(execution_id))
            .await?;
        let mut cancelled = 0;
        for mut message in queued.into_iter().filter(|m| {
            step_number.is_none_or(|step| m.sequence.is_some_and(|link| link.step_number == step))
        }) {
            message.transition(MessageStatus::Cancelled, now)?;
            if self
                .ports
                .store
                .update_if(message, MessageStatus::Queued)
                .await?
            {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(execution_id = %execution_id, ?step_number, cancelled, "queued dispatches cancelled");
        }
        Ok(cancelled)
    }

    pub async fn queue_metrics(
        &self,
        tenant_id: Option<&TenantId>,
    ) -> Result<QueueMetrics, CadenceError> {
        let messages = self
            .ports
            .store
            .list(&MessageFilter::for_tenant(tenant_id.cloned()))
            .await?;
        Ok(QueueMetrics::compute(
            &messages,
            self.ports.clock.now(),
            &self.settings.health,
        ))
    }

    fn scope_for(&self, message: &ScheduledMessage) -> RateScope {
        match self.settings.rate_scope {
            RateScopeMode::Global => RateScope::Global,
            RateScopeMode::PerTenant => RateScope::Tenant(message.tenant_id.clone()),
        }
    }

    fn validate(&self, input: &NewMessage) -> Result<(), CadenceError> {
        if !is_plausible_address(&input.recipient.address) {
            return Err(CadenceError::Validation(format!(
                "recipient address `{}` is malformed",
                input.recipient.address
            )));
        }
        if input.subject.trim().is_empty() {
            return Err(CadenceError::Validation("subject is empty".to_string()));
        }
        if input.body.trim().is_empty() {
            return Err(CadenceError::Validation("body is empty".to_string()));
        }
        if let Some(max) = input.max_retries
            && max > self.settings.max_retries_cap
        {
            return Err(CadenceError::Validation(format!(
                "max_retries {max} exceeds cap {}",
                self.settings.max_retries_cap
            )));
        }
        Ok(())
    }
}

fn tally(report: &mut ProcessReport, outcome: DispatchOutcome) {
    if outcome != DispatchOutcome::Skipped {
        report.processed += 1;
    }
    match outcome {
        DispatchOutcome::Sent => report.sent += 1,
        DispatchOutcome::Failed => report.failed += 1,
        DispatchOutcome::Retried | DispatchOutcome::Rescheduled => report.rescheduled += 1,
        DispatchOutcome::Deferred => report.deferred += 1,
        DispatchOutcome::Skipped => {}
    }
}

/// `local@domain.tld`, no whitespace, exactly one `@`.
fn is_plausible_address(address: &str) -> bool {
    let address = address.trim();
    if address.chars().any(char::is_whitespace) {
        return false;
    }
    let mut parts = address.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Priority, TransportError};
    use crate::fixtures::{self, QueueHarness};
    use rstest::rstest;

    #[rstest]
    #[case("ap@example.com", true)]
    #[case("a.b+c@mail.example.co", true)]
    #[case("no-at-sign.example.com", false)]
    #[case("two@@example.com", false)]
    #[case("@example.com", false)]
    #[case("ap@localhost", false)]
    #[case("ap @example.com", false)]
    fn address_shape(#[case] address: &str, #[case] ok: bool) {
        assert_eq!(is_plausible_address(address), ok);
    }

    #[tokio::test]
    async fn future_message_waits_for_sweep() {
        let h = QueueHarness::new(DispatchSettings::default());
        let id = h
            .queue
            .schedule(
                fixtures::new_message().requested_at(fixtures::now() + Duration::hours(2)),
                ScheduleOptions::default(),
            )
            .await
            .unwrap();

        assert!(h.transport.sent().await.is_empty());
        let report = h.queue.process_due().await.unwrap();
        assert_eq!(report, ProcessReport::default());

        h.clock.advance(Duration::hours(2));
        let report = h.queue.process_due().await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(h.transport.sent_ids().await, vec![id]);
    }

    #[tokio::test]
    async fn near_term_message_is_sent_immediately() {
        let h = QueueHarness::new(DispatchSettings::default());
        let id = h
            .queue
            .schedule(fixtures::new_message(), ScheduleOptions::default())
            .await
            .unwrap();

        let stored = h.queue.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Sent);
        assert_eq!(stored.provider_message_id.as_deref(), Some("rec-1"));
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_persisting() {
        let h = QueueHarness::new(DispatchSettings::default());
        let mut input = fixtures::new_message();
        input.subject = "  ".into();
        let err = h
            .queue
            .schedule(input, ScheduleOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::Validation(_)));

        let err = h
            .queue
            .schedule(
                fixtures::new_message().with_max_retries(99),
                ScheduleOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::Validation(_)));
        assert_eq!(h.queue.queue_metrics(None).await.unwrap().total_queued, 0);
    }

    #[tokio::test]
    async fn suspended_tenant_cannot_schedule() {
        let h = QueueHarness::new(DispatchSettings::default());
        h.directory.suspend_tenant(TenantId::new("acme")).await;
        let err = h
            .queue
            .schedule(fixtures::new_message(), ScheduleOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::TenantSuspended(_)));
    }

    #[tokio::test]
    async fn burst_limit_defers_overflow() {
        let mut settings = DispatchSettings::default();
        settings.limits.burst = 5;
        settings.near_term_threshold = Duration::zero() - Duration::seconds(1);
        let h = QueueHarness::new(settings);

        for _ in 0..6 {
            h.queue
                .schedule(fixtures::new_message(), ScheduleOptions::default())
                .await
                .unwrap();
        }

        let report = h.queue.process_due().await.unwrap();
        assert_eq!(report.sent, 5);
        assert_eq!(report.deferred, 1);

        h.clock.advance(Duration::seconds(61));
        let report = h.queue.process_due().await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(h.transport.sent().await.len(), 6);
    }

    #[tokio::test]
    async fn transient_failure_retries_then_fails() {
        let mut settings = DispatchSettings::default();
        settings.retry = RetryPolicy::fixed(std::time::Duration::from_secs(60));
        settings.near_term_threshold = Duration::zero() - Duration::seconds(1);
        let h = QueueHarness::new(settings);
        h.transport
            .fail_next((0..3).map(|_| TransportError::Transient("timeout".into())))
            .await;

        let id = h
            .queue
            .schedule(
                fixtures::new_message().with_max_retries(2),
                ScheduleOptions::default(),
            )
            .await
            .unwrap();

        for expected_retries in 1..=2 {
            let report = h.queue.process_due().await.unwrap();
            assert_eq!(report.rescheduled, 1);
            let m = h.queue.get(id).await.unwrap().unwrap();
            assert_eq!(m.retry_count, expected_retries);
            assert_eq!(m.status, MessageStatus::Queued);
            h.clock.advance(Duration::seconds(60));
        }

        let report = h.queue.process_due().await.unwrap();
        assert_eq!(report.failed, 1);
        let m = h.queue.get(id).await.unwrap().unwrap();
        assert_eq!(m.status, MessageStatus::Failed);
        assert_eq!(m.retry_count, 2);
        assert!(m.last_error.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn permanent_failure_is_terminal_and_releases_capacity() {
        let mut settings = DispatchSettings::default();
        settings.limits.burst = 1;
        let h = QueueHarness::new(settings);
        h.transport
            .fail_next([TransportError::Permanent("mailbox gone".into())])
            .await;

        let id = h
            .queue
            .schedule(fixtures::new_message(), ScheduleOptions::default())
            .await
            .unwrap();
        assert_eq!(
            h.queue.get(id).await.unwrap().unwrap().status,
            MessageStatus::Failed
        );

        // The failed send did not consume the single burst slot.
        let second = h
            .queue
            .schedule(fixtures::new_message(), ScheduleOptions::default())
            .await
            .unwrap();
        assert_eq!(
            h.queue.get(second).await.unwrap().unwrap().status,
            MessageStatus::Sent
        );
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let h = QueueHarness::new(DispatchSettings::default());
        let id = h
            .queue
            .schedule(
                fixtures::new_message().requested_at(fixtures::now() + Duration::days(1)),
                ScheduleOptions::default(),
            )
            .await
            .unwrap();

        assert!(h.queue.cancel(id).await.unwrap());
        assert!(!h.queue.cancel(id).await.unwrap());
        assert!(!h.queue.reschedule(id, fixtures::now(), false).await.unwrap());
    }

    #[tokio::test]
    async fn failed_message_can_be_revived_by_reschedule() {
        let h = QueueHarness::new(DispatchSettings::default());
        h.transport
            .fail_next([TransportError::Permanent("bounce".into())])
            .await;
        let id = h
            .queue
            .schedule(fixtures::new_message(), ScheduleOptions::default())
            .await
            .unwrap();

        let later = fixtures::now() + Duration::hours(3);
        assert!(h.queue.reschedule(id, later, true).await.unwrap());
        let m = h.queue.get(id).await.unwrap().unwrap();
        assert_eq!(m.status, MessageStatus::Queued);
        assert_eq!(m.scheduled_for, later);
        assert_eq!(m.retry_count, 0);
    }

    #[tokio::test]
    async fn confirm_delivery_moves_sent_to_delivered() {
        let h = QueueHarness::new(DispatchSettings::default());
        let id = h
            .queue
            .schedule(fixtures::new_message(), ScheduleOptions::default())
            .await
            .unwrap();

        assert!(h.queue.confirm_delivery(id).await.unwrap());
        assert!(!h.queue.confirm_delivery(id).await.unwrap());
        let m = h.queue.get(id).await.unwrap().unwrap();
        assert_eq!(m.status, MessageStatus::Delivered);
        assert!(m.delivered_at.is_some());
    }

    #[tokio::test]
    async fn constrained_message_waits_for_window() {
        let h = QueueHarness::new(DispatchSettings::default());
        // Monday 06:00 UTC, default window opens 09:00.
        h.clock.set(fixtures::at(2025, 3, 3, 6, 0));
        let id = h
            .queue
            .schedule(
                fixtures::new_message(),
                ScheduleOptions::constrained(ConstraintConfig::default()),
            )
            .await
            .unwrap();

        let m = h.queue.get(id).await.unwrap().unwrap();
        assert_eq!(m.scheduled_for, fixtures::at(2025, 3, 3, 9, 0));
        assert_eq!(m.status, MessageStatus::Queued);
    }

    #[tokio::test]
    async fn send_time_revalidation_reschedules_without_penalty() {
        let mut settings = DispatchSettings::default();
        settings.near_term_threshold = Duration::zero() - Duration::seconds(1);
        let h = QueueHarness::new(settings);
        let id = h
            .queue
            .schedule(
                fixtures::new_message(),
                ScheduleOptions::constrained(ConstraintConfig::default()),
            )
            .await
            .unwrap();

        // The sweep runs late, after the window closed.
        h.clock.set(fixtures::at(2025, 3, 3, 18, 0));
        let report = h.queue.process_due().await.unwrap();
        assert_eq!(report.rescheduled, 1);

        let m = h.queue.get(id).await.unwrap().unwrap();
        assert_eq!(m.status, MessageStatus::Queued);
        assert_eq!(m.retry_count, 0);
        assert_eq!(m.scheduled_for, fixtures::at(2025, 3, 4, 9, 0));
    }

    #[tokio::test]
    async fn urgent_messages_go_first_under_pressure() {
        let mut settings = DispatchSettings::default();
        settings.limits.burst = 1;
        settings.near_term_threshold = Duration::zero() - Duration::seconds(1);
        let h = QueueHarness::new(settings);

        h.queue
            .schedule(fixtures::new_message(), ScheduleOptions::default())
            .await
            .unwrap();
        let urgent = h
            .queue
            .schedule(
                fixtures::new_message().with_priority(Priority::Urgent),
                ScheduleOptions::default(),
            )
            .await
            .unwrap();

        let report = h.queue.process_due().await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(h.transport.sent_ids().await, vec![urgent]);
    }

    #[tokio::test]
    async fn abandoned_claim_is_reclaimed_and_sent() {
        let h = QueueHarness::new(DispatchSettings::default());
        let id = h
            .queue
            .schedule(
                fixtures::new_message().requested_at(fixtures::now() + Duration::hours(2)),
                ScheduleOptions::default(),
            )
            .await
            .unwrap();
        h.clock.advance(Duration::hours(2));
        // a worker claims it and dies before recording any outcome
        h.store.claim(id, h.clock.now()).await.unwrap().unwrap();

        assert_eq!(h.queue.reclaim_stale().await.unwrap(), 0);
        assert_eq!(h.queue.process_due().await.unwrap().sent, 0);

        h.clock.advance(Duration::minutes(11));
        assert_eq!(h.queue.reclaim_stale().await.unwrap(), 1);
        let report = h.queue.process_due().await.unwrap();
        assert_eq!(report.sent, 1);

        let m = h.queue.get(id).await.unwrap().unwrap();
        assert_eq!(m.status, MessageStatus::Sent);
        assert_eq!(m.retry_count, 0);
        assert_eq!(m.claimed_at, None);
    }

    #[tokio::test]
    async fn store_outage_propagates() {
        let h = QueueHarness::new(DispatchSettings::default());
        h.store.set_unavailable(true);
        let err = h.queue.process_due().await.unwrap_err();
        assert!(err.is_infrastructure());
    }
}
