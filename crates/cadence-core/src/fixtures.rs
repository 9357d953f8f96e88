//! Shared test fixtures: pinned time, deterministic ids, wired harnesses.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use ulid::Ulid;

use crate::domain::{
    ConstraintConfig, ExecutionId, LineItem, LogEntryId, MessageId, NewMessage, Priority,
    Recipient, ScheduledMessage, SequenceDefinition, SequenceExecution, SequenceId, SequenceStep,
    StepTemplate, TargetEntity, TargetId, TargetStatus, TenantId, Trigger,
};
use crate::impls::{
    BasicContentValidator, InMemoryMessageStore, InMemoryRateCounter, InMemorySequenceStore,
    InMemoryTargetDirectory, RecordingTransport,
};
use crate::ports::{FixedClock, SequenceStore, SequentialIdGenerator, TargetDirectory};
use crate::queue::{DispatchPorts, DispatchQueue, DispatchSettings};
use crate::schedule::{Resolver, ResolverLimits};
use crate::sequence::{EnginePorts, SequenceEngine, SequenceSettings};

/// Monday 2025-03-03 10:00 UTC, inside the default working window.
pub fn now() -> DateTime<Utc> {
    at(2025, 3, 3, 10, 0)
}

pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .expect("valid fixture timestamp")
}

pub fn message_id(n: u128) -> MessageId {
    MessageId::from_ulid(Ulid::from_parts(0, n))
}

pub fn log_entry_id(n: u128) -> LogEntryId {
    LogEntryId::from_ulid(Ulid::from_parts(0, n))
}

pub fn sequence_id() -> SequenceId {
    SequenceId::from_ulid(Ulid::from_parts(1, 1))
}

/// Tenant `acme`, recipient `ap@example.com`, no constraints.
pub fn new_message() -> NewMessage {
    NewMessage::new(
        TenantId::new("acme"),
        TargetId::new("inv-1"),
        Recipient::new("ap@example.com"),
        "Invoice INV-1 is overdue",
        "Please pay 100.00 SAR.",
    )
}

pub fn queued_message(n: u128, scheduled_for: DateTime<Utc>) -> ScheduledMessage {
    ScheduledMessage::queued(message_id(n), new_message(), scheduled_for, 3, None, now())
}

/// Active execution of `sequence_id()` against `inv-1`.
pub fn execution(n: u128, total_steps: u32) -> SequenceExecution {
    SequenceExecution::new(
        ExecutionId::from_ulid(Ulid::from_parts(0, n)),
        TenantId::new("acme"),
        sequence_id(),
        TargetId::new("inv-1"),
        total_steps,
        Trigger::Manual,
        now(),
    )
}

/// One line item per amount: `INV-1` due 2025-02-01, `INV-2` due 2025-02-02, ...
pub fn target(id: &str, amounts: &[i64]) -> TargetEntity {
    let items = amounts
        .iter()
        .enumerate()
        .map(|(i, amount)| {
            let due = NaiveDate::from_ymd_opt(2025, 2, i as u32 + 1).expect("valid due date");
            LineItem::new(format!("INV-{}", i + 1), *amount, due)
        })
        .collect();
    TargetEntity {
        id: TargetId::new(id),
        tenant_id: TenantId::new("acme"),
        recipient: Recipient::new("ap@example.com"),
        status: TargetStatus::Open,
        currency: "SAR".into(),
        items,
        fields: Default::default(),
    }
}

/// Steps with the given delays, one `en` template each.
pub fn definition(delays: &[u32], template: Option<StepTemplate>) -> SequenceDefinition {
    let steps = delays
        .iter()
        .enumerate()
        .map(|(i, delay)| {
            let template = template.clone().unwrap_or_else(|| {
                StepTemplate::new(
                    format!("Reminder {} for {{{{target_id}}}}", i + 1),
                    "Amount due: {{amount_due}} {{currency}}",
                )
            });
            SequenceStep::new(*delay).with_template("en", template)
        })
        .collect();
    SequenceDefinition {
        id: sequence_id(),
        tenant_id: TenantId::new("acme"),
        name: "overdue".into(),
        active: true,
        steps,
        languages: vec!["en".into()],
        constraints: ConstraintConfig::default(),
        priority: Priority::Normal,
    }
}

/// Dispatch queue over in-memory adapters and a fixed clock.
pub struct QueueHarness {
    pub queue: Arc<DispatchQueue>,
    pub store: Arc<InMemoryMessageStore>,
    pub rates: Arc<InMemoryRateCounter>,
    pub transport: Arc<RecordingTransport>,
    pub directory: Arc<InMemoryTargetDirectory>,
    pub clock: Arc<FixedClock>,
}

impl QueueHarness {
    pub fn new(settings: DispatchSettings) -> Self {
        Self::with_directory(settings, |directory| directory as Arc<dyn TargetDirectory>)
    }

    /// The queue sees `wrap(directory)`; the harness keeps the plain directory.
    pub fn with_directory(
        settings: DispatchSettings,
        wrap: impl FnOnce(Arc<InMemoryTargetDirectory>) -> Arc<dyn TargetDirectory>,
    ) -> Self {
        let store = Arc::new(InMemoryMessageStore::new());
        let rates = Arc::new(InMemoryRateCounter::new());
        let transport = Arc::new(RecordingTransport::new());
        let directory = Arc::new(InMemoryTargetDirectory::new());
        let clock = Arc::new(FixedClock::new(now()));
        let ports = DispatchPorts {
            store: store.clone(),
            rates: rates.clone(),
            transport: transport.clone(),
            directory: wrap(directory.clone()),
            clock: clock.clone(),
            ids: Arc::new(SequentialIdGenerator::new()),
        };
        let queue = Arc::new(DispatchQueue::new(
            ports,
            Resolver::new(ResolverLimits::default()),
            settings,
        ));
        Self {
            queue,
            store,
            rates,
            transport,
            directory,
            clock,
        }
    }
}

/// Engine wired to a `QueueHarness`; target `inv-1` owes 100.00 SAR.
pub struct EngineHarness {
    pub engine: SequenceEngine,
    pub queue: Arc<DispatchQueue>,
    pub sequences: Arc<InMemorySequenceStore>,
    pub directory: Arc<InMemoryTargetDirectory>,
    pub transport: Arc<RecordingTransport>,
    pub clock: Arc<FixedClock>,
}

impl EngineHarness {
    pub fn new(settings: SequenceSettings) -> Self {
        Self::with_queue_directory(settings, |directory, _| {
            directory as Arc<dyn TargetDirectory>
        })
    }

    /// Like `new`, but the queue reaches the directory through `wrap`.
    pub fn with_queue_directory(
        settings: SequenceSettings,
        wrap: impl FnOnce(
            Arc<InMemoryTargetDirectory>,
            Arc<InMemorySequenceStore>,
        ) -> Arc<dyn TargetDirectory>,
    ) -> Self {
        let sequences = Arc::new(InMemorySequenceStore::new());
        let q = QueueHarness::with_directory(DispatchSettings::default(), |directory| {
            wrap(directory, sequences.clone())
        });
        let ports = EnginePorts {
            sequences: sequences.clone(),
            directory: q.directory.clone(),
            rates: q.rates.clone(),
            validator: Arc::new(BasicContentValidator::default()),
            clock: q.clock.clone(),
            ids: Arc::new(SequentialIdGenerator::new()),
        };
        let engine = SequenceEngine::new(
            ports,
            q.queue.clone(),
            Resolver::new(ResolverLimits::default()),
            settings,
        );
        Self {
            engine,
            queue: q.queue,
            sequences,
            directory: q.directory,
            transport: q.transport,
            clock: q.clock,
        }
    }

    /// Store a definition with the given delays and seed target `inv-1`.
    pub async fn seed_sequence(&self, delays: &[u32]) -> SequenceId {
        self.seed(definition(delays, None)).await
    }

    pub async fn seed_sequence_with(&self, delays: &[u32], template: StepTemplate) -> SequenceId {
        self.seed(definition(delays, Some(template))).await
    }

    async fn seed(&self, definition: SequenceDefinition) -> SequenceId {
        let id = definition.id;
        self.sequences
            .put_definition(definition)
            .await
            .expect("in-memory store");
        self.directory.upsert(target("inv-1", &[10_000])).await;
        id
    }
}
