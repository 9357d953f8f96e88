//! Per-step funnel and conversion, derived from the execution log.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::domain::{
    EngagementEvent, EngagementKind, ExecutionId, ExecutionLogEntry, ExecutionStatus, MessageId,
    SequenceExecution, SequenceId, TargetId,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFunnel {
    pub step_number: u32,
    /// Executions that reached this step.
    pub executions: u32,
    pub messages: u32,
    pub open_rate: f64,
    pub click_rate: f64,
    pub response_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceAnalytics {
    pub sequence_id: SequenceId,
    pub executions: u32,
    pub active: u32,
    pub completed: u32,
    pub stopped: u32,
    pub cancelled: u32,
    /// Share of executions whose target ended fully paid.
    pub conversion_rate: f64,
    pub steps: Vec<StepFunnel>,
}

impl SequenceAnalytics {
    pub fn compute(
        sequence_id: SequenceId,
        executions: &[SequenceExecution],
        log: &[ExecutionLogEntry],
        events: &[EngagementEvent],
        paid_targets: &[TargetId],
    ) -> Self {
        let mut by_status = HashMap::new();
        for execution in executions {
            *by_status.entry(execution.status).or_insert(0u32) += 1;
        }
        let count = |status| by_status.get(&status).copied().unwrap_or(0);

        let paid: BTreeSet<&TargetId> = paid_targets.iter().collect();
        let converted = executions
            .iter()
            .filter(|e| paid.contains(&e.target_id))
            .count();

        let mut engaged: HashMap<MessageId, BTreeSet<EngagementKind>> = HashMap::new();
        for event in events {
            engaged.entry(event.message_id).or_default().insert(event.kind);
        }

        let mut steps: BTreeMap<u32, (BTreeSet<ExecutionId>, Vec<MessageId>)> = BTreeMap::new();
        for entry in log {
            let (reached, messages) = steps.entry(entry.step_number).or_default();
            reached.insert(entry.execution_id);
            messages.push(entry.message_id);
        }

        let steps = steps
            .into_iter()
            .map(|(step_number, (reached, messages))| {
                let rate = |kind| {
                    let hits = messages
                        .iter()
                        .filter(|id| engaged.get(id).is_some_and(|kinds| kinds.contains(&kind)))
                        .count();
                    ratio(hits, messages.len())
                };
                StepFunnel {
                    step_number,
                    executions: reached.len() as u32,
                    messages: messages.len() as u32,
                    open_rate: rate(EngagementKind::Opened),
                    click_rate: rate(EngagementKind::Clicked),
                    response_rate: rate(EngagementKind::Responded),
                }
            })
            .collect();

        Self {
            sequence_id,
            executions: executions.len() as u32,
            active: count(ExecutionStatus::Active),
            completed: count(ExecutionStatus::Completed),
            stopped: count(ExecutionStatus::Stopped),
            cancelled: count(ExecutionStatus::Cancelled),
            conversion_rate: ratio(converted, executions.len()),
            steps,
        }
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn entry(execution: &SequenceExecution, step: u32, message: u128) -> ExecutionLogEntry {
        ExecutionLogEntry {
            id: fixtures::log_entry_id(message),
            execution_id: execution.id,
            sequence_id: execution.sequence_id,
            step_number: step,
            language: "en".into(),
            subject: "s".into(),
            body: "b".into(),
            message_id: fixtures::message_id(message),
            dispatched_at: fixtures::now(),
        }
    }

    #[test]
    fn funnel_counts_reach_and_engagement() {
        let first = fixtures::execution(1, 2);
        let mut second = fixtures::execution(2, 2);
        second.target_id = TargetId::new("inv-2");
        second.status = ExecutionStatus::Stopped;

        let log = vec![
            entry(&first, 1, 1),
            entry(&second, 1, 2),
            entry(&first, 2, 3),
        ];
        let events = vec![
            EngagementEvent::new(fixtures::message_id(1), EngagementKind::Opened, fixtures::now()),
            EngagementEvent::new(fixtures::message_id(1), EngagementKind::Opened, fixtures::now()),
            EngagementEvent::new(fixtures::message_id(2), EngagementKind::Clicked, fixtures::now()),
            EngagementEvent::new(fixtures::message_id(3), EngagementKind::Responded, fixtures::now()),
        ];

        let analytics = SequenceAnalytics::compute(
            first.sequence_id,
            &[first.clone(), second],
            &log,
            &events,
            &[TargetId::new("inv-2")],
        );

        assert_eq!(analytics.executions, 2);
        assert_eq!(analytics.active, 1);
        assert_eq!(analytics.stopped, 1);
        assert_eq!(analytics.conversion_rate, 0.5);

        let step1 = &analytics.steps[0];
        assert_eq!((step1.step_number, step1.executions, step1.messages), (1, 2, 2));
        assert_eq!(step1.open_rate, 0.5);
        assert_eq!(step1.click_rate, 0.5);
        assert_eq!(step1.response_rate, 0.0);

        let step2 = &analytics.steps[1];
        assert_eq!((step2.executions, step2.response_rate), (1, 1.0));
    }

    #[test]
    fn empty_sequence_has_zero_rates() {
        let analytics =
            SequenceAnalytics::compute(fixtures::sequence_id(), &[], &[], &[], &[]);
        assert_eq!(analytics.conversion_rate, 0.0);
        assert!(analytics.steps.is_empty());
    }
}
