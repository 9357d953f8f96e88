//! Queue health view, computed from stored messages.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{MessageStatus, ScheduledMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthThresholds {
    pub warning_failures_per_hour: u32,
    pub critical_failures_per_hour: u32,
    pub warning_success_rate: f64,
    pub critical_success_rate: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            warning_failures_per_hour: 10,
            critical_failures_per_hour: 50,
            warning_success_rate: 0.95,
            critical_success_rate: 0.80,
        }
    }
}

impl HealthThresholds {
    pub fn classify(&self, failed_last_hour: u32, success_rate: f64) -> Health {
        if failed_last_hour > self.critical_failures_per_hour
            || success_rate < self.critical_success_rate
        {
            Health::Critical
        } else if failed_last_hour > self.warning_failures_per_hour
            || success_rate < self.warning_success_rate
        {
            Health::Warning
        } else {
            Health::Healthy
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.warning_failures_per_hour > self.critical_failures_per_hour {
            return Err("health: warning failure threshold exceeds critical".to_string());
        }
        let in_unit = |r: f64| (0.0..=1.0).contains(&r);
        if !in_unit(self.warning_success_rate) || !in_unit(self.critical_success_rate) {
            return Err("health: success rates must be within 0.0..=1.0".to_string());
        }
        if self.critical_success_rate > self.warning_success_rate {
            return Err("health: critical success rate above warning".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMetrics {
    /// QUEUED plus in-flight SENDING.
    pub total_queued: u32,
    /// QUEUED with a send time on the current UTC date.
    pub scheduled_for_today: u32,
    pub failed_last_hour: u32,
    /// Mean seconds between planned send time and transport acceptance, last 24h.
    pub avg_delivery_secs: Option<f64>,
    /// Sent / (sent + failed) over the last 24h; 1.0 when idle.
    pub success_rate: f64,
    pub health: Health,
}

impl QueueMetrics {
    pub fn compute(
        messages: &[ScheduledMessage],
        now: DateTime<Utc>,
        thresholds: &HealthThresholds,
    ) -> Self {
        let hour_ago = now - Duration::hours(1);
        let day_ago = now - Duration::days(1);
        let today = now.date_naive();

        let mut total_queued = 0;
        let mut scheduled_for_today = 0;
        let mut failed_last_hour = 0;
        let mut failed_last_day = 0u32;
        let mut sent_last_day = 0u32;
        let mut delay_total = 0i64;

        for m in messages {
            match m.status {
                MessageStatus::Queued | MessageStatus::Sending => {
                    total_queued += 1;
                    if m.status == MessageStatus::Queued && m.scheduled_for.date_naive() == today {
                        scheduled_for_today += 1;
                    }
                }
                MessageStatus::Failed if m.updated_at > day_ago => {
                    failed_last_day += 1;
                    if m.updated_at > hour_ago {
                        failed_last_hour += 1;
                    }
                }
                MessageStatus::Sent | MessageStatus::Delivered => {
                    if let Some(sent_at) = m.sent_at.filter(|at| *at > day_ago) {
                        sent_last_day += 1;
                        delay_total += (sent_at - m.scheduled_for).num_seconds().max(0);
                    }
                }
                _ => {}
            }
        }

        let attempted = sent_last_day + failed_last_day;
        let success_rate = if attempted == 0 {
            1.0
        } else {
            f64::from(sent_last_day) / f64::from(attempted)
        };
        let avg_delivery_secs =
            (sent_last_day > 0).then(|| delay_total as f64 / f64::from(sent_last_day));

        Self {
            total_queued,
            scheduled_for_today,
            failed_last_hour,
            avg_delivery_secs,
            success_rate,
            health: thresholds.classify(failed_last_hour, success_rate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use rstest::rstest;

    #[rstest]
    #[case(0, 1.0, Health::Healthy)]
    #[case(11, 1.0, Health::Warning)]
    #[case(0, 0.90, Health::Warning)]
    #[case(51, 1.0, Health::Critical)]
    #[case(0, 0.79, Health::Critical)]
    fn classify(#[case] failed: u32, #[case] rate: f64, #[case] expected: Health) {
        assert_eq!(HealthThresholds::default().classify(failed, rate), expected);
    }

    #[test]
    fn compute_counts_and_rates() {
        let now = fixtures::now();
        let mut sent = fixtures::queued_message(1, now - Duration::minutes(10));
        sent.status = MessageStatus::Sent;
        sent.sent_at = Some(now - Duration::minutes(9));

        let mut failed = fixtures::queued_message(2, now - Duration::minutes(10));
        failed.status = MessageStatus::Failed;
        failed.updated_at = now - Duration::minutes(5);

        let queued = fixtures::queued_message(3, now + Duration::minutes(30));

        let metrics = QueueMetrics::compute(
            &[sent, failed, queued],
            now,
            &HealthThresholds::default(),
        );
        assert_eq!(metrics.total_queued, 1);
        assert_eq!(metrics.scheduled_for_today, 1);
        assert_eq!(metrics.failed_last_hour, 1);
        assert_eq!(metrics.success_rate, 0.5);
        assert_eq!(metrics.avg_delivery_secs, Some(60.0));
        assert_eq!(metrics.health, Health::Critical);
    }

    #[test]
    fn idle_queue_is_healthy() {
        let metrics = QueueMetrics::compute(&[], fixtures::now(), &HealthThresholds::default());
        assert_eq!(metrics.success_rate, 1.0);
        assert_eq!(metrics.health, Health::Healthy);
        assert!(metrics.avg_delivery_secs.is_none());
    }
}
