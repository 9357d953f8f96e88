//! Decision model: what to do with a message after a failed send.
//!
//! The Decider is a pure function of the message and the transport error.
//! Applying the decision (status change, new schedule time) is the queue's job.

use std::time::Duration;

use super::errors::TransportError;
use super::message::ScheduledMessage;
use crate::queue::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Return to QUEUED after `delay`, consuming one retry.
    Retry { delay: Duration, reason: String },

    /// Terminal FAILED.
    Fail { reason: String },
}

pub trait Decider: Send + Sync {
    fn decide(&self, message: &ScheduledMessage, error: &TransportError) -> Decision;
}

/// Retry transient failures while budget remains; fail everything else.
#[derive(Debug, Clone, Default)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, message: &ScheduledMessage, error: &TransportError) -> Decision {
        if !error.is_transient() {
            return Decision::Fail {
                reason: error.to_string(),
            };
        }
        if message.retry_count >= message.max_retries {
            return Decision::Fail {
                reason: format!(
                    "{error} (retries exhausted: {}/{})",
                    message.retry_count, message.max_retries
                ),
            };
        }
        let delay = self.retry_policy.next_delay(message.retry_count + 1);
        Decision::Retry {
            delay,
            reason: format!(
                "{error} (retry {}/{} after {:?})",
                message.retry_count + 1,
                message.max_retries,
                delay
            ),
        }
    }
}
