//! Queue module: rate-limited dispatch, retry policy, and health metrics.
//!
//! Design intent:
//! - The store owns message state; the queue drives transitions through it.
//! - Transport side effects happen only after a successful claim and rate reservation.

pub mod dispatch;
pub mod metrics;
pub mod retry;

pub use self::dispatch::{
    DispatchOutcome, DispatchPorts, DispatchQueue, DispatchSettings, RateScopeMode,
    ScheduleOptions,
};
pub use self::metrics::{Health, HealthThresholds, QueueMetrics};
pub use self::retry::{BackoffStrategy, RetryPolicy};
