//! RateCounter port - 送信レートの窓カウンタ
//!
//! Only sends that reached SENT/DELIVERED are counted. A reservation is taken
//! before handing a message to the transport and released if the send fails.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::domain::{StoreError, TenantId};

/// What a counter is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateScope {
    Global,
    Tenant(TenantId),
    /// Normalized recipient address (contact-frequency guard).
    Recipient(String),
}

impl fmt::Display for RateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateScope::Global => f.write_str("global"),
            RateScope::Tenant(tenant) => write!(f, "tenant:{tenant}"),
            RateScope::Recipient(address) => write!(f, "recipient:{address}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub per_hour: u32,
    pub per_day: u32,
    pub burst: u32,
    pub burst_window: Duration,
}

impl RateLimits {
    /// Remaining capacity given the usage in each trailing window.
    pub fn remaining(&self, hour_used: u32, day_used: u32, burst_used: u32) -> u32 {
        self.per_hour
            .saturating_sub(hour_used)
            .min(self.per_day.saturating_sub(day_used))
            .min(self.burst.saturating_sub(burst_used))
    }
}

/// Proof that one unit of capacity was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub scope: RateScope,
    pub token: u64,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait RateCounter: Send + Sync {
    /// Number of counted sends in `[since, now]`.
    async fn usage(&self, scope: &RateScope, since: DateTime<Utc>) -> Result<u32, StoreError>;

    /// Check capacity and count one send in a single atomic step.
    /// `None` when any window is full.
    async fn try_acquire(
        &self,
        scope: &RateScope,
        limits: &RateLimits,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>, StoreError>;

    /// Give back a reservation whose send did not happen.
    async fn release(&self, reservation: &Reservation) -> Result<(), StoreError>;

    /// Count a send unconditionally (per-recipient history).
    async fn record(&self, scope: &RateScope, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn remaining(
        &self,
        scope: &RateScope,
        limits: &RateLimits,
        now: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        let hour = self.usage(scope, now - Duration::hours(1)).await?;
        let day = self.usage(scope, now - Duration::days(1)).await?;
        let burst = self.usage(scope, now - limits.burst_window).await?;
        Ok(limits.remaining(hour, day, burst))
    }
}
