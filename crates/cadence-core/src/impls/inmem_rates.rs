//! InMemoryRateCounter - 開発・テスト用の RateCounter
//!
//! Keeps one timestamp per counted send, pruned after a day. `try_acquire`
//! checks all windows and records under the same lock, so concurrent callers
//! can never overshoot.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::domain::StoreError;
use crate::ports::{RateCounter, RateLimits, RateScope, Reservation};

#[derive(Default)]
struct State {
    sends: HashMap<RateScope, Vec<(u64, DateTime<Utc>)>>,
    next_token: u64,
}

impl State {
    fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = now - Duration::days(1);
        for sends in self.sends.values_mut() {
            sends.retain(|(_, at)| *at > horizon);
        }
    }

    fn count(&self, scope: &RateScope, since: DateTime<Utc>) -> u32 {
        self.sends
            .get(scope)
            .map(|sends| sends.iter().filter(|(_, at)| *at > since).count() as u32)
            .unwrap_or(0)
    }

    fn push(&mut self, scope: &RateScope, at: DateTime<Utc>) -> u64 {
        self.next_token += 1;
        let token = self.next_token;
        self.sends.entry(scope.clone()).or_default().push((token, at));
        token
    }
}

#[derive(Default)]
pub struct InMemoryRateCounter {
    state: Mutex<State>,
}

impl InMemoryRateCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateCounter for InMemoryRateCounter {
    async fn usage(&self, scope: &RateScope, since: DateTime<Utc>) -> Result<u32, StoreError> {
        Ok(self.state.lock().await.count(scope, since))
    }

    async fn try_acquire(
        &self,
        scope: &RateScope,
        limits: &RateLimits,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>, StoreError> {
        let mut state = self.state.lock().await;
        state.prune(now);
        let remaining = limits.remaining(
            state.count(scope, now - Duration::hours(1)),
            state.count(scope, now - Duration::days(1)),
            state.count(scope, now - limits.burst_window),
        );
        if remaining == 0 {
            return Ok(None);
        }
        let token = state.push(scope, now);
        Ok(Some(Reservation {
            scope: scope.clone(),
            token,
            at: now,
        }))
    }

    async fn release(&self, reservation: &Reservation) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(sends) = state.sends.get_mut(&reservation.scope) {
            sends.retain(|(token, _)| *token != reservation.token);
        }
        Ok(())
    }

    async fn record(&self, scope: &RateScope, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.prune(at);
        state.push(scope, at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use std::sync::Arc;

    fn limits(per_hour: u32, burst: u32) -> RateLimits {
        RateLimits {
            per_hour,
            per_day: 1000,
            burst,
            burst_window: Duration::minutes(1),
        }
    }

    #[tokio::test]
    async fn burst_cap_blocks_then_recovers() {
        let counter = InMemoryRateCounter::new();
        let now = fixtures::now();
        let limits = limits(100, 5);

        for _ in 0..5 {
            assert!(counter
                .try_acquire(&RateScope::Global, &limits, now)
                .await
                .unwrap()
                .is_some());
        }
        assert!(counter
            .try_acquire(&RateScope::Global, &limits, now)
            .await
            .unwrap()
            .is_none());

        let later = now + Duration::seconds(61);
        assert!(counter
            .try_acquire(&RateScope::Global, &limits, later)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn release_returns_capacity() {
        let counter = InMemoryRateCounter::new();
        let now = fixtures::now();
        let limits = limits(1, 1);

        let reservation = counter
            .try_acquire(&RateScope::Global, &limits, now)
            .await
            .unwrap()
            .unwrap();
        counter.release(&reservation).await.unwrap();

        assert_eq!(counter.remaining(&RateScope::Global, &limits, now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_acquire_never_overshoots() {
        let counter = Arc::new(InMemoryRateCounter::new());
        let now = fixtures::now();
        let limits = limits(10, 10);

        let mut handles = Vec::new();
        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                counter
                    .try_acquire(&RateScope::Global, &limits, now)
                    .await
                    .unwrap()
                    .is_some()
            }));
        }
        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 10);
    }

    #[tokio::test]
    async fn scopes_are_independent() {
        let counter = InMemoryRateCounter::new();
        let now = fixtures::now();
        counter
            .record(&RateScope::Recipient("a@example.com".into()), now)
            .await
            .unwrap();

        let since = now - Duration::hours(24);
        assert_eq!(
            counter
                .usage(&RateScope::Recipient("a@example.com".into()), since)
                .await
                .unwrap(),
            1
        );
        assert_eq!(counter.usage(&RateScope::Global, since).await.unwrap(), 0);
    }
}
