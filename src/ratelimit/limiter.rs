use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Ceilings for the three rolling windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    pub per_minute: u32,
    pub per_hour: u32,
    pub per_day: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            per_minute: 50,
            per_hour: 500,
            per_day: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no gateway call slot became free within {waited:?}")]
pub struct RateLimitTimeout {
    pub waited: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitUsage {
    pub limits: RateLimits,
    pub last_minute: usize,
    pub last_hour: usize,
    pub last_day: usize,
    pub by_scope: BTreeMap<String, usize>,
}

#[derive(Debug)]
struct CallRecord {
    at: Instant,
    scope: String,
}

/// In-process sliding-window governor for outbound gateway calls.
///
/// One instance is shared (behind an `Arc`) by every caller in the process, so
/// the window counts cover all concurrent runs. `run` checks and records under
/// a single lock acquisition; two callers can never both take the last slot.
pub struct RateLimiter {
    limits: RateLimits,
    max_wait: Duration,
    poll_interval: Duration,
    calls: Mutex<VecDeque<CallRecord>>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits, max_wait: Duration) -> Self {
        Self {
            limits,
            max_wait,
            poll_interval: DEFAULT_POLL_INTERVAL,
            calls: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn limits(&self) -> RateLimits {
        self.limits
    }

    pub async fn can_proceed(&self) -> bool {
        let calls = self.calls.lock().await;
        self.has_capacity(&calls, Instant::now())
    }

    pub async fn record(&self, scope: &str) {
        let mut calls = self.calls.lock().await;
        push_call(&mut calls, scope, Instant::now());
    }

    /// Waits until every window has room, without taking the slot.
    pub async fn await_slot(&self, max_wait: Duration) -> Result<(), RateLimitTimeout> {
        let started = Instant::now();
        loop {
            if self.can_proceed().await {
                return Ok(());
            }
            self.pause_or_give_up(started, max_wait).await?;
        }
    }

    /// Waits for a slot, records it for `scope`, then runs `operation`.
    pub async fn run<F, Fut, T, E>(&self, scope: &str, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<RateLimitTimeout>,
    {
        self.reserve(scope, self.max_wait).await?;
        operation().await
    }

    pub async fn usage(&self) -> RateLimitUsage {
        let calls = self.calls.lock().await;
        let now = Instant::now();
        let mut by_scope = BTreeMap::new();
        for call in calls.iter().filter(|c| now.duration_since(c.at) < DAY) {
            *by_scope.entry(call.scope.clone()).or_insert(0) += 1;
        }
        RateLimitUsage {
            limits: self.limits,
            last_minute: count_within(&calls, now, MINUTE),
            last_hour: count_within(&calls, now, HOUR),
            last_day: count_within(&calls, now, DAY),
            by_scope,
        }
    }

    async fn reserve(&self, scope: &str, max_wait: Duration) -> Result<(), RateLimitTimeout> {
        let started = Instant::now();
        loop {
            {
                let mut calls = self.calls.lock().await;
                let now = Instant::now();
                if self.has_capacity(&calls, now) {
                    push_call(&mut calls, scope, now);
                    return Ok(());
                }
            }
            tracing::debug!(scope, "gateway rate limit reached, waiting for a slot");
            self.pause_or_give_up(started, max_wait).await?;
        }
    }

    async fn pause_or_give_up(&self, started: Instant, max_wait: Duration) -> Result<(), RateLimitTimeout> {
        let waited = started.elapsed();
        if waited >= max_wait {
            tracing::warn!(waited_ms = waited.as_millis() as u64, "rate limit wait exhausted");
            return Err(RateLimitTimeout { waited });
        }
        tokio::time::sleep(self.poll_interval.min(max_wait - waited)).await;
        Ok(())
    }

    fn has_capacity(&self, calls: &VecDeque<CallRecord>, now: Instant) -> bool {
        count_within(calls, now, MINUTE) < self.limits.per_minute as usize
            && count_within(calls, now, HOUR) < self.limits.per_hour as usize
            && count_within(calls, now, DAY) < self.limits.per_day as usize
    }
}

fn push_call(calls: &mut VecDeque<CallRecord>, scope: &str, now: Instant) {
    calls.push_back(CallRecord {
        at: now,
        scope: scope.to_string(),
    });
    while calls
        .front()
        .is_some_and(|c| now.duration_since(c.at) >= DAY)
    {
        calls.pop_front();
    }
}

// Entries are appended in time order, so counting stops at the first one
// outside the window.
fn count_within(calls: &VecDeque<CallRecord>, now: Instant, window: Duration) -> usize {
    calls
        .iter()
        .rev()
        .take_while(|c| now.duration_since(c.at) < window)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn old_entries_are_pruned_after_a_day() {
        let limiter = RateLimiter::new(RateLimits::default(), Duration::from_secs(1));
        limiter.record("status").await;
        tokio::time::advance(DAY + Duration::from_secs(1)).await;
        limiter.record("history").await;

        let usage = limiter.usage().await;
        assert_eq!(usage.last_day, 1);
        assert_eq!(usage.by_scope.get("history"), Some(&1));
        assert_eq!(limiter.calls.lock().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hourly_ceiling_applies_independently() {
        let limits = RateLimits {
            per_minute: 10,
            per_hour: 3,
            per_day: 100,
        };
        let limiter = RateLimiter::new(limits, Duration::from_secs(1));
        for _ in 0..3 {
            limiter.record("status").await;
            tokio::time::advance(Duration::from_secs(61)).await;
        }
        assert!(!limiter.can_proceed().await);
    }
}
