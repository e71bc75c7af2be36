//! RateBudget: token bucket with a waiting consume and live reconfiguration.
//!
//! Refill law:
//!   tokens(t) = min(capacity, tokens(last) + rate * (t - last))
//!
//! A consume drains whatever is in the bucket into its own grant and sleeps
//! until more accrues, so requests larger than the burst are served across
//! several refills instead of being rejected. Rate or burst changes wake
//! every waiter so it recomputes against the new values.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bwlimit_core::Limit;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::{ThrottleError, WaitScope};

// Remaining grants below this count as satisfied (float accumulation slop).
const EPSILON: f64 = 1e-6;
const MIN_SLEEP: Duration = Duration::from_millis(1);
const MAX_SLEEP: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Bucket {
    limit: Limit,
    burst: u64,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    /// A zero burst on a finite rate still admits one token at a time.
    fn capacity(&self) -> f64 {
        self.burst.max(1) as f64
    }

    fn refill(&mut self, now: Instant) {
        if !self.limit.is_unlimited() {
            let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
            self.tokens = (self.tokens + elapsed * self.limit.rate()).min(self.capacity());
        }
        self.last_refill = now;
    }
}

enum Step {
    Done,
    Wait(Duration),
    TooLate,
}

/// A single token bucket. Shared behind `Arc`; all mutation goes through its own lock.
#[derive(Debug)]
pub struct RateBudget {
    bucket: Mutex<Bucket>,
    changed: Notify,
}

impl RateBudget {
    /// Bucket with the burst derived from `limit`. Starts full.
    pub fn new(limit: Limit) -> Arc<Self> {
        Self::with_burst(limit, limit.burst())
    }

    pub fn with_burst(limit: Limit, burst: u64) -> Arc<Self> {
        Arc::new(Self {
            bucket: Mutex::new(Bucket {
                limit,
                burst,
                tokens: burst as f64,
                last_refill: Instant::now(),
            }),
            changed: Notify::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn limit(&self) -> Limit {
        self.lock().limit
    }

    pub fn burst(&self) -> u64 {
        self.lock().burst
    }

    /// Tokens in the bucket right now. `INFINITY` when unlimited.
    pub fn available(&self) -> f64 {
        let mut bucket = self.lock();
        if bucket.limit.is_unlimited() {
            return f64::INFINITY;
        }
        bucket.refill(Instant::now());
        bucket.tokens
    }

    /// Set rate and the burst derived from it.
    pub fn set_limit(&self, limit: Limit) {
        self.reconfigure(|bucket| {
            bucket.limit = limit;
            bucket.burst = limit.burst();
        });
    }

    /// Set only the rate; the burst stays as configured.
    pub fn set_rate(&self, limit: Limit) {
        self.reconfigure(|bucket| bucket.limit = limit);
    }

    pub fn set_burst(&self, burst: u64) {
        self.reconfigure(|bucket| bucket.burst = burst);
    }

    fn reconfigure(&self, apply: impl FnOnce(&mut Bucket)) {
        {
            let mut bucket = self.lock();
            let was_unlimited = bucket.limit.is_unlimited();
            // Settle what accrued under the old rate before switching.
            bucket.refill(Instant::now());
            apply(&mut bucket);
            bucket.tokens = if was_unlimited && !bucket.limit.is_unlimited() {
                bucket.capacity()
            } else {
                bucket.tokens.min(bucket.capacity())
            };
        }
        self.changed.notify_waiters();
    }

    /// Wait until `n` tokens have been taken from the bucket.
    ///
    /// Never waits when the budget is unlimited. Fails with the scope's error
    /// if it fires first, or with `DeadlineExceeded` straight away when the
    /// deadline falls before the request could complete at the current rate.
    /// Tokens already drained by a failed or dropped call go back to the bucket.
    pub async fn consume(&self, n: usize, scope: &WaitScope) -> Result<(), ThrottleError> {
        scope.check()?;
        if n == 0 {
            return Ok(());
        }

        let wanted = n as f64;
        let mut grant = Grant {
            budget: self,
            held: 0.0,
        };

        loop {
            // Registered before inspecting the bucket so a reconfiguration
            // between here and the sleep still wakes us.
            let changed = self.changed.notified();

            let step = {
                let mut bucket = self.lock();
                let now = Instant::now();
                if bucket.limit.is_unlimited() {
                    Step::Done
                } else {
                    bucket.refill(now);
                    let take = (wanted - grant.held).min(bucket.tokens).max(0.0);
                    bucket.tokens -= take;
                    grant.held += take;

                    let remaining = wanted - grant.held;
                    let rate = bucket.limit.rate();
                    if remaining <= EPSILON {
                        Step::Done
                    } else if scope.deadline().is_some_and(|deadline| {
                        deadline.saturating_duration_since(now).as_secs_f64() < remaining / rate
                    }) {
                        Step::TooLate
                    } else {
                        let target = remaining.min(bucket.capacity());
                        let secs = (target - bucket.tokens).max(0.0) / rate;
                        let wait = Duration::try_from_secs_f64(secs)
                            .unwrap_or(MAX_SLEEP)
                            .clamp(MIN_SLEEP, MAX_SLEEP);
                        tracing::trace!(
                            requested = n,
                            remaining,
                            wait_ms = wait.as_millis() as u64,
                            "waiting for tokens"
                        );
                        Step::Wait(wait)
                    }
                }
            };

            let wait = match step {
                Step::Done => {
                    grant.settle();
                    return Ok(());
                }
                Step::TooLate => return Err(ThrottleError::DeadlineExceeded),
                Step::Wait(wait) => wait,
            };

            tokio::select! {
                _ = changed => {}
                _ = tokio::time::sleep(wait) => {}
                e = scope.fired() => return Err(e),
            }
        }
    }

    fn put_back(&self, tokens: f64) {
        {
            let mut bucket = self.lock();
            bucket.refill(Instant::now());
            bucket.tokens = (bucket.tokens + tokens).min(bucket.capacity());
        }
        tracing::debug!(tokens, "returned unused tokens");
        self.changed.notify_waiters();
    }
}

/// Tokens drained on behalf of one in-progress consume.
struct Grant<'a> {
    budget: &'a RateBudget,
    held: f64,
}

impl Grant<'_> {
    fn settle(&mut self) {
        self.held = 0.0;
    }
}

impl Drop for Grant<'_> {
    fn drop(&mut self) {
        if self.held > 0.0 {
            self.budget.put_back(self.held);
        }
    }
}
