use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::types::QueueKey;
use crate::clock::{Clock, RealClock};

/// Decides how long an item should wait before it is retried
pub trait RateLimiter<K>: Send + Sync {
    /// Delay for the next retry of `item`. Records a failure for it.
    fn when(&self, item: &K) -> Duration;

    /// Stop tracking `item`, whether it finally succeeded or was given up on.
    /// Without this, per-item state is kept forever.
    fn forget(&self, item: &K);

    /// How many failures `item` has had
    fn num_requeues(&self, item: &K) -> usize;
}

impl<K, R: RateLimiter<K> + ?Sized> RateLimiter<K> for Box<R> {
    fn when(&self, item: &K) -> Duration {
        (**self).when(item)
    }

    fn forget(&self, item: &K) {
        (**self).forget(item)
    }

    fn num_requeues(&self, item: &K) -> usize {
        (**self).num_requeues(item)
    }
}

impl<K, R: RateLimiter<K> + ?Sized> RateLimiter<K> for Arc<R> {
    fn when(&self, item: &K) -> Duration {
        (**self).when(item)
    }

    fn forget(&self, item: &K) {
        (**self).forget(item)
    }

    fn num_requeues(&self, item: &K) -> usize {
        (**self).num_requeues(item)
    }
}

/// Per-item limiter with overall and per-item caps used by controllers:
/// exponential per-item backoff from 5ms to 1000s, and 10 qps with a burst of 100
/// across all items.
pub fn default_controller_rate_limiter<K: QueueKey>() -> MaxOfRateLimiter<K> {
    MaxOfRateLimiter::new(vec![
        Box::new(ItemExponentialFailureRateLimiter::new(
            Duration::from_millis(5),
            Duration::from_secs(1000),
        )),
        Box::new(BucketRateLimiter::new(10.0, 100)),
    ])
}

/// `base_delay * 2^exponent`, clamped to `max_delay`. Never overflows: anything
/// that does not fit is `max_delay`.
fn exponential_backoff(base_delay: Duration, exponent: u32, max_delay: Duration) -> Duration {
    if base_delay.is_zero() {
        return Duration::ZERO;
    }
    if exponent >= 64 {
        return max_delay;
    }
    let backoff = base_delay.as_nanos().saturating_mul(1u128 << exponent);
    if backoff >= max_delay.as_nanos() {
        return max_delay;
    }
    const NANOS_PER_SEC: u128 = 1_000_000_000;
    // Below max_delay, so the seconds fit in a u64
    Duration::new(
        (backoff / NANOS_PER_SEC) as u64,
        (backoff % NANOS_PER_SEC) as u32,
    )
}

/// Exponential backoff per item: `base_delay * 2^failures`, capped at `max_delay`
#[derive(Debug)]
pub struct ItemExponentialFailureRateLimiter<K> {
    failures: Mutex<FxHashMap<K, u32>>,
    base_delay: Duration,
    max_delay: Duration,
}

impl<K: QueueKey> ItemExponentialFailureRateLimiter<K> {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            failures: Mutex::new(FxHashMap::default()),
            base_delay,
            max_delay,
        }
    }
}

impl<K: QueueKey> RateLimiter<K> for ItemExponentialFailureRateLimiter<K> {
    fn when(&self, item: &K) -> Duration {
        let exponent = {
            let mut failures = self.failures.lock();
            let count = failures.entry(item.clone()).or_insert(0);
            let exponent = *count;
            *count = count.saturating_add(1);
            exponent
        };
        exponential_backoff(self.base_delay, exponent, self.max_delay)
    }

    fn forget(&self, item: &K) {
        self.failures.lock().remove(item);
    }

    fn num_requeues(&self, item: &K) -> usize {
        self.failures.lock().get(item).map_or(0, |&count| count as usize)
    }
}

/// Quick retries for the first `max_fast_attempts` failures, slow ones after that
#[derive(Debug)]
pub struct ItemFastSlowRateLimiter<K> {
    failures: Mutex<FxHashMap<K, usize>>,
    max_fast_attempts: usize,
    fast_delay: Duration,
    slow_delay: Duration,
}

impl<K: QueueKey> ItemFastSlowRateLimiter<K> {
    pub fn new(fast_delay: Duration, slow_delay: Duration, max_fast_attempts: usize) -> Self {
        Self {
            failures: Mutex::new(FxHashMap::default()),
            max_fast_attempts,
            fast_delay,
            slow_delay,
        }
    }
}

impl<K: QueueKey> RateLimiter<K> for ItemFastSlowRateLimiter<K> {
    fn when(&self, item: &K) -> Duration {
        let mut failures = self.failures.lock();
        let count = failures.entry(item.clone()).or_insert(0);
        *count = count.saturating_add(1);

        if *count <= self.max_fast_attempts {
            self.fast_delay
        } else {
            self.slow_delay
        }
    }

    fn forget(&self, item: &K) {
        self.failures.lock().remove(item);
    }

    fn num_requeues(&self, item: &K) -> usize {
        self.failures.lock().get(item).copied().unwrap_or(0)
    }
}

/// Token bucket that hands out reservations.
///
/// Tokens refill continuously at `rate_per_second` up to `burst`. Taking a token
/// when none is left goes into debt, and the caller waits until the debt is repaid.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    rate_per_second: f64,
    burst: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate_per_second: f64, burst: f64, now: Instant) -> Self {
        let rate = if rate_per_second.is_nan() {
            0.0
        } else {
            rate_per_second.clamp(0.0, f64::MAX)
        };
        let burst = burst.max(0.0);
        Self {
            tokens: burst,
            rate_per_second: rate,
            burst,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.rate_per_second).min(self.burst);
            self.last_refill = now;
        }
    }

    /// Take one token and return how long the caller must wait for it
    fn reserve(&mut self, now: Instant) -> Duration {
        self.refill(now);
        if self.rate_per_second <= 0.0 {
            // Nothing ever refills: a token now or never
            if self.tokens >= 1.0 {
                self.tokens -= 1.0;
                return Duration::ZERO;
            }
            return Duration::MAX;
        }

        self.tokens -= 1.0;
        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            // A rate small enough to push the wait past Duration::MAX means never
            Duration::try_from_secs_f64(-self.tokens / self.rate_per_second).unwrap_or(Duration::MAX)
        }
    }
}

/// Overall (not per-item) rate limit backed by a token bucket
pub struct BucketRateLimiter {
    bucket: Mutex<TokenBucket>,
    clock: Arc<dyn Clock>,
}

impl BucketRateLimiter {
    pub fn new(rate_per_second: f64, burst: u32) -> Self {
        Self::with_clock(rate_per_second, burst, Arc::new(RealClock))
    }

    pub fn with_clock(rate_per_second: f64, burst: u32, clock: Arc<dyn Clock>) -> Self {
        let bucket = TokenBucket::new(rate_per_second, f64::from(burst), clock.now());
        Self {
            bucket: Mutex::new(bucket),
            clock,
        }
    }
}

impl fmt::Debug for BucketRateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketRateLimiter")
            .field("bucket", &*self.bucket.lock())
            .finish()
    }
}

impl<K> RateLimiter<K> for BucketRateLimiter {
    fn when(&self, _item: &K) -> Duration {
        let now = self.clock.now();
        self.bucket.lock().reserve(now)
    }

    fn forget(&self, _item: &K) {}

    fn num_requeues(&self, _item: &K) -> usize {
        0
    }
}

/// Asks every limiter and returns the worst case.
///
/// Combined with a token bucket the burst can appear exceeded when some items were
/// separately delayed for longer.
pub struct MaxOfRateLimiter<K> {
    limiters: Vec<Box<dyn RateLimiter<K>>>,
}

impl<K> MaxOfRateLimiter<K> {
    pub fn new(limiters: Vec<Box<dyn RateLimiter<K>>>) -> Self {
        Self { limiters }
    }
}

impl<K> RateLimiter<K> for MaxOfRateLimiter<K> {
    fn when(&self, item: &K) -> Duration {
        // Every limiter must see the failure, so no short-circuiting
        self.limiters
            .iter()
            .map(|limiter| limiter.when(item))
            .fold(Duration::ZERO, Duration::max)
    }

    fn forget(&self, item: &K) {
        for limiter in &self.limiters {
            limiter.forget(item);
        }
    }

    fn num_requeues(&self, item: &K) -> usize {
        self.limiters
            .iter()
            .map(|limiter| limiter.num_requeues(item))
            .max()
            .unwrap_or(0)
    }
}

/// Caps another limiter's delay at `max_delay`
pub struct WithMaxWaitRateLimiter<K> {
    limiter: Box<dyn RateLimiter<K>>,
    max_delay: Duration,
}

impl<K> WithMaxWaitRateLimiter<K> {
    pub fn new(limiter: Box<dyn RateLimiter<K>>, max_delay: Duration) -> Self {
        Self { limiter, max_delay }
    }
}

impl<K> RateLimiter<K> for WithMaxWaitRateLimiter<K> {
    fn when(&self, item: &K) -> Duration {
        self.limiter.when(item).min(self.max_delay)
    }

    fn forget(&self, item: &K) {
        self.limiter.forget(item);
    }

    fn num_requeues(&self, item: &K) -> usize {
        self.limiter.num_requeues(item)
    }
}
