//! Request rate limiting for source and destination stores
//!
//! Every request the executor makes against a store first takes a token from
//! that side's bucket, so the engine never exceeds the provider's request
//! rate no matter how many workers are running.
//!
//! ## Architecture
//!
//! - [`TokenBucket`]: Classic token bucket with adaptive capacity. It halves
//!   on throttle and recovers slowly on success.
//! - [`TransferRateLimiter`]: One bucket for source reads, one for
//!   destination writes
//! - [`LimiterObserver`]: Feeds throttles an adapter retried in place back
//!   into one of those buckets
//!
//! ## Usage
//!
//! ```rust,no_run
//! use esync_engine::rate_limit::{Direction, TransferRateLimiter};
//!
//! # async fn example() {
//! let limiter = TransferRateLimiter::per_minute(600, 20, 600, 20);
//! limiter.acquire(Direction::SourceRead).await;
//! // ... make API call ...
//! limiter.on_success(Direction::SourceRead);
//! # }
//! ```

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use esync_core::config::RateLimitsConfig;
use esync_core::ports::ThrottleObserver;
use tracing::{debug, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// TokenBucket
// ============================================================================

/// Internal mutable state for the token bucket, protected by a Mutex.
#[derive(Debug)]
struct TokenBucketInner {
    /// Current number of available tokens (fractional for smooth refill)
    tokens: f64,
    /// Timestamp of the last refill calculation
    last_refill: Instant,
    /// Effective capacity after adaptive adjustments
    effective_capacity: u32,
    /// Consecutive successes since the last throttle
    success_count: u64,
    /// No tokens are handed out before this instant (provider Retry-After)
    paused_until: Option<Instant>,
}

/// Token bucket rate limiter for one direction of traffic.
///
/// Tokens are consumed on each request and refilled at a constant rate.
/// When no tokens are available, callers wait for refill.
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum number of tokens in the bucket
    capacity: u32,
    /// Rate at which tokens are added (tokens per second)
    refill_rate: f64,
    inner: Mutex<TokenBucketInner>,
}

impl TokenBucket {
    /// Creates a new `TokenBucket`; it starts full.
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of tokens (burst size)
    /// * `refill_rate` - Tokens added per second
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            inner: Mutex::new(TokenBucketInner {
                tokens: capacity as f64,
                last_refill: Instant::now(),
                effective_capacity: capacity,
                success_count: 0,
                paused_until: None,
            }),
        }
    }

    fn refill(inner: &mut TokenBucketInner, refill_rate: f64) {
        let now = Instant::now();
        let elapsed_secs = now.duration_since(inner.last_refill).as_secs_f64();

        if elapsed_secs > 0.0 {
            let new_tokens = elapsed_secs * refill_rate;
            inner.tokens = (inner.tokens + new_tokens).min(inner.effective_capacity as f64);
            inner.last_refill = now;
        }
    }

    /// Attempts to take a single token without waiting.
    pub fn try_acquire(&self) -> bool {
        let mut inner = lock(&self.inner);
        if inner.paused_until.is_some_and(|until| Instant::now() < until) {
            return false;
        }
        Self::refill(&mut inner, self.refill_rate);

        if inner.tokens >= 1.0 {
            inner.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Estimated wait until a token becomes available (zero if one is ready).
    pub fn time_until_available(&self) -> Duration {
        let mut inner = lock(&self.inner);
        let now = Instant::now();
        if let Some(until) = inner.paused_until {
            if now < until {
                return until - now;
            }
            inner.paused_until = None;
        }
        Self::refill(&mut inner, self.refill_rate);

        if inner.tokens >= 1.0 {
            Duration::ZERO
        } else if self.refill_rate > 0.0 {
            Duration::from_secs_f64((1.0 - inner.tokens) / self.refill_rate)
        } else {
            Duration::MAX
        }
    }

    /// Waits until a token is available and takes it.
    pub async fn acquire(&self) {
        loop {
            if self.try_acquire() {
                return;
            }
            let wait = self
                .time_until_available()
                .clamp(Duration::from_millis(10), Duration::from_secs(60));
            debug!(wait_ms = wait.as_millis() as u64, "No tokens available, waiting for refill");
            tokio::time::sleep(wait).await;
        }
    }

    /// Returns the current number of available tokens (after refill).
    pub fn available_tokens(&self) -> f64 {
        let mut inner = lock(&self.inner);
        Self::refill(&mut inner, self.refill_rate);
        inner.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Current effective capacity (may be reduced by throttling).
    pub fn effective_capacity(&self) -> u32 {
        lock(&self.inner).effective_capacity
    }

    /// Records a successful request.
    ///
    /// Every 100 consecutive successes raise the effective capacity by 5%,
    /// up to the configured capacity.
    pub fn on_success(&self) {
        let mut inner = lock(&self.inner);
        inner.success_count += 1;

        if inner.success_count % 100 == 0 && inner.effective_capacity < self.capacity {
            let old = inner.effective_capacity;
            let increase = (old as f64 * 0.05).max(1.0) as u32;
            inner.effective_capacity = (old + increase).min(self.capacity);
            debug!(
                old_capacity = old,
                new_capacity = inner.effective_capacity,
                "Adaptive recovery: increasing bucket capacity"
            );
        }
    }

    /// Records a throttle response: halves the effective capacity (minimum 1)
    /// and pauses the bucket for `retry_after` when the provider gave one.
    pub fn on_throttle(&self, retry_after: Option<Duration>) {
        let mut inner = lock(&self.inner);
        let old = inner.effective_capacity;
        inner.effective_capacity = (old / 2).max(1);
        inner.tokens = inner.tokens.min(inner.effective_capacity as f64);
        inner.success_count = 0;
        if let Some(delay) = retry_after {
            inner.paused_until = Some(Instant::now() + delay);
        }
        warn!(
            old_capacity = old,
            new_capacity = inner.effective_capacity,
            pause_ms = retry_after.map(|d| d.as_millis() as u64),
            "Throttle detected: reducing bucket capacity"
        );
    }
}

// ============================================================================
// TransferRateLimiter
// ============================================================================

/// Which bucket a request draws from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Listing, metadata and content reads against the source store
    SourceRead,
    /// Uploads, listings and deletes against the destination store
    DestinationWrite,
}

/// Rate limiter shared by every worker of a job
#[derive(Debug)]
pub struct TransferRateLimiter {
    source_read: TokenBucket,
    destination_write: TokenBucket,
}

impl TransferRateLimiter {
    /// Builds both buckets from requests-per-minute rates and burst sizes.
    pub fn per_minute(
        source_reads_per_minute: u32,
        source_read_burst: u32,
        destination_writes_per_minute: u32,
        destination_write_burst: u32,
    ) -> Self {
        Self {
            source_read: TokenBucket::new(
                source_read_burst,
                f64::from(source_reads_per_minute) / 60.0,
            ),
            destination_write: TokenBucket::new(
                destination_write_burst,
                f64::from(destination_writes_per_minute) / 60.0,
            ),
        }
    }

    pub fn from_config(config: &RateLimitsConfig) -> Self {
        Self::per_minute(
            config.source_reads_per_minute,
            config.source_read_burst,
            config.destination_writes_per_minute,
            config.destination_write_burst,
        )
    }

    /// Limiter that never makes callers wait, for tests
    pub fn unlimited() -> Self {
        Self {
            source_read: TokenBucket::new(u32::MAX, f64::MAX),
            destination_write: TokenBucket::new(u32::MAX, f64::MAX),
        }
    }

    pub fn bucket(&self, direction: Direction) -> &TokenBucket {
        match direction {
            Direction::SourceRead => &self.source_read,
            Direction::DestinationWrite => &self.destination_write,
        }
    }

    /// Waits for a token in the given direction.
    pub async fn acquire(&self, direction: Direction) {
        self.bucket(direction).acquire().await;
    }

    pub fn on_success(&self, direction: Direction) {
        self.bucket(direction).on_success();
    }

    pub fn on_throttle(&self, direction: Direction, retry_after: Option<Duration>) {
        self.bucket(direction).on_throttle(retry_after);
    }

    /// Observer to hand to a store adapter serving `direction`
    pub fn observer(self: &Arc<Self>, direction: Direction) -> Arc<dyn ThrottleObserver> {
        Arc::new(LimiterObserver {
            limiter: Arc::clone(self),
            direction,
        })
    }
}

/// Applies throttling a store adapter absorbed to one bucket of a shared limiter
#[derive(Debug)]
pub struct LimiterObserver {
    limiter: Arc<TransferRateLimiter>,
    direction: Direction,
}

impl ThrottleObserver for LimiterObserver {
    fn on_throttled(&self, retry_after: Option<Duration>) {
        self.limiter.on_throttle(self.direction, retry_after);
    }
}
