//! I/O throttling for scans of shared storage
//!
//! Directory listings against shared (network) filesystems can starve
//! other clients if issued at full speed. The throttle bounds the scan
//! with two independent mechanisms that can be combined:
//!
//! 1. IOPS limiting (`--max-iops`): a token bucket with capacity and
//!    refill rate both equal to the configured limit, so short bursts up
//!    to the limit are allowed.
//! 2. Fixed delay (`--io-delay`): a constant pause before each operation.
//!
//! [`IoThrottle::new`] returns `None` when both are disabled so the hot
//! path pays nothing. All waits observe the [`CancellationToken`] and
//! return promptly once it is signalled.

use crate::error::ThrottleError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Granularity of cancellable sleeps
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Cancellation token shared between the analyzer and its throttled waits
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Token bucket state, guarded by its own lock so `acquire` callers can
/// share a snapshot of the bucket without holding the throttle lock.
#[derive(Debug)]
struct BucketState {
    /// Current balance; may go negative, encoding a queue of waiters
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
struct TokenBucket {
    /// Refill rate in tokens per second; also the bucket capacity
    rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    fn new(max_iops: u32) -> Self {
        Self {
            rate: f64::from(max_iops),
            state: Mutex::new(BucketState {
                tokens: f64::from(max_iops),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Debit one token and return how long the caller must wait for it.
    ///
    /// Refills by elapsed time, capped at capacity. A negative balance
    /// after the debit means the token is not available yet; the deficit
    /// divided by the refill rate is the wait.
    fn reserve(&self) -> Duration {
        let mut state = self.state.lock().expect("token bucket poisoned");
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.rate);
        state.last_refill = now;
        state.tokens -= 1.0;

        if state.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.tokens / self.rate)
        }
    }
}

/// Rate limiter for filesystem operations
#[derive(Debug)]
pub struct IoThrottle {
    max_iops: u32,
    io_delay: Duration,
    /// Replaced wholesale by `reset()`; acquirers snapshot the Arc under
    /// this lock and then wait without holding it.
    limiter: Mutex<Option<Arc<TokenBucket>>>,
}

impl IoThrottle {
    /// Create a throttle, or `None` when both limits are disabled.
    ///
    /// `max_iops == 0` disables IOPS limiting; a zero `io_delay` disables
    /// the fixed delay.
    pub fn new(max_iops: u32, io_delay: Duration) -> Option<Self> {
        if max_iops == 0 && io_delay.is_zero() {
            return None;
        }

        let limiter = (max_iops > 0).then(|| Arc::new(TokenBucket::new(max_iops)));

        Some(Self {
            max_iops,
            io_delay,
            limiter: Mutex::new(limiter),
        })
    }

    /// Block until the next I/O operation is allowed.
    ///
    /// Waits for a bucket token first (if IOPS limiting is enabled), then
    /// sleeps the fixed delay (if configured). Returns
    /// [`ThrottleError::Cancelled`] as soon as the token is signalled,
    /// including before any wait begins.
    pub fn acquire(&self, cancel: &CancellationToken) -> Result<(), ThrottleError> {
        if cancel.is_cancelled() {
            return Err(ThrottleError::Cancelled);
        }

        let limiter = self
            .limiter
            .lock()
            .expect("throttle limiter poisoned")
            .clone();

        if let Some(bucket) = limiter {
            let wait = bucket.reserve();
            if !wait.is_zero() {
                sleep_cancellable(wait, cancel)?;
            }
        }

        if !self.io_delay.is_zero() {
            sleep_cancellable(self.io_delay, cancel)?;
        }

        Ok(())
    }

    /// Replace the bucket with a fresh, full one (used between runs).
    ///
    /// In-flight `acquire` calls keep waiting on the bucket they
    /// snapshotted; new calls see the fresh one.
    pub fn reset(&self) {
        let mut limiter = self.limiter.lock().expect("throttle limiter poisoned");
        if self.max_iops > 0 {
            *limiter = Some(Arc::new(TokenBucket::new(self.max_iops)));
        }
    }

    /// True if either throttling mechanism is configured
    pub fn is_enabled(&self) -> bool {
        self.max_iops > 0 || !self.io_delay.is_zero()
    }

    pub fn max_iops(&self) -> u32 {
        self.max_iops
    }

    pub fn io_delay(&self) -> Duration {
        self.io_delay
    }
}

/// Sleep in short slices, re-checking the cancellation token between them
fn sleep_cancellable(total: Duration, cancel: &CancellationToken) -> Result<(), ThrottleError> {
    let deadline = Instant::now() + total;
    loop {
        if cancel.is_cancelled() {
            return Err(ThrottleError::Cancelled);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}
