//! Asynchronous token bucket with in-place rate mutation
//!
//! This is the permission primitive behind both throttling layers: a bucket
//! accrues tokens (bytes) at a configurable rate up to a fixed burst
//! capacity, and [`TokenBucket::wait_n`] suspends the caller until the
//! requested amount is available. The refill rate can be swapped at any time
//! through a shared handle without replacing the bucket, so every holder of
//! an `Arc<TokenBucket>` always observes the latest rate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::WaitError;


/// Tokens within this margin of the requested amount count as available.
/// Absorbs floating-point rounding so a waiter cannot re-sleep forever on a
/// sub-nanosecond deficit.
const GRANT_EPSILON: f64 = 1e-6;

/// Upper bound on a single sleep inside [`TokenBucket::wait_n`]. Waiting in
/// bounded slices lets a sleeping waiter observe a rate change within
/// ~100ms instead of sleeping out a schedule computed against a stale rate.
const MAX_SLEEP: Duration = Duration::from_millis(100);

/// A token bucket measured in bytes.
///
/// The bucket starts full. Tokens accrue at [`rate`](TokenBucket::rate)
/// bytes per second up to [`burst`](TokenBucket::burst) bytes; each granted
/// [`wait_n`](TokenBucket::wait_n) deducts its request from the balance.
/// All methods take `&self`, so a bucket is shared between connections (and
/// between a listener and its connections) as an `Arc<TokenBucket>`.
///
/// # Example
///
/// ```
/// use tricklenet::TokenBucket;
///
/// let bucket = TokenBucket::new(64 * 1024, 1024);
/// assert_eq!(bucket.rate(), 64 * 1024);
///
/// // Visible immediately to every holder of the same bucket.
/// bucket.set_rate(128 * 1024);
/// assert_eq!(bucket.rate(), 128 * 1024);
/// ```
pub struct TokenBucket {
    /// Refill rate in bytes per second. Mutated in place by
    /// [`set_rate`](TokenBucket::set_rate); re-read by every waiter on each
    /// refill.
    rate: AtomicU64,
    /// Capacity in bytes. Fixed at construction.
    burst: usize,
    state: Mutex<BucketState>,
}

struct BucketState {
    /// Fractional token balance, capped at `burst`.
    tokens: f64,
    /// Instant of the last refill.
    updated: Instant,
}

impl TokenBucket {
    /// Sentinel rate that disables throttling: [`wait_n`](TokenBucket::wait_n)
    /// grants any request immediately without touching the token balance.
    pub const UNLIMITED: u64 = u64::MAX;

    /// Create a bucket that refills at `rate` bytes per second and holds at
    /// most `burst` bytes. The bucket starts full.
    ///
    /// A `rate` of zero stalls every waiter indefinitely; use
    /// [`UNLIMITED`](TokenBucket::UNLIMITED) to disable throttling instead.
    ///
    /// # Panics
    ///
    /// Panics if `burst` is zero.
    pub fn new(rate: u64, burst: usize) -> Self {
        assert!(burst > 0, "token bucket burst capacity must be positive");
        TokenBucket {
            rate: AtomicU64::new(rate),
            burst,
            state: Mutex::new(BucketState {
                tokens: burst as f64,
                updated: Instant::now(),
            }),
        }
    }

    /// Current refill rate in bytes per second.
    pub fn rate(&self) -> u64 {
        self.rate.load(Ordering::Acquire)
    }

    /// Replace the refill rate in place.
    ///
    /// The bucket object is never swapped out, so the new rate is observed
    /// by every `Arc` holder and by waiters already asleep (they re-read the
    /// rate on their next refill, within ~100ms). The accumulated token
    /// balance and the burst capacity are unchanged.
    pub fn set_rate(&self, rate: u64) {
        self.rate.store(rate, Ordering::Release);
    }

    /// Burst capacity in bytes.
    pub fn burst(&self) -> usize {
        self.burst
    }

    /// Suspend until `n` tokens are available, then consume them.
    ///
    /// Requests for zero tokens and requests against an
    /// [`UNLIMITED`](TokenBucket::UNLIMITED) bucket are granted immediately.
    /// Tokens are deducted only at the moment of the grant, so dropping the
    /// returned future (e.g. from a `select!` losing branch) consumes
    /// nothing.
    ///
    /// `deadline` bounds the wait: if the tokens cannot accrue in time at
    /// the current rate, the call fails fast with
    /// [`WaitError::DeadlineExceeded`] instead of sleeping out the remaining
    /// wait. A request already satisfiable from the balance is granted even
    /// if the deadline has passed.
    ///
    /// # Errors
    ///
    /// - [`WaitError::BurstExceeded`] if `n` exceeds the burst capacity and
    ///   could therefore never be satisfied
    /// - [`WaitError::DeadlineExceeded`] if the wait would outlast `deadline`
    ///
    /// # Example
    ///
    /// ```no_run
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), tricklenet::WaitError> {
    /// use tricklenet::TokenBucket;
    ///
    /// let bucket = TokenBucket::new(64 * 1024, 1024);
    /// bucket.wait_n(1024, None).await?;
    /// # Ok(()) }
    /// ```
    pub async fn wait_n(&self, n: usize, deadline: Option<Instant>) -> Result<(), WaitError> {
        if n == 0 {
            return Ok(());
        }
        loop {
            let rate = self.rate();
            if rate == Self::UNLIMITED {
                return Ok(());
            }
            if n > self.burst {
                return Err(WaitError::BurstExceeded {
                    requested: n,
                    burst: self.burst,
                });
            }

            let now = Instant::now();
            let missing = {
                let mut state = self.state.lock();
                state.refill(now, rate, self.burst);
                if state.tokens + GRANT_EPSILON >= n as f64 {
                    state.tokens = (state.tokens - n as f64).max(0.0);
                    return Ok(());
                }
                n as f64 - state.tokens
            };

            let wait = duration_for(missing, rate);
            if deadline.is_some_and(|d| now + wait > d) {
                return Err(WaitError::DeadlineExceeded);
            }
            tokio::time::sleep_until(now + wait.min(MAX_SLEEP)).await;
        }
    }
}

impl BucketState {
    fn refill(&mut self, now: Instant, rate: u64, burst: usize) {
        let elapsed = now.saturating_duration_since(self.updated);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * rate as f64).min(burst as f64);
        self.updated = now;
    }
}

/// Time needed to accrue `tokens` at `rate` bytes per second, rounded up to
/// a whole nanosecond so a waiter always sleeps long enough to make
/// progress.
fn duration_for(tokens: f64, rate: u64) -> Duration {
    let nanos = (tokens / rate as f64 * 1e9).ceil();
    Duration::from_nanos(nanos.max(1.0) as u64)
}
