//! Token-bucket throttling
//!
//! A [`Throttle`] admits work at a sustained rate with bursts up to its
//! capacity. Waiters reserve tokens up front (so admission is first come,
//! first served) and get them back if their context ends before admission.

use crate::context::OpContext;
use crate::storage::{BucketError, BucketResult};
use parking_lot::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::trace;

/// Window over which a rate limit is enforced to within a few percent
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(8 * 60 * 60);

/// Tolerated relative error of the enforced rate over the window
const RATE_ACCURACY: f64 = 0.02;

#[derive(Debug, Error, PartialEq)]
pub enum ThrottleError {
    #[error("illegal rate: {0}")]
    InvalidRate(f64),

    #[error("illegal window: {0:?}")]
    InvalidWindow(Duration),

    #[error("can't use a token bucket to limit to {rate} Hz over a window of {window:?} (result is a capacity of {capacity})")]
    CapacityTooSmall {
        rate: f64,
        window: Duration,
        capacity: f64,
    },
}

/// Smallest bucket capacity that enforces `rate_hz` to within
/// `RATE_ACCURACY` over `window`.
pub fn choose_token_bucket_capacity(rate_hz: f64, window: Duration) -> Result<u64, ThrottleError> {
    if !rate_hz.is_finite() || rate_hz <= 0.0 {
        return Err(ThrottleError::InvalidRate(rate_hz));
    }
    if window.is_zero() {
        return Err(ThrottleError::InvalidWindow(window));
    }
    let capacity = (window.as_secs_f64() * rate_hz * RATE_ACCURACY).floor();
    if capacity < 1.0 {
        return Err(ThrottleError::CapacityTooSmall {
            rate: rate_hz,
            window,
            capacity,
        });
    }
    // Float-to-int `as` saturates
    Ok(capacity as u64)
}

#[derive(Debug)]
struct ThrottleState {
    /// May go negative: outstanding reservations not yet covered
    tokens: f64,
    last_refill: Instant,
}

/// Shared token bucket
#[derive(Debug)]
pub struct Throttle {
    rate_hz: f64,
    capacity: u64,
    state: Mutex<ThrottleState>,
}

impl Throttle {
    /// A full bucket refilling at `rate_hz` tokens per second
    pub fn new(rate_hz: f64, capacity: u64) -> Result<Self, ThrottleError> {
        if !rate_hz.is_finite() || rate_hz <= 0.0 {
            return Err(ThrottleError::InvalidRate(rate_hz));
        }
        Ok(Throttle {
            rate_hz,
            capacity,
            state: Mutex::new(ThrottleState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        })
    }

    /// A throttle enforcing `rate_hz` over [`RATE_LIMIT_WINDOW`]
    pub fn with_rate(rate_hz: f64) -> Result<Self, ThrottleError> {
        let capacity = choose_token_bucket_capacity(rate_hz, RATE_LIMIT_WINDOW)?;
        Self::new(rate_hz, capacity)
    }

    pub fn rate_hz(&self) -> f64 {
        self.rate_hz
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Tokens currently available (negative while reservations are pending)
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        state.tokens
    }

    fn refill(&self, state: &mut ThrottleState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        state.tokens =
            (state.tokens + elapsed.as_secs_f64() * self.rate_hz).min(self.capacity as f64);
        state.last_refill = now;
    }

    /// Return unused tokens to the bucket.
    pub(crate) fn refund(&self, tokens: u64) {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        state.tokens = (state.tokens + tokens as f64).min(self.capacity as f64);
    }

    /// Wait until `tokens` tokens are available and take them.
    ///
    /// Fails immediately if more than the capacity is requested, or if the
    /// context's deadline would pass before admission.
    pub async fn wait(&self, ctx: &OpContext, tokens: u64) -> BucketResult<()> {
        if tokens == 0 {
            return Ok(());
        }
        if tokens > self.capacity {
            return Err(BucketError::InvalidArgument(format!(
                "requested {} tokens from a throttle of capacity {}",
                tokens, self.capacity
            )));
        }
        ctx.check()?;

        let now = Instant::now();
        let ready_at = {
            let mut state = self.state.lock();
            self.refill(&mut state, now);
            state.tokens -= tokens as f64;
            if state.tokens >= 0.0 {
                return Ok(());
            }
            now + Duration::from_secs_f64(-state.tokens / self.rate_hz)
        };

        // Refunded on every exit except admission, including the future
        // being dropped mid-sleep.
        let reservation = Reservation {
            throttle: self,
            tokens,
        };
        if ctx.deadline().is_some_and(|deadline| deadline < ready_at) {
            return Err(BucketError::DeadlineExceeded);
        }

        trace!(tokens, wait = ?(ready_at - now), "Throttle delaying request");
        ctx.run(async {
            tokio::time::sleep_until(ready_at).await;
            Ok(())
        })
        .await?;
        std::mem::forget(reservation);
        Ok(())
    }
}

/// Tokens taken by a waiter that has not been admitted yet
struct Reservation<'a> {
    throttle: &'a Throttle,
    tokens: u64,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.throttle.refund(self.tokens);
    }
}
