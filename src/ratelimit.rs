use crate::context::RequestContext;
use crate::error::{Result, SwitcherError};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

struct BucketState {
    /// When the next token becomes free if nobody has been idle
    next_free: Instant,
}

/// Token bucket that paces callers to one token per `interval`
///
/// Callers that cannot get a token immediately reserve the next one and sleep
/// until it is due, so back-to-back callers are released at
/// `start, start + interval, start + 2 * interval, ...`. A caller whose
/// deadline falls before its token is due is refused without reserving. A
/// caller dropped while it sleeps hands its slot back, provided nobody has
/// reserved behind it.
pub struct TokenBucket {
    interval: Duration,
    burst: u32,
    state: Mutex<BucketState>,
}

/// A slot taken from the bucket, returned on drop unless kept
struct Reservation<'a> {
    bucket: &'a TokenBucket,
    slot: Instant,
    kept: bool,
}

impl Reservation<'_> {
    fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.kept {
            self.bucket.release(self.slot);
        }
    }
}

impl TokenBucket {
    pub fn new(interval: Duration, burst: u32) -> Self {
        Self {
            interval,
            burst: burst.max(1),
            state: Mutex::new(BucketState {
                next_free: Instant::now(),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    // the lock is never held across an await, so a poisoned state is still consistent
    fn state(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait for a token, or fail fast if the wait would outlast the deadline
    pub async fn acquire(&self, ctx: &RequestContext) -> Result<()> {
        if self.interval.is_zero() {
            return Ok(());
        }

        let (reservation, wait) = {
            let mut state = self.state();
            let now = Instant::now();

            // an idle bucket holds at most `burst` tokens
            let slot = state.next_free.max(now);
            let allowance = self.interval * (self.burst - 1);
            let wait = slot.duration_since(now).saturating_sub(allowance);

            if !wait.is_zero() {
                if let Some(deadline) = ctx.deadline() {
                    if now + wait > deadline {
                        tracing::debug!("Rate limit wait of {:?} exceeds deadline", wait);
                        return Err(SwitcherError::RateLimitDeadlineExceeded { wait });
                    }
                }
            }

            state.next_free = slot + self.interval;
            let reservation = Reservation {
                bucket: self,
                slot,
                kept: false,
            };
            (reservation, wait)
        };

        if !wait.is_zero() {
            tracing::trace!("Waiting {:?} for rate limit token", wait);
            tokio::time::sleep(wait).await;
        }
        reservation.keep();
        Ok(())
    }

    /// Hand back an unused slot if it is still the latest reservation
    fn release(&self, slot: Instant) {
        let mut state = self.state();
        if state.next_free == slot + self.interval {
            tracing::trace!("Returning abandoned rate limit slot");
            state.next_free = slot;
        }
    }
}
