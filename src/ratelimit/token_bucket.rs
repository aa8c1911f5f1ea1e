//! Token bucket with burst capacity.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Tokens are added at a fixed rate up to the bucket capacity.
/// Each admitted request consumes one token.
pub struct TokenBucket {
    /// Maximum tokens (bucket capacity).
    capacity: u32,

    /// Tokens added per refill.
    refill_amount: u32,

    /// Time between refills.
    refill_interval: Duration,

    /// Current token count.
    tokens: AtomicU32,

    /// Last refill time.
    last_refill: Mutex<Instant>,

    created: Instant,

    /// Nanoseconds since `created`; only ever moves forward.
    last_used: AtomicU64,
}

impl TokenBucket {
    #[must_use]
    pub fn new(capacity: u32, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            capacity,
            refill_amount: capacity,
            refill_interval: interval,
            tokens: AtomicU32::new(capacity),
            last_refill: Mutex::new(now),
            created: now,
            last_used: AtomicU64::new(0),
        }
    }

    fn refill(&self, now: Instant) {
        let mut last_refill = self.last_refill.lock();
        let elapsed = now.saturating_duration_since(*last_refill);

        if elapsed >= self.refill_interval {
            let periods: u32 = (elapsed.as_nanos() / self.refill_interval.as_nanos().max(1))
                .try_into()
                .unwrap_or(u32::MAX);
            let tokens_to_add = periods.saturating_mul(self.refill_amount);

            loop {
                let current = self.tokens.load(Ordering::Acquire);
                let new_tokens = current.saturating_add(tokens_to_add).min(self.capacity);
                if new_tokens == current {
                    break;
                }
                if self
                    .tokens
                    .compare_exchange(current, new_tokens, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    break;
                }
            }

            *last_refill = now;
        }
    }

    fn touch(&self, now: Instant) {
        let offset = now.saturating_duration_since(self.created).as_nanos() as u64;
        self.last_used.fetch_max(offset, Ordering::AcqRel);
    }

    /// Consumes one token if available.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        self.touch(now);
        self.refill(now);

        loop {
            let current = self.tokens.load(Ordering::Acquire);
            if current == 0 {
                return false;
            }
            if self
                .tokens
                .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    pub fn last_used(&self) -> Instant {
        self.created + Duration::from_nanos(self.last_used.load(Ordering::Acquire))
    }

    pub fn remaining(&self) -> u32 {
        self.tokens.load(Ordering::Acquire)
    }
}
