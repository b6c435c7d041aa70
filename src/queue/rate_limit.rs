//! Global minimum spacing between queue operations.
//!
//! The last-operation timestamp lives in process memory only. A restart
//! forgets it, which can let one operation through early.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::SharedClock;

/// Result of consulting the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitCheck {
    Ready,
    Wait { remaining: Duration },
}

impl RateLimitCheck {
    pub fn is_ready(&self) -> bool {
        matches!(self, RateLimitCheck::Ready)
    }

    /// Remaining wait rounded up to whole seconds (0 when ready).
    pub fn wait_seconds(&self) -> u64 {
        match self {
            RateLimitCheck::Ready => 0,
            RateLimitCheck::Wait { remaining } => {
                let secs = remaining.as_secs();
                if remaining.subsec_nanos() > 0 {
                    secs + 1
                } else {
                    secs
                }
            }
        }
    }
}

pub struct RateLimiter {
    min_delay: Duration,
    clock: SharedClock,
    last: Mutex<Option<DateTime<Utc>>>,
}

impl RateLimiter {
    pub fn new(min_delay: Duration, clock: SharedClock) -> Self {
        RateLimiter {
            min_delay,
            clock,
            last: Mutex::new(None),
        }
    }

    fn last(&self) -> Option<DateTime<Utc>> {
        *self.last.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn check(&self) -> RateLimitCheck {
        let Some(last) = self.last() else {
            return RateLimitCheck::Ready;
        };
        // A clock that went backwards counts as no time elapsed.
        let elapsed = (self.clock.utc() - last).to_std().unwrap_or(Duration::ZERO);
        if elapsed >= self.min_delay {
            RateLimitCheck::Ready
        } else {
            RateLimitCheck::Wait {
                remaining: self.min_delay - elapsed,
            }
        }
    }

    /// Records that an operation finished now.
    pub fn record(&self) {
        let now = self.clock.utc();
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(now);
    }
}
