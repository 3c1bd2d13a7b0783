//! Bounded fixed-interval polling
//!
//! Shared by activation checks and deployment readiness. No backoff,
//! no jitter; the wait happens only between attempts.

use std::future::Future;
use std::time::Duration;

/// Attempt cap plus the fixed pause between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Maximum number of checks (at least one check always runs)
    pub max_attempts: u32,
    /// Pause between consecutive checks
    pub interval: Duration,
}

impl PollPolicy {
    /// Create policy
    #[inline]
    #[must_use]
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

/// Result of a single check
#[derive(Debug)]
pub enum Check<T, E> {
    /// Condition reached
    Ready(T),
    /// Not yet; try again
    Pending,
    /// Give up immediately
    Abort(E),
}

/// Result of a bounded poll
#[derive(Debug)]
pub enum PollOutcome<T, E> {
    /// Condition reached on attempt `attempt` (1-based)
    Ready { value: T, attempt: u32 },
    /// Every attempt came back pending
    Exhausted { attempts: u32 },
    /// A check aborted
    Aborted { error: E, attempt: u32 },
}

/// Run `check` until ready, aborted or out of attempts
pub async fn poll_until<T, E, F, Fut>(policy: PollPolicy, mut check: F) -> PollOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Check<T, E>>,
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        match check(attempt).await {
            Check::Ready(value) => return PollOutcome::Ready { value, attempt },
            Check::Abort(error) => return PollOutcome::Aborted { error, attempt },
            Check::Pending => {
                tracing::debug!(attempt, max_attempts = attempts, "poll pending");
            }
        }
        if attempt < attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }
    PollOutcome::Exhausted { attempts }
}
