//! Write-conflict retry discipline.
//!
//! Index mutations run as a retryable write unit: on a conflict the unit is
//! abandoned and re-executed from scratch under fresh visibility. Any other
//! error propagates immediately.

use std::num::NonZeroU32;

use loam_error::Result;
use loam_types::Namespace;
use tracing::{debug, warn};

/// How many times a write unit may be attempted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempt cap; `None` retries until a non-conflict outcome.
    pub max_attempts: Option<NonZeroU32>,
}

impl RetryPolicy {
    /// Retry conflicts indefinitely. This is the default.
    pub const UNBOUNDED: Self = Self { max_attempts: None };

    /// Cap total attempts at `max_attempts`; zero means unbounded.
    #[must_use]
    pub fn capped(max_attempts: u32) -> Self {
        Self {
            max_attempts: NonZeroU32::new(max_attempts),
        }
    }
}

/// Run `unit` until it returns a non-conflict outcome or the policy's attempt
/// cap is exhausted, in which case the final conflict error is returned.
pub fn run_write_unit<T>(
    policy: RetryPolicy,
    op: &str,
    ns: &Namespace,
    mut unit: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match unit() {
            Err(err) if err.is_conflict() => {
                if let Some(cap) = policy.max_attempts {
                    if attempts >= cap.get() {
                        warn!(op, %ns, attempts, "write unit abandoned at retry cap");
                        return Err(err);
                    }
                }
                debug!(op, %ns, attempts, "write conflict, re-executing write unit");
            }
            outcome => return outcome,
        }
    }
}
