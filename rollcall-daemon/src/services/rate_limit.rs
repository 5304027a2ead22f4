//! Rate limiting for PIN submissions.
//!
//! Bounds how fast a single user can guess codes in the 9999-code space.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{
    clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter,
};
use rollcall_auth::Sweep;
use rollcall_core::{GroupId, UserId};

type Key = (GroupId, UserId);

/// Default sustained PIN attempts per minute (also the burst size).
pub const DEFAULT_PIN_ATTEMPTS_PER_MINUTE: u32 = 5;

/// Error returned when a user exceeded their PIN attempt quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("too many PIN attempts, wait a minute and try again")]
pub struct RateLimited;

/// Per-(group, user) limiter for PIN submissions.
#[derive(Clone)]
pub struct PinAttemptLimiter {
    limiter: Arc<RateLimiter<Key, DefaultKeyedStateStore<Key>, DefaultClock>>,
}

impl PinAttemptLimiter {
    /// Create a limiter allowing `per_minute` attempts per minute with an
    /// equal burst. Zero falls back to the default.
    pub fn new(per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(per_minute)
            .or(NonZeroU32::new(DEFAULT_PIN_ATTEMPTS_PER_MINUTE))
            .unwrap_or(NonZeroU32::MIN);

        let quota = Quota::per_minute(per_minute).allow_burst(per_minute);

        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
        }
    }

    /// Check whether `user` may submit another PIN in `group`.
    pub fn check(&self, group: GroupId, user: UserId) -> Result<(), RateLimited> {
        match self.limiter.check_key(&(group, user)) {
            Ok(()) => Ok(()),
            Err(_) => {
                tracing::warn!(group = %group, user = %user, "PIN attempt rate limit exceeded");
                Err(RateLimited)
            }
        }
    }
}

impl Default for PinAttemptLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_PIN_ATTEMPTS_PER_MINUTE)
    }
}

/// Lets the shared janitor forget users whose quota fully refilled.
impl Sweep for PinAttemptLimiter {
    fn sweep(&self) -> usize {
        let before = self.limiter.len();
        self.limiter.retain_recent();
        before.saturating_sub(self.limiter.len())
    }
}
