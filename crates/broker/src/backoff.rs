//! Reconnection delay schedules.

use std::time::Duration;

/// A delay schedule for connection retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// `min(cap, base * attempt)`.
    Linear { base: Duration, cap: Duration },
    /// The same delay for every attempt, still bounded by `cap`.
    Fixed { delay: Duration, cap: Duration },
}

impl BackoffPolicy {
    /// Returns the delay to wait before retrying after `attempt` (1-based)
    /// has failed. Attempt 0 is treated as attempt 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            BackoffPolicy::Linear { base, cap } => base
                .checked_mul(attempt.max(1))
                .map_or(cap, |delay| delay.min(cap)),
            BackoffPolicy::Fixed { delay, cap } => delay.min(cap),
        }
    }
}

/// The two retry strategies used by the connection manager.
///
/// They are configured independently: `initial` drives retries while no
/// connection has been established yet (or a reconnect attempt keeps
/// failing), `after_disconnect` is the pause taken right after an
/// established connection drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: BackoffPolicy,
    pub after_disconnect: BackoffPolicy,
}

impl ReconnectPolicy {
    /// Builds the policy from a time unit: linear `5u` steps capped at
    /// `30u`, and a fixed `5u` pause after a disconnect.
    pub fn with_unit(unit: Duration) -> Self {
        let cap = unit * 30;
        Self {
            initial: BackoffPolicy::Linear {
                base: unit * 5,
                cap,
            },
            after_disconnect: BackoffPolicy::Fixed {
                delay: unit * 5,
                cap,
            },
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::with_unit(Duration::from_secs(1))
    }
}
