//! Retry policy and the per-period retry controller.
//!
//! Retry and reschedule are separate transitions: a retry is a short-term
//! re-attempt inside the current period's failure budget, a reschedule moves
//! the task on to its next nominal period.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Number of failed attempts allowed in one period before giving up.
pub const MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(30);

/// Default ceiling for the retry delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5 * 60 * 60);

/// How the delay grows between consecutive retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// `initial * attempt`.
    Linear,
    /// `initial * 2^(attempt - 1)`.
    #[default]
    Exponential,
}

/// Retry policy for periodic tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Failed attempts allowed per period. The attempt that reaches this
    /// count reports a final failure instead of a retry.
    pub max_attempts: u32,

    /// Delay growth strategy.
    pub backoff: BackoffPolicy,

    /// Delay before the first retry.
    #[serde(with = "serde_duration")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay.
    #[serde(with = "serde_duration")]
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy with the given attempt budget and default backoff.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Builder: use linear backoff from `initial_delay`.
    pub fn linear(mut self, initial_delay: Duration) -> Self {
        self.backoff = BackoffPolicy::Linear;
        self.initial_delay = initial_delay;
        self
    }

    /// Builder: use exponential backoff from `initial_delay`.
    pub fn exponential(mut self, initial_delay: Duration) -> Self {
        self.backoff = BackoffPolicy::Exponential;
        self.initial_delay = initial_delay;
        self
    }

    /// Builder: cap the delay.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay before re-invoking after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.backoff {
            BackoffPolicy::Linear => self.initial_delay.saturating_mul(attempt),
            BackoffPolicy::Exponential => self
                .initial_delay
                .saturating_mul(2u32.saturating_pow(attempt - 1)),
        };
        delay.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    /// Three attempts, exponential backoff from 30 seconds, capped at five hours.
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            backoff: BackoffPolicy::Exponential,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

/// Where a task is inside its current period's failure budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryState {
    /// No failure yet this period.
    #[default]
    Fresh,
    /// At least one failure, budget not yet spent.
    Retrying,
    /// Budget spent; no more retries until the next period.
    Exhausted,
}

impl RetryState {
    /// Stable string form used by persistent backends.
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryState::Fresh => "fresh",
            RetryState::Retrying => "retrying",
            RetryState::Exhausted => "exhausted",
        }
    }

    /// Parse the string form, falling back to `Fresh`.
    pub fn parse(s: &str) -> Self {
        match s {
            "retrying" => RetryState::Retrying,
            "exhausted" => RetryState::Exhausted,
            _ => RetryState::Fresh,
        }
    }
}

/// What the controller decided after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-invoke after `delay`; `attempt` failures recorded so far.
    Retry { attempt: u32, delay: Duration },
    /// Stop retrying for this period; `attempt` failures recorded.
    GiveUp { attempt: u32 },
}

impl RetryDecision {
    /// Attempt count after the decision.
    pub fn attempt(&self) -> u32 {
        match self {
            RetryDecision::Retry { attempt, .. } | RetryDecision::GiveUp { attempt } => *attempt,
        }
    }

    /// State the entry moves to.
    pub fn state(&self) -> RetryState {
        match self {
            RetryDecision::Retry { .. } => RetryState::Retrying,
            RetryDecision::GiveUp { .. } => RetryState::Exhausted,
        }
    }
}

/// Bounded-attempt state machine applied per period.
#[derive(Debug, Clone, Default)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    /// Create a controller for the given policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The policy in effect.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// State and attempt count to run an invocation with.
    ///
    /// An invocation that follows a retry decision continues the cycle;
    /// anything else is the start of a new period and begins fresh.
    pub fn begin_invocation(&self, state: RetryState, attempt_count: u32) -> (RetryState, u32) {
        match state {
            RetryState::Retrying => (RetryState::Retrying, attempt_count),
            RetryState::Fresh | RetryState::Exhausted => (RetryState::Fresh, 0),
        }
    }

    /// Decide what happens after a failure, given the failures recorded before it.
    pub fn on_failure(&self, attempt_count: u32) -> RetryDecision {
        let attempt = attempt_count.saturating_add(1).min(self.policy.max_attempts.max(1));
        if attempt < self.policy.max_attempts {
            RetryDecision::Retry {
                attempt,
                delay: self.policy.delay_for(attempt),
            }
        } else {
            RetryDecision::GiveUp { attempt }
        }
    }
}

/// Serde helper for Duration serialization.
///
/// Serializes Duration as whole seconds.
pub(crate) mod serde_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
