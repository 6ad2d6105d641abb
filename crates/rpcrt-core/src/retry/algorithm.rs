//! Exponential backoff with attempt and total-time caps.
//!
//! The algorithm is a pure decision function over [`AttemptState`]: the
//! executor owns the state, reports how the last attempt went, and either
//! sleeps for the returned delay or stops.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::classify::Outcome;
use super::settings::{Jitter, RetrySettings};
use crate::clock::ApiClock;

/// Why the algorithm stopped scheduling attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Succeeded,
    Fatal,
    MaxAttempts,
    TotalTimeout,
}

/// Decision returned after each attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run the next attempt after the given delay.
    RetryAfter(Duration),
    Stop(StopReason),
}

/// Per-call retry bookkeeping.
#[derive(Debug, Clone)]
pub struct AttemptState {
    /// Zero-based index of the attempt currently running.
    pub attempt: u32,
    pub first_attempt_start: Instant,
    /// Un-jittered delay that preceded this attempt (zero for the first one).
    pub retry_delay: Duration,
    /// Delay actually slept before this attempt.
    pub randomized_delay: Duration,
    /// Deadline for this attempt; zero means none.
    pub rpc_timeout: Duration,
}

impl AttemptState {
    /// Number of attempts started so far.
    pub fn attempts_made(&self) -> u32 {
        self.attempt + 1
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        (!self.rpc_timeout.is_zero()).then_some(self.rpc_timeout)
    }
}

/// Next un-jittered delay: `initial` for the first retry, then
/// `min(previous * multiplier, max)`.
pub fn next_delay(previous: Option<Duration>, settings: &RetrySettings) -> Duration {
    match previous {
        None => settings.initial_retry_delay.min(settings.max_retry_delay),
        Some(prev) => scale(prev, settings.retry_delay_multiplier, settings.max_retry_delay),
    }
}

fn scale(value: Duration, multiplier: f64, cap: Duration) -> Duration {
    if value >= cap {
        return cap;
    }
    let scaled = Duration::try_from_secs_f64(value.as_secs_f64() * multiplier).unwrap_or(cap);
    scaled.max(value).min(cap)
}

impl Jitter {
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Full => {
                let nanos = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
                if nanos == 0 {
                    return delay;
                }
                Duration::from_nanos(rand::thread_rng().gen_range(0..=nanos))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExponentialRetryAlgorithm {
    settings: RetrySettings,
    clock: Arc<dyn ApiClock>,
}

impl ExponentialRetryAlgorithm {
    pub fn new(settings: RetrySettings, clock: Arc<dyn ApiClock>) -> Self {
        Self { settings, clock }
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    pub fn elapsed(&self, state: &AttemptState) -> Duration {
        self.clock.now().saturating_duration_since(state.first_attempt_start)
    }

    pub fn first_attempt(&self) -> AttemptState {
        let total = self.settings.total_timeout;
        let rpc_timeout = match (self.settings.initial_rpc_timeout.is_zero(), total.is_zero()) {
            (true, _) => total,
            (false, true) => self.settings.initial_rpc_timeout,
            (false, false) => self.settings.initial_rpc_timeout.min(total),
        };
        AttemptState {
            attempt: 0,
            first_attempt_start: self.clock.now(),
            retry_delay: Duration::ZERO,
            randomized_delay: Duration::ZERO,
            rpc_timeout,
        }
    }

    /// Consult the algorithm after an attempt finished. On `RetryAfter`,
    /// `state` has been advanced to describe the next attempt.
    pub fn decide(&self, state: &mut AttemptState, outcome: Outcome) -> RetryDecision {
        match outcome {
            Outcome::Success => return RetryDecision::Stop(StopReason::Succeeded),
            Outcome::Fatal => return RetryDecision::Stop(StopReason::Fatal),
            Outcome::Retryable => {}
        }

        let s = &self.settings;
        if s.max_attempts > 0 && state.attempts_made() >= s.max_attempts {
            return RetryDecision::Stop(StopReason::MaxAttempts);
        }

        let previous = (state.attempt > 0).then_some(state.retry_delay);
        let delay = next_delay(previous, s);
        let randomized = s.jitter.apply(delay);

        let elapsed = self.elapsed(state);
        let mut rpc_timeout = if s.initial_rpc_timeout.is_zero() {
            Duration::ZERO
        } else {
            scale(state.rpc_timeout, s.rpc_timeout_multiplier, s.max_rpc_timeout)
        };
        if !s.total_timeout.is_zero() {
            let spent = elapsed + randomized;
            if spent >= s.total_timeout {
                return RetryDecision::Stop(StopReason::TotalTimeout);
            }
            let left = s.total_timeout - spent;
            rpc_timeout = if rpc_timeout.is_zero() {
                left
            } else {
                rpc_timeout.min(left)
            };
        }

        state.attempt += 1;
        state.retry_delay = delay;
        state.randomized_delay = randomized;
        state.rpc_timeout = rpc_timeout;
        RetryDecision::RetryAfter(randomized)
    }
}
