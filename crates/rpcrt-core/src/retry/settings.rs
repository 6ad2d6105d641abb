//! Retry settings and their construction-time validation.

use std::time::Duration;

use crate::error::{Result, RpcError};

/// Randomization applied to each computed retry delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// Use the computed delay as-is.
    #[default]
    None,
    /// Pick uniformly from `[0, delay]`.
    Full,
}

/// Exponential backoff parameters shared by unary retry and operation polling.
///
/// A zero `total_timeout` means no time bound and a zero `max_attempts` means
/// no attempt bound. A zero `initial_rpc_timeout` disables the per-attempt
/// deadline sequence; attempts are then only bounded by the time left in
/// `total_timeout`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub total_timeout: Duration,
    pub initial_retry_delay: Duration,
    pub retry_delay_multiplier: f64,
    pub max_retry_delay: Duration,
    pub max_attempts: u32,
    pub jitter: Jitter,
    pub initial_rpc_timeout: Duration,
    pub rpc_timeout_multiplier: f64,
    pub max_rpc_timeout: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            total_timeout: Duration::from_secs(60),
            initial_retry_delay: Duration::from_millis(250),
            retry_delay_multiplier: 2.0,
            max_retry_delay: Duration::from_secs(30),
            max_attempts: 5,
            jitter: Jitter::None,
            initial_rpc_timeout: Duration::ZERO,
            rpc_timeout_multiplier: 1.0,
            max_rpc_timeout: Duration::ZERO,
        }
    }
}

impl RetrySettings {
    /// Single attempt; `timeout` becomes the per-call deadline.
    pub fn simple_timeout_no_retries(timeout: Duration) -> Self {
        Self {
            total_timeout: timeout,
            initial_retry_delay: Duration::ZERO,
            retry_delay_multiplier: 1.0,
            max_retry_delay: Duration::ZERO,
            max_attempts: 1,
            jitter: Jitter::None,
            initial_rpc_timeout: timeout,
            rpc_timeout_multiplier: 1.0,
            max_rpc_timeout: timeout,
        }
    }

    /// Default cadence for long-running operation polling: start at 5s, grow
    /// by 1.5x up to 45s, give up after 5 minutes.
    pub fn default_polling() -> Self {
        Self {
            total_timeout: Duration::from_secs(300),
            initial_retry_delay: Duration::from_secs(5),
            retry_delay_multiplier: 1.5,
            max_retry_delay: Duration::from_secs(45),
            max_attempts: 0,
            jitter: Jitter::None,
            initial_rpc_timeout: Duration::ZERO,
            rpc_timeout_multiplier: 1.0,
            max_rpc_timeout: Duration::ZERO,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_multiplier("retry_delay_multiplier", self.retry_delay_multiplier)?;
        check_multiplier("rpc_timeout_multiplier", self.rpc_timeout_multiplier)?;
        if self.max_retry_delay < self.initial_retry_delay {
            return Err(RpcError::config(format!(
                "max_retry_delay ({:?}) is smaller than initial_retry_delay ({:?})",
                self.max_retry_delay, self.initial_retry_delay
            )));
        }
        if !self.initial_rpc_timeout.is_zero() && self.max_rpc_timeout < self.initial_rpc_timeout {
            return Err(RpcError::config(format!(
                "max_rpc_timeout ({:?}) is smaller than initial_rpc_timeout ({:?})",
                self.max_rpc_timeout, self.initial_rpc_timeout
            )));
        }
        Ok(())
    }
}

fn check_multiplier(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 1.0 {
        return Err(RpcError::config(format!("{name} must be >= 1.0, got {value}")));
    }
    Ok(())
}
