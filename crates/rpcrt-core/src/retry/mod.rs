//! Retry and backoff policy.
//!
//! Result classification and exponential backoff decisions live here so that
//! every callable layer (unary, server streaming, operation polling) shares
//! one retry loop.

mod algorithm;
mod classify;
mod executor;
mod settings;

pub use algorithm::{next_delay, AttemptState, ExponentialRetryAlgorithm, RetryDecision, StopReason};
pub use classify::{Outcome, ResultClassifier, StatusCodeClassifier};
pub use executor::RetryingExecutor;
pub(crate) use executor::settle;
pub use settings::{Jitter, RetrySettings};
