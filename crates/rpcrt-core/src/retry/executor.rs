//! Retry loop: run an operation until it settles or the algorithm stops.
//!
//! Each logical call runs as one task on the tokio runtime. Backoff delays are
//! timer sleeps inside that task, so no worker thread waits them out, and
//! cancelling the returned [`ApiFuture`] drops both the in-flight attempt and
//! the pending sleep.

use std::future::Future;
use std::sync::Arc;

use super::algorithm::{AttemptState, ExponentialRetryAlgorithm, RetryDecision, StopReason};
use super::classify::ResultClassifier;
use super::settings::RetrySettings;
use crate::callable::CallContext;
use crate::clock::{default_clock, ApiClock};
use crate::error::{Code, Result, RpcError};
use crate::future::ApiFuture;

pub struct RetryingExecutor<T> {
    algorithm: ExponentialRetryAlgorithm,
    classifier: Arc<dyn ResultClassifier<T>>,
    clock: Arc<dyn ApiClock>,
}

impl<T> Clone for RetryingExecutor<T> {
    fn clone(&self) -> Self {
        Self {
            algorithm: self.algorithm.clone(),
            classifier: Arc::clone(&self.classifier),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<T: Send + 'static> RetryingExecutor<T> {
    /// Fails with [`RpcError::Configuration`] if `settings` are invalid.
    pub fn new(settings: RetrySettings, classifier: Arc<dyn ResultClassifier<T>>) -> Result<Self> {
        Self::with_clock(settings, classifier, default_clock())
    }

    pub fn with_clock(
        settings: RetrySettings,
        classifier: Arc<dyn ResultClassifier<T>>,
        clock: Arc<dyn ApiClock>,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            algorithm: ExponentialRetryAlgorithm::new(settings, Arc::clone(&clock)),
            classifier,
            clock,
        })
    }

    pub fn settings(&self) -> &RetrySettings {
        self.algorithm.settings()
    }

    /// Schedule `operation` under this executor's settings, or under
    /// `context.retry_settings` when the caller overrides them.
    ///
    /// `operation` receives a context whose `timeout` is the current attempt's
    /// deadline; the executor also enforces that deadline itself.
    pub fn execute<F, Fut>(&self, operation: F, context: CallContext) -> ApiFuture<T>
    where
        F: FnMut(CallContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let algorithm = match context.retry_settings.clone() {
            Some(overridden) if overridden.validate().is_ok() => {
                ExponentialRetryAlgorithm::new(overridden, Arc::clone(&self.clock))
            }
            Some(_) => {
                tracing::warn!("ignoring invalid per-call retry settings");
                self.algorithm.clone()
            }
            None => self.algorithm.clone(),
        };
        let classifier = Arc::clone(&self.classifier);
        ApiFuture::spawn(run_attempts(algorithm, classifier, operation, context))
    }
}

async fn run_attempts<T, F, Fut>(
    algorithm: ExponentialRetryAlgorithm,
    classifier: Arc<dyn ResultClassifier<T>>,
    mut operation: F,
    context: CallContext,
) -> Result<T>
where
    F: FnMut(CallContext) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut state = algorithm.first_attempt();
    loop {
        let timeout = state.attempt_timeout();
        let attempt = operation(context.clone().with_timeout(timeout));
        let result = match timeout {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .unwrap_or_else(|_| {
                    Err(RpcError::status(
                        Code::DeadlineExceeded,
                        format!("attempt deadline of {:?} exceeded", limit),
                    ))
                }),
            None => attempt.await,
        };

        let outcome = classifier.classify(&result);
        match algorithm.decide(&mut state, outcome) {
            RetryDecision::RetryAfter(delay) => {
                if let Err(e) = &result {
                    tracing::debug!(attempt = state.attempt, ?delay, error = %e, "retrying call");
                } else {
                    tracing::debug!(attempt = state.attempt, ?delay, "result not final; retrying");
                }
                tokio::time::sleep(delay).await;
            }
            RetryDecision::Stop(reason) => return settle(reason, result, &state, &algorithm),
        }
    }
}

/// Final result once the algorithm stops: success and fatal errors pass
/// through, stop conditions wrap the last error.
pub(crate) fn settle<T>(
    reason: StopReason,
    result: Result<T>,
    state: &AttemptState,
    algorithm: &ExponentialRetryAlgorithm,
) -> Result<T> {
    let attempts = state.attempts_made();
    match reason {
        StopReason::Succeeded | StopReason::Fatal => result,
        StopReason::MaxAttempts => {
            tracing::warn!(attempts, "giving up: attempt limit reached");
            Err(RpcError::RetriesExhausted {
                attempts,
                last: result.err().map(Box::new),
            })
        }
        StopReason::TotalTimeout => {
            let elapsed = algorithm.elapsed(state);
            tracing::warn!(
                attempts,
                ?elapsed,
                total_timeout = ?algorithm.settings().total_timeout,
                "giving up: total timeout reached"
            );
            Err(RpcError::DeadlineExceeded {
                attempts,
                elapsed,
                last: result.err().map(Box::new),
            })
        }
    }
}
