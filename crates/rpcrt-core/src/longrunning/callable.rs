//! Starts long-running operations and polls them to completion.

use std::sync::Arc;

use super::future::{Driver, OperationFuture};
use super::operation::{OperationSnapshot, OperationsClient, PollingClassifier};
use crate::callable::{CallContext, UnaryCallable};
use crate::error::{Code, Result};
use crate::retry::{RetrySettings, RetryingExecutor};

pub struct OperationCallable<Req> {
    initial: Arc<dyn UnaryCallable<Req, OperationSnapshot>>,
    client: Arc<dyn OperationsClient>,
    executor: RetryingExecutor<OperationSnapshot>,
}

impl<Req: Send + 'static> OperationCallable<Req> {
    /// `poll_settings` pace the status polls: the first poll waits
    /// `initial_retry_delay`, and polling gives up on the settings' attempt
    /// or total-time limit.
    pub fn new(
        initial: Arc<dyn UnaryCallable<Req, OperationSnapshot>>,
        client: Arc<dyn OperationsClient>,
        poll_settings: RetrySettings,
    ) -> Result<Self> {
        Self::with_classifier(initial, client, poll_settings, PollingClassifier::default())
    }

    /// Like [`new`](Self::new), but a failed poll keeps polling only when its
    /// code is in `retryable_codes` instead of the transient defaults.
    pub fn with_retryable_codes(
        initial: Arc<dyn UnaryCallable<Req, OperationSnapshot>>,
        client: Arc<dyn OperationsClient>,
        poll_settings: RetrySettings,
        retryable_codes: impl IntoIterator<Item = Code>,
    ) -> Result<Self> {
        Self::with_classifier(initial, client, poll_settings, PollingClassifier::new(retryable_codes))
    }

    fn with_classifier(
        initial: Arc<dyn UnaryCallable<Req, OperationSnapshot>>,
        client: Arc<dyn OperationsClient>,
        poll_settings: RetrySettings,
        classifier: PollingClassifier,
    ) -> Result<Self> {
        let executor = RetryingExecutor::new(poll_settings, Arc::new(classifier))?;
        Ok(Self {
            initial,
            client,
            executor,
        })
    }

    pub fn poll_settings(&self) -> &RetrySettings {
        self.executor.settings()
    }

    /// Issue the initial call, then poll the returned operation.
    pub fn call(&self, request: Req, context: CallContext) -> OperationFuture {
        OperationFuture::start(Driver {
            initial: self.initial.call(request, context),
            client: Arc::clone(&self.client),
            executor: self.executor.clone(),
        })
    }

    /// Poll an operation started elsewhere.
    pub fn resume(&self, name: &str) -> OperationFuture {
        OperationFuture::start(Driver {
            initial: self.client.get_operation(name),
            client: Arc::clone(&self.client),
            executor: self.executor.clone(),
        })
    }
}
