//! Unary retry decorator.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;

use super::{CallContext, UnaryCallable};
use crate::error::{Code, Result};
use crate::future::ApiFuture;
use crate::retry::{RetrySettings, RetryingExecutor, StatusCodeClassifier};

/// Retry configuration for one unary method.
#[derive(Debug, Clone, PartialEq)]
pub struct UnaryCallSettings {
    pub retry_settings: RetrySettings,
    pub retryable_codes: HashSet<Code>,
}

impl Default for UnaryCallSettings {
    fn default() -> Self {
        Self {
            retry_settings: RetrySettings::default(),
            retryable_codes: [Code::Unavailable, Code::DeadlineExceeded].into_iter().collect(),
        }
    }
}

impl UnaryCallSettings {
    pub fn new(retry_settings: RetrySettings, retryable_codes: impl IntoIterator<Item = Code>) -> Self {
        Self {
            retry_settings,
            retryable_codes: retryable_codes.into_iter().collect(),
        }
    }
}

/// Re-sends the request through `inner` until the retry executor stops.
pub struct RetryingCallable<Req, Resp> {
    inner: Arc<dyn UnaryCallable<Req, Resp>>,
    executor: RetryingExecutor<Resp>,
}

impl<Req, Resp> RetryingCallable<Req, Resp>
where
    Req: Clone + Send + Sync + 'static,
    Resp: Send + 'static,
{
    pub(crate) fn new(
        inner: Arc<dyn UnaryCallable<Req, Resp>>,
        retry_settings: RetrySettings,
        retryable_codes: HashSet<Code>,
    ) -> Result<Self> {
        let classifier = Arc::new(StatusCodeClassifier::new(retryable_codes));
        Ok(Self {
            inner,
            executor: RetryingExecutor::new(retry_settings, classifier)?,
        })
    }

    pub fn settings(&self) -> &RetrySettings {
        self.executor.settings()
    }

    /// Start the call and return a cancellable handle to it.
    pub fn future_call(&self, request: Req, context: CallContext) -> ApiFuture<Resp> {
        let inner = Arc::clone(&self.inner);
        self.executor
            .execute(move |ctx| inner.call(request.clone(), ctx), context)
    }
}

impl<Req, Resp> UnaryCallable<Req, Resp> for RetryingCallable<Req, Resp>
where
    Req: Clone + Send + Sync + 'static,
    Resp: Send + 'static,
{
    fn call(&self, request: Req, context: CallContext) -> BoxFuture<'static, Result<Resp>> {
        Box::pin(self.future_call(request, context))
    }
}
