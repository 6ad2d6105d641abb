//! Uniform callable capability and the adapters composed from it.
//!
//! Every layer (retry, batching, paging, the channel bridge) implements
//! [`UnaryCallable`] and holds the next inner callable, so a stub is assembled
//! by wrapping: `paged(retrying(channel))`.

mod factory;
mod retrying;

use futures::future::BoxFuture;
use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

use crate::error::Result;
use crate::retry::RetrySettings;

pub use factory::{
    are_retries_disabled, batching_call, long_running_call, long_running_call_with_codes, paged_call,
    retrying_server_streaming_call, retrying_unary_call,
};
pub use retrying::{RetryingCallable, UnaryCallSettings};

/// Per-call options carried down the adapter stack.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Deadline for a single attempt; set by the retry layer.
    pub timeout: Option<Duration>,
    /// Request headers forwarded to the transport.
    pub metadata: Vec<(String, String)>,
    /// Replaces the callable's configured retry settings for this call.
    pub retry_settings: Option<RetrySettings>,
}

impl CallContext {
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    pub fn with_retry_settings(mut self, settings: RetrySettings) -> Self {
        self.retry_settings = Some(settings);
        self
    }
}

/// A unary call: one request in, one eventual response out.
pub trait UnaryCallable<Req, Resp>: Send + Sync {
    fn call(&self, request: Req, context: CallContext) -> BoxFuture<'static, Result<Resp>>;
}

/// Adapts an async closure into a [`UnaryCallable`].
pub struct FnCallable<F, Req, Resp> {
    f: F,
    _marker: PhantomData<fn(Req) -> Resp>,
}

pub fn fn_callable<F, Fut, Req, Resp>(f: F) -> FnCallable<F, Req, Resp>
where
    F: Fn(Req, CallContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Resp>> + Send + 'static,
{
    FnCallable {
        f,
        _marker: PhantomData,
    }
}

impl<F, Fut, Req, Resp> UnaryCallable<Req, Resp> for FnCallable<F, Req, Resp>
where
    F: Fn(Req, CallContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Resp>> + Send + 'static,
{
    fn call(&self, request: Req, context: CallContext) -> BoxFuture<'static, Result<Resp>> {
        Box::pin((self.f)(request, context))
    }
}
