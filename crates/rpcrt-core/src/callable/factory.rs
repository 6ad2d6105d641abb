//! Assemble decorated callables from settings.

use std::collections::HashSet;
use std::sync::Arc;

use super::retrying::{RetryingCallable, UnaryCallSettings};
use super::UnaryCallable;
use crate::batching::{Batcher, BatchingCallable, BatchingDescriptor, BatchingSettings};
use crate::error::{Code, Result};
use crate::longrunning::{OperationCallable, OperationSnapshot, OperationsClient};
use crate::paging::{PagedCallable, PagedListDescriptor};
use crate::retry::RetrySettings;
use crate::streaming::{
    RetryingServerStreamingCallable, ServerStreamingCallSettings, ServerStreamingCallable,
    WatchdogStreamingCallable,
};

/// Retries are off with a single allowed attempt, no retryable codes, or no
/// bound at all on attempts and time.
pub fn are_retries_disabled(retryable_codes: &HashSet<Code>, settings: &RetrySettings) -> bool {
    settings.max_attempts == 1
        || retryable_codes.is_empty()
        || (settings.max_attempts == 0 && settings.total_timeout.is_zero())
}

fn effective_settings(settings: &UnaryCallSettings) -> RetrySettings {
    if are_retries_disabled(&settings.retryable_codes, &settings.retry_settings) {
        RetrySettings::simple_timeout_no_retries(settings.retry_settings.total_timeout)
    } else {
        settings.retry_settings.clone()
    }
}

pub fn retrying_unary_call<Req, Resp>(
    inner: Arc<dyn UnaryCallable<Req, Resp>>,
    settings: &UnaryCallSettings,
) -> Result<RetryingCallable<Req, Resp>>
where
    Req: Clone + Send + Sync + 'static,
    Resp: Send + 'static,
{
    RetryingCallable::new(inner, effective_settings(settings), settings.retryable_codes.clone())
}

/// Every attempt runs under the watchdog when a stream timeout is set.
pub fn retrying_server_streaming_call<Req, Resp>(
    inner: Arc<dyn ServerStreamingCallable<Req, Resp>>,
    settings: &ServerStreamingCallSettings,
) -> Result<RetryingServerStreamingCallable<Req, Resp>>
where
    Req: Clone + Send + Sync + 'static,
    Resp: Send + 'static,
{
    let inner: Arc<dyn ServerStreamingCallable<Req, Resp>> = if settings.is_watched() {
        Arc::new(WatchdogStreamingCallable::new(
            inner,
            settings.wait_timeout,
            settings.idle_timeout,
        ))
    } else {
        inner
    };
    RetryingServerStreamingCallable::new(
        inner,
        effective_settings(&settings.call),
        settings.call.retryable_codes.clone(),
    )
}

pub fn batching_call<D: BatchingDescriptor>(
    inner: Arc<dyn UnaryCallable<D::Request, D::Response>>,
    descriptor: Arc<D>,
    settings: BatchingSettings,
) -> Result<BatchingCallable<D>> {
    Ok(BatchingCallable::new(Batcher::new(descriptor, inner, settings)?))
}

pub fn paged_call<D: PagedListDescriptor>(
    inner: Arc<dyn UnaryCallable<D::Request, D::Response>>,
    descriptor: Arc<D>,
) -> PagedCallable<D> {
    PagedCallable::new(inner, descriptor)
}

pub fn long_running_call<Req: Send + 'static>(
    initial: Arc<dyn UnaryCallable<Req, OperationSnapshot>>,
    client: Arc<dyn OperationsClient>,
    poll_settings: RetrySettings,
) -> Result<OperationCallable<Req>> {
    OperationCallable::new(initial, client, poll_settings)
}

/// Polling paced by `settings.retry_settings`; failed polls whose code is in
/// `settings.retryable_codes` keep polling.
pub fn long_running_call_with_codes<Req: Send + 'static>(
    initial: Arc<dyn UnaryCallable<Req, OperationSnapshot>>,
    client: Arc<dyn OperationsClient>,
    settings: &UnaryCallSettings,
) -> Result<OperationCallable<Req>> {
    OperationCallable::with_retryable_codes(
        initial,
        client,
        settings.retry_settings.clone(),
        settings.retryable_codes.iter().copied(),
    )
}
