//! Cancellable eventual results.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

use crate::error::{Result, RpcError};

/// Handle to a call running on the runtime's scheduler.
///
/// Awaiting yields the call's final result. [`cancel`](Self::cancel) stops the
/// in-flight attempt and any scheduled retry; the future then resolves with
/// [`RpcError::Cancelled`]. Dropping an unfinished `ApiFuture` cancels it too,
/// so nested calls are torn down with their parent.
#[must_use = "dropping an ApiFuture cancels the call"]
pub struct ApiFuture<T> {
    handle: JoinHandle<Result<T>>,
}

impl<T: Send + 'static> ApiFuture<T> {
    /// Start `fut` on the current tokio runtime.
    pub fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(fut),
        }
    }
}

impl<T> ApiFuture<T> {
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T> Future for ApiFuture<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) if e.is_cancelled() => Poll::Ready(Err(RpcError::Cancelled)),
            Poll::Ready(Err(e)) => std::panic::resume_unwind(e.into_panic()),
        }
    }
}

impl<T> Drop for ApiFuture<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
