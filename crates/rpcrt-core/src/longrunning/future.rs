//! Handle to a running long-running operation.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tokio::sync::watch;

use super::operation::{OperationSnapshot, OperationState, OperationsClient};
use crate::callable::CallContext;
use crate::error::{Result, RpcError};
use crate::future::ApiFuture;
use crate::retry::RetryingExecutor;

/// Moves `state` forward unless it already reached a terminal state.
fn advance(state: &watch::Sender<OperationState>, next: OperationState) -> bool {
    state.send_if_modified(|current| {
        if current.is_terminal() || *current == next {
            return false;
        }
        *current = next;
        true
    })
}

pub(super) struct Driver {
    pub(super) initial: BoxFuture<'static, Result<OperationSnapshot>>,
    pub(super) client: Arc<dyn OperationsClient>,
    pub(super) executor: RetryingExecutor<OperationSnapshot>,
}

/// Eventual response of a long-running operation.
///
/// Awaiting yields the operation's response payload. Progress is observable
/// while polling runs through [`snapshots`](Self::snapshots) and
/// [`state`](Self::state).
#[must_use = "dropping an OperationFuture stops polling"]
pub struct OperationFuture {
    task: ApiFuture<Vec<u8>>,
    state: Arc<watch::Sender<OperationState>>,
    snapshots: watch::Receiver<Option<OperationSnapshot>>,
    initial_error: Arc<OnceLock<RpcError>>,
    client: Arc<dyn OperationsClient>,
}

impl OperationFuture {
    pub(super) fn start(driver: Driver) -> Self {
        let (state, _) = watch::channel(OperationState::Initiated);
        let state = Arc::new(state);
        let (snapshot_tx, snapshots) = watch::channel(None);
        let initial_error = Arc::new(OnceLock::new());
        let client = Arc::clone(&driver.client);
        let task = ApiFuture::spawn(drive(
            driver,
            Arc::clone(&state),
            Arc::new(snapshot_tx),
            Arc::clone(&initial_error),
        ));
        Self {
            task,
            state,
            snapshots,
            initial_error,
            client,
        }
    }

    pub fn state(&self) -> OperationState {
        *self.state.borrow()
    }

    /// Latest snapshot seen, updated after every poll.
    pub fn snapshots(&self) -> watch::Receiver<Option<OperationSnapshot>> {
        self.snapshots.clone()
    }

    /// Operation name, once the initial call returned.
    pub fn name(&self) -> Option<String> {
        self.snapshots.borrow().as_ref().map(|s| s.name.clone())
    }

    /// Snapshot returned by the initial call.
    pub async fn initial_snapshot(&self) -> Result<OperationSnapshot> {
        let mut snapshots = self.snapshots.clone();
        let mut state = self.state.subscribe();
        tokio::select! {
            biased;
            Ok(first) = async { snapshots.wait_for(Option::is_some).await.map(|s| (*s).clone()) } => {
                if let Some(first) = first {
                    return Ok(first);
                }
            }
            _ = state.wait_for(OperationState::is_terminal) => {}
        }
        let latest = (*self.snapshots.borrow()).clone();
        if let Some(first) = latest {
            return Ok(first);
        }
        Err(self.initial_error.get().cloned().unwrap_or(RpcError::Cancelled))
    }

    /// Stop polling and ask the server to cancel the operation. The future
    /// settles with [`RpcError::Cancelled`]; the server-side cancel is not
    /// awaited. No effect once the operation reached a terminal state.
    pub fn cancel(&self) {
        if !advance(&self.state, OperationState::Cancelled) {
            return;
        }
        self.task.cancel();
        let Some(name) = self.name() else { return };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(operation = %name, "no runtime to send the cancel request on");
            return;
        };
        let request = self.client.cancel_operation(&name);
        runtime.spawn(async move {
            if let Err(e) = request.await {
                tracing::warn!(operation = %name, error = %e, "cancel request failed");
            }
        });
    }
}

impl Future for OperationFuture {
    type Output = Result<Vec<u8>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let polled = Pin::new(&mut self.task).poll(cx);
        match polled {
            Poll::Ready(_) if self.state() == OperationState::Cancelled => Poll::Ready(Err(RpcError::Cancelled)),
            other => other,
        }
    }
}

async fn drive(
    driver: Driver,
    state: Arc<watch::Sender<OperationState>>,
    snapshots: Arc<watch::Sender<Option<OperationSnapshot>>>,
    initial_error: Arc<OnceLock<RpcError>>,
) -> Result<Vec<u8>> {
    let Driver {
        initial,
        client,
        executor,
    } = driver;

    let first = match initial.await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            let _ = initial_error.set(e.clone());
            advance(&state, OperationState::Failed);
            return Err(e);
        }
    };
    snapshots.send_replace(Some(first.clone()));
    let name = first.name.clone();

    let finished = if first.done {
        first
    } else {
        advance(&state, OperationState::Polling);
        tracing::debug!(operation = %name, "polling operation");
        tokio::time::sleep(executor.settings().initial_retry_delay).await;
        let poll_name = name.clone();
        let poll_snapshots = Arc::clone(&snapshots);
        let polled = executor
            .execute(
                move |_ctx: CallContext| {
                    let request = client.get_operation(&poll_name);
                    let snapshots = Arc::clone(&poll_snapshots);
                    async move {
                        let snapshot = request.await?;
                        snapshots.send_replace(Some(snapshot.clone()));
                        Ok(snapshot)
                    }
                },
                CallContext::default(),
            )
            .await;
        match polled {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(operation = %name, error = %e, "operation polling stopped");
                advance(&state, OperationState::Failed);
                return Err(e);
            }
        }
    };

    let outcome = finished.into_outcome();
    let next = if outcome.is_ok() {
        OperationState::Done
    } else {
        OperationState::Failed
    };
    advance(&state, next);
    outcome
}
