//! Coalesces elements into batches and dispatches them.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use tokio::sync::{oneshot, Notify};

use super::batch::Batch;
use super::descriptor::BatchingDescriptor;
use super::flow_control::FlowController;
use super::settings::{BatchingSettings, LimitExceededBehavior};
use crate::callable::{CallContext, UnaryCallable};
use crate::error::{Code, Result, RpcError};

/// Result of one element added to a [`Batcher`]; resolves once its batch
/// has been sent and the response split.
#[must_use]
#[derive(Debug)]
pub struct BatchedResult<R> {
    rx: oneshot::Receiver<Result<R>>,
}

impl<R> Future for BatchedResult<R> {
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(RpcError::BatcherClosed)))
    }
}

pub struct Batcher<D: BatchingDescriptor> {
    inner: Arc<BatcherInner<D>>,
}

impl<D: BatchingDescriptor> Clone for Batcher<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct BatcherInner<D: BatchingDescriptor> {
    descriptor: Arc<D>,
    callable: Arc<dyn UnaryCallable<D::Request, D::Response>>,
    settings: BatchingSettings,
    flow: FlowController,
    open: Mutex<HashMap<D::PartitionKey, Batch<D>>>,
    next_batch_id: AtomicU64,
    in_flight: AtomicUsize,
    idle: Notify,
    closed: AtomicBool,
}

impl<D: BatchingDescriptor> BatcherInner<D> {
    fn open(&self) -> MutexGuard<'_, HashMap<D::PartitionKey, Batch<D>>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<D: BatchingDescriptor> Batcher<D> {
    /// Fails with [`RpcError::Configuration`] on invalid settings.
    pub fn new(
        descriptor: Arc<D>,
        callable: Arc<dyn UnaryCallable<D::Request, D::Response>>,
        settings: BatchingSettings,
    ) -> Result<Self> {
        settings.validate()?;
        let flow = FlowController::new(settings.flow_control.clone());
        Ok(Self {
            inner: Arc::new(BatcherInner {
                descriptor,
                callable,
                settings,
                flow,
                open: Mutex::new(HashMap::new()),
                next_batch_id: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn descriptor(&self) -> &Arc<D> {
        &self.inner.descriptor
    }

    pub fn flow_controller(&self) -> &FlowController {
        &self.inner.flow
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Append `element` to the open batch for `key`.
    ///
    /// Waits for flow-control capacity first when the controller blocks.
    /// The returned future resolves with this element's share of the batch
    /// response.
    pub async fn add(
        &self,
        key: D::PartitionKey,
        element: D::Element,
    ) -> Result<BatchedResult<D::ElementResult>> {
        if self.is_closed() {
            return Err(RpcError::BatcherClosed);
        }
        let bytes = self.inner.descriptor.count_bytes(&element);
        let blocking =
            self.inner.settings.flow_control.limit_exceeded_behavior == LimitExceededBehavior::Block;
        let permit = match self.inner.flow.try_acquire(1, bytes) {
            Ok(permit) => permit,
            Err(e) if !blocking => return Err(e.into()),
            Err(_) => {
                // Capacity held by still-open batches only returns once they are sent.
                self.dispatch_open();
                self.inner.flow.reserve(1, bytes).await?
            }
        };
        if self.is_closed() {
            return Err(RpcError::BatcherClosed);
        }

        let (tx, rx) = oneshot::channel();
        let (full, started) = {
            let mut open = self.inner.open();
            let mut started = None;
            let batch = open.entry(key.clone()).or_insert_with(|| {
                let id = self.inner.next_batch_id.fetch_add(1, Ordering::Relaxed);
                started = Some(id);
                Batch::new(id, key.clone())
            });
            batch.push(element, bytes, tx, permit);
            let full = if batch.is_full(&self.inner.settings) {
                open.remove(&key)
            } else {
                None
            };
            (full, started)
        };

        match full {
            Some(batch) => self.dispatch(batch),
            None => {
                if let (Some(id), Some(delay)) = (started, self.inner.settings.delay_threshold) {
                    self.schedule_delayed_flush(key, id, delay);
                }
            }
        }
        Ok(BatchedResult { rx })
    }

    /// Send every open batch and wait until all in-flight batches settle.
    pub async fn flush(&self) {
        self.dispatch_open();
        loop {
            let idle = self.inner.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            if self.inner.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Reject further adds, then flush.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.flush().await;
    }

    fn dispatch_open(&self) {
        let drained: Vec<Batch<D>> = self.inner.open().drain().map(|(_, b)| b).collect();
        for batch in drained {
            self.dispatch(batch);
        }
    }

    fn schedule_delayed_flush(&self, key: D::PartitionKey, batch_id: u64, delay: std::time::Duration) {
        let weak: Weak<BatcherInner<D>> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return };
            let due = {
                let mut open = inner.open();
                let still_open = open.get(&key).map(|b| b.id) == Some(batch_id);
                if still_open {
                    open.remove(&key)
                } else {
                    None
                }
            };
            if let Some(batch) = due {
                Batcher { inner }.dispatch(batch);
            }
        });
    }

    fn dispatch(&self, batch: Batch<D>) {
        let inner = Arc::clone(&self.inner);
        inner.in_flight.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(
            key = ?batch.key,
            elements = batch.len(),
            bytes = batch.byte_size(),
            age = ?batch.created_at.elapsed(),
            "sending batch"
        );
        let key = batch.key.clone();
        let (elements, senders, permits) = batch.into_parts();
        let request = inner.descriptor.build_request(&key, elements);
        let call = inner.callable.call(request, CallContext::default());

        tokio::spawn(async move {
            match call.await {
                Ok(response) => {
                    let count = senders.len();
                    let mut results = inner.descriptor.split_response(response, count).into_iter();
                    for tx in senders {
                        let result = results.next().unwrap_or_else(|| {
                            Err(RpcError::status(
                                Code::Internal,
                                format!("batch response is missing a result (batch of {count})"),
                            ))
                        });
                        let _ = tx.send(result);
                    }
                }
                Err(e) => {
                    tracing::debug!(key = ?key, error = %e, "batch failed");
                    for tx in senders {
                        let _ = tx.send(Err(e.clone()));
                    }
                }
            }
            drop(permits);
            if inner.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
                inner.idle.notify_waiters();
            }
        });
    }
}
