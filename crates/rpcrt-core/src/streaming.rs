//! Server-streaming calls, their watchdog and their retrying decorator.
//!
//! A stream is retried transparently while nothing has reached the caller.
//! After the first delivered message a retryable failure is only resumed if
//! the [`ResumptionStrategy`] can build a request that continues where the
//! broken stream stopped.
//!
//! The watchdog cancels a stream whose server goes quiet for longer than the
//! wait timeout, or whose consumer stops reading for longer than the idle
//! timeout.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::callable::{CallContext, UnaryCallSettings};
use crate::clock::{default_clock, ApiClock};
use crate::error::{Code, Result, RpcError};
use crate::retry::{
    settle, ExponentialRetryAlgorithm, Outcome, RetryDecision, RetrySettings, StatusCodeClassifier,
};

/// Responses of one server-streaming call.
///
/// Dropping the stream before it ends, or calling [`cancel`](Self::cancel),
/// cancels the underlying call.
pub struct ResponseStream<T> {
    rx: Receiver<T>,
    on_cancel: Option<Box<dyn FnOnce() + Send>>,
    finished: bool,
}

enum Receiver<T> {
    Unbounded(mpsc::UnboundedReceiver<Result<T>>),
    /// Senders wait for the consumer to take the previous message.
    Bounded(mpsc::Receiver<Result<T>>),
}

impl<T> Receiver<T> {
    fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<T>>> {
        match self {
            Receiver::Unbounded(rx) => rx.poll_recv(cx),
            Receiver::Bounded(rx) => rx.poll_recv(cx),
        }
    }

    fn close(&mut self) {
        match self {
            Receiver::Unbounded(rx) => rx.close(),
            Receiver::Bounded(rx) => rx.close(),
        }
    }
}

impl<T: Send + 'static> ResponseStream<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<Result<T>>, on_cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            rx: Receiver::Unbounded(rx),
            on_cancel: Some(Box::new(on_cancel)),
            finished: false,
        }
    }

    /// Stream fed by `task`; cancelling aborts the task.
    pub fn from_task(rx: mpsc::UnboundedReceiver<Result<T>>, task: JoinHandle<()>) -> Self {
        Self::new(rx, move || task.abort())
    }

    /// Like [`from_task`](Self::from_task), but `task` observes the
    /// consumer's pace through the channel's capacity.
    pub fn from_bounded_task(rx: mpsc::Receiver<Result<T>>, task: JoinHandle<()>) -> Self {
        Self {
            rx: Receiver::Bounded(rx),
            on_cancel: Some(Box::new(move || task.abort())),
            finished: false,
        }
    }

    /// Stream that yields `items` and ends.
    pub fn from_results(items: impl IntoIterator<Item = Result<T>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        for item in items {
            let _ = tx.send(item);
        }
        Self::new(rx, || {})
    }

    pub fn failed(error: RpcError) -> Self {
        Self::from_results([Err(error)])
    }
}

impl<T> ResponseStream<T> {
    pub fn cancel(&mut self) {
        self.rx.close();
        if let Some(cancel) = self.on_cancel.take() {
            cancel();
        }
    }
}

impl<T> Stream for ResponseStream<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.rx.poll_recv(cx);
        if let Poll::Ready(None) = polled {
            self.finished = true;
            self.on_cancel = None;
        }
        polled
    }
}

impl<T> Drop for ResponseStream<T> {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel();
        }
    }
}

pub trait ServerStreamingCallable<Req, Resp>: Send + Sync {
    fn call(&self, request: Req, context: CallContext) -> ResponseStream<Resp>;
}

/// Tracks stream progress so a broken stream can be resumed.
pub trait ResumptionStrategy<Req, Resp>: Send + Sync {
    /// Fresh per-call state.
    fn new_instance(&self) -> Box<dyn ResumptionStrategy<Req, Resp>>;

    /// Observe a response before it is handed to the caller.
    fn process_response(&mut self, response: Resp) -> Resp;

    /// Request that continues the stream, or `None` if it cannot be resumed.
    fn resume_request(&self, original: &Req) -> Option<Req>;

    fn can_resume(&self) -> bool;
}

/// Restarts the stream only if no response was delivered yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleStreamResumptionStrategy {
    seen_first: bool,
}

impl<Req, Resp> ResumptionStrategy<Req, Resp> for SimpleStreamResumptionStrategy
where
    Req: Clone + Send + Sync + 'static,
    Resp: 'static,
{
    fn new_instance(&self) -> Box<dyn ResumptionStrategy<Req, Resp>> {
        Box::new(SimpleStreamResumptionStrategy::default())
    }

    fn process_response(&mut self, response: Resp) -> Resp {
        self.seen_first = true;
        response
    }

    fn resume_request(&self, original: &Req) -> Option<Req> {
        (!self.seen_first).then(|| original.clone())
    }

    fn can_resume(&self) -> bool {
        !self.seen_first
    }
}

/// Retry and watchdog configuration for one server-streaming method.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServerStreamingCallSettings {
    pub call: UnaryCallSettings,
    /// Longest wait for the server's next message while the consumer is
    /// reading. `None` or zero disables the check.
    pub wait_timeout: Option<Duration>,
    /// Longest time the consumer may leave a message unread. `None` or zero
    /// disables the check.
    pub idle_timeout: Option<Duration>,
}

impl ServerStreamingCallSettings {
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn is_watched(&self) -> bool {
        enabled(self.wait_timeout).is_some() || enabled(self.idle_timeout).is_some()
    }
}

impl From<UnaryCallSettings> for ServerStreamingCallSettings {
    fn from(call: UnaryCallSettings) -> Self {
        Self {
            call,
            wait_timeout: None,
            idle_timeout: None,
        }
    }
}

fn enabled(timeout: Option<Duration>) -> Option<Duration> {
    timeout.filter(|t| !t.is_zero())
}

/// Cancels streams that stall.
///
/// A stream that produces nothing for `wait_timeout` while the consumer is
/// waiting fails with [`Code::DeadlineExceeded`]. A stream whose consumer
/// leaves a message unread for `idle_timeout` fails with
/// [`Code::Cancelled`] once the consumer reads again. Either way the inner
/// call is cancelled.
pub struct WatchdogStreamingCallable<Req, Resp> {
    inner: Arc<dyn ServerStreamingCallable<Req, Resp>>,
    wait_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
}

impl<Req, Resp> WatchdogStreamingCallable<Req, Resp> {
    pub fn new(
        inner: Arc<dyn ServerStreamingCallable<Req, Resp>>,
        wait_timeout: Option<Duration>,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner,
            wait_timeout: enabled(wait_timeout),
            idle_timeout: enabled(idle_timeout),
        }
    }
}

impl<Req, Resp> ServerStreamingCallable<Req, Resp> for WatchdogStreamingCallable<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn call(&self, request: Req, context: CallContext) -> ResponseStream<Resp> {
        let inner = self.inner.call(request, context);
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(watch(inner, tx, self.wait_timeout, self.idle_timeout));
        ResponseStream::from_bounded_task(rx, task)
    }
}

async fn watch<T: Send + 'static>(
    mut inner: ResponseStream<T>,
    tx: mpsc::Sender<Result<T>>,
    wait_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
) {
    loop {
        // Capacity frees up once the consumer has taken the previous message.
        let permit = match within(idle_timeout, tx.reserve()).await {
            Some(Ok(permit)) => permit,
            Some(Err(_)) => return,
            None => {
                tracing::debug!(timeout = ?idle_timeout, "stream consumer idle, cancelling");
                inner.cancel();
                let _ = tx
                    .send(Err(RpcError::status(Code::Cancelled, "stream cancelled: consumer idle")))
                    .await;
                return;
            }
        };
        match within(wait_timeout, inner.next()).await {
            Some(Some(item)) => {
                let failed = item.is_err();
                permit.send(item);
                if failed {
                    return;
                }
            }
            Some(None) => return,
            None => {
                tracing::debug!(timeout = ?wait_timeout, "no stream response in time, cancelling");
                inner.cancel();
                permit.send(Err(RpcError::status(
                    Code::DeadlineExceeded,
                    "stream cancelled: timed out waiting for the next response",
                )));
                return;
            }
        }
    }
}

/// `None` if `limit` elapses first.
async fn within<F: Future>(limit: Option<Duration>, fut: F) -> Option<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

pub struct RetryingServerStreamingCallable<Req, Resp> {
    inner: Arc<dyn ServerStreamingCallable<Req, Resp>>,
    settings: RetrySettings,
    classifier: Arc<StatusCodeClassifier>,
    strategy: Arc<dyn ResumptionStrategy<Req, Resp>>,
    clock: Arc<dyn ApiClock>,
}

impl<Req, Resp> RetryingServerStreamingCallable<Req, Resp>
where
    Req: Clone + Send + Sync + 'static,
    Resp: Send + 'static,
{
    pub(crate) fn new(
        inner: Arc<dyn ServerStreamingCallable<Req, Resp>>,
        settings: RetrySettings,
        retryable_codes: HashSet<Code>,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            inner,
            settings,
            classifier: Arc::new(StatusCodeClassifier::new(retryable_codes)),
            strategy: Arc::new(SimpleStreamResumptionStrategy::default()),
            clock: default_clock(),
        })
    }

    pub fn with_resumption_strategy(mut self, strategy: Arc<dyn ResumptionStrategy<Req, Resp>>) -> Self {
        self.strategy = strategy;
        self
    }
}

impl<Req, Resp> ServerStreamingCallable<Req, Resp> for RetryingServerStreamingCallable<Req, Resp>
where
    Req: Clone + Send + Sync + 'static,
    Resp: Send + 'static,
{
    fn call(&self, request: Req, context: CallContext) -> ResponseStream<Resp> {
        let settings = match context.retry_settings.clone() {
            Some(overridden) if overridden.validate().is_ok() => overridden,
            Some(_) => {
                tracing::warn!("ignoring invalid per-call retry settings");
                self.settings.clone()
            }
            None => self.settings.clone(),
        };
        let attempt = StreamAttempt {
            inner: Arc::clone(&self.inner),
            algorithm: ExponentialRetryAlgorithm::new(settings, Arc::clone(&self.clock)),
            classifier: Arc::clone(&self.classifier),
            strategy: self.strategy.new_instance(),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(attempt.run(request, context, tx));
        ResponseStream::from_task(rx, task)
    }
}

struct StreamAttempt<Req, Resp> {
    inner: Arc<dyn ServerStreamingCallable<Req, Resp>>,
    algorithm: ExponentialRetryAlgorithm,
    classifier: Arc<StatusCodeClassifier>,
    strategy: Box<dyn ResumptionStrategy<Req, Resp>>,
}

impl<Req, Resp> StreamAttempt<Req, Resp>
where
    Req: Clone + Send + Sync + 'static,
    Resp: Send + 'static,
{
    async fn run(mut self, original: Req, context: CallContext, tx: mpsc::UnboundedSender<Result<Resp>>) {
        let mut state = self.algorithm.first_attempt();
        let mut request = original.clone();
        loop {
            let mut stream = self
                .inner
                .call(request, context.clone().with_timeout(state.attempt_timeout()));
            let mut progressed = false;
            let mut failure = None;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(response) => {
                        progressed = true;
                        let response = self.strategy.process_response(response);
                        if tx.send(Ok(response)).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            let Some(error) = failure else { return };

            let resume = if self.classifier.is_retryable(&error) && self.strategy.can_resume() {
                self.strategy.resume_request(&original)
            } else {
                None
            };
            let Some(next_request) = resume else {
                let _ = tx.send(Err(error));
                return;
            };

            // A stream that delivered data starts a fresh backoff sequence
            // within the same total timeout.
            if progressed {
                let started = state.first_attempt_start;
                state = self.algorithm.first_attempt();
                state.first_attempt_start = started;
            }
            match self.algorithm.decide(&mut state, Outcome::Retryable) {
                RetryDecision::RetryAfter(delay) => {
                    tracing::debug!(attempt = state.attempt, ?delay, error = %error, "reopening stream");
                    tokio::time::sleep(delay).await;
                    request = next_request;
                }
                RetryDecision::Stop(reason) => {
                    let settled = settle::<()>(reason, Err(error), &state, &self.algorithm);
                    if let Err(e) = settled {
                        let _ = tx.send(Err(e));
                    }
                    return;
                }
            }
        }
    }
}
