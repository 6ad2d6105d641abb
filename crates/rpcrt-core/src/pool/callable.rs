//! Innermost callables: drive one transport call on a pooled channel.

use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

use super::{ChannelPool, PooledCall};
use crate::callable::{CallContext, UnaryCallable};
use crate::error::{Code, Result, RpcError, Status};
use crate::streaming::{ResponseStream, ServerStreamingCallable};
use crate::transport::{CallListener, CallOptions, ClientCall, MethodDescriptor};

fn call_options(context: CallContext) -> CallOptions {
    CallOptions {
        timeout: context.timeout,
        metadata: context.metadata,
    }
}

/// Sends one request and awaits one response on a pooled channel.
#[derive(Clone)]
pub struct ChannelCallable {
    pool: ChannelPool,
    method: MethodDescriptor,
}

impl ChannelCallable {
    pub fn new(pool: ChannelPool, method: MethodDescriptor) -> Self {
        Self { pool, method }
    }
}

impl UnaryCallable<Vec<u8>, Vec<u8>> for ChannelCallable {
    fn call(&self, request: Vec<u8>, context: CallContext) -> BoxFuture<'static, Result<Vec<u8>>> {
        let mut call = match self.pool.new_call(&self.method, &call_options(context)) {
            Ok(call) => call,
            Err(e) => return Box::pin(async move { Err(e) }),
        };
        let (tx, rx) = oneshot::channel();
        call.start(Arc::new(UnaryListener {
            response: Mutex::new(None),
            done: Mutex::new(Some(tx)),
        }));
        call.send_message(request);
        call.half_close();

        let guard = CancelOnDrop(Some(call));
        Box::pin(async move {
            let result = rx.await.unwrap_or_else(|_| {
                Err(RpcError::status(Code::Internal, "call dropped without a status"))
            });
            guard.disarm();
            result
        })
    }
}

/// Cancels the transport call if the awaiting future is dropped early.
struct CancelOnDrop(Option<PooledCall>);

impl CancelOnDrop {
    /// The call completed; let it drop without cancelling.
    fn disarm(mut self) {
        self.0.take();
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(call) = self.0.as_mut() {
            call.cancel("call cancelled by caller");
        }
    }
}

struct UnaryListener {
    response: Mutex<Option<Vec<u8>>>,
    done: Mutex<Option<oneshot::Sender<Result<Vec<u8>>>>>,
}

impl CallListener for UnaryListener {
    fn on_message(&self, message: Vec<u8>) {
        *self.response.lock().unwrap_or_else(PoisonError::into_inner) = Some(message);
    }

    fn on_close(&self, status: Status) {
        let Some(done) = self.done.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return;
        };
        let result = if status.is_ok() {
            self.response
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .ok_or_else(|| RpcError::status(Code::Internal, "unary call closed without a response"))
        } else {
            Err(RpcError::Status(status))
        };
        let _ = done.send(result);
    }
}

/// Opens a server-streaming call on a pooled channel.
#[derive(Clone)]
pub struct ChannelStreamingCallable {
    pool: ChannelPool,
    method: MethodDescriptor,
}

impl ChannelStreamingCallable {
    pub fn new(pool: ChannelPool, method: MethodDescriptor) -> Self {
        Self { pool, method }
    }
}

impl ServerStreamingCallable<Vec<u8>, Vec<u8>> for ChannelStreamingCallable {
    fn call(&self, request: Vec<u8>, context: CallContext) -> ResponseStream<Vec<u8>> {
        let mut call = match self.pool.new_call(&self.method, &call_options(context)) {
            Ok(call) => call,
            Err(e) => return ResponseStream::failed(e),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        call.start(Arc::new(StreamingListener {
            tx: Mutex::new(Some(tx)),
        }));
        call.send_message(request);
        call.half_close();
        ResponseStream::new(rx, move || {
            let mut call = call;
            call.cancel("stream cancelled by caller");
        })
    }
}

struct StreamingListener {
    tx: Mutex<Option<mpsc::UnboundedSender<Result<Vec<u8>>>>>,
}

impl CallListener for StreamingListener {
    fn on_message(&self, message: Vec<u8>) {
        if let Some(tx) = self.tx.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            let _ = tx.send(Ok(message));
        }
    }

    fn on_close(&self, status: Status) {
        let Some(tx) = self.tx.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return;
        };
        if !status.is_ok() {
            let _ = tx.send(Err(RpcError::Status(status)));
        }
    }
}
