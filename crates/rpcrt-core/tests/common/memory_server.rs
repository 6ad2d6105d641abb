//! In-memory transport for integration tests.
//!
//! Every channel routes calls to one shared handler keyed by method name.
//! Replies are delivered when the client half-closes, so a call completes
//! before its future is first polled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rpcrt_core::transport::{
    CallListener, CallOptions, Channel, ChannelFactory, ClientCall, MethodDescriptor,
};
use rpcrt_core::{Result, Status};

/// What the server sends back for one call.
pub struct Reply {
    pub messages: Vec<Vec<u8>>,
    pub status: Status,
}

impl Reply {
    pub fn ok(message: impl Into<Vec<u8>>) -> Self {
        Self {
            messages: vec![message.into()],
            status: Status::ok(),
        }
    }

    pub fn stream(messages: impl IntoIterator<Item = Vec<u8>>, status: Status) -> Self {
        Self {
            messages: messages.into_iter().collect(),
            status,
        }
    }

    pub fn error(status: Status) -> Self {
        Self {
            messages: Vec::new(),
            status,
        }
    }
}

type Handler = dyn Fn(&str, Vec<u8>) -> Reply + Send + Sync;

pub struct MemoryServer {
    handler: Box<Handler>,
    calls: Mutex<HashMap<String, usize>>,
    channels_created: AtomicUsize,
    channels_shut_down: AtomicUsize,
}

impl MemoryServer {
    pub fn new(handler: impl Fn(&str, Vec<u8>) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(HashMap::new()),
            channels_created: AtomicUsize::new(0),
            channels_shut_down: AtomicUsize::new(0),
        })
    }

    pub fn factory(self: &Arc<Self>) -> Arc<dyn ChannelFactory> {
        let server = Arc::clone(self);
        Arc::new(move || -> Result<Arc<dyn Channel>> {
            server.channels_created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MemoryChannel {
                server: Arc::clone(&server),
            }))
        })
    }

    /// Calls received for `method` so far.
    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    pub fn channels_created(&self) -> usize {
        self.channels_created.load(Ordering::SeqCst)
    }

    pub fn channels_shut_down(&self) -> usize {
        self.channels_shut_down.load(Ordering::SeqCst)
    }

    fn serve(&self, method: &str, request: Vec<u8>) -> Reply {
        *self.calls.lock().unwrap().entry(method.to_string()).or_default() += 1;
        (self.handler)(method, request)
    }
}

struct MemoryChannel {
    server: Arc<MemoryServer>,
}

impl Channel for MemoryChannel {
    fn new_call(&self, method: &MethodDescriptor, _options: &CallOptions) -> Box<dyn ClientCall> {
        Box::new(MemoryCall {
            server: Arc::clone(&self.server),
            method: method.full_name.clone(),
            listener: None,
            request: Vec::new(),
        })
    }

    fn shutdown(&self) {
        self.server.channels_shut_down.fetch_add(1, Ordering::SeqCst);
    }
}

struct MemoryCall {
    server: Arc<MemoryServer>,
    method: String,
    listener: Option<Arc<dyn CallListener>>,
    request: Vec<u8>,
}

impl ClientCall for MemoryCall {
    fn start(&mut self, listener: Arc<dyn CallListener>) {
        self.listener = Some(listener);
    }

    fn send_message(&mut self, message: Vec<u8>) {
        self.request = message;
    }

    fn half_close(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let reply = self.server.serve(&self.method, std::mem::take(&mut self.request));
        for message in reply.messages {
            listener.on_message(message);
        }
        listener.on_close(reply.status);
    }

    fn cancel(&mut self, reason: &str) {
        if let Some(listener) = self.listener.take() {
            listener.on_close(Status::new(rpcrt_core::Code::Cancelled, reason));
        }
    }
}
