//! Seam to the transport layer.
//!
//! The runtime never speaks a wire protocol itself. It drives calls through
//! these traits and treats payloads as opaque bytes.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, Status};

/// Call shape of a remote method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Unary,
    ServerStreaming,
    ClientStreaming,
    BidiStreaming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// `package.Service/Method`.
    pub full_name: String,
    pub kind: MethodKind,
}

impl MethodDescriptor {
    pub fn unary(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            kind: MethodKind::Unary,
        }
    }

    pub fn server_streaming(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            kind: MethodKind::ServerStreaming,
        }
    }
}

/// Options applied when a call is created on a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub timeout: Option<Duration>,
    pub metadata: Vec<(String, String)>,
}

/// Receives events for one call. `on_close` is the terminal event.
pub trait CallListener: Send + Sync {
    fn on_message(&self, message: Vec<u8>);
    fn on_close(&self, status: Status);
}

/// One call on a channel. Calls are started once, then fed messages.
pub trait ClientCall: Send {
    fn start(&mut self, listener: Arc<dyn CallListener>);
    fn send_message(&mut self, message: Vec<u8>);
    fn half_close(&mut self);
    fn cancel(&mut self, reason: &str);
}

/// A transport connection that carries many concurrent calls.
pub trait Channel: Send + Sync + 'static {
    fn new_call(&self, method: &MethodDescriptor, options: &CallOptions) -> Box<dyn ClientCall>;
    /// Stop accepting calls and release the connection once in-flight calls end.
    fn shutdown(&self);
}

pub trait ChannelFactory: Send + Sync {
    fn create_channel(&self) -> Result<Arc<dyn Channel>>;
}

impl<F> ChannelFactory for F
where
    F: Fn() -> Result<Arc<dyn Channel>> + Send + Sync,
{
    fn create_channel(&self) -> Result<Arc<dyn Channel>> {
        self()
    }
}

/// Warms a freshly created channel before it receives traffic.
pub trait ChannelPrimer: Send + Sync {
    fn prime_channel(&self, channel: &dyn Channel);
}
