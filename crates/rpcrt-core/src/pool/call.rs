//! Calls bound to a pool entry.
//!
//! The entry's outstanding count is released exactly once per call: when the
//! transport reports completion, when the call is cancelled before it
//! started, or when an unstarted call is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::entry::Entry;
use crate::error::Status;
use crate::transport::{CallListener, ClientCall};

pub(super) struct ReleaseGuard {
    entry: Arc<Entry>,
    released: AtomicBool,
}

impl ReleaseGuard {
    pub(super) fn new(entry: Arc<Entry>) -> Self {
        Self {
            entry,
            released: AtomicBool::new(false),
        }
    }

    /// Returns `false` if the count was already released.
    fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.entry.release();
        true
    }
}

/// A transport call checked out from a [`ChannelPool`](super::ChannelPool).
pub struct PooledCall {
    inner: Box<dyn ClientCall>,
    guard: Arc<ReleaseGuard>,
    started: bool,
}

impl PooledCall {
    pub(super) fn new(inner: Box<dyn ClientCall>, guard: ReleaseGuard) -> Self {
        Self {
            inner,
            guard: Arc::new(guard),
            started: false,
        }
    }

    /// Id of the pool entry this call was routed to.
    pub fn entry_id(&self) -> u64 {
        self.guard.entry.id()
    }
}

impl ClientCall for PooledCall {
    fn start(&mut self, listener: Arc<dyn CallListener>) {
        self.started = true;
        let releasing = ReleasingListener {
            delegate: listener,
            guard: Arc::clone(&self.guard),
        };
        self.inner.start(Arc::new(releasing));
    }

    fn send_message(&mut self, message: Vec<u8>) {
        self.inner.send_message(message);
    }

    fn half_close(&mut self) {
        self.inner.half_close();
    }

    fn cancel(&mut self, reason: &str) {
        self.inner.cancel(reason);
        // Started calls release through on_close.
        if !self.started {
            self.guard.release();
        }
    }
}

impl Drop for PooledCall {
    fn drop(&mut self) {
        if !self.started {
            self.guard.release();
        }
    }
}

struct ReleasingListener {
    delegate: Arc<dyn CallListener>,
    guard: Arc<ReleaseGuard>,
}

impl CallListener for ReleasingListener {
    fn on_message(&self, message: Vec<u8>) {
        self.delegate.on_message(message);
    }

    fn on_close(&self, status: Status) {
        if !self.guard.release() {
            tracing::warn!(entry = self.guard.entry.id(), %status, "call closed more than once");
            return;
        }
        self.delegate.on_close(status);
    }
}
