//! One pooled channel and its in-flight accounting.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::transport::Channel;

const ACTIVE: u8 = 0;
const DRAINING: u8 = 1;
const CLOSED: u8 = 2;

/// Lifecycle of a pool entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Eligible for new calls.
    Active,
    /// Removed from the pool; shut down when the last call completes.
    Draining,
    /// Channel has been shut down.
    Closed,
}

pub struct Entry {
    id: u64,
    channel: Arc<dyn Channel>,
    outstanding: AtomicUsize,
    max_outstanding: AtomicUsize,
    state: AtomicU8,
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("outstanding", &self.outstanding())
            .field("state", &self.state())
            .finish()
    }
}

impl Entry {
    pub(super) fn new(id: u64, channel: Arc<dyn Channel>) -> Self {
        Self {
            id,
            channel,
            outstanding: AtomicUsize::new(0),
            max_outstanding: AtomicUsize::new(0),
            state: AtomicU8::new(ACTIVE),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn state(&self) -> EntryState {
        match self.state.load(Ordering::Acquire) {
            ACTIVE => EntryState::Active,
            DRAINING => EntryState::Draining,
            _ => EntryState::Closed,
        }
    }

    /// Count a new call against this entry. Fails if the entry stopped
    /// accepting calls between snapshot and retain; the count is then undone.
    pub(super) fn retain(&self) -> bool {
        let now = self.outstanding.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_outstanding.fetch_max(now, Ordering::AcqRel);
        if self.state.load(Ordering::Acquire) != ACTIVE {
            self.release();
            return false;
        }
        true
    }

    /// Undo one `retain`. The release that takes a draining entry to zero
    /// shuts its channel down.
    pub(super) fn release(&self) {
        let prev = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match prev {
            Ok(1) => {
                if self.state.load(Ordering::Acquire) == DRAINING {
                    self.try_close();
                }
            }
            Ok(_) => {}
            Err(_) => tracing::warn!(entry = self.id, "released more calls than were started"),
        }
    }

    /// Stop routing to this entry; shut it down now if idle.
    pub(super) fn request_shutdown(&self) {
        if self
            .state
            .compare_exchange(ACTIVE, DRAINING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            && self.outstanding() == 0
        {
            self.try_close();
        }
    }

    /// Exactly one caller wins the Draining -> Closed transition.
    fn try_close(&self) {
        if self
            .state
            .compare_exchange(DRAINING, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::debug!(entry = self.id, "shutting down drained channel");
            self.channel.shutdown();
        }
    }

    /// Peak concurrency since the previous call; resets the peak to the
    /// current outstanding count.
    pub(super) fn take_peak(&self) -> usize {
        let current = self.outstanding();
        self.max_outstanding.swap(current, Ordering::AcqRel).max(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{CallOptions, ClientCall, MethodDescriptor};

    #[derive(Default)]
    struct CountingChannel {
        shutdowns: AtomicUsize,
    }

    impl Channel for CountingChannel {
        fn new_call(&self, _: &MethodDescriptor, _: &CallOptions) -> Box<dyn ClientCall> {
            unimplemented!("entry tests never start calls")
        }

        fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn entry() -> (Arc<CountingChannel>, Entry) {
        let channel = Arc::new(CountingChannel::default());
        let e = Entry::new(1, Arc::clone(&channel) as Arc<dyn Channel>);
        (channel, e)
    }

    #[test]
    fn idle_entry_closes_on_shutdown_request() {
        let (channel, e) = entry();
        e.request_shutdown();
        assert_eq!(e.state(), EntryState::Closed);
        assert_eq!(channel.shutdowns.load(Ordering::SeqCst), 1);
        e.request_shutdown();
        assert_eq!(channel.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn busy_entry_closes_on_last_release() {
        let (channel, e) = entry();
        assert!(e.retain());
        assert!(e.retain());
        e.request_shutdown();
        assert_eq!(e.state(), EntryState::Draining);
        assert!(!e.retain());
        e.release();
        assert_eq!(channel.shutdowns.load(Ordering::SeqCst), 0);
        e.release();
        assert_eq!(e.state(), EntryState::Closed);
        assert_eq!(channel.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn extra_release_never_underflows() {
        let (_, e) = entry();
        e.release();
        assert_eq!(e.outstanding(), 0);
    }

    #[test]
    fn peak_resets_to_current_load() {
        let (_, e) = entry();
        for _ in 0..3 {
            e.retain();
        }
        e.release();
        e.release();
        assert_eq!(e.take_peak(), 3);
        assert_eq!(e.take_peak(), 1);
    }
}
