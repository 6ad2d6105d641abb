//! Bounds outstanding batched work by element count and request bytes.
//!
//! Element count and bytes are reserved together under one lock. Waiters
//! re-check after every release.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use super::settings::{FlowControlSettings, LimitExceededBehavior};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowControlError {
    #[error("flow control: max outstanding element count of {limit} reached")]
    MaxOutstandingElementCountReached { limit: u64 },
    #[error("flow control: max outstanding request bytes of {limit} reached")]
    MaxOutstandingRequestBytesReached { limit: u64 },
}

#[derive(Debug, Default)]
struct Outstanding {
    elements: u64,
    bytes: u64,
}

#[derive(Debug)]
struct Shared {
    settings: FlowControlSettings,
    outstanding: Mutex<Outstanding>,
    released: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Outstanding> {
        self.outstanding.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, elements: u64, bytes: u64) {
        {
            let mut o = self.lock();
            o.elements = o.elements.saturating_sub(elements);
            o.bytes = o.bytes.saturating_sub(bytes);
        }
        self.released.notify_waiters();
    }
}

#[derive(Debug, Clone)]
pub struct FlowController {
    shared: Arc<Shared>,
}

impl FlowController {
    pub fn new(settings: FlowControlSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                outstanding: Mutex::new(Outstanding::default()),
                released: Notify::new(),
            }),
        }
    }

    pub fn settings(&self) -> &FlowControlSettings {
        &self.shared.settings
    }

    /// Outstanding `(elements, bytes)` currently reserved.
    pub fn outstanding(&self) -> (u64, u64) {
        let o = self.shared.lock();
        (o.elements, o.bytes)
    }

    /// Reserve capacity for `elements` and `bytes`.
    ///
    /// A request larger than a limit is clamped to that limit, so it proceeds
    /// once the controller is otherwise idle. Under
    /// [`LimitExceededBehavior::Block`] this waits for capacity; under
    /// `ThrowException` it fails without waiting.
    pub async fn reserve(&self, elements: u64, bytes: u64) -> Result<FlowPermit, FlowControlError> {
        let blocking = self.shared.settings.limit_exceeded_behavior == LimitExceededBehavior::Block;
        loop {
            let notified = self.shared.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_acquire(elements, bytes) {
                Ok(permit) => return Ok(permit),
                Err(e) if !blocking => return Err(e),
                Err(_) => notified.await,
            }
        }
    }

    /// Reserve without waiting, whatever the limit behavior.
    pub fn try_acquire(&self, elements: u64, bytes: u64) -> Result<FlowPermit, FlowControlError> {
        let settings = &self.shared.settings;
        if settings.limit_exceeded_behavior == LimitExceededBehavior::Ignore {
            return Ok(FlowPermit {
                shared: None,
                elements: 0,
                bytes: 0,
            });
        }
        let elements = settings.max_outstanding_element_count.map_or(elements, |l| elements.min(l));
        let bytes = settings.max_outstanding_request_bytes.map_or(bytes, |l| bytes.min(l));
        self.try_reserve(elements, bytes)?;
        Ok(FlowPermit {
            shared: Some(Arc::clone(&self.shared)),
            elements,
            bytes,
        })
    }

    fn try_reserve(&self, elements: u64, bytes: u64) -> Result<(), FlowControlError> {
        let settings = &self.shared.settings;
        let mut o = self.shared.lock();
        if let Some(limit) = settings.max_outstanding_element_count {
            if o.elements + elements > limit {
                return Err(FlowControlError::MaxOutstandingElementCountReached { limit });
            }
        }
        if let Some(limit) = settings.max_outstanding_request_bytes {
            if o.bytes + bytes > limit {
                return Err(FlowControlError::MaxOutstandingRequestBytesReached { limit });
            }
        }
        o.elements += elements;
        o.bytes += bytes;
        Ok(())
    }
}

/// Reserved flow capacity; returned to the controller on drop.
#[must_use = "dropping the permit releases the reservation"]
#[derive(Debug)]
pub struct FlowPermit {
    shared: Option<Arc<Shared>>,
    elements: u64,
    bytes: u64,
}

impl Drop for FlowPermit {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.release(self.elements, self.bytes);
        }
    }
}
