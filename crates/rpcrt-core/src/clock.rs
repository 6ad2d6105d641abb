//! Time source used by the retry algorithms.

use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

/// Monotonic clock consulted for elapsed-time stop conditions.
pub trait ApiClock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

/// Clock backed by tokio's time driver, so paused-time tests see virtual time.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl ApiClock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub fn default_clock() -> Arc<dyn ApiClock> {
    Arc::new(TokioClock)
}
