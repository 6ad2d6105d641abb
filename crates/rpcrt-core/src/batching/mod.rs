//! Request batching under flow control.
//!
//! Elements added with the same partition key accumulate in one open batch
//! until a count, byte or delay threshold trips (or the batcher is
//! flushed). The batch is then merged into a single wire request and the
//! response is split back into per-element results, in append order.

mod batch;
mod batcher;
mod callable;
mod descriptor;
mod flow_control;
mod settings;

#[cfg(test)]
mod tests;

pub use batcher::{BatchedResult, Batcher};
pub use callable::BatchingCallable;
pub use descriptor::BatchingDescriptor;
pub use flow_control::{FlowControlError, FlowController, FlowPermit};
pub use settings::{BatchingSettings, FlowControlSettings, LimitExceededBehavior};
