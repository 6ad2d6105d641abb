//! Long-running operations.
//!
//! The initial call returns an [`OperationSnapshot`]; unless it is already
//! done, the operation is then polled through the retry executor with
//! dedicated polling settings until it reports `done`.

mod callable;
mod future;
mod operation;


pub use callable::OperationCallable;
pub use future::OperationFuture;
pub use operation::{OperationSnapshot, OperationState, OperationsClient};
