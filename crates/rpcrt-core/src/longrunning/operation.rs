//! Operation snapshots, lifecycle states and the polling service seam.

use futures::future::BoxFuture;

use crate::error::{Code, Result, RpcError, Status};
use crate::retry::{Outcome, ResultClassifier, StatusCodeClassifier};

/// Server-side view of a long-running operation at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationSnapshot {
    pub name: String,
    pub done: bool,
    pub metadata: Option<Vec<u8>>,
    /// Set once `done`: the response payload or the embedded error.
    pub result: Option<std::result::Result<Vec<u8>, Status>>,
}

impl OperationSnapshot {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: false,
            metadata: None,
            result: None,
        }
    }

    pub fn succeeded(name: impl Into<String>, response: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            done: true,
            metadata: None,
            result: Some(Ok(response)),
        }
    }

    pub fn failed(name: impl Into<String>, status: Status) -> Self {
        Self {
            name: name.into(),
            done: true,
            metadata: None,
            result: Some(Err(status)),
        }
    }

    pub fn with_metadata(mut self, metadata: Vec<u8>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Final outcome of a finished operation.
    pub(super) fn into_outcome(self) -> Result<Vec<u8>> {
        match self.result {
            Some(Ok(response)) => Ok(response),
            Some(Err(status)) => Err(RpcError::OperationFailed {
                name: self.name,
                status,
            }),
            None => Err(RpcError::status(
                Code::Internal,
                format!("operation {} is done but carries no result", self.name),
            )),
        }
    }
}

/// Service used to observe and cancel operations.
pub trait OperationsClient: Send + Sync {
    fn get_operation(&self, name: &str) -> BoxFuture<'static, Result<OperationSnapshot>>;
    fn cancel_operation(&self, name: &str) -> BoxFuture<'static, Result<()>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Initial call in flight.
    Initiated,
    Polling,
    Done,
    Failed,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Done | OperationState::Failed | OperationState::Cancelled)
    }
}

/// Not-done snapshots and poll failures with a retryable code are retried;
/// everything else settles the poll.
pub(super) struct PollingClassifier {
    transport: StatusCodeClassifier,
}

impl PollingClassifier {
    pub(super) fn new(retryable_codes: impl IntoIterator<Item = Code>) -> Self {
        Self {
            transport: StatusCodeClassifier::new(retryable_codes),
        }
    }
}

impl Default for PollingClassifier {
    fn default() -> Self {
        Self {
            transport: StatusCodeClassifier::transient(),
        }
    }
}

impl ResultClassifier<OperationSnapshot> for PollingClassifier {
    fn classify(&self, result: &Result<OperationSnapshot>) -> Outcome {
        match result {
            Ok(snapshot) if snapshot.done => Outcome::Success,
            Ok(_) => Outcome::Retryable,
            Err(e) if self.transport.is_retryable(e) => Outcome::Retryable,
            Err(_) => Outcome::Fatal,
        }
    }
}
