//! Error taxonomy surfaced to callers of the runtime.
//!
//! Transport failures arrive as a [`Status`]; the retry layer classifies them
//! and either retries or turns them into the final [`RpcError`]. Callers never
//! see intermediate retryable failures.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::batching::FlowControlError;

pub type Result<T, E = RpcError> = std::result::Result<T, E>;

/// Canonical status codes (gRPC numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Code {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl Code {
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::Cancelled => "CANCELLED",
            Code::Unknown => "UNKNOWN",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::PermissionDenied => "PERMISSION_DENIED",
            Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::Aborted => "ABORTED",
            Code::OutOfRange => "OUT_OF_RANGE",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Internal => "INTERNAL",
            Code::Unavailable => "UNAVAILABLE",
            Code::DataLoss => "DATA_LOSS",
            Code::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion status reported by the transport for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: Code,
    pub message: String,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new(Code::Ok, "")
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

/// Final outcome of a failed call, as observed by the caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    /// Failure reported by the transport.
    #[error("{0}")]
    Status(Status),

    /// Total timeout tripped before the call succeeded.
    #[error("deadline exceeded after {attempts} attempt(s) in {elapsed:?}")]
    DeadlineExceeded {
        attempts: u32,
        elapsed: Duration,
        #[source]
        last: Option<Box<RpcError>>,
    },

    /// Attempt budget used up before the call succeeded.
    #[error("retries exhausted after {attempts} attempt(s)")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Option<Box<RpcError>>,
    },

    /// The caller cancelled the call.
    #[error("call cancelled")]
    Cancelled,

    /// Settings rejected at construction time.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    FlowControl(#[from] FlowControlError),

    /// The channel factory failed while growing or refreshing the pool.
    #[error("failed to create channel: {0}")]
    ChannelCreation(String),

    #[error("channel pool is shut down")]
    PoolClosed,

    #[error("batcher is closed")]
    BatcherClosed,

    /// A long-running operation finished with an embedded error.
    #[error("operation {name} failed: {status}")]
    OperationFailed { name: String, status: Status },
}

impl RpcError {
    pub fn status(code: Code, message: impl Into<String>) -> Self {
        RpcError::Status(Status::new(code, message))
    }

    pub fn config(message: impl Into<String>) -> Self {
        RpcError::Configuration(message.into())
    }

    /// Status code of a transport failure; `None` for runtime-level errors.
    pub fn code(&self) -> Option<Code> {
        match self {
            RpcError::Status(status) => Some(status.code),
            RpcError::OperationFailed { status, .. } => Some(status.code),
            _ => None,
        }
    }

    /// The error that caused a stop condition, if this is one.
    pub fn last_error(&self) -> Option<&RpcError> {
        match self {
            RpcError::DeadlineExceeded { last, .. } | RpcError::RetriesExhausted { last, .. } => {
                last.as_deref()
            }
            _ => None,
        }
    }
}

impl From<Status> for RpcError {
    fn from(status: Status) -> Self {
        RpcError::Status(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn status_display_includes_message() {
        let s = Status::new(Code::Unavailable, "connection reset");
        assert_eq!(s.to_string(), "UNAVAILABLE: connection reset");
        assert_eq!(Status::new(Code::NotFound, "").to_string(), "NOT_FOUND");
    }

    #[test]
    fn exhausted_error_exposes_last_error_as_source() {
        let last = RpcError::status(Code::Unavailable, "down");
        let err = RpcError::RetriesExhausted {
            attempts: 3,
            last: Some(Box::new(last)),
        };
        assert_eq!(err.code(), None);
        assert_eq!(err.last_error().and_then(RpcError::code), Some(Code::Unavailable));
        assert!(err.source().is_some());
    }

    #[test]
    fn code_serializes_screaming_snake_case() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            codes: Vec<Code>,
        }
        let w: Wrapper = toml::from_str(r#"codes = ["UNAVAILABLE", "DEADLINE_EXCEEDED"]"#).unwrap();
        assert_eq!(w.codes, vec![Code::Unavailable, Code::DeadlineExceeded]);
    }
}
