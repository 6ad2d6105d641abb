//! Classify attempt results into retry outcomes.

use std::collections::HashSet;

use crate::error::{Code, RpcError};

/// How the executor should treat one attempt's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Retryable,
    Fatal,
}

/// Caller-supplied predicate deciding whether an attempt's result settles the call.
pub trait ResultClassifier<T>: Send + Sync {
    fn classify(&self, result: &Result<T, RpcError>) -> Outcome;
}

/// Retries transport failures whose code is in a configured set; anything
/// else, including runtime-level errors, is fatal.
#[derive(Debug, Clone, Default)]
pub struct StatusCodeClassifier {
    retryable: HashSet<Code>,
}

impl StatusCodeClassifier {
    pub fn new(codes: impl IntoIterator<Item = Code>) -> Self {
        Self {
            retryable: codes.into_iter().collect(),
        }
    }

    /// `UNAVAILABLE` and `DEADLINE_EXCEEDED`: transient transport conditions.
    pub fn transient() -> Self {
        Self::new([Code::Unavailable, Code::DeadlineExceeded])
    }

    pub fn retryable_codes(&self) -> &HashSet<Code> {
        &self.retryable
    }

    pub fn is_retryable(&self, err: &RpcError) -> bool {
        match err {
            RpcError::Status(status) => self.retryable.contains(&status.code),
            _ => false,
        }
    }
}

impl<T> ResultClassifier<T> for StatusCodeClassifier {
    fn classify(&self, result: &Result<T, RpcError>) -> Outcome {
        match result {
            Ok(_) => Outcome::Success,
            Err(e) if self.is_retryable(e) => Outcome::Retryable,
            Err(_) => Outcome::Fatal,
        }
    }
}
