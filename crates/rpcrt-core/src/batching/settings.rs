//! Batching thresholds and flow-control limits.

use std::time::Duration;

use crate::error::{Result, RpcError};

/// What `add` does when accepting an element would exceed a flow limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimitExceededBehavior {
    /// Wait until enough outstanding work completes.
    #[default]
    Block,
    /// Fail immediately with a flow-control error.
    ThrowException,
    /// Do not track outstanding work at all.
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlowControlSettings {
    pub max_outstanding_element_count: Option<u64>,
    pub max_outstanding_request_bytes: Option<u64>,
    pub limit_exceeded_behavior: LimitExceededBehavior,
}

/// When an open batch is sent. Any threshold that trips flushes the batch;
/// `None` disables that threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchingSettings {
    pub element_count_threshold: Option<usize>,
    pub request_byte_threshold: Option<u64>,
    pub delay_threshold: Option<Duration>,
    pub flow_control: FlowControlSettings,
}

impl Default for BatchingSettings {
    fn default() -> Self {
        Self {
            element_count_threshold: Some(100),
            request_byte_threshold: Some(1024 * 1024),
            delay_threshold: Some(Duration::from_millis(10)),
            flow_control: FlowControlSettings::default(),
        }
    }
}

impl BatchingSettings {
    pub fn validate(&self) -> Result<()> {
        if self.element_count_threshold == Some(0) {
            return Err(RpcError::config("element_count_threshold must be positive"));
        }
        if self.request_byte_threshold == Some(0) {
            return Err(RpcError::config("request_byte_threshold must be positive"));
        }
        if self.delay_threshold == Some(Duration::ZERO) {
            return Err(RpcError::config("delay_threshold must be positive"));
        }
        let flow = &self.flow_control;
        if flow.max_outstanding_element_count == Some(0) || flow.max_outstanding_request_bytes == Some(0) {
            return Err(RpcError::config("flow control limits must be positive"));
        }
        if let (Some(limit), Some(threshold)) =
            (flow.max_outstanding_element_count, self.element_count_threshold)
        {
            if limit < threshold as u64 {
                return Err(RpcError::config(format!(
                    "max_outstanding_element_count ({limit}) is below element_count_threshold ({threshold})"
                )));
            }
        }
        if let (Some(limit), Some(threshold)) =
            (flow.max_outstanding_request_bytes, self.request_byte_threshold)
        {
            if limit < threshold {
                return Err(RpcError::config(format!(
                    "max_outstanding_request_bytes ({limit}) is below request_byte_threshold ({threshold})"
                )));
            }
        }
        Ok(())
    }
}
