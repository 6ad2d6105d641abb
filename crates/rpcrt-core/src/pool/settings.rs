//! Channel pool sizing settings.

use std::time::Duration;

use crate::error::{Result, RpcError};

/// How often and how aggressively a dynamic pool resizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizePolicy {
    pub resize_interval: Duration,
    /// Upper bound on channels added or removed in one cycle.
    pub max_resize_delta: usize,
    /// Number of resize cycles whose peak load is considered.
    pub peak_window: usize,
}

impl Default for ResizePolicy {
    fn default() -> Self {
        Self {
            resize_interval: Duration::from_secs(60),
            max_resize_delta: 2,
            peak_window: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPoolSettings {
    /// Below this many concurrent calls per channel the pool shrinks.
    pub min_rpcs_per_channel: usize,
    /// Above this many concurrent calls per channel the pool grows.
    pub max_rpcs_per_channel: usize,
    pub min_channel_count: usize,
    pub max_channel_count: usize,
    pub initial_channel_count: usize,
    /// Replace every channel each `refresh_interval`.
    pub preemptive_refresh_enabled: bool,
    pub refresh_interval: Duration,
    pub resize: ResizePolicy,
}

impl Default for ChannelPoolSettings {
    fn default() -> Self {
        Self {
            min_rpcs_per_channel: 0,
            max_rpcs_per_channel: 100,
            min_channel_count: 1,
            max_channel_count: 200,
            initial_channel_count: 1,
            preemptive_refresh_enabled: false,
            refresh_interval: Duration::from_secs(50 * 60),
            resize: ResizePolicy::default(),
        }
    }
}

impl ChannelPoolSettings {
    /// A pool that always holds exactly `size` channels.
    pub fn statically_sized(size: usize) -> Self {
        Self {
            min_channel_count: size,
            max_channel_count: size,
            initial_channel_count: size,
            ..Self::default()
        }
    }

    pub fn is_static_size(&self) -> bool {
        self.min_channel_count == self.max_channel_count
            && self.initial_channel_count == self.min_channel_count
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_channel_count == 0 {
            return Err(RpcError::config("min_channel_count must be at least 1"));
        }
        if self.max_channel_count < self.min_channel_count {
            return Err(RpcError::config(format!(
                "max_channel_count ({}) is smaller than min_channel_count ({})",
                self.max_channel_count, self.min_channel_count
            )));
        }
        if !(self.min_channel_count..=self.max_channel_count).contains(&self.initial_channel_count) {
            return Err(RpcError::config(format!(
                "initial_channel_count ({}) must be within [{}, {}]",
                self.initial_channel_count, self.min_channel_count, self.max_channel_count
            )));
        }
        if self.max_rpcs_per_channel == 0 {
            return Err(RpcError::config("max_rpcs_per_channel must be at least 1"));
        }
        if self.min_rpcs_per_channel > self.max_rpcs_per_channel {
            return Err(RpcError::config(format!(
                "min_rpcs_per_channel ({}) exceeds max_rpcs_per_channel ({})",
                self.min_rpcs_per_channel, self.max_rpcs_per_channel
            )));
        }
        if self.resize.max_resize_delta == 0 || self.resize.peak_window == 0 {
            return Err(RpcError::config(
                "max_resize_delta and peak_window must be at least 1",
            ));
        }
        if self.resize.resize_interval.is_zero() {
            return Err(RpcError::config("resize_interval must be non-zero"));
        }
        if self.preemptive_refresh_enabled && self.refresh_interval.is_zero() {
            return Err(RpcError::config("refresh_interval must be non-zero"));
        }
        Ok(())
    }
}
