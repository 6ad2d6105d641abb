//! File-based runtime configuration (`~/.config/rpcrt/config.toml`).
//!
//! Every section is optional; missing sections and fields fall back to the
//! runtime defaults. Sections convert into the settings types with
//! `TryFrom`, which validates and fails with [`RpcError::Configuration`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::batching::{BatchingSettings, FlowControlSettings, LimitExceededBehavior};
use crate::callable::UnaryCallSettings;
use crate::error::{Code, RpcError};
use crate::pool::{ChannelPoolSettings, ResizePolicy};
use crate::retry::{Jitter, RetrySettings};

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

fn as_ms(value: Duration) -> u64 {
    u64::try_from(value.as_millis()).unwrap_or(u64::MAX)
}

/// Retry parameters for unary calls (`[retry]`) or operation polling (`[polling]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    pub delay_multiplier: f64,
    pub max_delay_ms: u64,
    /// Give up after this long; 0 = no time limit.
    pub total_timeout_ms: u64,
    /// Attempts including the first; 0 = no attempt limit.
    pub max_attempts: u32,
    /// Randomize each delay within `[0, delay]`.
    pub jitter: bool,
    /// Per-attempt deadline; 0 = bounded only by the total timeout.
    pub initial_rpc_timeout_ms: u64,
    pub rpc_timeout_multiplier: f64,
    pub max_rpc_timeout_ms: u64,
    pub retryable_codes: Vec<Code>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryConfig {
    fn from_settings(s: &RetrySettings) -> Self {
        Self {
            initial_delay_ms: as_ms(s.initial_retry_delay),
            delay_multiplier: s.retry_delay_multiplier,
            max_delay_ms: as_ms(s.max_retry_delay),
            total_timeout_ms: as_ms(s.total_timeout),
            max_attempts: s.max_attempts,
            jitter: s.jitter == Jitter::Full,
            initial_rpc_timeout_ms: as_ms(s.initial_rpc_timeout),
            rpc_timeout_multiplier: s.rpc_timeout_multiplier,
            max_rpc_timeout_ms: as_ms(s.max_rpc_timeout),
            retryable_codes: vec![Code::Unavailable, Code::DeadlineExceeded],
        }
    }

    /// Defaults used for a missing `[polling]` section.
    pub fn default_polling() -> Self {
        Self::from_settings(&RetrySettings::default_polling())
    }
}

impl TryFrom<&RetryConfig> for RetrySettings {
    type Error = RpcError;

    fn try_from(c: &RetryConfig) -> Result<Self, RpcError> {
        let settings = RetrySettings {
            total_timeout: ms(c.total_timeout_ms),
            initial_retry_delay: ms(c.initial_delay_ms),
            retry_delay_multiplier: c.delay_multiplier,
            max_retry_delay: ms(c.max_delay_ms),
            max_attempts: c.max_attempts,
            jitter: if c.jitter { Jitter::Full } else { Jitter::None },
            initial_rpc_timeout: ms(c.initial_rpc_timeout_ms),
            rpc_timeout_multiplier: c.rpc_timeout_multiplier,
            max_rpc_timeout: ms(c.max_rpc_timeout_ms),
        };
        settings.validate()?;
        Ok(settings)
    }
}

impl TryFrom<&RetryConfig> for UnaryCallSettings {
    type Error = RpcError;

    fn try_from(c: &RetryConfig) -> Result<Self, RpcError> {
        Ok(UnaryCallSettings::new(
            RetrySettings::try_from(c)?,
            c.retryable_codes.iter().copied(),
        ))
    }
}

/// Channel pool sizing (`[pool]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min_channel_count: usize,
    pub max_channel_count: usize,
    pub initial_channel_count: usize,
    pub min_rpcs_per_channel: usize,
    pub max_rpcs_per_channel: usize,
    pub resize_interval_secs: u64,
    pub max_resize_delta: usize,
    pub preemptive_refresh: bool,
    pub refresh_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let s = ChannelPoolSettings::default();
        Self {
            min_channel_count: s.min_channel_count,
            max_channel_count: s.max_channel_count,
            initial_channel_count: s.initial_channel_count,
            min_rpcs_per_channel: s.min_rpcs_per_channel,
            max_rpcs_per_channel: s.max_rpcs_per_channel,
            resize_interval_secs: s.resize.resize_interval.as_secs(),
            max_resize_delta: s.resize.max_resize_delta,
            preemptive_refresh: s.preemptive_refresh_enabled,
            refresh_interval_secs: s.refresh_interval.as_secs(),
        }
    }
}

impl TryFrom<&PoolConfig> for ChannelPoolSettings {
    type Error = RpcError;

    fn try_from(c: &PoolConfig) -> Result<Self, RpcError> {
        let settings = ChannelPoolSettings {
            min_rpcs_per_channel: c.min_rpcs_per_channel,
            max_rpcs_per_channel: c.max_rpcs_per_channel,
            min_channel_count: c.min_channel_count,
            max_channel_count: c.max_channel_count,
            initial_channel_count: c.initial_channel_count,
            preemptive_refresh_enabled: c.preemptive_refresh,
            refresh_interval: Duration::from_secs(c.refresh_interval_secs),
            resize: ResizePolicy {
                resize_interval: Duration::from_secs(c.resize_interval_secs),
                max_resize_delta: c.max_resize_delta,
                ..ResizePolicy::default()
            },
        };
        settings.validate()?;
        Ok(settings)
    }
}

/// Batching thresholds and flow control (`[batching]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    pub element_count_threshold: Option<usize>,
    pub request_byte_threshold: Option<u64>,
    pub delay_threshold_ms: Option<u64>,
    pub max_outstanding_elements: Option<u64>,
    pub max_outstanding_bytes: Option<u64>,
    /// `"block"`, `"throw"` or `"ignore"`.
    pub limit_exceeded: LimitBehaviorConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitBehaviorConfig {
    #[default]
    Block,
    Throw,
    Ignore,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        let s = BatchingSettings::default();
        Self {
            element_count_threshold: s.element_count_threshold,
            request_byte_threshold: s.request_byte_threshold,
            delay_threshold_ms: s.delay_threshold.map(as_ms),
            max_outstanding_elements: None,
            max_outstanding_bytes: None,
            limit_exceeded: LimitBehaviorConfig::Block,
        }
    }
}

impl TryFrom<&BatchingConfig> for BatchingSettings {
    type Error = RpcError;

    fn try_from(c: &BatchingConfig) -> Result<Self, RpcError> {
        let settings = BatchingSettings {
            element_count_threshold: c.element_count_threshold,
            request_byte_threshold: c.request_byte_threshold,
            delay_threshold: c.delay_threshold_ms.map(ms),
            flow_control: FlowControlSettings {
                max_outstanding_element_count: c.max_outstanding_elements,
                max_outstanding_request_bytes: c.max_outstanding_bytes,
                limit_exceeded_behavior: match c.limit_exceeded {
                    LimitBehaviorConfig::Block => LimitExceededBehavior::Block,
                    LimitBehaviorConfig::Throw => LimitExceededBehavior::ThrowException,
                    LimitBehaviorConfig::Ignore => LimitExceededBehavior::Ignore,
                },
            },
        };
        settings.validate()?;
        Ok(settings)
    }
}

/// Global configuration loaded from `~/.config/rpcrt/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub polling: Option<RetryConfig>,
    #[serde(default)]
    pub pool: Option<PoolConfig>,
    #[serde(default)]
    pub batching: Option<BatchingConfig>,
}

impl RuntimeConfig {
    pub fn unary_call_settings(&self) -> Result<UnaryCallSettings, RpcError> {
        UnaryCallSettings::try_from(&self.retry.clone().unwrap_or_default())
    }

    pub fn polling_settings(&self) -> Result<RetrySettings, RpcError> {
        Ok(self.polling_call_settings()?.retry_settings)
    }

    /// Poll pacing plus the codes of failed polls that keep polling.
    pub fn polling_call_settings(&self) -> Result<UnaryCallSettings, RpcError> {
        UnaryCallSettings::try_from(&self.polling.clone().unwrap_or_else(RetryConfig::default_polling))
    }

    pub fn pool_settings(&self) -> Result<ChannelPoolSettings, RpcError> {
        ChannelPoolSettings::try_from(&self.pool.clone().unwrap_or_default())
    }

    pub fn batching_settings(&self) -> Result<BatchingSettings, RpcError> {
        BatchingSettings::try_from(&self.batching.clone().unwrap_or_default())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("rpcrt")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<RuntimeConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = default_file_config();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from_path(&path)
}

/// Read configuration from an explicit file.
pub fn load_from_path(path: &Path) -> Result<RuntimeConfig> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let cfg: RuntimeConfig =
        toml::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
    Ok(cfg)
}

/// Config written on first run: every section spelled out.
fn default_file_config() -> RuntimeConfig {
    RuntimeConfig {
        retry: Some(RetryConfig::default()),
        polling: Some(RetryConfig::default_polling()),
        pool: Some(PoolConfig::default()),
        batching: Some(BatchingConfig::default()),
    }
}
