//! Buffer configuration.
//!
//! The options are plain scalars so hosts can load them with whatever
//! mechanism they already use (enable the `serde` feature to deserialize).
//! Millisecond options keep the "non-positive disables" convention; use the
//! `Option<Duration>` accessors when driving timers.

use crate::error::ConfigError;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub const DEFAULT_BUFFER_CAPACITY: usize = 100;
pub const DEFAULT_FLUSH_TIMEOUT_MS: i64 = -1;
pub const DEFAULT_FLOW_WINDOW_MS: i64 = 60_000;
pub const DEFAULT_FLOW_CAPACITY: usize = 100;

/// Options for a [`FlowBuffer`](crate::FlowBuffer).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct FlowBufferConfig {
    /// Maximum buffered events before a forced drain.
    pub buffer_capacity: usize,
    /// Deadline for a time-based drain; `<= 0` disables timed flushing.
    pub flush_timeout_ms: i64,
    /// Rearm the flush deadline on every buffered write instead of only on the first.
    pub sliding_timeout: bool,
    /// Rate window; `<= 0` disables buffering entirely (pure pass-through).
    pub flow_window_ms: i64,
    /// Writes per window before the sticky overflow trips.
    pub flow_capacity: usize,
}

impl Default for FlowBufferConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            flush_timeout_ms: DEFAULT_FLUSH_TIMEOUT_MS,
            sliding_timeout: true,
            flow_window_ms: DEFAULT_FLOW_WINDOW_MS,
            flow_capacity: DEFAULT_FLOW_CAPACITY,
        }
    }
}

impl FlowBufferConfig {
    pub fn builder() -> FlowBufferConfigBuilder {
        FlowBufferConfigBuilder::default()
    }

    /// Flush deadline, or `None` when timed flushing is disabled.
    pub fn flush_timeout(&self) -> Option<Duration> {
        positive_millis(self.flush_timeout_ms)
    }

    /// Flow window, or `None` when the governor is disabled.
    pub fn flow_window(&self) -> Option<Duration> {
        positive_millis(self.flow_window_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity == 0 {
            return Err(ConfigError::InvalidBufferCapacity { provided: 0 });
        }
        if self.flow_window().is_some() && self.flow_capacity == 0 {
            return Err(ConfigError::InvalidFlowCapacity { provided: 0 });
        }
        Ok(())
    }
}

fn positive_millis(ms: i64) -> Option<Duration> {
    u64::try_from(ms).ok().filter(|ms| *ms > 0).map(Duration::from_millis)
}

/// Builder for [`FlowBufferConfig`]; `build` validates.
#[derive(Debug, Clone, Default)]
pub struct FlowBufferConfigBuilder {
    config: FlowBufferConfig,
}

impl FlowBufferConfigBuilder {
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity;
        self
    }

    /// Enable timed flushing after `timeout`.
    pub fn flush_timeout(mut self, timeout: Duration) -> Self {
        self.config.flush_timeout_ms = duration_millis(timeout);
        self
    }

    /// Raw millisecond form; `<= 0` disables timed flushing.
    pub fn flush_timeout_ms(mut self, ms: i64) -> Self {
        self.config.flush_timeout_ms = ms;
        self
    }

    pub fn sliding_timeout(mut self, sliding: bool) -> Self {
        self.config.sliding_timeout = sliding;
        self
    }

    pub fn flow_window(mut self, window: Duration) -> Self {
        self.config.flow_window_ms = duration_millis(window);
        self
    }

    /// Raw millisecond form; `<= 0` makes every write pass straight through.
    pub fn flow_window_ms(mut self, ms: i64) -> Self {
        self.config.flow_window_ms = ms;
        self
    }

    pub fn flow_capacity(mut self, capacity: usize) -> Self {
        self.config.flow_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<FlowBufferConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = FlowBufferConfig::default();
        assert_eq!(cfg.buffer_capacity, 100);
        assert_eq!(cfg.flush_timeout_ms, -1);
        assert!(cfg.sliding_timeout);
        assert_eq!(cfg.flow_window_ms, 60_000);
        assert_eq!(cfg.flow_capacity, 100);
        assert_eq!(cfg.flush_timeout(), None);
        assert_eq!(cfg.flow_window(), Some(Duration::from_secs(60)));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn non_positive_millis_disable() {
        let cfg = FlowBufferConfig::builder().flush_timeout_ms(0).flow_window_ms(-5).build().unwrap();
        assert_eq!(cfg.flush_timeout(), None);
        assert_eq!(cfg.flow_window(), None);
    }

    #[test]
    fn rejects_zero_buffer_capacity() {
        let err = FlowBufferConfig::builder().buffer_capacity(0).build().unwrap_err();
        assert_eq!(err, ConfigError::InvalidBufferCapacity { provided: 0 });
    }

    #[test]
    fn zero_flow_capacity_only_matters_when_window_enabled() {
        let err = FlowBufferConfig::builder().flow_capacity(0).build().unwrap_err();
        assert_eq!(err, ConfigError::InvalidFlowCapacity { provided: 0 });

        let cfg = FlowBufferConfig::builder().flow_capacity(0).flow_window_ms(0).build();
        assert!(cfg.is_ok());
    }

    #[test]
    fn duration_setters_round_to_millis() {
        let cfg = FlowBufferConfig::builder()
            .flush_timeout(Duration::from_millis(250))
            .flow_window(Duration::from_secs(2))
            .sliding_timeout(false)
            .build()
            .unwrap();
        assert_eq!(cfg.flush_timeout_ms, 250);
        assert_eq!(cfg.flow_window_ms, 2_000);
        assert!(!cfg.sliding_timeout);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserializes_camel_case_with_defaults() {
        let cfg: FlowBufferConfig =
            serde_json::from_str(r#"{"bufferCapacity": 10, "flushTimeoutMs": 500}"#).unwrap();
        assert_eq!(cfg.buffer_capacity, 10);
        assert_eq!(cfg.flush_timeout(), Some(Duration::from_millis(500)));
        assert_eq!(cfg.flow_window_ms, DEFAULT_FLOW_WINDOW_MS);
    }
}
