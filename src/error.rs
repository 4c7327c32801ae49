//! Error types for the buffering layer
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Outcome reported by a sink for a single event, a batch, or a flush.
///
/// Cloneable so one sink-level failure can be handed to every event it affected.
#[derive(Clone)]
pub struct SinkError(Arc<dyn std::error::Error + Send + Sync>);

impl SinkError {
    /// Wrap any error produced by the downstream sink.
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Arc::new(err))
    }

    /// Wrap an already boxed error, as produced by tower services.
    pub fn from_boxed(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self(Arc::from(err))
    }

    /// Build an error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self(Arc::new(MessageError(message.into())))
    }

    /// Reported when a sink drops a continuation without ever invoking it.
    pub(crate) fn continuation_dropped() -> Self {
        Self::msg("continuation dropped before completion")
    }

    /// Borrow the wrapped error.
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.0.as_ref()
    }
}

impl fmt::Debug for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SinkError").field(&self.0.to_string()).finish()
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink error: {}", self.0)
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref())
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct MessageError(String);

/// Errors produced when validating buffer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// `buffer_capacity` must be > 0.
    #[error("buffer_capacity must be > 0 (got {provided})")]
    InvalidBufferCapacity {
        /// Value provided by caller.
        provided: usize,
    },
    /// `flow_capacity` must be > 0 while the flow window is enabled.
    #[error("flow_capacity must be > 0 when flow_window_ms is positive (got {provided})")]
    InvalidFlowCapacity {
        /// Value provided by caller.
        provided: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io;

    #[test]
    fn sink_error_display_wraps_inner() {
        let err = SinkError::new(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
        let msg = err.to_string();
        assert!(msg.starts_with("sink error"));
        assert!(msg.contains("pipe closed"));
    }

    #[test]
    fn sink_error_exposes_source() {
        let err = SinkError::msg("disk full");
        assert_eq!(err.source().map(|s| s.to_string()), Some("disk full".to_string()));
        assert_eq!(err.inner().to_string(), "disk full");
    }

    #[test]
    fn clones_share_the_same_cause() {
        let err = SinkError::msg("boom");
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::InvalidBufferCapacity { provided: 0 };
        assert!(err.to_string().contains("buffer_capacity"));
        let err = ConfigError::InvalidFlowCapacity { provided: 0 };
        assert!(err.to_string().contains("flow_capacity"));
    }
}
