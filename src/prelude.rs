//! Convenient re-exports for common flowbuffer types.
pub use crate::{
    config::{FlowBufferConfig, FlowBufferConfigBuilder},
    continuation::{Completion, Continuation, PendingEvent},
    error::{ConfigError, SinkError},
    flow_buffer::{FlowBuffer, FlowStats},
    layer::{FlowBufferLayer, ServiceSink},
    sink::EventSink,
};
