#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # flowbuffer
//!
//! Flow-controlled event buffering for async Rust: batch events in front of
//! an expensive sink, flush on capacity or deadline, and fall back to
//! pass-through forwarding once the write rate says the sink is overloaded.
//!
//! ## Features
//!
//! - **Fixed-capacity FIFO buffer** drained as one batch when full
//! - **Flush deadline** (sliding or fixed) driven by a re-armable one-shot timer
//! - **Flow-rate governor** with a sticky overflow that switches to pass-through
//! - **Fan-out completion**: one batch continuation after every event continuation
//! - **Tower integration**: `FlowBuffer` is a `Service<T>`; `FlowBufferLayer` wraps
//!   any batch-accepting service
//!
//! ## Quick Start
//!
//! ```rust
//! use flowbuffer::{FlowBuffer, FlowBufferConfig, MemorySink};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let sink = MemorySink::new();
//!     let config = FlowBufferConfig::builder()
//!         .buffer_capacity(50)
//!         .flush_timeout(Duration::from_millis(200))
//!         .flow_window(Duration::from_secs(1))
//!         .flow_capacity(1_000)
//!         .build()
//!         .unwrap();
//!     let buffer = FlowBuffer::new(sink.clone(), config).unwrap();
//!
//!     let done = buffer.write_with_completion("user signed in");
//!     buffer.flush_async().await.unwrap();
//!     done.await.unwrap();
//!     assert_eq!(sink.events(), vec!["user signed in"]);
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod continuation;
pub mod error;
pub mod fanout;
pub mod flow_buffer;
pub mod governor;
pub mod layer;
pub mod prelude;
pub mod sink;
mod sync;
mod timer;

// Re-exports
pub use buffer::EventBuffer;
pub use config::{FlowBufferConfig, FlowBufferConfigBuilder};
pub use continuation::{Completion, Continuation, PendingEvent};
pub use error::{ConfigError, SinkError};
pub use fanout::{fan_out, forward_with_completion};
pub use flow_buffer::{FlowBuffer, FlowStats};
pub use governor::{FlowGovernor, WriteVerdict};
pub use layer::{FlowBufferLayer, ServiceSink};
pub use sink::{EventSink, MemorySink, NullSink, SinkCall};
