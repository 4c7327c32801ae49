//! Flow-controlled buffering in front of an [`EventSink`].
//!
//! Every write is pre-rendered by the sink, counted by the flow governor and
//! appended to the buffer. The decision to keep buffering or forward right
//! away is derived fresh on each write from two inputs:
//!
//! - **Buffering**: overflow is not set and the buffer is below capacity. The
//!   flush deadline is (re)armed according to the sliding/fixed policy.
//! - **Immediate forward**: overflow is set, or the append reached capacity.
//!   The whole buffer is drained and forwarded as one batch. While overflowed
//!   this means every write leaves as a singleton batch.
//!
//! Overflow is sticky: once the governor trips, the buffer stays in
//! pass-through mode until a new `FlowBuffer` is built.
//!
//! # Concurrency
//! Buffer, governor, timer arming, liveness and counters share one mutex per
//! instance. Timer workers hold a `Weak` handle, take the lock and check
//! liveness before touching anything. Drained batches and flush requests are
//! queued on an outbox under the lock and handed to the sink by a single
//! dispatching caller with the lock released. The sink observes events in
//! exactly the order they were written, and a continuation may write to or
//! flush the same buffer without deadlocking.
//!
//! # Example
//! ```rust
//! use flowbuffer::{FlowBuffer, FlowBufferConfig, MemorySink, PendingEvent};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let sink = MemorySink::new();
//! let config = FlowBufferConfig::builder().buffer_capacity(2).build().unwrap();
//! let buffer = FlowBuffer::new(sink.clone(), config).unwrap();
//!
//! buffer.write(PendingEvent::detached("a"));
//! assert!(sink.batches().is_empty());
//! buffer.write(PendingEvent::detached("b"));
//! assert_eq!(sink.batches(), vec![vec!["a", "b"]]);
//! # });
//! ```

use crate::buffer::EventBuffer;
use crate::config::FlowBufferConfig;
use crate::continuation::{Completion, Continuation, PendingEvent};
use crate::error::{ConfigError, SinkError};
use crate::fanout::forward_with_completion;
use crate::governor::FlowGovernor;
use crate::sink::EventSink;
use crate::sync::lock;
use crate::timer::DeadlineTimer;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use tower_service::Service;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForwardReason {
    Capacity,
    Overflow,
    Deadline,
    Flush,
    Close,
}

impl ForwardReason {
    fn as_str(self) -> &'static str {
        match self {
            ForwardReason::Capacity => "capacity",
            ForwardReason::Overflow => "overflow",
            ForwardReason::Deadline => "deadline",
            ForwardReason::Flush => "flush",
            ForwardReason::Close => "close",
        }
    }
}

/// Point-in-time counters for a [`FlowBuffer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowStats {
    /// Calls to `write`, including writes after close.
    pub writes: u64,
    /// Batches handed to the sink.
    pub batches_forwarded: u64,
    /// Events handed to the sink.
    pub events_forwarded: u64,
    /// Non-empty drains triggered by the flush deadline.
    pub deadline_flushes: u64,
    /// Calls to `flush`.
    pub explicit_flushes: u64,
    /// Events currently buffered.
    pub buffered: usize,
    /// Whether the sticky overflow has tripped (or the governor is disabled).
    pub overflowed: bool,
    /// Writes counted in the current flow window.
    pub window_count: usize,
    /// Whether `close` has run; later writes pass straight through.
    pub closed: bool,
}

#[derive(Debug, Default)]
struct Counters {
    writes: u64,
    batches_forwarded: u64,
    events_forwarded: u64,
    deadline_flushes: u64,
    explicit_flushes: u64,
}

/// Sink work queued under the lock and performed outside it.
enum Dispatch<T> {
    Batch(Vec<PendingEvent<T>>),
    /// Batch whose aggregate outcome drives a follow-up continuation.
    Aggregate(Vec<PendingEvent<T>>, Continuation),
    Flush(Continuation),
}

struct State<T> {
    live: bool,
    /// Non-empty only while some caller is dispatching.
    outbox: VecDeque<Dispatch<T>>,
    dispatching: bool,
    buffer: EventBuffer<T>,
    governor: FlowGovernor,
    flush_timer: Option<DeadlineTimer>,
    flow_timer: Option<DeadlineTimer>,
    counters: Counters,
}

impl<T> State<T> {
    /// Drain the buffer; a pending flush deadline has nothing left to flush.
    fn drain(&mut self) -> Vec<PendingEvent<T>> {
        if let Some(timer) = &self.flush_timer {
            timer.disarm();
        }
        self.buffer.drain_all()
    }

    fn record_batch(&mut self, len: usize, reason: ForwardReason) {
        self.counters.batches_forwarded += 1;
        self.counters.events_forwarded += len as u64;
        tracing::debug!(reason = reason.as_str(), size = len, "forwarding batch");
    }
}

struct Shared<T, S>
where
    T: Send + 'static,
    S: EventSink<T>,
{
    sink: S,
    config: FlowBufferConfig,
    state: Mutex<State<T>>,
}

impl<T, S> Shared<T, S>
where
    T: Send + 'static,
    S: EventSink<T>,
{
    fn forward(&self, state: &mut State<T>, batch: Vec<PendingEvent<T>>, reason: ForwardReason) {
        state.record_batch(batch.len(), reason);
        state.outbox.push_back(Dispatch::Batch(batch));
    }

    /// Hand queued work to the sink with the lock released.
    ///
    /// Returns at once if another caller is already dispatching; that caller
    /// picks up whatever was queued, including work queued by continuations
    /// running on its own stack.
    fn dispatch<'a>(&'a self, mut state: MutexGuard<'a, State<T>>) {
        if state.dispatching {
            return;
        }
        state.dispatching = true;
        let mut reset = ResetDispatching { state: &self.state, done: false };
        loop {
            let Some(job) = state.outbox.pop_front() else { break };
            drop(state);
            self.run(job);
            state = lock(&self.state);
        }
        state.dispatching = false;
        reset.done = true;
    }

    fn run(&self, job: Dispatch<T>) {
        match job {
            Dispatch::Batch(batch) => self.sink.forward_batch(batch),
            Dispatch::Aggregate(batch, on_complete) => {
                forward_with_completion(&self.sink, batch, on_complete)
            }
            Dispatch::Flush(continuation) => self.sink.flush(continuation),
        }
    }

    fn on_flush_deadline(&self) {
        let mut state = lock(&self.state);
        if !state.live {
            return;
        }
        let batch = state.buffer.drain_all();
        if batch.is_empty() {
            return;
        }
        state.counters.deadline_flushes += 1;
        self.forward(&mut state, batch, ForwardReason::Deadline);
        self.dispatch(state);
    }

    fn on_window_expire(&self) {
        let mut state = lock(&self.state);
        if !state.live {
            return;
        }
        tracing::trace!(count = state.governor.window_count(), "flow window rolled over");
        state.governor.on_window_expire();
    }

    /// Stop both timers and forward whatever is still buffered. Returns false if already closed.
    fn shut_down(&self, state: &mut State<T>) -> bool {
        if !state.live {
            return false;
        }
        state.live = false;
        for timer in [state.flush_timer.take(), state.flow_timer.take()].into_iter().flatten() {
            timer.shutdown();
        }
        let batch = state.buffer.drain_all();
        if !batch.is_empty() {
            self.forward(state, batch, ForwardReason::Close);
        }
        true
    }
}

impl<T, S> Drop for Shared<T, S>
where
    T: Send + 'static,
    S: EventSink<T>,
{
    fn drop(&mut self) {
        let mut state = std::mem::replace(
            self.state.get_mut().unwrap_or_else(PoisonError::into_inner),
            State::closed(),
        );
        if self.shut_down(&mut state) {
            tracing::debug!("flow buffer dropped without close; remaining events forwarded");
        }
        for job in std::mem::take(&mut state.outbox) {
            self.run(job);
        }
    }
}

/// Clears the dispatching flag if the sink panics mid-dispatch, so later
/// callers can still drain the outbox.
struct ResetDispatching<'a, T> {
    state: &'a Mutex<State<T>>,
    done: bool,
}

impl<T> Drop for ResetDispatching<'_, T> {
    fn drop(&mut self) {
        if !self.done {
            lock(self.state).dispatching = false;
        }
    }
}

impl<T> State<T> {
    fn closed() -> Self {
        Self {
            live: false,
            outbox: VecDeque::new(),
            dispatching: false,
            buffer: EventBuffer::new(1),
            governor: FlowGovernor::new(None, 0),
            flush_timer: None,
            flow_timer: None,
            counters: Counters::default(),
        }
    }
}

/// Flow-controlled, batching front for an [`EventSink`].
///
/// Clones share the same buffer, governor and timers.
pub struct FlowBuffer<T, S>
where
    T: Send + 'static,
    S: EventSink<T>,
{
    shared: Arc<Shared<T, S>>,
}

impl<T, S> Clone for FlowBuffer<T, S>
where
    T: Send + 'static,
    S: EventSink<T>,
{
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<T, S> fmt::Debug for FlowBuffer<T, S>
where
    T: Send + 'static,
    S: EventSink<T>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowBuffer")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<T, S> FlowBuffer<T, S>
where
    T: Send + 'static,
    S: EventSink<T>,
{
    /// Build a buffer in front of `sink`.
    ///
    /// Timer workers are spawned only for the timers the config enables.
    ///
    /// # Panics
    /// Panics outside a Tokio runtime when `flush_timeout_ms` or `flow_window_ms` is positive.
    pub fn new(sink: S, config: FlowBufferConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_validated(sink, config))
    }

    pub(crate) fn from_validated(sink: S, config: FlowBufferConfig) -> Self {
        let shared = Arc::new_cyclic(|weak: &Weak<Shared<T, S>>| {
            let flush_timer = config.flush_timeout().map(|_| {
                let weak = weak.clone();
                DeadlineTimer::spawn("flush", move || {
                    if let Some(shared) = weak.upgrade() {
                        shared.on_flush_deadline();
                    }
                })
            });
            let flow_timer = config.flow_window().map(|_| {
                let weak = weak.clone();
                DeadlineTimer::spawn("flow-window", move || {
                    if let Some(shared) = weak.upgrade() {
                        shared.on_window_expire();
                    }
                })
            });
            let state = State {
                live: true,
                outbox: VecDeque::new(),
                dispatching: false,
                buffer: EventBuffer::new(config.buffer_capacity),
                governor: FlowGovernor::new(config.flow_window(), config.flow_capacity),
                flush_timer,
                flow_timer,
                counters: Counters::default(),
            };
            Shared { sink, config, state: Mutex::new(state) }
        });
        Self { shared }
    }

    /// Accept one event. Never fails and never drops the event.
    ///
    /// After [`close`](Self::close) the event is forwarded immediately on its own.
    pub fn write(&self, mut event: PendingEvent<T>) {
        let shared = &self.shared;
        shared.sink.prerender(&mut event.payload);

        let mut state = lock(&shared.state);
        state.counters.writes += 1;
        if !state.live {
            shared.forward(&mut state, vec![event], ForwardReason::Close);
            shared.dispatch(state);
            return;
        }

        let verdict = state.governor.on_write();
        if let (Some(window), Some(timer)) = (verdict.arm_window, &state.flow_timer) {
            timer.arm(window);
        }
        if verdict.tripped {
            tracing::warn!(
                threshold = state.governor.threshold(),
                window_ms = shared.config.flow_window_ms,
                "flow capacity reached; switching to pass-through"
            );
        }

        let size = state.buffer.append(event);
        let overflowed = state.governor.is_overflowed();
        if !overflowed && size < state.buffer.capacity() {
            if let (Some(timeout), Some(timer)) = (shared.config.flush_timeout(), &state.flush_timer)
            {
                if shared.config.sliding_timeout || size == 1 {
                    timer.arm(timeout);
                }
            }
            return;
        }

        let reason = if overflowed { ForwardReason::Overflow } else { ForwardReason::Capacity };
        let batch = state.drain();
        shared.forward(&mut state, batch, reason);
        shared.dispatch(state);
    }

    /// Write `payload` and return a future for the sink's outcome on it.
    pub fn write_with_completion(&self, payload: T) -> Completion {
        let (event, completion) = PendingEvent::with_completion(payload);
        self.write(event);
        completion
    }

    /// Forward everything buffered, then flush the sink.
    ///
    /// `continuation` runs after the sink's own flush completes, which happens
    /// only once every drained event has completed.
    pub fn flush(&self, continuation: Continuation) {
        let shared = &self.shared;
        let mut state = lock(&shared.state);
        state.counters.explicit_flushes += 1;
        let batch = state.drain();
        let job = if batch.is_empty() {
            Dispatch::Flush(continuation)
        } else {
            state.record_batch(batch.len(), ForwardReason::Flush);
            // weak: a sink holding this continuation must not keep the buffer alive
            let flusher = Arc::downgrade(shared);
            let then_flush = Continuation::new(move |result: Result<(), SinkError>| {
                if let Err(err) = &result {
                    tracing::warn!(error = %err, "flushed batch contained failed events");
                }
                match flusher.upgrade() {
                    Some(shared) => shared.sink.flush(continuation),
                    None => continuation.complete(result),
                }
            });
            Dispatch::Aggregate(batch, then_flush)
        };
        state.outbox.push_back(job);
        shared.dispatch(state);
    }

    /// [`flush`](Self::flush) as a future.
    pub fn flush_async(&self) -> Completion {
        let (continuation, completion) = Continuation::channel();
        self.flush(continuation);
        completion
    }

    /// Stop both timers and forward anything still buffered. Safe to call more than once.
    pub fn close(&self) {
        let mut state = lock(&self.shared.state);
        if self.shared.shut_down(&mut state) {
            tracing::info!(
                writes = state.counters.writes,
                batches = state.counters.batches_forwarded,
                "flow buffer closed"
            );
        }
        self.shared.dispatch(state);
    }

    pub fn is_closed(&self) -> bool {
        !lock(&self.shared.state).live
    }

    /// Whether writes are currently passed straight through.
    pub fn is_overflowed(&self) -> bool {
        lock(&self.shared.state).governor.is_overflowed()
    }

    pub fn buffered_len(&self) -> usize {
        lock(&self.shared.state).buffer.len()
    }

    pub fn stats(&self) -> FlowStats {
        let state = lock(&self.shared.state);
        FlowStats {
            writes: state.counters.writes,
            batches_forwarded: state.counters.batches_forwarded,
            events_forwarded: state.counters.events_forwarded,
            deadline_flushes: state.counters.deadline_flushes,
            explicit_flushes: state.counters.explicit_flushes,
            buffered: state.buffer.len(),
            overflowed: state.governor.is_overflowed(),
            window_count: state.governor.window_count(),
            closed: !state.live,
        }
    }

    pub fn config(&self) -> &FlowBufferConfig {
        &self.shared.config
    }

    pub fn sink(&self) -> &S {
        &self.shared.sink
    }
}

impl<T, S> Service<T> for FlowBuffer<T, S>
where
    T: Send + 'static,
    S: EventSink<T>,
{
    type Response = ();
    type Error = SinkError;
    type Future = Completion;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, payload: T) -> Self::Future {
        self.write_with_completion(payload)
    }
}
