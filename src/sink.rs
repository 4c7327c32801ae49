//! The downstream sink interface and in-process sinks.

use crate::continuation::{Continuation, PendingEvent};
use crate::error::SinkError;
use crate::sync::lock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A downstream consumer of event batches.
///
/// Implementations must complete every event continuation exactly once, with
/// that event's own outcome, and may do so on any thread. `forward_batch` and
/// `flush` are called while the owning [`FlowBuffer`](crate::FlowBuffer) holds
/// its lock: they must not call back into that same buffer synchronously.
pub trait EventSink<T>: Send + Sync + 'static {
    /// Capture volatile, call-time state into the event before it is buffered.
    fn prerender(&self, _event: &mut T) {}

    /// Hand an ordered batch to the sink.
    fn forward_batch(&self, batch: Vec<PendingEvent<T>>);

    /// Flush anything the sink itself buffers.
    fn flush(&self, continuation: Continuation) {
        continuation.succeed();
    }
}

impl<T, S> EventSink<T> for Arc<S>
where
    S: EventSink<T> + ?Sized,
{
    fn prerender(&self, event: &mut T) {
        (**self).prerender(event)
    }

    fn forward_batch(&self, batch: Vec<PendingEvent<T>>) {
        (**self).forward_batch(batch)
    }

    fn flush(&self, continuation: Continuation) {
        (**self).flush(continuation)
    }
}

/// A sink that accepts and immediately succeeds every event.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl<T: Send + 'static> EventSink<T> for NullSink {
    fn forward_batch(&self, batch: Vec<PendingEvent<T>>) {
        for event in batch {
            event.complete(Ok(()));
        }
    }
}

/// A call observed by a [`MemorySink`], in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkCall {
    /// `forward_batch` with this many events.
    Batch(usize),
    /// `flush`.
    Flush,
}

type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
type Prerender<T> = Arc<dyn Fn(&mut T) + Send + Sync>;

struct Recorded<T> {
    batches: Vec<Vec<T>>,
    calls: Vec<SinkCall>,
    held: Vec<(Continuation, Result<(), SinkError>)>,
}

/// A sink that records batches in memory.
///
/// By default every event is completed inside `forward_batch`. With
/// [`MemorySink::deferred`] continuations are held until
/// [`MemorySink::release_all`] or [`MemorySink::take_held`], which lets callers
/// control completion order and timing.
pub struct MemorySink<T> {
    recorded: Arc<Mutex<Recorded<T>>>,
    prerendered: Arc<AtomicU64>,
    deferred: bool,
    fail_when: Option<Predicate<T>>,
    prerender: Option<Prerender<T>>,
}

impl<T> Clone for MemorySink<T> {
    fn clone(&self) -> Self {
        Self {
            recorded: self.recorded.clone(),
            prerendered: self.prerendered.clone(),
            deferred: self.deferred,
            fail_when: self.fail_when.clone(),
            prerender: self.prerender.clone(),
        }
    }
}

impl<T> fmt::Debug for MemorySink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let recorded = lock(&self.recorded);
        f.debug_struct("MemorySink")
            .field("batches", &recorded.batches.len())
            .field("calls", &recorded.calls)
            .field("held", &recorded.held.len())
            .field("deferred", &self.deferred)
            .finish()
    }
}

impl<T> Default for MemorySink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MemorySink<T> {
    pub fn new() -> Self {
        Self {
            recorded: Arc::new(Mutex::new(Recorded {
                batches: Vec::new(),
                calls: Vec::new(),
                held: Vec::new(),
            })),
            prerendered: Arc::new(AtomicU64::new(0)),
            deferred: false,
            fail_when: None,
            prerender: None,
        }
    }

    /// Hold continuations instead of completing them during `forward_batch`.
    pub fn deferred() -> Self {
        Self { deferred: true, ..Self::new() }
    }

    /// Fail every event matching `predicate`.
    pub fn failing_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.fail_when = Some(Arc::new(predicate));
        self
    }

    /// Run `f` on every event at prerender time.
    pub fn with_prerender<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        self.prerender = Some(Arc::new(f));
        self
    }

    /// Batches received so far, in arrival order.
    pub fn batches(&self) -> Vec<Vec<T>>
    where
        T: Clone,
    {
        lock(&self.recorded).batches.clone()
    }

    /// Every event received, flattened in arrival order.
    pub fn events(&self) -> Vec<T>
    where
        T: Clone,
    {
        lock(&self.recorded).batches.iter().flatten().cloned().collect()
    }

    /// Sizes of the received batches.
    pub fn batch_sizes(&self) -> Vec<usize> {
        lock(&self.recorded).batches.iter().map(Vec::len).collect()
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        lock(&self.recorded).calls.clone()
    }

    pub fn flush_count(&self) -> usize {
        lock(&self.recorded).calls.iter().filter(|c| **c == SinkCall::Flush).count()
    }

    pub fn prerender_count(&self) -> u64 {
        self.prerendered.load(Ordering::Relaxed)
    }

    /// Continuations held by a deferred sink that have not been completed yet.
    pub fn held_len(&self) -> usize {
        lock(&self.recorded).held.len()
    }

    /// Take the held continuations with the outcomes they would have received.
    pub fn take_held(&self) -> Vec<(Continuation, Result<(), SinkError>)> {
        std::mem::take(&mut lock(&self.recorded).held)
    }

    /// Complete every held continuation in arrival order.
    pub fn release_all(&self) {
        for (continuation, result) in self.take_held() {
            continuation.complete(result);
        }
    }

    pub fn clear(&self) {
        let mut recorded = lock(&self.recorded);
        recorded.batches.clear();
        recorded.calls.clear();
    }
}

impl<T: Send + 'static> EventSink<T> for MemorySink<T> {
    fn prerender(&self, event: &mut T) {
        self.prerendered.fetch_add(1, Ordering::Relaxed);
        if let Some(prerender) = &self.prerender {
            prerender(event);
        }
    }

    fn forward_batch(&self, batch: Vec<PendingEvent<T>>) {
        let mut payloads = Vec::with_capacity(batch.len());
        let mut outcomes = Vec::with_capacity(batch.len());
        for PendingEvent { payload, continuation } in batch {
            let result = match &self.fail_when {
                Some(fail) if fail(&payload) => Err(SinkError::msg("rejected by memory sink")),
                _ => Ok(()),
            };
            payloads.push(payload);
            outcomes.push((continuation, result));
        }

        {
            let mut recorded = lock(&self.recorded);
            recorded.calls.push(SinkCall::Batch(payloads.len()));
            recorded.batches.push(payloads);
            if self.deferred {
                recorded.held.extend(outcomes);
                return;
            }
        }

        for (continuation, result) in outcomes {
            continuation.complete(result);
        }
    }

    fn flush(&self, continuation: Continuation) {
        lock(&self.recorded).calls.push(SinkCall::Flush);
        continuation.succeed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counted(counter: &Arc<AtomicUsize>, failures: &Arc<AtomicUsize>) -> Continuation {
        let counter = counter.clone();
        let failures = failures.clone();
        Continuation::new(move |r| {
            counter.fetch_add(1, Ordering::SeqCst);
            if r.is_err() {
                failures.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    #[test]
    fn memory_sink_records_batches_and_completes() {
        let sink = MemorySink::new();
        let done = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        sink.forward_batch(vec![
            PendingEvent::new(1, counted(&done, &failed)),
            PendingEvent::new(2, counted(&done, &failed)),
        ]);
        sink.forward_batch(vec![PendingEvent::new(3, counted(&done, &failed))]);

        assert_eq!(sink.batches(), vec![vec![1, 2], vec![3]]);
        assert_eq!(sink.batch_sizes(), vec![2, 1]);
        assert_eq!(sink.calls(), vec![SinkCall::Batch(2), SinkCall::Batch(1)]);
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(failed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_predicate_only_fails_matching_events() {
        let sink = MemorySink::new().failing_when(|v: &i32| *v % 2 == 0);
        let done = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let batch = (1..=4).map(|i| PendingEvent::new(i, counted(&done, &failed))).collect();
        sink.forward_batch(batch);
        assert_eq!(done.load(Ordering::SeqCst), 4);
        assert_eq!(failed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn deferred_sink_holds_until_released() {
        let sink = MemorySink::deferred();
        let done = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        sink.forward_batch(vec![PendingEvent::new("a", counted(&done, &failed))]);
        assert_eq!(sink.held_len(), 1);
        assert_eq!(done.load(Ordering::SeqCst), 0);
        sink.release_all();
        assert_eq!(sink.held_len(), 0);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn prerender_hook_runs_and_counts() {
        let sink = MemorySink::new().with_prerender(|v: &mut u32| *v += 100);
        let mut value = 1;
        sink.prerender(&mut value);
        assert_eq!(value, 101);
        assert_eq!(sink.prerender_count(), 1);
    }

    #[test]
    fn arc_sink_delegates() {
        let sink = Arc::new(MemorySink::new());
        let shared: Arc<dyn EventSink<u8>> = sink.clone();
        shared.forward_batch(vec![PendingEvent::detached(7)]);
        shared.flush(Continuation::noop());
        assert_eq!(sink.calls(), vec![SinkCall::Batch(1), SinkCall::Flush]);
    }
}
