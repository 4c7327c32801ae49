//! Fan-out continuation aggregator.
//!
//! Rewrites the continuations of a batch so that each event still reports its
//! own outcome to its original continuation, while a shared countdown fires a
//! single batch continuation after the last event completes. Completions may
//! arrive on any thread and in any order; the atomic decrement guarantees that
//! exactly one of them observes zero.
//!
//! The batch continuation receives `Ok(())` when every event succeeded and the
//! first failure observed otherwise. Individual events never see that
//! aggregate.

use crate::continuation::{Continuation, PendingEvent};
use crate::error::SinkError;
use crate::sink::EventSink;
use crate::sync::lock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct Countdown {
    remaining: AtomicUsize,
    first_error: Mutex<Option<SinkError>>,
    on_complete: Mutex<Option<Continuation>>,
}

impl Countdown {
    fn record(&self, result: &Result<(), SinkError>) {
        if let Err(err) = result {
            lock(&self.first_error).get_or_insert_with(|| err.clone());
        }
    }

    fn finish_one(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let outcome = match lock(&self.first_error).take() {
            Some(err) => Err(err),
            None => Ok(()),
        };
        if let Some(on_complete) = lock(&self.on_complete).take() {
            on_complete.complete(outcome);
        }
    }
}

/// Wrap every continuation in `batch` so `on_complete` fires once after all of them.
///
/// An empty batch completes `on_complete` immediately, on the calling thread,
/// and returns an empty batch.
pub fn fan_out<T>(batch: Vec<PendingEvent<T>>, on_complete: Continuation) -> Vec<PendingEvent<T>> {
    if batch.is_empty() {
        on_complete.succeed();
        return batch;
    }

    let countdown = Arc::new(Countdown {
        remaining: AtomicUsize::new(batch.len()),
        first_error: Mutex::new(None),
        on_complete: Mutex::new(Some(on_complete)),
    });

    batch
        .into_iter()
        .map(|PendingEvent { payload, continuation: original }| {
            let countdown = countdown.clone();
            let wrapped = Continuation::new(move |result| {
                countdown.record(&result);
                original.complete(result);
                countdown.finish_one();
            });
            PendingEvent::new(payload, wrapped)
        })
        .collect()
}

/// Forward `batch` to `sink` and fire `on_complete` once every event has completed.
///
/// Nothing is forwarded for an empty batch; `on_complete` runs synchronously instead.
pub fn forward_with_completion<T, S>(sink: &S, batch: Vec<PendingEvent<T>>, on_complete: Continuation)
where
    S: EventSink<T> + ?Sized,
{
    let batch = fan_out(batch, on_complete);
    if !batch.is_empty() {
        sink.forward_batch(batch);
    }
}
