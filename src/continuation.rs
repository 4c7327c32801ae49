//! Completion callbacks attached to events and batches.
//!
//! A [`Continuation`] is invoked at most once; ownership enforces it, since
//! [`Continuation::complete`] consumes the value. [`Continuation::channel`]
//! bridges a callback into a future for async callers.

use crate::error::SinkError;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

type Callback = Box<dyn FnOnce(Result<(), SinkError>) + Send + 'static>;

/// Single-invocation completion callback carrying the sink's outcome.
pub struct Continuation {
    callback: Callback,
}

impl Continuation {
    /// Wrap a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Result<(), SinkError>) + Send + 'static,
    {
        Self { callback: Box::new(f) }
    }

    /// A continuation that ignores its outcome.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// Continuation paired with a future that resolves with the reported outcome.
    ///
    /// If the continuation is dropped without being invoked, the future resolves to an error.
    pub fn channel() -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        let continuation = Self::new(move |result| {
            let _ = tx.send(result);
        });
        (continuation, Completion { rx })
    }

    /// Invoke the callback with the given outcome.
    pub fn complete(self, result: Result<(), SinkError>) {
        (self.callback)(result)
    }

    /// Shorthand for `complete(Ok(()))`.
    pub fn succeed(self) {
        self.complete(Ok(()))
    }

    /// Shorthand for `complete(Err(err))`.
    pub fn fail(self, err: SinkError) {
        self.complete(Err(err))
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation").field("callback", &"<callback>").finish()
    }
}

/// Future side of [`Continuation::channel`].
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<Result<(), SinkError>>,
}

impl Future for Completion {
    type Output = Result<(), SinkError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(SinkError::continuation_dropped())),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// An event payload travelling with its completion callback.
#[derive(Debug)]
pub struct PendingEvent<T> {
    /// Opaque payload handed to the sink.
    pub payload: T,
    /// Invoked once the sink has handled this event.
    pub continuation: Continuation,
}

impl<T> PendingEvent<T> {
    pub fn new(payload: T, continuation: Continuation) -> Self {
        Self { payload, continuation }
    }

    /// Event whose outcome nobody observes.
    pub fn detached(payload: T) -> Self {
        Self::new(payload, Continuation::noop())
    }

    /// Event plus a future resolving when the sink reports its outcome.
    pub fn with_completion(payload: T) -> (Self, Completion) {
        let (continuation, completion) = Continuation::channel();
        (Self::new(payload, continuation), completion)
    }

    /// Complete this event, returning its payload.
    pub fn complete(self, result: Result<(), SinkError>) -> T {
        self.continuation.complete(result);
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn complete_invokes_callback_with_outcome() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let cont = Continuation::new(move |r| {
            assert!(r.is_err());
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });
        cont.fail(SinkError::msg("nope"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn channel_resolves_with_reported_result() {
        let (cont, completion) = Continuation::channel();
        cont.succeed();
        assert!(completion.await.is_ok());

        let (cont, completion) = Continuation::channel();
        cont.fail(SinkError::msg("rejected"));
        let err = completion.await.unwrap_err();
        assert!(err.to_string().contains("rejected"));
    }

    #[tokio::test]
    async fn dropped_continuation_resolves_to_error() {
        let (cont, completion) = Continuation::channel();
        drop(cont);
        let err = completion.await.unwrap_err();
        assert!(err.to_string().contains("dropped"));
    }

    #[tokio::test]
    async fn pending_event_complete_returns_payload() {
        let (event, completion) = PendingEvent::with_completion("payload");
        let payload = event.complete(Ok(()));
        assert_eq!(payload, "payload");
        assert!(completion.await.is_ok());
    }
}
