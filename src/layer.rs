//! Tower integration.
//!
//! [`ServiceSink`] turns any `tower::Service<Vec<T>>` into an [`EventSink`],
//! and [`FlowBufferLayer`] wraps such a service in a [`FlowBuffer`]. The
//! resulting `FlowBuffer` is itself a `Service<T>` whose response future
//! resolves once the inner service has handled the batch that carried the
//! request.

use crate::config::FlowBufferConfig;
use crate::continuation::{Continuation, PendingEvent};
use crate::error::{ConfigError, SinkError};
use crate::flow_buffer::FlowBuffer;
use crate::sink::EventSink;
use std::fmt;
use std::marker::PhantomData;
use tokio::sync::mpsc;
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

enum Job<T> {
    Batch { payloads: Vec<T>, continuations: Vec<Continuation> },
    Flush(Continuation),
}

/// Event sink backed by a tower service that accepts whole batches.
///
/// Batches are queued to a single worker task and handed to the service one at
/// a time, in arrival order. Every event in a batch completes with that
/// batch's result. A flush completes once all batches queued before it have
/// been handled.
pub struct ServiceSink<T> {
    jobs: mpsc::UnboundedSender<Job<T>>,
}

impl<T> Clone for ServiceSink<T> {
    fn clone(&self) -> Self {
        Self { jobs: self.jobs.clone() }
    }
}

impl<T> fmt::Debug for ServiceSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceSink").field("closed", &self.jobs.is_closed()).finish()
    }
}

impl<T: Send + 'static> ServiceSink<T> {
    /// Spawn the worker driving `service`.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn new<Svc>(service: Svc) -> Self
    where
        Svc: Service<Vec<T>> + Send + 'static,
        Svc::Future: Send + 'static,
        Svc::Error: Into<BoxError> + Send,
    {
        let (jobs, rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(service, rx));
        Self { jobs }
    }
}

async fn drive<T, Svc>(mut service: Svc, mut jobs: mpsc::UnboundedReceiver<Job<T>>)
where
    Svc: Service<Vec<T>>,
    Svc::Error: Into<BoxError> + Send,
{
    while let Some(job) = jobs.recv().await {
        match job {
            Job::Batch { payloads, continuations } => {
                let result = match service.ready().await {
                    Ok(ready) => ready.call(payloads).await.map(|_| ()),
                    Err(err) => Err(err),
                }
                .map_err(|err| SinkError::from_boxed(err.into()));
                if let Err(err) = &result {
                    tracing::debug!(error = %err, size = continuations.len(), "inner service rejected batch");
                }
                for continuation in continuations {
                    continuation.complete(result.clone());
                }
            }
            Job::Flush(continuation) => continuation.succeed(),
        }
    }
}

impl<T: Send + 'static> EventSink<T> for ServiceSink<T> {
    fn forward_batch(&self, batch: Vec<PendingEvent<T>>) {
        let (payloads, continuations): (Vec<T>, Vec<Continuation>) =
            batch.into_iter().map(|event| (event.payload, event.continuation)).unzip();
        if let Err(mpsc::error::SendError(Job::Batch { continuations, .. })) =
            self.jobs.send(Job::Batch { payloads, continuations })
        {
            for continuation in continuations {
                continuation.fail(SinkError::msg("service sink worker stopped"));
            }
        }
    }

    fn flush(&self, continuation: Continuation) {
        if let Err(mpsc::error::SendError(Job::Flush(continuation))) =
            self.jobs.send(Job::Flush(continuation))
        {
            continuation.fail(SinkError::msg("service sink worker stopped"));
        }
    }
}

/// Layer wrapping a batch-accepting service in a [`FlowBuffer`].
pub struct FlowBufferLayer<T> {
    config: FlowBufferConfig,
    _payload: PhantomData<fn(T)>,
}

impl<T> FlowBufferLayer<T> {
    /// Validates `config` up front so `layer` cannot fail.
    pub fn new(config: FlowBufferConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, _payload: PhantomData })
    }
}

impl<T> Clone for FlowBufferLayer<T> {
    fn clone(&self) -> Self {
        Self { config: self.config.clone(), _payload: PhantomData }
    }
}

impl<T> fmt::Debug for FlowBufferLayer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowBufferLayer").field("config", &self.config).finish()
    }
}

impl<T, Svc> Layer<Svc> for FlowBufferLayer<T>
where
    T: Send + 'static,
    Svc: Service<Vec<T>> + Send + 'static,
    Svc::Future: Send + 'static,
    Svc::Error: Into<BoxError> + Send,
{
    type Service = FlowBuffer<T, ServiceSink<T>>;

    fn layer(&self, inner: Svc) -> Self::Service {
        FlowBuffer::from_validated(ServiceSink::new(inner), self.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tower::service_fn;

    #[tokio::test]
    async fn service_sink_delivers_batches_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink = ServiceSink::new(service_fn(move |batch: Vec<u32>| {
            let seen = seen_clone.clone();
            async move {
                seen.lock().unwrap().push(batch);
                Ok::<_, std::io::Error>(())
            }
        }));

        let (first, first_done) = PendingEvent::with_completion(1);
        let (second, second_done) = PendingEvent::with_completion(2);
        sink.forward_batch(vec![first]);
        sink.forward_batch(vec![second]);
        first_done.await.unwrap();
        second_done.await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![vec![1], vec![2]]);
    }

    #[tokio::test]
    async fn service_error_reaches_every_event_of_the_batch() {
        let sink = ServiceSink::new(service_fn(|_batch: Vec<u32>| async {
            Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "backend down"))
        }));
        let (a, a_done) = PendingEvent::with_completion(1);
        let (b, b_done) = PendingEvent::with_completion(2);
        sink.forward_batch(vec![a, b]);
        assert!(a_done.await.unwrap_err().to_string().contains("backend down"));
        assert!(b_done.await.unwrap_err().to_string().contains("backend down"));
    }

    #[tokio::test]
    async fn flush_waits_for_queued_batches() {
        let sink = ServiceSink::new(service_fn(|_batch: Vec<u32>| async {
            tokio::task::yield_now().await;
            Ok::<_, std::io::Error>(())
        }));
        let (event, event_done) = PendingEvent::with_completion(1);
        sink.forward_batch(vec![event]);
        let (flush, flush_done) = Continuation::channel();
        EventSink::<u32>::flush(&sink, flush);
        flush_done.await.unwrap();
        // the batch was queued first, so it has completed already
        assert!(futures::FutureExt::now_or_never(event_done).is_some());
    }

    #[test]
    fn layer_rejects_invalid_config() {
        let cfg = FlowBufferConfig { buffer_capacity: 0, ..FlowBufferConfig::default() };
        assert!(FlowBufferLayer::<u32>::new(cfg).is_err());
    }
}
