//! Re-armable one-shot deadline timer.
//!
//! Each timer owns a worker task on the current Tokio runtime that waits for
//! the latest deadline published through a `watch` channel. Arming replaces
//! the pending deadline, disarming clears it, and a deadline fires at most
//! once: after firing the worker idles until the next `arm`.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub(crate) struct DeadlineTimer {
    name: &'static str,
    deadline: watch::Sender<Option<Instant>>,
    worker: JoinHandle<()>,
}

impl DeadlineTimer {
    /// Spawn the worker task. `on_fire` runs on the worker each time an armed
    /// deadline elapses.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub(crate) fn spawn<F>(name: &'static str, on_fire: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let (deadline, rx) = watch::channel(None);
        let worker = tokio::spawn(run(name, rx, on_fire));
        Self { name, deadline, worker }
    }

    /// Fire once `after` has elapsed from now, replacing any pending deadline.
    pub(crate) fn arm(&self, after: Duration) {
        self.deadline.send_replace(Some(Instant::now() + after));
    }

    pub(crate) fn disarm(&self) {
        self.deadline.send_if_modified(|current| current.take().is_some());
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.deadline.borrow().is_some()
    }

    /// Stop the worker. No callback starts after this returns.
    pub(crate) fn shutdown(&self) {
        self.worker.abort();
        tracing::trace!(timer = self.name, "deadline timer stopped");
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

impl std::fmt::Debug for DeadlineTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadlineTimer")
            .field("name", &self.name)
            .field("armed", &self.is_armed())
            .finish()
    }
}

async fn run<F>(name: &'static str, mut deadline: watch::Receiver<Option<Instant>>, on_fire: F)
where
    F: Fn(),
{
    loop {
        let next = *deadline.borrow_and_update();
        match next {
            None => {
                if deadline.changed().await.is_err() {
                    return;
                }
            }
            Some(at) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(at) => {
                        tracing::trace!(timer = name, "deadline elapsed");
                        on_fire();
                        // one-shot: stay idle until rearmed
                        if deadline.changed().await.is_err() {
                            return;
                        }
                    }
                    changed = deadline.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}
