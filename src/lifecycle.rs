//! Background task lifecycle.
//!
//! Every long-lived task subscribes to one broadcast shutdown channel and is
//! tracked in a `JoinSet`. A single send reaches all subscribers, so
//! shutdown does not depend on knowing how many tasks are listening.
//! `shutdown()` then joins every task before returning.

use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Receiving half of the shutdown broadcast, handed to each task.
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: broadcast::Receiver<()>,
}

impl ShutdownSignal {
    /// Wait until shutdown is requested.
    ///
    /// A closed or lagged channel also counts as shutdown: the sender is
    /// gone or a signal was already sent.
    pub async fn recv(&mut self) {
        let _ = self.rx.recv().await;
    }
}

/// Outcome of joining background tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks that returned on their own after the signal.
    pub completed: usize,
    /// Tasks aborted after the grace period, or that panicked.
    pub aborted: usize,
}

/// Owns the shutdown broadcast and the set of running background tasks.
pub struct Lifecycle {
    shutdown_tx: broadcast::Sender<()>,
    tasks: JoinSet<&'static str>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        // One message is ever sent; capacity only needs to hold it.
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_tx,
            tasks: JoinSet::new(),
        }
    }

    /// Subscribe a receiver that is not tied to a tracked task.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.shutdown_tx.subscribe(),
        }
    }

    /// Spawn a tracked task. The receiver is subscribed before the task
    /// starts, so a shutdown sent at any later point is observed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, task: F)
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let fut = task(self.signal());
        self.tasks.spawn(async move {
            fut.await;
            name
        });
        debug!(task = name, "background task started");
    }

    /// Number of tracked tasks not yet joined.
    pub fn active_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Broadcast shutdown and join every task.
    ///
    /// Tasks still running after `grace` are aborted. Safe to call with no
    /// tasks and safe to call more than once.
    pub async fn shutdown(&mut self, grace: Duration) -> ShutdownReport {
        // Err only means nobody is subscribed, which is fine.
        let _ = self.shutdown_tx.send(());

        let mut report = ShutdownReport::default();
        let joined = tokio::time::timeout(grace, async {
            while let Some(result) = self.tasks.join_next().await {
                match result {
                    Ok(name) => {
                        debug!(task = name, "background task stopped");
                        report.completed += 1;
                    }
                    Err(e) => {
                        warn!(error = %e, "background task failed during shutdown");
                        report.aborted += 1;
                    }
                }
            }
        })
        .await;

        if joined.is_err() {
            let remaining = self.tasks.len();
            warn!(remaining, "background tasks did not stop in time, aborting");
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {
                report.aborted += 1;
            }
        }

        info!(
            completed = report.completed,
            aborted = report.aborted,
            "background tasks shut down"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn one_signal_stops_every_task() {
        let mut lifecycle = Lifecycle::new();
        let stopped = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let stopped = Arc::clone(&stopped);
            lifecycle.spawn("waiter", move |mut signal| async move {
                signal.recv().await;
                stopped.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(lifecycle.active_tasks(), 5);

        let report = lifecycle.shutdown(Duration::from_secs(5)).await;
        assert_eq!(report, ShutdownReport { completed: 5, aborted: 0 });
        assert_eq!(stopped.load(Ordering::SeqCst), 5);
        assert_eq!(lifecycle.active_tasks(), 0);
    }

    #[tokio::test]
    async fn shutdown_without_tasks_is_harmless() {
        let mut lifecycle = Lifecycle::new();
        let report = lifecycle.shutdown(Duration::from_millis(10)).await;
        assert_eq!(report, ShutdownReport::default());
    }

    #[tokio::test]
    async fn shutdown_twice_is_harmless() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.spawn("waiter", |mut signal| async move { signal.recv().await });

        let first = lifecycle.shutdown(Duration::from_secs(5)).await;
        let second = lifecycle.shutdown(Duration::from_secs(5)).await;
        assert_eq!(first.completed, 1);
        assert_eq!(second, ShutdownReport::default());
    }

    #[tokio::test]
    async fn stuck_task_is_aborted_after_grace() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.spawn("stuck", |_signal| async move {
            std::future::pending::<()>().await;
        });
        lifecycle.spawn("polite", |mut signal| async move { signal.recv().await });

        let report = lifecycle.shutdown(Duration::from_millis(50)).await;
        assert_eq!(report, ShutdownReport { completed: 1, aborted: 1 });
        assert_eq!(lifecycle.active_tasks(), 0);
    }

    #[tokio::test]
    async fn signal_observed_when_subscribed_before_send() {
        let mut lifecycle = Lifecycle::new();
        let mut signal = lifecycle.signal();
        lifecycle.shutdown(Duration::from_millis(10)).await;
        tokio::time::timeout(Duration::from_secs(1), signal.recv())
            .await
            .expect("signal should already be pending");
    }
}
