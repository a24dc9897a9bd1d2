//! Shutdown coordination for scheduler generations.

use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// Owns a set of long-running tasks and the signal that stops them.
///
/// Each configuration generation gets its own `Shutdown`, so a reload can
/// stop exactly the schedulers it is replacing.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    tasks: JoinSet<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            tasks: JoinSet::new(),
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Spawn a task that this coordinator will wait for.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signal every task and wait up to `grace` for them to finish.
    ///
    /// Tasks still running after the deadline are aborted; an aborted pass
    /// drops its temp files.
    pub async fn shutdown(mut self, grace: Duration) {
        let _ = self.tx.send(());

        let drain = async {
            while let Some(result) = self.tasks.join_next().await {
                if let Err(e) = result {
                    if !e.is_cancelled() {
                        tracing::error!(error = %e, "Task failed during shutdown");
                    }
                }
            }
        };

        if tokio::time::timeout(grace, drain).await.is_err() {
            tracing::warn!(
                remaining = self.tasks.len(),
                grace_secs = grace.as_secs(),
                "Tasks did not stop in time, aborting"
            );
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
