//! Periodic driver for one manager.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::engine::pass::Engine;
use crate::manager::Manager;

pub struct ManagerScheduler {
    manager: Arc<Manager>,
    engine: Arc<Engine>,
}

impl ManagerScheduler {
    pub fn new(manager: Arc<Manager>, engine: Arc<Engine>) -> Self {
        Self { manager, engine }
    }

    /// Reconcile on every tick until shutdown. The first pass runs immediately.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            manager = %self.manager.name,
            interval_secs = self.manager.interval.as_secs(),
            "Manager scheduler starting"
        );

        let mut ticker = time::interval(self.manager.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.engine.reconcile(&self.manager).await;
                }
                _ = shutdown.recv() => {
                    tracing::info!(manager = %self.manager.name, "Manager scheduler received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
