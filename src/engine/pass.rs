//! One reconciliation pass for one manager.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use sha2::{Digest, Sha256};

use crate::engine::cache::KnownGoodCache;
use crate::engine::event::ConfigChanEvent;
use crate::engine::{fetch, merge};
use crate::manager::{Manager, ManagerState};
use crate::observability::metrics;
use crate::render::{MustacheRenderer, Renderer};
use crate::status::StatusStore;

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Everything validated; local files already matched.
    Unchanged,
    /// Files changed and the downstream service reloaded.
    Reloaded,
    /// Files changed but the reload failed; files stay committed.
    ReloadFailed,
    /// A fragment or the commit failed; fallback policy applied.
    Failed,
    /// Only retrieval timeouts on a timeout-tolerant manager; nothing touched.
    Skipped,
}

impl fmt::Display for PassOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PassOutcome::Unchanged => "unchanged",
            PassOutcome::Reloaded => "reloaded",
            PassOutcome::ReloadFailed => "reload_failed",
            PassOutcome::Failed => "failed",
            PassOutcome::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Shared reconciliation context, owned by the daemon's composition root.
pub struct Engine {
    cache: KnownGoodCache,
    status: Arc<StatusStore>,
    renderer: Arc<dyn Renderer>,
}

impl Engine {
    pub fn new(status: Arc<StatusStore>) -> Self {
        Self::with_renderer(status, Arc::new(MustacheRenderer::new()))
    }

    pub fn with_renderer(status: Arc<StatusStore>, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            cache: KnownGoodCache::new(),
            status,
            renderer,
        }
    }

    pub fn cache(&self) -> &KnownGoodCache {
        &self.cache
    }

    pub fn status(&self) -> &StatusStore {
        &self.status
    }

    /// Run one pass. Holds the manager's state lock throughout.
    pub async fn reconcile(&self, manager: &Manager) -> PassOutcome {
        let mut state = manager.state.lock().await;
        let start = Instant::now();

        let previous = self.status.get(&manager.name).await;
        tracing::debug!(manager = %manager.name, previous, "Starting reconciliation pass");

        let event = fetch::fetch_all(manager, self.renderer.clone()).await;
        for opts in &manager.opts {
            metrics::record_repo_up(&manager.name, &opts.repo, event.repo_ok(&opts.repo));
        }

        let outcome = if !event.can_commit() {
            self.handle_failure(manager, &event).await
        } else if manager.watch_only {
            self.watch(manager, &mut state, &event).await
        } else {
            self.commit(manager, &event).await
        };

        state.last_run = Some(SystemTime::now());
        metrics::record_pass_duration(&manager.name, start);
        tracing::info!(
            manager = %manager.name,
            outcome = %outcome,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Reconciliation pass finished"
        );
        outcome
    }

    async fn handle_failure(&self, manager: &Manager, event: &ConfigChanEvent) -> PassOutcome {
        metrics::record_repo_sanity(&manager.name, false);

        if manager.timeout_tolerant && event.only_timeouts() {
            tracing::warn!(
                manager = %manager.name,
                failed = event.failures().len(),
                "Only retrieval timeouts this pass, skipping"
            );
            return PassOutcome::Skipped;
        }

        for (file, error) in event.failures() {
            let step = event.last_step(&file).map(|(step, _)| step.as_str()).unwrap_or("none");
            tracing::error!(manager = %manager.name, file = %file, step, error = %error, "Fragment failed");
        }
        tracing::debug!(manager = %manager.name, fragments = ?event.summary(), "Fragment results");

        if !manager.watch_only {
            let action = self.cache.fallback(manager);
            tracing::warn!(manager = %manager.name, action = %action, "Applied failure fallback");
        }

        metrics::record_repo_in_sync(&manager.name, false);
        self.status.set(&manager.name, false).await;
        PassOutcome::Failed
    }

    async fn commit(&self, manager: &Manager, event: &ConfigChanEvent) -> PassOutcome {
        metrics::record_repo_sanity(&manager.name, true);

        let changed = match merge::commit(manager, event) {
            Ok(changed) => changed,
            Err(e) => {
                tracing::error!(manager = %manager.name, error = %e, "Commit failed");
                let action = self.cache.fallback(manager);
                tracing::warn!(manager = %manager.name, action = %action, "Applied failure fallback");
                metrics::record_repo_in_sync(&manager.name, false);
                self.status.set(&manager.name, false).await;
                return PassOutcome::Failed;
            }
        };

        if manager.enable_cache {
            if let Err(e) = self.cache.snapshot(manager) {
                tracing::error!(manager = %manager.name, error = %e, "Failed to update known-good cache");
            }
        }
        metrics::record_repo_in_sync(&manager.name, true);
        self.status.set(&manager.name, true).await;

        if !changed {
            tracing::debug!(manager = %manager.name, "Local config already up to date");
            return PassOutcome::Unchanged;
        }
        self.reload(manager).await
    }

    async fn watch(&self, manager: &Manager, state: &mut ManagerState, event: &ConfigChanEvent) -> PassOutcome {
        metrics::record_repo_sanity(&manager.name, true);

        let mut digests = HashMap::new();
        for file in event.tmp_files() {
            match std::fs::read(&file.path) {
                Ok(bytes) => {
                    digests.insert(file.name, hex::encode(Sha256::digest(&bytes)));
                }
                Err(e) => {
                    tracing::error!(manager = %manager.name, file = %file.name, error = %e, "Failed to hash fragment");
                    metrics::record_repo_in_sync(&manager.name, false);
                    self.status.set(&manager.name, false).await;
                    return PassOutcome::Failed;
                }
            }
        }

        // Failed passes never record digests, so an empty map means no good pass yet.
        let first = state.file_hashes.is_empty();
        let changed = digests != state.file_hashes;
        state.file_hashes = digests;

        metrics::record_repo_in_sync(&manager.name, true);
        self.status.set(&manager.name, true).await;

        if first {
            tracing::info!(manager = %manager.name, "Recorded baseline fragment digests");
            return PassOutcome::Unchanged;
        }
        if !changed {
            return PassOutcome::Unchanged;
        }
        tracing::info!(manager = %manager.name, "Watched fragments changed");
        self.reload(manager).await
    }

    async fn reload(&self, manager: &Manager) -> PassOutcome {
        if !manager.reloader.is_configured() {
            return PassOutcome::Reloaded;
        }
        match manager.reloader.reload(&manager.name).await {
            Ok(()) => PassOutcome::Reloaded,
            Err(_) => PassOutcome::ReloadFailed,
        }
    }
}
