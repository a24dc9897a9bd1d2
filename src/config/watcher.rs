//! Configuration file watcher.
//!
//! notify events for the config file are collapsed into one reload per burst
//! (editors commonly emit several writes, or a create plus rename, per save).
//! The file is then loaded and validated, and forwarded only when it parses
//! to something different from the last configuration seen.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::ButlerConfig;

/// Quiet period that ends a burst of change events.
pub const DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches the configuration file and emits changed, valid configurations.
pub struct ConfigWatcher {
    path: PathBuf,
    current: ButlerConfig,
    debounce: Duration,
    update_tx: mpsc::UnboundedSender<ButlerConfig>,
}

impl ConfigWatcher {
    /// `current` is the configuration already in effect, as loaded from `path`.
    pub fn new(path: &Path, current: ButlerConfig) -> (Self, mpsc::UnboundedReceiver<ButlerConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                current,
                debounce: DEBOUNCE,
                update_tx,
            },
            update_rx,
        )
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching. Must be called inside a tokio runtime.
    ///
    /// The returned watcher must be kept alive for updates to keep flowing.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let (event_tx, event_rx) = mpsc::unbounded_channel::<()>();
        let file_name: Option<OsString> = self.path.file_name().map(|n| n.to_os_string());

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let touches_config = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == file_name.as_deref());
                    if (event.kind.is_modify() || event.kind.is_create()) && touches_config {
                        let _ = event_tx.send(());
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        // The directory, not the file: a save by rename replaces the inode.
        let dir = watch_dir(&self.path);
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, debounce = ?self.debounce, "Config watcher started");
        tokio::spawn(self.debounce_loop(event_rx));
        Ok(watcher)
    }

    async fn debounce_loop(mut self, mut events: mpsc::UnboundedReceiver<()>) {
        while events.recv().await.is_some() {
            loop {
                match tokio::time::timeout(self.debounce, events.recv()).await {
                    Ok(Some(())) => continue,
                    Ok(None) => return,
                    Err(_) => break,
                }
            }

            if let Some(config) = self.reload() {
                if self.update_tx.send(config).is_err() {
                    return;
                }
            }
        }
        tracing::debug!(path = ?self.path, "Config watcher stopped");
    }

    /// Load the file; `Some` only for a valid config that differs from the current one.
    fn reload(&mut self) -> Option<ButlerConfig> {
        match load_config(&self.path) {
            Ok(config) if config == self.current => {
                tracing::debug!(path = ?self.path, "Config file touched but unchanged, ignoring");
                None
            }
            Ok(config) => {
                tracing::info!(path = ?self.path, managers = config.managers.len(), "Config file changed");
                self.current = config.clone();
                Some(config)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                None
            }
        }
    }
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
