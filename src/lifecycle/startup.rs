//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize logging and metrics, then the engine and managers
//! - Run one scheduler per manager until a shutdown signal
//! - Swap the scheduler set when the configuration changes
//!
//! # Design Decisions
//! - Fail fast: an invalid configuration at startup is fatal
//! - An invalid configuration on reload is logged and the running set kept
//! - The known-good cache and status store outlive scheduler generations

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::config::loader::load_config;
use crate::config::watcher::ConfigWatcher;
use crate::config::{ButlerConfig, ConfigError};
use crate::engine::{Engine, ManagerScheduler, PassOutcome};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::{wait_for_shutdown, ReloadSignal};
use crate::manager::Manager;
use crate::observability::{logging, metrics};
use crate::status::StatusStore;

/// How long schedulers get to finish an in-flight pass on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid metrics address '{0}'")]
    MetricsAddress(String),

    /// `--once` finished with at least one failed manager.
    #[error("{0} manager(s) failed reconciliation")]
    PassesFailed(usize),
}

/// Options from the command line.
#[derive(Debug, Clone)]
pub struct StartupOptions {
    pub config_path: PathBuf,
    /// Overrides `observability.log_level`.
    pub log_level: Option<String>,
    /// Run a single pass per manager and exit.
    pub once: bool,
    /// Reload on configuration file changes.
    pub watch: bool,
}

/// Build every manager's runtime form.
pub fn build_managers(config: &ButlerConfig) -> Result<Vec<Arc<Manager>>, ConfigError> {
    config
        .managers
        .iter()
        .map(|m| Manager::from_config(m, &config.globals).map(Arc::new))
        .collect()
}

/// Start one scheduler per manager under a fresh shutdown coordinator.
pub fn start_schedulers(managers: &[Arc<Manager>], engine: &Arc<Engine>) -> Shutdown {
    let mut shutdown = Shutdown::new();
    for manager in managers {
        let scheduler = ManagerScheduler::new(manager.clone(), engine.clone());
        let rx = shutdown.subscribe();
        shutdown.spawn(scheduler.run(rx));
    }
    tracing::info!(managers = managers.len(), "Schedulers started");
    shutdown
}

/// Reconcile every manager once, concurrently.
pub async fn run_once(managers: &[Arc<Manager>], engine: &Arc<Engine>) -> Vec<(String, PassOutcome)> {
    let mut tasks = JoinSet::new();
    for manager in managers {
        let manager = manager.clone();
        let engine = engine.clone();
        tasks.spawn(async move {
            let outcome = engine.reconcile(&manager).await;
            (manager.name.clone(), outcome)
        });
    }

    let mut outcomes = Vec::with_capacity(managers.len());
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => tracing::error!(error = %e, "Reconciliation task failed"),
        }
    }
    outcomes.sort_by(|a, b| a.0.cmp(&b.0));
    outcomes
}

async fn next_update(updates: &mut Option<mpsc::UnboundedReceiver<ButlerConfig>>) -> ButlerConfig {
    if let Some(rx) = updates.as_mut() {
        if let Some(config) = rx.recv().await {
            return config;
        }
        tracing::warn!("Config watcher stopped, file changes are no longer picked up");
        *updates = None;
    }
    std::future::pending().await
}

/// Run the daemon.
pub async fn run(options: StartupOptions) -> Result<(), StartupError> {
    let loaded = load_config(&options.config_path)?;
    let mut config = loaded.clone();
    if let Some(level) = &options.log_level {
        config.observability.log_level = level.clone();
    }
    logging::init_logging(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %options.config_path.display(),
        managers = config.managers.len(),
        "butler starting"
    );

    if config.observability.metrics_enabled && !options.once {
        let addr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr);
    }

    let status = Arc::new(StatusStore::new(&config.globals.status_file));
    let engine = Arc::new(Engine::new(status));
    let mut managers = build_managers(&config)?;

    if options.once {
        let outcomes = run_once(&managers, &engine).await;
        let failed = outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == PassOutcome::Failed)
            .count();
        for (name, outcome) in &outcomes {
            tracing::info!(manager = %name, outcome = %outcome, "Pass complete");
        }
        return if failed == 0 {
            Ok(())
        } else {
            Err(StartupError::PassesFailed(failed))
        };
    }

    let mut updates = None;
    let mut _watcher = None;
    if options.watch {
        let (watcher, rx) = ConfigWatcher::new(&options.config_path, loaded);
        match watcher.run() {
            Ok(handle) => {
                _watcher = Some(handle);
                updates = Some(rx);
            }
            Err(e) => tracing::error!(error = %e, "Failed to start config watcher"),
        }
    }
    let mut reload_signal = ReloadSignal::new();

    let mut generation = start_schedulers(&managers, &engine);
    let shutdown_signal = wait_for_shutdown();
    tokio::pin!(shutdown_signal);

    loop {
        let new_config = tokio::select! {
            _ = &mut shutdown_signal => break,
            config = next_update(&mut updates) => config,
            _ = reload_signal.recv() => {
                tracing::info!("Received SIGHUP, reloading configuration");
                match load_config(&options.config_path) {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                        continue;
                    }
                }
            }
        };

        if new_config.globals.status_file != config.globals.status_file {
            tracing::warn!("globals.status_file changes take effect on restart");
        }

        match build_managers(&new_config) {
            Ok(next) => {
                generation.shutdown(SHUTDOWN_GRACE).await;
                managers = next;
                generation = start_schedulers(&managers, &engine);
                config = new_config;
                tracing::info!(managers = managers.len(), "Configuration reloaded");
            }
            Err(e) => {
                tracing::error!(error = %e, "Reloaded config rejected, keeping current managers");
            }
        }
    }

    generation.shutdown(SHUTDOWN_GRACE).await;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::parse_config;

    #[test]
    fn test_build_managers() {
        let config = parse_config(
            r#"
            [[managers]]
            name = "m"
            dest_path = "/tmp/m"
            primary_config_name = "p.yml"

              [[managers.repos]]
              name = "localhost"
              method = "file"
              repo_path = "/src"
              primary_config = ["a.yml"]
            "#,
        )
        .unwrap();
        assert_eq!(build_managers(&config).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_once_reports_each_manager() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.yml"), "#butlerstart\na: 1\n#butlerend\n").unwrap();

        let toml = format!(
            r#"
            [globals]
            status_file = "{status}"

            [[managers]]
            name = "good"
            dest_path = "{dest}/good"
            primary_config_name = "p.yml"

              [[managers.repos]]
              name = "localhost"
              method = "file"
              repo_path = "{src}"
              primary_config = ["a.yml"]

            [[managers]]
            name = "bad"
            dest_path = "{dest}/bad"
            primary_config_name = "p.yml"

              [[managers.repos]]
              name = "localhost"
              method = "file"
              repo_path = "{src}"
              primary_config = ["missing.yml"]
            "#,
            status = dest.path().join("butler.status").display(),
            dest = dest.path().display(),
            src = src.path().display(),
        );
        let config = parse_config(&toml).unwrap();
        let managers = build_managers(&config).unwrap();
        let engine = Arc::new(Engine::new(Arc::new(StatusStore::new(&config.globals.status_file))));

        let outcomes = run_once(&managers, &engine).await;
        assert_eq!(
            outcomes,
            vec![
                ("bad".to_string(), PassOutcome::Failed),
                ("good".to_string(), PassOutcome::Reloaded),
            ]
        );
    }
}
