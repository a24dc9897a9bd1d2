//! Persistent per-manager health record.
//!
//! The file is a single JSON document, `{"manager": {"<name>": <bool>}}`,
//! read and rewritten wholesale on every update.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("IO error on status file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed status file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Manager name → last pass healthy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub manager: BTreeMap<String, bool>,
}

pub fn read_status(path: &Path) -> Result<Status, StatusError> {
    let raw = std::fs::read(path).map_err(|source| StatusError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&raw).map_err(|source| StatusError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Replace the status file atomically.
pub fn write_status(path: &Path, status: &Status) -> Result<(), StatusError> {
    let io_err = |source| StatusError::Io {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(io_err)?;

    let body = serde_json::to_vec(status).map_err(|source| StatusError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(&body).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

/// Health of `name`; false when the file is missing, unreadable or has no entry.
pub fn get_manager_status(path: &Path, name: &str) -> bool {
    read_status(path)
        .ok()
        .and_then(|s| s.manager.get(name).copied())
        .unwrap_or(false)
}

/// Read-modify-write of one manager's entry. A missing or corrupt file starts empty.
pub fn set_manager_status(path: &Path, name: &str, healthy: bool) -> Result<(), StatusError> {
    let mut status = match read_status(path) {
        Ok(status) => status,
        Err(StatusError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => Status::default(),
        Err(e) => {
            tracing::warn!(error = %e, "Discarding unreadable status file");
            Status::default()
        }
    };
    status.manager.insert(name.to_string(), healthy);
    write_status(path, &status)
}

/// Serialises status updates from concurrently running managers.
#[derive(Debug)]
pub struct StatusStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl StatusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self, name: &str) -> bool {
        let _guard = self.lock.lock().await;
        get_manager_status(&self.path, name)
    }

    /// Record a manager's health. Failures are logged, never returned.
    pub async fn set(&self, name: &str, healthy: bool) {
        let _guard = self.lock.lock().await;
        if let Err(e) = set_manager_status(&self.path, name, healthy) {
            tracing::error!(manager = %name, error = %e, "Failed to persist manager status");
        }
    }
}
