//! Merge and commit of validated fragments.
//!
//! Primary fragments are concatenated in declared order into one file.
//! Additional fragments are copied one-to-one. A destination is only
//! replaced when its bytes differ, and always through an atomic rename.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::engine::event::{find_tmp_file, ConfigChanEvent};
use crate::manager::{FileKind, Manager};
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A fragment the manager declares has no staged copy.
    #[error("fragment {0} was not staged")]
    MissingFragment(String),
}

fn io_error(path: &Path) -> impl Fn(std::io::Error) -> MergeError + '_ {
    move |source| MergeError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write `content` to `path` via a synced sibling temp file and a rename.
pub fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new().prefix(".butler-").tempfile_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Whether `path` is missing or holds bytes other than `content`.
fn differs(path: &Path, content: &[u8]) -> std::io::Result<bool> {
    match fs::read(path) {
        Ok(existing) => Ok(existing != content),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e),
    }
}

/// Replace `path` with `content` if they differ. Returns whether it changed.
fn commit_file(manager: &str, path: &Path, content: &[u8]) -> Result<bool, MergeError> {
    let file = path.display().to_string();
    let result = differs(path, content).and_then(|changed| {
        if changed {
            write_atomic(path, content)?;
        }
        Ok(changed)
    });
    metrics::record_write(manager, &file, result.is_ok());
    result.map_err(io_error(path))
}

/// Concatenate primary fragments in declared order.
pub fn merge_primary(manager: &Manager, event: &ConfigChanEvent) -> Result<Vec<u8>, MergeError> {
    let staged = event.tmp_files();
    let mut merged = Vec::new();
    for key in manager.primary_order() {
        let path = find_tmp_file(&staged, &key).ok_or_else(|| MergeError::MissingFragment(key.clone()))?;
        merged.extend(fs::read(path).map_err(io_error(path))?);
    }
    Ok(merged)
}

/// Write every destination file of a fully successful pass.
///
/// Returns true when at least one destination changed.
pub fn commit(manager: &Manager, event: &ConfigChanEvent) -> Result<bool, MergeError> {
    let mut changed = false;

    if manager.has_primary() {
        let merged = merge_primary(manager, event)?;
        let dest = manager.primary_config_path();
        if commit_file(&manager.name, &dest, &merged)? {
            tracing::info!(manager = %manager.name, path = %dest.display(), "Primary config updated");
            changed = true;
        }
    }

    let staged = event.tmp_files();
    for (_, file) in manager.remote_files().filter(|(_, f)| f.kind == FileKind::Additional) {
        let key = file.key();
        let src = find_tmp_file(&staged, &key).ok_or_else(|| MergeError::MissingFragment(key.clone()))?;
        let content = fs::read(src).map_err(io_error(src))?;
        if commit_file(&manager.name, &file.local_path, &content)? {
            tracing::info!(manager = %manager.name, path = %file.local_path.display(), "Additional config updated");
            changed = true;
        }
    }

    Ok(changed)
}
