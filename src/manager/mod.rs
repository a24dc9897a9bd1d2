//! Manager runtime model.
//!
//! # Responsibilities
//! - Turn a validated `ManagerConfig` into its runtime form
//! - Resolve every fragment's remote URL and local destination path
//! - Own per-manager mutable state (last run, watch-only digests)
//!
//! # Design Decisions
//! - `ManagerOpts` are immutable after construction
//! - Runtime state sits behind a `tokio::sync::Mutex` that a reconciliation
//!   pass holds from start to finish, so passes of one manager never overlap
//! - Fragment identity within a pass is `<repo>/<file>`

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::Mutex;
use url::Url;

use crate::config::{ConfigError, GlobalsConfig, ManagerConfig, RepoConfig};
use crate::reloader::Reloader;
use crate::retrieval::{MethodKind, RetrievalMethod};
use crate::validate::ContentType;

/// Which batch a fragment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Merged, in order, into the primary configuration file.
    Primary,
    /// Copied one-to-one to its own destination.
    Additional,
}

/// One remotely hosted fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub repo: String,
    /// File name relative to the repo path, e.g. `alerts/common.yml`.
    pub name: String,
    pub url: Url,
    /// Destination on disk; for primary fragments this is the merged file.
    pub local_path: PathBuf,
    pub kind: FileKind,
}

impl RemoteFile {
    /// Aggregator key, unique across repos.
    pub fn key(&self) -> String {
        format!("{}/{}", self.repo, self.name)
    }
}

/// Per-repository options of a manager.
#[derive(Debug)]
pub struct ManagerOpts {
    pub repo: String,
    /// Configured method name.
    pub method_name: String,
    pub repo_path: String,
    pub content_type: Option<ContentType>,
    pub primary: Vec<RemoteFile>,
    pub additional: Vec<RemoteFile>,
    pub method: Arc<RetrievalMethod>,
}

/// Mutable state carried across passes.
#[derive(Debug, Default)]
pub struct ManagerState {
    pub last_run: Option<SystemTime>,
    /// Fragment key → SHA-256 hex digest (watch-only managers).
    pub file_hashes: HashMap<String, String>,
}

/// A configuration target owning a set of local files.
#[derive(Debug)]
pub struct Manager {
    pub name: String,
    pub opts: Vec<ManagerOpts>,
    pub dest_path: PathBuf,
    pub primary_config_name: String,
    pub substitutions: BTreeMap<String, String>,
    pub clean_files: bool,
    pub enable_cache: bool,
    pub cache_path: Option<PathBuf>,
    pub watch_only: bool,
    pub skip_header_check: bool,
    pub timeout_tolerant: bool,
    pub interval: Duration,
    pub tmp_dir: Option<PathBuf>,
    pub reloader: Reloader,
    pub state: Mutex<ManagerState>,
}

fn remote_url(kind: Option<MethodKind>, method: &str, repo: &RepoConfig, file: &str) -> Result<Url, String> {
    let scheme = kind.map(|k| k.scheme()).unwrap_or(method);
    let base = repo.repo_path.trim_matches('/');
    let file = file.trim_start_matches('/');
    let raw = if base.is_empty() {
        format!("{scheme}://{}/{file}", repo.name)
    } else {
        format!("{scheme}://{}/{base}/{file}", repo.name)
    };
    Url::parse(&raw).map_err(|e| format!("invalid locator '{raw}': {e}"))
}

impl Manager {
    /// Build the runtime manager, constructing one retrieval backend per repo.
    pub fn from_config(config: &ManagerConfig, globals: &GlobalsConfig) -> Result<Self, ConfigError> {
        let err = |message: String| ConfigError::Manager {
            manager: config.name.clone(),
            message,
        };

        let dest_path = PathBuf::from(&config.dest_path);
        let primary_path = dest_path.join(&config.primary_config_name);

        let mut opts = Vec::with_capacity(config.repos.len());
        for repo in &config.repos {
            let kind = repo.method.parse::<MethodKind>().ok();
            let method = RetrievalMethod::from_config(&repo.method, config).map_err(|e| err(e.to_string()))?;
            let content_type = repo
                .content_type
                .as_deref()
                .map(|c| c.parse::<ContentType>())
                .transpose()
                .map_err(err)?;

            let build = |files: &[String], kind_of: FileKind| -> Result<Vec<RemoteFile>, ConfigError> {
                files
                    .iter()
                    .map(|file| {
                        let url = remote_url(kind, &repo.method, repo, file).map_err(err)?;
                        let local_path = match kind_of {
                            FileKind::Primary => primary_path.clone(),
                            FileKind::Additional => dest_path.join(&repo.name).join(file.trim_start_matches('/')),
                        };
                        Ok(RemoteFile {
                            repo: repo.name.clone(),
                            name: file.clone(),
                            url,
                            local_path,
                            kind: kind_of,
                        })
                    })
                    .collect()
            };

            opts.push(ManagerOpts {
                repo: repo.name.clone(),
                method_name: repo.method.clone(),
                repo_path: repo.repo_path.clone(),
                content_type,
                primary: build(&repo.primary_config, FileKind::Primary)?,
                additional: build(&repo.additional_config, FileKind::Additional)?,
                method: Arc::new(method),
            });
        }

        let reloader = Reloader::from_config(config.reloader.as_ref()).map_err(|e| err(e.to_string()))?;
        let interval = Duration::from_secs(config.interval_secs.unwrap_or(globals.scheduler_interval_secs));

        Ok(Self {
            name: config.name.clone(),
            opts,
            dest_path,
            primary_config_name: config.primary_config_name.clone(),
            substitutions: config.substitutions.clone(),
            clean_files: config.clean_files,
            enable_cache: config.enable_cache,
            cache_path: config.cache_path.as_ref().map(PathBuf::from),
            watch_only: config.watch_only,
            skip_header_check: config.skip_butler_header || config.watch_only,
            timeout_tolerant: config.timeout_tolerant,
            interval,
            tmp_dir: globals.tmp_dir.as_ref().map(PathBuf::from),
            reloader,
            state: Mutex::new(ManagerState::default()),
        })
    }

    /// Path of the merged primary configuration file.
    pub fn primary_config_path(&self) -> PathBuf {
        self.dest_path.join(&self.primary_config_name)
    }

    /// Primary fragment keys in merge order: repos as declared, then files as declared.
    pub fn primary_order(&self) -> Vec<String> {
        self.opts
            .iter()
            .flat_map(|o| o.primary.iter().map(RemoteFile::key))
            .collect()
    }

    pub fn has_primary(&self) -> bool {
        self.opts.iter().any(|o| !o.primary.is_empty())
    }

    /// Every destination file this manager owns.
    pub fn local_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        if self.has_primary() {
            files.push(self.primary_config_path());
        }
        files.extend(
            self.opts
                .iter()
                .flat_map(|o| o.additional.iter().map(|f| f.local_path.clone())),
        );
        files
    }

    /// Every fragment this manager fetches.
    pub fn remote_files(&self) -> impl Iterator<Item = (&ManagerOpts, &RemoteFile)> {
        self.opts
            .iter()
            .flat_map(|o| o.primary.iter().chain(o.additional.iter()).map(move |f| (o, f)))
    }
}
