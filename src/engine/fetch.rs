//! Concurrent fragment retrieval.
//!
//! # Data Flow
//! ```text
//! Manager fragments ─┬─ primary batch ──── JoinSet(file tasks) ─┐
//!                    └─ additional batch ─ JoinSet(file tasks) ─┴─ mpsc(2) → orchestrator
//! file task: download → temp file → render → validate → event
//! ```
//!
//! The orchestrator blocks until both batches have reported.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use crate::engine::event::{ConfigChanEvent, FetchStep};
use crate::manager::{FileKind, Manager, RemoteFile};
use crate::observability::metrics;
use crate::render::Renderer;
use crate::retrieval::RetrievalMethod;
use crate::validate::{self, ContentType};

const BATCHES: usize = 2;

/// Everything a file task needs, owned so the task can be spawned.
#[derive(Clone)]
struct FileJob {
    manager: Arc<str>,
    file: RemoteFile,
    method: Arc<RetrievalMethod>,
    content_type: ContentType,
    header_check: bool,
    substitutions: Arc<BTreeMap<String, String>>,
    tmp_dir: Option<PathBuf>,
    renderer: Arc<dyn Renderer>,
}

fn jobs(manager: &Manager, kind: FileKind, renderer: &Arc<dyn Renderer>) -> Vec<FileJob> {
    let name: Arc<str> = Arc::from(manager.name.as_str());
    let substitutions = Arc::new(manager.substitutions.clone());

    manager
        .remote_files()
        .filter(|(_, file)| file.kind == kind)
        .map(|(opts, file)| FileJob {
            manager: name.clone(),
            file: file.clone(),
            method: opts.method.clone(),
            content_type: ContentType::resolve(opts.content_type, &file.name),
            header_check: !manager.skip_header_check,
            substitutions: substitutions.clone(),
            tmp_dir: manager.tmp_dir.clone(),
            renderer: renderer.clone(),
        })
        .collect()
}

/// Fetch, render and validate every fragment of `manager`.
pub async fn fetch_all(manager: &Manager, renderer: Arc<dyn Renderer>) -> ConfigChanEvent {
    let mut event = ConfigChanEvent::new(manager.primary_config_path());
    for (_, file) in manager.remote_files() {
        event.expect(&file.repo, &file.key());
    }

    let (tx, mut rx) = mpsc::channel::<ConfigChanEvent>(BATCHES);
    for kind in [FileKind::Primary, FileKind::Additional] {
        let batch = jobs(manager, kind, &renderer);
        let config_file = manager.primary_config_path();
        let tx = tx.clone();
        tokio::spawn(async move {
            let event = run_batch(batch, config_file).await;
            if tx.send(event).await.is_err() {
                tracing::warn!("Fetch orchestrator went away before batch reported");
            }
        });
    }
    drop(tx);

    let mut received = 0;
    while received < BATCHES {
        match rx.recv().await {
            Some(batch) => {
                event.absorb(batch);
                received += 1;
            }
            None => break,
        }
    }
    if received < BATCHES {
        tracing::error!(
            manager = %manager.name,
            received,
            "Fetch batch ended without reporting, its fragments stay failed"
        );
    }

    event
}

async fn run_batch(jobs: Vec<FileJob>, config_file: PathBuf) -> ConfigChanEvent {
    let mut initial = ConfigChanEvent::new(config_file);
    for job in &jobs {
        initial.expect(&job.file.repo, &job.file.key());
    }
    let event = Arc::new(Mutex::new(initial));

    let mut tasks = JoinSet::new();
    for job in jobs {
        let event = event.clone();
        tasks.spawn(async move { process_file(job, event).await });
    }
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Fragment task failed");
        }
    }

    match Arc::try_unwrap(event) {
        Ok(mutex) => mutex.into_inner(),
        // Every task has been joined, so this is the only handle left.
        Err(shared) => {
            let mut guard = shared.lock().await;
            let config_file = guard.config_file.clone();
            std::mem::replace(&mut *guard, ConfigChanEvent::new(config_file))
        }
    }
}

async fn process_file(job: FileJob, event: Arc<Mutex<ConfigChanEvent>>) {
    let key = job.file.key();
    let repo = job.file.repo.as_str();
    let manager = &*job.manager;

    let response = match job.method.get(&job.file.url).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(manager, file = %key, url = %job.file.url, error = %e, "Failed to fetch fragment");
            metrics::record_contact(manager, repo, &job.file.name, false);
            let mut event = event.lock().await;
            event.set_step(repo, &key, FetchStep::Download, false);
            event.set_failure(repo, &key, e.to_string(), e.is_timeout());
            return;
        }
    };
    metrics::record_contact(manager, repo, &job.file.name, true);
    metrics::record_contact_retries(manager, repo, response.attempts.saturating_sub(1));

    let tmp = match write_temp(job.tmp_dir.as_deref(), &response.body) {
        Ok(tmp) => tmp,
        Err(e) => {
            tracing::error!(manager, file = %key, error = %e, "Failed to stage fragment");
            let mut event = event.lock().await;
            event.set_step(repo, &key, FetchStep::Download, false);
            event.set_failure(repo, &key, e.to_string(), false);
            return;
        }
    };
    event.lock().await.set_step(repo, &key, FetchStep::Download, true);

    let rendered = job.renderer.render(&tmp, &job.substitutions);
    metrics::record_render(manager, &job.file.name, rendered.is_ok());
    event.lock().await.set_step(repo, &key, FetchStep::Render, rendered.is_ok());
    if let Err(e) = rendered {
        tracing::warn!(manager, file = %key, error = %e, "Failed to render fragment");
        event.lock().await.set_failure(repo, &key, e.to_string(), false);
        return;
    }

    let checked = std::fs::read(&tmp)
        .map_err(|e| e.to_string())
        .and_then(|body| validate::validate(&body, job.content_type, job.header_check).map_err(|e| e.to_string()));
    metrics::record_validation(manager, &job.file.name, checked.is_ok());
    event.lock().await.set_step(repo, &key, FetchStep::Validate, checked.is_ok());
    if let Err(e) = checked {
        tracing::warn!(manager, file = %key, content_type = %job.content_type, error = %e, "Fragment failed validation");
        event.lock().await.set_failure(repo, &key, e, false);
        return;
    }

    tracing::debug!(manager, file = %key, "Fragment ready");
    let mut event = event.lock().await;
    event.set_tmp_file(repo, &key, tmp);
    event.set_success(repo, &key, true);
}

fn write_temp(dir: Option<&std::path::Path>, body: &[u8]) -> std::io::Result<tempfile::TempPath> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("butler-");
    let mut file = match dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };
    file.write_all(body)?;
    file.flush()?;
    Ok(file.into_temp_path())
}
