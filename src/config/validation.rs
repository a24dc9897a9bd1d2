//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check per-manager consistency (repos, destination, reloader)
//! - Validate value ranges (retry attempts, backoff window)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ButlerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::{ButlerConfig, ManagerConfig, TransportConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted location of the offending setting.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

const CONTENT_TYPES: &[&str] = &["text", "json", "yaml"];
const AUTH_TYPES: &[&str] = &["none", "basic", "digest", "token"];
const RELOAD_VERBS: &[&str] = &["get", "post", "put", "patch"];

/// Validate a parsed configuration.
pub fn validate_config(config: &ButlerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.globals.status_file.trim().is_empty() {
        errors.push(ValidationError::new("globals.status_file", "must not be empty"));
    }
    if config.globals.scheduler_interval_secs == 0 {
        errors.push(ValidationError::new(
            "globals.scheduler_interval_secs",
            "must be greater than zero",
        ));
    }

    let mut names = HashSet::new();
    for manager in &config.managers {
        if manager.name.trim().is_empty() {
            errors.push(ValidationError::new("managers.name", "must not be empty"));
        } else if !names.insert(manager.name.as_str()) {
            errors.push(ValidationError::new(
                format!("managers.{}", manager.name),
                "duplicate manager name",
            ));
        }
        validate_manager(manager, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_manager(manager: &ManagerConfig, errors: &mut Vec<ValidationError>) {
    let prefix = format!("managers.{}", manager.name);

    if manager.repos.is_empty() {
        errors.push(ValidationError::new(format!("{prefix}.repos"), "at least one repo is required"));
    }
    if manager.dest_path.trim().is_empty() && !manager.watch_only {
        errors.push(ValidationError::new(format!("{prefix}.dest_path"), "must not be empty"));
    }
    if manager.interval_secs == Some(0) {
        errors.push(ValidationError::new(
            format!("{prefix}.interval_secs"),
            "must be greater than zero",
        ));
    }

    let has_primary = manager.repos.iter().any(|r| !r.primary_config.is_empty());
    if has_primary && manager.primary_config_name.trim().is_empty() && !manager.watch_only {
        errors.push(ValidationError::new(
            format!("{prefix}.primary_config_name"),
            "required when primary_config fragments are configured",
        ));
    }

    let mut repo_names = HashSet::new();
    for repo in &manager.repos {
        let repo_prefix = format!("{prefix}.repos.{}", repo.name);
        if repo.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("{prefix}.repos.name"), "must not be empty"));
        } else if !repo_names.insert(repo.name.as_str()) {
            errors.push(ValidationError::new(repo_prefix.clone(), "duplicate repo name"));
        }
        if repo.method.trim().is_empty() {
            errors.push(ValidationError::new(format!("{repo_prefix}.method"), "must not be empty"));
        }
        if let Some(content_type) = &repo.content_type {
            if !CONTENT_TYPES.contains(&content_type.to_ascii_lowercase().as_str()) {
                errors.push(ValidationError::new(
                    format!("{repo_prefix}.content_type"),
                    format!("unknown content type '{content_type}'"),
                ));
            }
        }
    }

    if !AUTH_TYPES.contains(&manager.http.auth_type.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            format!("{prefix}.http.auth_type"),
            format!("unknown auth type '{}'", manager.http.auth_type),
        ));
    }

    validate_transport(&format!("{prefix}.http"), &manager.http.transport, errors);
    validate_transport(&format!("{prefix}.s3"), &manager.s3.transport, errors);
    validate_transport(&format!("{prefix}.blob"), &manager.blob.transport, errors);
    validate_transport(&format!("{prefix}.etcd"), &manager.etcd.transport, errors);

    if let Some(reloader) = &manager.reloader {
        match reloader.method.to_ascii_lowercase().as_str() {
            "none" => {}
            "http" => {
                let http = &reloader.http;
                if !RELOAD_VERBS.contains(&http.method.to_ascii_lowercase().as_str()) {
                    errors.push(ValidationError::new(
                        format!("{prefix}.reloader.http.method"),
                        format!("unsupported HTTP method '{}'", http.method),
                    ));
                }
                if http.host.trim().is_empty() {
                    errors.push(ValidationError::new(
                        format!("{prefix}.reloader.http.host"),
                        "must not be empty",
                    ));
                }
                validate_transport(&format!("{prefix}.reloader.http"), &http.transport, errors);
            }
            other => errors.push(ValidationError::new(
                format!("{prefix}.reloader.method"),
                format!("unknown reloader method '{other}'"),
            )),
        }
    }
}

fn validate_transport(prefix: &str, transport: &TransportConfig, errors: &mut Vec<ValidationError>) {
    if transport.retries == 0 {
        errors.push(ValidationError::new(format!("{prefix}.retries"), "must be at least 1"));
    }
    if transport.retry_wait_min_ms > transport.retry_wait_max_ms {
        errors.push(ValidationError::new(
            format!("{prefix}.retry_wait_min_ms"),
            "must not exceed retry_wait_max_ms",
        ));
    }
}
