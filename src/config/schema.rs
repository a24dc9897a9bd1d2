//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the daemon.
//! All types derive Serde traits for deserialization from the TOML config file.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the daemon.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ButlerConfig {
    /// Process-wide settings.
    pub globals: GlobalsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Independently scheduled configuration targets.
    pub managers: Vec<ManagerConfig>,
}

/// Process-wide settings shared by every manager.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GlobalsConfig {
    /// Default reconciliation interval in seconds.
    pub scheduler_interval_secs: u64,

    /// Path of the JSON status record.
    pub status_file: String,

    /// Directory for download temp files (system temp dir when unset).
    pub tmp_dir: Option<String>,
}

impl Default for GlobalsConfig {
    fn default() -> Self {
        Self {
            scheduler_interval_secs: 300,
            status_file: "/var/tmp/butler.status".to_string(),
            tmp_dir: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines instead of the pretty format.
    pub log_json: bool,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Exporter bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// One configuration target (e.g. a single Prometheus instance).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ManagerConfig {
    /// Manager identifier for logging/metrics/status.
    pub name: String,

    /// Remote repositories publishing fragments for this manager.
    pub repos: Vec<RepoConfig>,

    /// Directory the downstream service reads its configuration from.
    pub dest_path: String,

    /// File name of the merged primary configuration inside `dest_path`.
    pub primary_config_name: String,

    /// Delete owned files when a pass fails and no cache entry exists.
    pub clean_files: bool,

    /// Keep a known-good copy of the last committed file set.
    pub enable_cache: bool,

    /// On-disk mirror of the known-good cache.
    pub cache_path: Option<String>,

    /// Only track fragment digests and reload on change; never write files.
    pub watch_only: bool,

    /// Disable the `#butlerstart`/`#butlerend` sentinel check.
    pub skip_butler_header: bool,

    /// Treat passes that failed only on retrieval timeouts as skipped.
    pub timeout_tolerant: bool,

    /// Per-manager override of the scheduler interval.
    pub interval_secs: Option<u64>,

    /// Template substitutions applied to every fragment.
    pub substitutions: BTreeMap<String, String>,

    /// Settings for the `http` and `https` methods.
    pub http: HttpMethodConfig,

    /// Settings for the `s3` method.
    pub s3: S3MethodConfig,

    /// Settings for the `blob` method.
    pub blob: BlobMethodConfig,

    /// Settings for the `etcd` method.
    pub etcd: EtcdMethodConfig,

    /// How the downstream service is told to pick up new configuration.
    pub reloader: Option<ReloaderConfig>,
}

/// A remote repository of configuration fragments.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RepoConfig {
    /// Repository host (HTTP), bucket (S3), account (Blob) or etcd host.
    pub name: String,

    /// Retrieval method: http, https, s3, blob, etcd, file.
    pub method: String,

    /// Base path of the fragments inside the repository.
    pub repo_path: String,

    /// Fragments merged, in order, into the primary configuration file.
    pub primary_config: Vec<String>,

    /// Fragments copied one-to-one next to the primary configuration.
    pub additional_config: Vec<String>,

    /// Declared content type (text, json, yaml); inferred from the extension when unset.
    pub content_type: Option<String>,
}

/// Retry/timeout settings shared by every network transport.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// Maximum number of attempts (including the first).
    pub retries: u32,

    /// Minimum backoff delay in milliseconds.
    pub retry_wait_min_ms: u64,

    /// Maximum backoff delay in milliseconds.
    pub retry_wait_max_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            retries: 5,
            retry_wait_min_ms: 1000,
            retry_wait_max_ms: 10_000,
        }
    }
}

/// HTTP(S) retrieval settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpMethodConfig {
    /// none, basic, digest or token.
    pub auth_type: String,

    pub auth_user: String,

    pub auth_password: String,

    /// Bearer token for `token` auth.
    pub auth_token: String,

    #[serde(flatten)]
    pub transport: TransportConfig,
}

impl Default for HttpMethodConfig {
    fn default() -> Self {
        Self {
            auth_type: "none".to_string(),
            auth_user: String::new(),
            auth_password: String::new(),
            auth_token: String::new(),
            transport: TransportConfig::default(),
        }
    }
}

/// S3 retrieval settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct S3MethodConfig {
    pub region: String,

    /// Access key id (anonymous requests when empty).
    pub access_key_id: String,

    pub secret_access_key: String,

    pub session_token: String,

    /// Path-style endpoint override (e.g. a MinIO URL).
    pub endpoint: Option<String>,

    #[serde(flatten)]
    pub transport: TransportConfig,
}

impl Default for S3MethodConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            session_token: String::new(),
            endpoint: None,
            transport: TransportConfig::default(),
        }
    }
}

/// Azure Blob Storage retrieval settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BlobMethodConfig {
    /// Base64 Shared Key for the storage account.
    pub account_key: String,

    /// SAS token, used instead of the Shared Key when set.
    pub sas_token: String,

    /// Endpoint override (e.g. Azurite); defaults to `https://<account>.blob.core.windows.net`.
    pub endpoint: Option<String>,

    #[serde(flatten)]
    pub transport: TransportConfig,
}

/// etcd v3 retrieval settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EtcdMethodConfig {
    /// Gateway endpoints tried in order; defaults to `http://<repo>:2379`.
    pub endpoints: Vec<String>,

    #[serde(flatten)]
    pub transport: TransportConfig,
}

/// Reloader selection.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReloaderConfig {
    /// http or none.
    pub method: String,

    pub http: HttpReloaderConfig,
}

impl Default for ReloaderConfig {
    fn default() -> Self {
        Self {
            method: "http".to_string(),
            http: HttpReloaderConfig::default(),
        }
    }
}

/// HTTP reload endpoint of the downstream service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpReloaderConfig {
    pub scheme: String,

    pub host: String,

    pub port: u16,

    pub uri: String,

    /// get, post, put or patch.
    pub method: String,

    /// Request body for post/put/patch.
    pub payload: String,

    pub content_type: String,

    #[serde(flatten)]
    pub transport: TransportConfig,
}

impl Default for HttpReloaderConfig {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            host: "localhost".to_string(),
            port: 9090,
            uri: "/-/reload".to_string(),
            method: "post".to_string(),
            payload: "{}".to_string(),
            content_type: "application/json".to_string(),
            transport: TransportConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: ButlerConfig = toml::from_str(
            r#"
            [[managers]]
            name = "prometheus"
            dest_path = "/opt/prometheus"
            primary_config_name = "prometheus.yml"

              [[managers.repos]]
              name = "repo1.example.com"
              method = "https"
              repo_path = "/configs"
              primary_config = ["a.yml", "b.yml"]
            "#,
        )
        .unwrap();

        assert_eq!(config.globals.scheduler_interval_secs, 300);
        assert_eq!(config.managers.len(), 1);
        let manager = &config.managers[0];
        assert_eq!(manager.repos[0].primary_config, vec!["a.yml", "b.yml"]);
        assert_eq!(manager.http.auth_type, "none");
        assert_eq!(manager.http.transport.retries, 5);
        assert!(manager.reloader.is_none());
    }

    #[test]
    fn test_flattened_transport_settings() {
        let config: ButlerConfig = toml::from_str(
            r#"
            [[managers]]
            name = "m"

              [managers.http]
              auth_type = "basic"
              timeout_secs = 3
              retries = 2

              [managers.reloader.http]
              port = 9091
              retry_wait_max_ms = 50
            "#,
        )
        .unwrap();

        let manager = &config.managers[0];
        assert_eq!(manager.http.transport.timeout_secs, 3);
        assert_eq!(manager.http.transport.retries, 2);
        let reloader = manager.reloader.as_ref().unwrap();
        assert_eq!(reloader.method, "http");
        assert_eq!(reloader.http.port, 9091);
        assert_eq!(reloader.http.transport.retry_wait_max_ms, 50);
        assert_eq!(reloader.http.uri, "/-/reload");
    }
}
