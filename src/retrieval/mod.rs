//! Remote retrieval subsystem.
//!
//! # Data Flow
//! ```text
//! RemoteFile.url (scheme://repo/path/file)
//!     → RetrievalMethod::get (dispatch on configured backend kind)
//!     → locator.rs (normalize address for the backend's transport)
//!     → transport.rs (timeout + retry/backoff) for network backends
//!     → Response { status, body, attempts }
//! ```
//!
//! # Design Decisions
//! - Enum dispatch: the set of backends is closed and known at config load
//! - Every failure is a typed `RetrievalError`; none is fatal to the process
//! - Backend settings are resolved once, at construction, including `env:` values

pub mod blob;
pub mod digest;
pub mod etcd;
pub mod file;
pub mod http;
pub mod locator;
pub mod s3;
pub mod sigv4;
pub mod transport;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

use crate::config::ManagerConfig;

pub use blob::BlobMethod;
pub use etcd::EtcdMethod;
pub use file::FileMethod;
pub use http::HttpMethod;
pub use s3::S3Method;
pub use transport::HttpTransport;

/// A successful download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
    /// Attempts spent, including the successful one.
    pub attempts: u32,
}

/// Errors that can occur while fetching a fragment.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Connection or protocol failure.
    #[error("transport error fetching {url}: {message}")]
    Transport { url: String, message: String },

    /// Request exceeded the backend timeout.
    #[error("timed out fetching {url}")]
    Timeout { url: String },

    /// Remote answered with a non-2xx status.
    #[error("unexpected status {code} fetching {url}")]
    Status { code: u16, url: String },

    /// Locator cannot be mapped onto the backend's addressing.
    #[error("invalid locator '{0}'")]
    InvalidLocator(String),

    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// No backend is registered for the configured method name.
    #[error("retrieval method '{0}' is not supported")]
    Unsupported(String),

    #[error("invalid backend configuration: {0}")]
    Config(String),
}

impl RetrievalError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RetrievalError::Timeout { .. })
    }

    /// Map a reqwest failure onto the retrieval taxonomy.
    pub fn from_reqwest(url: &Url, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RetrievalError::Timeout {
                url: url.to_string(),
            }
        } else {
            RetrievalError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// Backend kinds selectable per repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Http,
    Https,
    S3,
    Blob,
    Etcd,
    File,
}

impl MethodKind {
    /// URL scheme used when building locators for this kind.
    pub fn scheme(&self) -> &'static str {
        match self {
            MethodKind::Http => "http",
            MethodKind::Https => "https",
            MethodKind::S3 => "s3",
            MethodKind::Blob => "blob",
            MethodKind::Etcd => "etcd",
            MethodKind::File => "file",
        }
    }
}

impl FromStr for MethodKind {
    type Err = RetrievalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(MethodKind::Http),
            "https" => Ok(MethodKind::Https),
            "s3" => Ok(MethodKind::S3),
            "blob" => Ok(MethodKind::Blob),
            "etcd" => Ok(MethodKind::Etcd),
            "file" => Ok(MethodKind::File),
            other => Err(RetrievalError::Unsupported(other.to_string())),
        }
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Placeholder backend for method names this build does not know.
#[derive(Debug, Clone)]
pub struct GenericMethod {
    name: String,
}

impl GenericMethod {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub async fn get(&self, _url: &Url) -> Result<Response, RetrievalError> {
        Err(RetrievalError::Unsupported(self.name.clone()))
    }
}

/// A configured retrieval backend.
#[derive(Debug)]
pub enum RetrievalMethod {
    Http(HttpMethod),
    S3(S3Method),
    Blob(BlobMethod),
    Etcd(EtcdMethod),
    File(FileMethod),
    Generic(GenericMethod),
}

impl RetrievalMethod {
    /// Build the backend registered for `method`, using the manager's backend settings.
    ///
    /// Unknown method names yield a `Generic` backend whose fetches always fail.
    pub fn from_config(method: &str, manager: &ManagerConfig) -> Result<Self, RetrievalError> {
        let kind = match method.parse::<MethodKind>() {
            Ok(kind) => kind,
            Err(_) => {
                tracing::warn!(
                    manager = %manager.name,
                    method = %method,
                    "Unknown retrieval method, every fetch through it will fail"
                );
                return Ok(RetrievalMethod::Generic(GenericMethod::new(method)));
            }
        };

        Ok(match kind {
            MethodKind::Http | MethodKind::Https => RetrievalMethod::Http(HttpMethod::new(&manager.http)?),
            MethodKind::S3 => RetrievalMethod::S3(S3Method::new(&manager.s3)?),
            MethodKind::Blob => RetrievalMethod::Blob(BlobMethod::new(&manager.blob)?),
            MethodKind::Etcd => RetrievalMethod::Etcd(EtcdMethod::new(&manager.etcd)?),
            MethodKind::File => RetrievalMethod::File(FileMethod::new()),
        })
    }

    /// Fetch the fragment addressed by `url`.
    pub async fn get(&self, url: &Url) -> Result<Response, RetrievalError> {
        match self {
            RetrievalMethod::Http(m) => m.get(url).await,
            RetrievalMethod::S3(m) => m.get(url).await,
            RetrievalMethod::Blob(m) => m.get(url).await,
            RetrievalMethod::Etcd(m) => m.get(url).await,
            RetrievalMethod::File(m) => m.get(url).await,
            RetrievalMethod::Generic(m) => m.get(url).await,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RetrievalMethod::Http(_) => "http",
            RetrievalMethod::S3(_) => "s3",
            RetrievalMethod::Blob(_) => "blob",
            RetrievalMethod::Etcd(_) => "etcd",
            RetrievalMethod::File(_) => "file",
            RetrievalMethod::Generic(_) => "generic",
        }
    }
}
