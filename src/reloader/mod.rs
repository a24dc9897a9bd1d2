//! Downstream reload notification.
//!
//! # Responsibilities
//! - Tell the managed service to re-read its configuration after a commit
//! - Apply a retry policy independent of the fetch policy
//!
//! # Design Decisions
//! - Invoked only when a commit reported changed content
//! - A manager without a reloader treats reload as a successful no-op

pub mod http;

use thiserror::Error;

use crate::config::ReloaderConfig;

pub use http::HttpReloader;

#[derive(Debug, Error)]
pub enum ReloaderError {
    #[error("reload request failed: {0}")]
    Transport(String),

    /// The service answered with something other than 200.
    #[error("reload returned status {code}")]
    Status { code: u16 },

    #[error("invalid reloader configuration: {0}")]
    Config(String),
}

#[derive(Debug)]
pub enum Reloader {
    Http(HttpReloader),
    None,
}

impl Reloader {
    pub fn from_config(config: Option<&ReloaderConfig>) -> Result<Self, ReloaderError> {
        let Some(config) = config else {
            return Ok(Reloader::None);
        };

        match config.method.to_ascii_lowercase().as_str() {
            "http" => Ok(Reloader::Http(HttpReloader::from_config(&config.http)?)),
            "none" | "" => Ok(Reloader::None),
            other => Err(ReloaderError::Config(format!("unknown reloader method '{other}'"))),
        }
    }

    pub async fn reload(&self, manager: &str) -> Result<(), ReloaderError> {
        match self {
            Reloader::Http(reloader) => reloader.reload(manager).await,
            Reloader::None => Ok(()),
        }
    }

    pub fn is_configured(&self) -> bool {
        !matches!(self, Reloader::None)
    }
}
