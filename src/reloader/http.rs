//! HTTP reload endpoint client.

use std::time::Duration;

use reqwest::Method;
use url::Url;

use crate::config::schema::HttpReloaderConfig;
use crate::observability::metrics;
use crate::resilience::RetryPolicy;
use crate::reloader::ReloaderError;

/// Reload retry predicate.
///
/// Only status 0 and statuses of 600 and above are retried. A 5xx from the
/// reloaded service is final.
pub fn is_retryable_reload_status(status: u16) -> bool {
    status == 0 || status >= 600
}

#[derive(Debug)]
pub struct HttpReloader {
    client: reqwest::Client,
    url: Url,
    method: Method,
    payload: Option<String>,
    content_type: String,
    retry: RetryPolicy,
}

impl HttpReloader {
    pub fn from_config(config: &HttpReloaderConfig) -> Result<Self, ReloaderError> {
        let raw = format!("{}://{}:{}{}", config.scheme, config.host, config.port, config.uri);
        let url = Url::parse(&raw).map_err(|e| ReloaderError::Config(format!("invalid reload url '{raw}': {e}")))?;

        let method = match config.method.to_ascii_lowercase().as_str() {
            "get" => Method::GET,
            "post" => Method::POST,
            "put" => Method::PUT,
            "patch" => Method::PATCH,
            other => return Err(ReloaderError::Config(format!("unsupported reload method '{other}'"))),
        };
        let payload = (method != Method::GET).then(|| config.payload.clone());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.transport.timeout_secs))
            .build()
            .map_err(|e| ReloaderError::Config(e.to_string()))?;

        Ok(Self {
            client,
            url,
            method,
            payload,
            content_type: config.content_type.clone(),
            retry: RetryPolicy::from_transport(&config.transport),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn reload(&self, manager: &str) -> Result<(), ReloaderError> {
        let result = self.send(manager).await;
        metrics::record_reload(manager, result.is_ok());
        match &result {
            Ok(()) => tracing::info!(manager = %manager, url = %self.url, "Reloaded downstream service"),
            Err(e) => tracing::error!(manager = %manager, url = %self.url, error = %e, "Reload failed"),
        }
        result
    }

    async fn send(&self, manager: &str) -> Result<(), ReloaderError> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut request = self.client.request(self.method.clone(), self.url.clone());
            if let Some(payload) = &self.payload {
                request = request
                    .header(reqwest::header::CONTENT_TYPE, self.content_type.as_str())
                    .body(payload.clone());
            }

            let failure = match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if status == 200 {
                        return Ok(());
                    }
                    if !is_retryable_reload_status(status) {
                        return Err(ReloaderError::Status { code: status });
                    }
                    ReloaderError::Status { code: status }
                }
                Err(e) => ReloaderError::Transport(e.to_string()),
            };

            if !self.retry.should_retry(attempt) {
                return Err(failure);
            }
            let delay = self.retry.backoff(attempt);
            tracing::debug!(manager = %manager, attempt, error = %failure, delay = ?delay, "Retrying reload");
            metrics::record_reload_retry(manager);
            tokio::time::sleep(delay).await;
        }
    }
}
