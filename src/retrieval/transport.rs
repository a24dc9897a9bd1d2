//! Retrying HTTP transport shared by the network backends.

use std::time::Duration;

use url::Url;

use crate::config::TransportConfig;
use crate::resilience::retries::{is_retryable_status, RetryPolicy};
use crate::retrieval::{Response, RetrievalError};

/// reqwest client plus the fetch retry policy.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, RetrievalError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("butler/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RetrievalError::Config(e.to_string()))?;

        Ok(Self {
            client,
            retry: RetryPolicy::from_transport(config),
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Send a request built by `build`, retrying transport errors and retryable statuses.
    ///
    /// `build` runs once per attempt so signed headers stay fresh.
    pub async fn execute<F>(&self, url: &Url, mut build: F) -> Result<Response, RetrievalError>
    where
        F: FnMut(&reqwest::Client) -> Result<reqwest::RequestBuilder, RetrievalError>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let request = build(&self.client)?;

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();

                    if is_retryable_status(status) && self.retry.should_retry(attempt) {
                        let delay = self.retry.backoff(attempt);
                        tracing::debug!(url = %url, attempt, status, delay = ?delay, "Retrying fetch");
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    if !(200..300).contains(&status) {
                        return Err(RetrievalError::Status {
                            code: status,
                            url: url.to_string(),
                        });
                    }

                    let body = response
                        .bytes()
                        .await
                        .map_err(|e| RetrievalError::from_reqwest(url, e))?;

                    return Ok(Response {
                        status,
                        body: body.to_vec(),
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    if self.retry.should_retry(attempt) {
                        let delay = self.retry.backoff(attempt);
                        tracing::debug!(url = %url, attempt, error = %e, delay = ?delay, "Retrying fetch after network error");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(RetrievalError::from_reqwest(url, e));
                }
            }
        }
    }
}
