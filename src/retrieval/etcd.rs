//! etcd v3 retrieval through the JSON gateway.
//!
//! `etcd://<host>[:port]/<key path>` reads the key `/<key path>` with a
//! `POST /v3/kv/range` against each configured endpoint in turn.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use url::Url;

use crate::config::env::resolve_env;
use crate::config::schema::EtcdMethodConfig;
use crate::retrieval::locator::{host, object_path};
use crate::retrieval::transport::HttpTransport;
use crate::retrieval::{Response, RetrievalError};

const DEFAULT_CLIENT_PORT: u16 = 2379;

#[derive(Debug, Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<KeyValue>,
}

#[derive(Debug, Deserialize)]
struct KeyValue {
    #[serde(default)]
    value: String,
}

#[derive(Debug)]
pub struct EtcdMethod {
    transport: HttpTransport,
    endpoints: Vec<String>,
}

impl EtcdMethod {
    pub fn new(config: &EtcdMethodConfig) -> Result<Self, RetrievalError> {
        let endpoints = config
            .endpoints
            .iter()
            .map(|e| resolve_env(e).trim_end_matches('/').to_string())
            .filter(|e| !e.is_empty())
            .collect();

        Ok(Self {
            transport: HttpTransport::new(&config.transport)?,
            endpoints,
        })
    }

    /// Gateway endpoints to try for a locator.
    pub fn endpoints_for(&self, url: &Url) -> Result<Vec<String>, RetrievalError> {
        if !self.endpoints.is_empty() {
            return Ok(self.endpoints.clone());
        }
        let host = host(url)?;
        let authority = if url.port().is_some() {
            host
        } else {
            format!("{host}:{DEFAULT_CLIENT_PORT}")
        };
        Ok(vec![format!("http://{authority}")])
    }

    pub async fn get(&self, url: &Url) -> Result<Response, RetrievalError> {
        let key = object_path(url)?;
        let body = serde_json::json!({ "key": STANDARD.encode(key.as_bytes()) });

        let mut last_error = RetrievalError::InvalidLocator(url.to_string());
        for endpoint in self.endpoints_for(url)? {
            let range_url = Url::parse(&format!("{endpoint}/v3/kv/range"))
                .map_err(|e| RetrievalError::Config(format!("invalid etcd endpoint '{endpoint}': {e}")))?;

            let response = match self
                .transport
                .execute(&range_url, |client| Ok(client.post(range_url.clone()).json(&body)))
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(endpoint = %endpoint, error = %e, "etcd endpoint failed, trying next");
                    last_error = e;
                    continue;
                }
            };

            return decode_range(url, response);
        }

        Err(last_error)
    }
}

fn decode_range(url: &Url, response: Response) -> Result<Response, RetrievalError> {
    let range: RangeResponse = serde_json::from_slice(&response.body).map_err(|e| RetrievalError::Transport {
        url: url.to_string(),
        message: format!("malformed etcd range response: {e}"),
    })?;

    let value = range.kvs.into_iter().next().ok_or_else(|| RetrievalError::Status {
        code: 404,
        url: url.to_string(),
    })?;

    let body = STANDARD.decode(value.value).map_err(|e| RetrievalError::Transport {
        url: url.to_string(),
        message: format!("etcd value is not base64: {e}"),
    })?;

    Ok(Response {
        status: response.status,
        body,
        attempts: response.attempts,
    })
}
