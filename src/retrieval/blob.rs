//! Azure Blob Storage retrieval.
//!
//! Locators take the form `blob://<account>/<container>/<blob>`.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use url::Url;

use crate::config::env::resolve_env;
use crate::config::schema::BlobMethodConfig;
use crate::retrieval::locator::{host, split_container, uri_encode};
use crate::retrieval::sigv4::hmac_sha256;
use crate::retrieval::transport::HttpTransport;
use crate::retrieval::{Response, RetrievalError};

const STORAGE_VERSION: &str = "2021-08-06";

pub struct BlobMethod {
    transport: HttpTransport,
    account_key: Option<Vec<u8>>,
    sas_token: Option<String>,
    endpoint: Option<String>,
}

impl fmt::Debug for BlobMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobMethod")
            .field("endpoint", &self.endpoint)
            .field("shared_key", &self.account_key.is_some())
            .field("sas", &self.sas_token.is_some())
            .finish()
    }
}

/// String-to-sign for a Shared Key authorized GET Blob.
pub fn shared_key_string_to_sign(date: &str, canonical_resource: &str) -> String {
    // Eleven empty standard headers between the verb and the x-ms-* headers.
    format!(
        "GET\n\n\n\n\n\n\n\n\n\n\n\nx-ms-date:{date}\nx-ms-version:{STORAGE_VERSION}\n{canonical_resource}"
    )
}

impl BlobMethod {
    pub fn new(config: &BlobMethodConfig) -> Result<Self, RetrievalError> {
        let key = resolve_env(&config.account_key);
        let account_key = if key.is_empty() {
            None
        } else {
            Some(
                STANDARD
                    .decode(key.trim())
                    .map_err(|e| RetrievalError::Config(format!("blob account_key is not base64: {e}")))?,
            )
        };

        let sas = resolve_env(&config.sas_token);
        let endpoint = config
            .endpoint
            .as_deref()
            .map(resolve_env)
            .filter(|e| !e.is_empty())
            .map(|e| e.trim_end_matches('/').to_string());

        Ok(Self {
            transport: HttpTransport::new(&config.transport)?,
            account_key,
            sas_token: (!sas.is_empty()).then(|| sas.trim_start_matches('?').to_string()),
            endpoint,
        })
    }

    /// Map `blob://account/container/blob` onto the HTTP URL of the blob.
    pub fn blob_url(&self, url: &Url) -> Result<(String, Url), RetrievalError> {
        let account = host(url)?;
        let (container, blob) = split_container(url)?;

        let base = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://{account}.blob.core.windows.net"),
        };
        let mut target = format!("{base}/{}/{}", uri_encode(&container, true), uri_encode(&blob, false));
        if let Some(sas) = &self.sas_token {
            target.push('?');
            target.push_str(sas);
        }

        let target = Url::parse(&target).map_err(|_| RetrievalError::InvalidLocator(url.to_string()))?;
        Ok((account, target))
    }

    pub async fn get(&self, url: &Url) -> Result<Response, RetrievalError> {
        let (account, target) = self.blob_url(url)?;

        self.transport
            .execute(&target, |client| {
                let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
                let mut request = client
                    .get(target.clone())
                    .header("x-ms-date", date.as_str())
                    .header("x-ms-version", STORAGE_VERSION);

                if let (Some(key), None) = (&self.account_key, &self.sas_token) {
                    let resource = format!("/{account}{}", target.path());
                    let signature = STANDARD.encode(hmac_sha256(
                        key,
                        shared_key_string_to_sign(&date, &resource).as_bytes(),
                    ));
                    request = request.header("Authorization", format!("SharedKey {account}:{signature}"));
                }
                Ok(request)
            })
            .await
    }
}
