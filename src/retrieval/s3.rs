//! S3 retrieval (virtual-hosted or path-style, SigV4 signed).

use std::fmt;

use chrono::Utc;
use url::Url;

use crate::config::env::resolve_env;
use crate::config::schema::S3MethodConfig;
use crate::retrieval::locator::{host, object_path, uri_encode};
use crate::retrieval::sigv4::{sign_get, SigningParams};
use crate::retrieval::transport::HttpTransport;
use crate::retrieval::{Response, RetrievalError};

#[derive(Clone)]
struct S3Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

/// Fetches fragments from `s3://<bucket>/<key>` locators.
pub struct S3Method {
    transport: HttpTransport,
    region: String,
    endpoint: Option<Url>,
    credentials: Option<S3Credentials>,
}

impl fmt::Debug for S3Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Method")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("signed", &self.credentials.is_some())
            .finish()
    }
}

impl S3Method {
    pub fn new(config: &S3MethodConfig) -> Result<Self, RetrievalError> {
        let endpoint = match config.endpoint.as_deref().map(resolve_env) {
            Some(raw) if !raw.is_empty() => Some(
                Url::parse(raw.trim_end_matches('/'))
                    .map_err(|e| RetrievalError::Config(format!("invalid s3 endpoint '{raw}': {e}")))?,
            ),
            _ => None,
        };

        let access_key_id = resolve_env(&config.access_key_id);
        let credentials = if access_key_id.is_empty() {
            None
        } else {
            let session_token = resolve_env(&config.session_token);
            Some(S3Credentials {
                access_key_id,
                secret_access_key: resolve_env(&config.secret_access_key),
                session_token: (!session_token.is_empty()).then_some(session_token),
            })
        };

        let region = resolve_env(&config.region);

        Ok(Self {
            transport: HttpTransport::new(&config.transport)?,
            region: if region.is_empty() { "us-east-1".to_string() } else { region },
            endpoint,
            credentials,
        })
    }

    /// Map `s3://bucket/key` onto the HTTP URL of the object.
    pub fn object_url(&self, url: &Url) -> Result<Url, RetrievalError> {
        let bucket = host(url)?;
        let key = uri_encode(&object_path(url)?, false);

        let target = match &self.endpoint {
            Some(endpoint) => format!("{}/{bucket}{key}", endpoint.as_str().trim_end_matches('/')),
            None => format!("https://{bucket}.s3.{}.amazonaws.com{key}", self.region),
        };
        Url::parse(&target).map_err(|_| RetrievalError::InvalidLocator(url.to_string()))
    }

    pub async fn get(&self, url: &Url) -> Result<Response, RetrievalError> {
        let target = self.object_url(url)?;
        let host_header = host(&target)?;

        self.transport
            .execute(&target, |client| {
                let mut request = client.get(target.clone());
                if let Some(creds) = &self.credentials {
                    let params = SigningParams {
                        access_key_id: &creds.access_key_id,
                        secret_access_key: &creds.secret_access_key,
                        session_token: creds.session_token.as_deref(),
                        region: &self.region,
                        service: "s3",
                    };
                    for (name, value) in sign_get(&host_header, target.path(), &params, Utc::now()) {
                        request = request.header(name, value);
                    }
                }
                Ok(request)
            })
            .await
    }
}
