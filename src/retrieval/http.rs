//! HTTP/HTTPS retrieval with optional authentication.

use std::fmt;

use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use url::Url;

use crate::config::env::resolve_env;
use crate::config::schema::HttpMethodConfig;
use crate::retrieval::digest::DigestChallenge;
use crate::retrieval::transport::HttpTransport;
use crate::retrieval::{Response, RetrievalError};

/// Authentication applied to every fragment request.
#[derive(Clone)]
pub enum HttpAuth {
    None,
    Basic { user: String, password: String },
    Digest { user: String, password: String },
    /// Bearer token.
    Token(String),
}

impl HttpAuth {
    pub fn from_config(config: &HttpMethodConfig) -> Result<Self, RetrievalError> {
        let user = resolve_env(&config.auth_user);
        let password = resolve_env(&config.auth_password);

        match config.auth_type.to_ascii_lowercase().as_str() {
            "" | "none" => Ok(HttpAuth::None),
            "basic" => Ok(HttpAuth::Basic { user, password }),
            "digest" => Ok(HttpAuth::Digest { user, password }),
            "token" => Ok(HttpAuth::Token(resolve_env(&config.auth_token))),
            other => Err(RetrievalError::Config(format!("unknown auth type '{other}'"))),
        }
    }

    fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            HttpAuth::Basic { user, password } => request.basic_auth(user, Some(password)),
            HttpAuth::Token(token) => request.bearer_auth(token),
            HttpAuth::None | HttpAuth::Digest { .. } => request,
        }
    }
}

impl fmt::Debug for HttpAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpAuth::None => f.write_str("None"),
            HttpAuth::Basic { user, .. } => f.debug_struct("Basic").field("user", user).finish_non_exhaustive(),
            HttpAuth::Digest { user, .. } => f.debug_struct("Digest").field("user", user).finish_non_exhaustive(),
            HttpAuth::Token(_) => f.write_str("Token(..)"),
        }
    }
}

/// Fetches fragments from an HTTP(S) repository.
#[derive(Debug)]
pub struct HttpMethod {
    transport: HttpTransport,
    auth: HttpAuth,
}

impl HttpMethod {
    pub fn new(config: &HttpMethodConfig) -> Result<Self, RetrievalError> {
        Ok(Self {
            transport: HttpTransport::new(&config.transport)?,
            auth: HttpAuth::from_config(config)?,
        })
    }

    pub async fn get(&self, url: &Url) -> Result<Response, RetrievalError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RetrievalError::InvalidLocator(url.to_string()));
        }

        match &self.auth {
            HttpAuth::Digest { user, password } => self.get_digest(url, user, password).await,
            auth => {
                self.transport
                    .execute(url, |client| Ok(auth.apply(client.get(url.clone()))))
                    .await
            }
        }
    }

    /// Probe for a Digest challenge, then fetch with the computed credentials.
    async fn get_digest(&self, url: &Url, user: &str, password: &str) -> Result<Response, RetrievalError> {
        let probe = self
            .transport
            .client()
            .get(url.clone())
            .send()
            .await
            .map_err(|e| RetrievalError::from_reqwest(url, e))?;

        if probe.status().is_success() {
            let status = probe.status().as_u16();
            let body = probe.bytes().await.map_err(|e| RetrievalError::from_reqwest(url, e))?;
            return Ok(Response {
                status,
                body: body.to_vec(),
                attempts: 1,
            });
        }

        if probe.status() != StatusCode::UNAUTHORIZED {
            return self.transport.execute(url, |client| Ok(client.get(url.clone()))).await;
        }

        let challenge = probe
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(DigestChallenge::parse)
            .ok_or_else(|| RetrievalError::Status {
                code: StatusCode::UNAUTHORIZED.as_u16(),
                url: url.to_string(),
            })?;

        let uri = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };

        self.transport
            .execute(url, |client| {
                let cnonce = hex::encode(rand::random::<[u8; 8]>());
                let header = challenge.authorization(user, password, "GET", &uri, &cnonce);
                Ok(client.get(url.clone()).header(AUTHORIZATION, header))
            })
            .await
    }
}
