//! HTTP Digest access authentication (RFC 2617, MD5 / MD5-sess).

use md5::{Digest, Md5};

/// A parsed `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
}

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// Split a challenge parameter list on commas outside quoted strings.
fn split_params(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(input[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(input[start..].trim());
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

impl DigestChallenge {
    /// Parse a `WWW-Authenticate` header value; `None` unless it is a Digest challenge.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let scheme_len = "digest".len();
        if !header
            .get(..scheme_len)
            .is_some_and(|s| s.eq_ignore_ascii_case("digest"))
        {
            return None;
        }

        let mut realm = None;
        let mut nonce = None;
        let mut qop = None;
        let mut opaque = None;
        let mut algorithm = None;

        for param in split_params(&header[scheme_len..]) {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "qop" => qop = Some(value),
                "opaque" => opaque = Some(value),
                "algorithm" => algorithm = Some(value),
                _ => {}
            }
        }

        Some(Self {
            realm: realm?,
            nonce: nonce?,
            qop,
            opaque,
            algorithm,
        })
    }

    fn supports_auth_qop(&self) -> bool {
        self.qop
            .as_deref()
            .map(|q| q.split(',').any(|v| v.trim().eq_ignore_ascii_case("auth")))
            .unwrap_or(false)
    }

    /// Compute the `response` digest for a request.
    pub fn response(&self, user: &str, password: &str, method: &str, uri: &str, nc: &str, cnonce: &str) -> String {
        let mut ha1 = md5_hex(&format!("{user}:{}:{password}", self.realm));
        if self
            .algorithm
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case("MD5-sess"))
        {
            ha1 = md5_hex(&format!("{ha1}:{}:{cnonce}", self.nonce));
        }
        let ha2 = md5_hex(&format!("{method}:{uri}"));

        if self.supports_auth_qop() {
            md5_hex(&format!("{ha1}:{}:{nc}:{cnonce}:auth:{ha2}", self.nonce))
        } else {
            md5_hex(&format!("{ha1}:{}:{ha2}", self.nonce))
        }
    }

    /// Build the `Authorization` header value for a request.
    pub fn authorization(&self, user: &str, password: &str, method: &str, uri: &str, cnonce: &str) -> String {
        let nc = "00000001";
        let response = self.response(user, password, method, uri, nc, cnonce);

        let mut header = format!(
            r#"Digest username="{user}", realm="{}", nonce="{}", uri="{uri}", response="{response}""#,
            self.realm, self.nonce
        );
        if let Some(algorithm) = &self.algorithm {
            header.push_str(&format!(", algorithm={algorithm}"));
        }
        if self.supports_auth_qop() {
            header.push_str(&format!(r#", qop=auth, nc={nc}, cnonce="{cnonce}""#));
        }
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(r#", opaque="{opaque}""#));
        }
        header
    }
}
