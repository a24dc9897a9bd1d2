//! Locator normalization helpers.
//!
//! Locators arrive in the generic `scheme://host/path` form; each backend
//! maps them onto its own addressing with these helpers.

use url::Url;

use crate::retrieval::RetrievalError;

/// Decode `%XX` escapes. Malformed escapes are kept literally.
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|d| d as u8)
}

/// AWS-style URI encoding: everything but unreserved characters is escaped.
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => out.push(byte as char),
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Host part of the locator (repo, bucket, account).
pub fn host(url: &Url) -> Result<String, RetrievalError> {
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| RetrievalError::InvalidLocator(url.to_string()))?;

    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Decoded path of the locator; fails when it is empty or just `/`.
pub fn object_path(url: &Url) -> Result<String, RetrievalError> {
    let path = percent_decode(url.path());
    if path.trim_matches('/').is_empty() {
        return Err(RetrievalError::InvalidLocator(url.to_string()));
    }
    Ok(path)
}

/// Split the locator path into `(container, object)`.
pub fn split_container(url: &Url) -> Result<(String, String), RetrievalError> {
    let path = object_path(url)?;
    let trimmed = path.trim_start_matches('/');

    match trimmed.split_once('/') {
        Some((container, object)) if !container.is_empty() && !object.is_empty() => {
            Ok((container.to_string(), object.to_string()))
        }
        _ => Err(RetrievalError::InvalidLocator(url.to_string())),
    }
}
