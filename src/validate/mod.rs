//! Content validation for downloaded fragments.
//!
//! # Responsibilities
//! - Resolve a fragment's content type (declared, or inferred from its extension)
//! - Check syntax for JSON and YAML fragments
//! - Enforce the `#butlerstart` / `#butlerend` sentinel lines on text and YAML
//!
//! # Design Decisions
//! - Sentinels prove a fragment came through the publishing pipeline, so a
//!   proxy error page saved as config is rejected
//! - JSON cannot carry comment sentinels; it is checked for syntax only
//! - Header and footer failures are distinct errors

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

/// First non-empty line every trusted fragment must carry.
pub const BUTLER_HEADER: &str = "#butlerstart";

/// Last non-empty line every trusted fragment must carry.
pub const BUTLER_FOOTER: &str = "#butlerend";

/// Declared or inferred fragment content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Text,
    Json,
    Yaml,
}

impl ContentType {
    /// Infer a content type from the file extension: `.json`, `.yml`/`.yaml`, else text.
    pub fn from_path(path: &str) -> Self {
        match Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => ContentType::Json,
            Some("yml") | Some("yaml") => ContentType::Yaml,
            _ => ContentType::Text,
        }
    }

    /// The declared type when present, the inferred one otherwise.
    pub fn resolve(declared: Option<ContentType>, path: &str) -> Self {
        declared.unwrap_or_else(|| Self::from_path(path))
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(ContentType::Text),
            "json" => Ok(ContentType::Json),
            "yaml" | "yml" => Ok(ContentType::Yaml),
            other => Err(format!("unknown content type '{other}'")),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContentType::Text => "text",
            ContentType::Json => "json",
            ContentType::Yaml => "yaml",
        };
        f.write_str(name)
    }
}

/// Why a fragment was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid butler header")]
    InvalidHeader,

    #[error("invalid butler footer")]
    InvalidFooter,

    #[error("invalid butler header and footer")]
    InvalidHeaderAndFooter,

    #[error("invalid json: {0}")]
    Json(String),

    #[error("invalid yaml: {0}")]
    Yaml(String),

    #[error("content is not valid UTF-8")]
    Encoding,
}

/// Validate fragment bytes for the given content type.
pub fn validate(
    content: &[u8],
    content_type: ContentType,
    header_check: bool,
) -> Result<(), ValidationError> {
    let text = std::str::from_utf8(content).map_err(|_| ValidationError::Encoding)?;

    match content_type {
        ContentType::Json => {
            serde_json::from_str::<serde_json::Value>(text)
                .map_err(|e| ValidationError::Json(e.to_string()))?;
        }
        ContentType::Yaml => {
            for document in serde_yaml::Deserializer::from_str(text) {
                serde_yaml::Value::deserialize(document)
                    .map_err(|e| ValidationError::Yaml(e.to_string()))?;
            }
            if header_check {
                check_sentinels(text)?;
            }
        }
        ContentType::Text => {
            if header_check {
                check_sentinels(text)?;
            }
        }
    }

    Ok(())
}

/// Check the header/footer sentinel lines.
pub fn check_sentinels(text: &str) -> Result<(), ValidationError> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let first = lines.next();
    let last = lines.next_back().or(first);

    let header_ok = first == Some(BUTLER_HEADER);
    let footer_ok = last == Some(BUTLER_FOOTER);

    match (header_ok, footer_ok) {
        (true, true) => Ok(()),
        (false, true) => Err(ValidationError::InvalidHeader),
        (true, false) => Err(ValidationError::InvalidFooter),
        (false, false) => Err(ValidationError::InvalidHeaderAndFooter),
    }
}
