//! Template substitution for downloaded fragments.
//!
//! Rendering happens in place on the fragment's temp file, before validation,
//! because unrendered placeholders are not valid JSON/YAML.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use regex::{Captures, Regex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("IO error rendering {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8")]
    Encoding { path: String },
}

/// Substitutes named variables into a fragment file.
pub trait Renderer: Send + Sync {
    fn render(&self, path: &Path, substitutions: &BTreeMap<String, String>) -> Result<(), RenderError>;
}

/// `{{ key }}` substitution limited to configured keys.
///
/// Placeholders naming an unknown key are left untouched, so Go/Jinja
/// templates embedded in alerting rules pass through verbatim.
#[derive(Debug, Clone)]
pub struct MustacheRenderer {
    pattern: Regex,
}

impl MustacheRenderer {
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("static pattern is valid"),
        }
    }

    /// Substitute into a string.
    pub fn render_str(&self, template: &str, substitutions: &BTreeMap<String, String>) -> String {
        self.pattern
            .replace_all(template, |caps: &Captures<'_>| match substitutions.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

impl Default for MustacheRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for MustacheRenderer {
    fn render(&self, path: &Path, substitutions: &BTreeMap<String, String>) -> Result<(), RenderError> {
        if substitutions.is_empty() {
            return Ok(());
        }

        let io_err = |source| RenderError::Io {
            path: path.display().to_string(),
            source,
        };

        let bytes = fs::read(path).map_err(io_err)?;
        let template = String::from_utf8(bytes).map_err(|_| RenderError::Encoding {
            path: path.display().to_string(),
        })?;

        let rendered = self.render_str(&template, substitutions);
        if rendered != template {
            fs::write(path, rendered).map_err(io_err)?;
        }
        Ok(())
    }
}
