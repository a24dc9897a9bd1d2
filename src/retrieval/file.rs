//! Local filesystem retrieval.

use std::io::ErrorKind;

use url::Url;

use crate::retrieval::locator::object_path;
use crate::retrieval::{Response, RetrievalError};

/// Reads `file://<repo>/<path>` locators from the local filesystem.
///
/// The repo part only names the source; the path is absolute on this host.
#[derive(Debug, Default, Clone)]
pub struct FileMethod;

impl FileMethod {
    pub fn new() -> Self {
        Self
    }

    pub async fn get(&self, url: &Url) -> Result<Response, RetrievalError> {
        let path = object_path(url)?;

        match tokio::fs::read(&path).await {
            Ok(body) => Ok(Response {
                status: 200,
                body,
                attempts: 1,
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(RetrievalError::Status {
                code: 404,
                url: url.to_string(),
            }),
            Err(source) => Err(RetrievalError::Io { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.yml");
        std::fs::write(&file, "#butlerstart\nfoo\n#butlerend").unwrap();

        let url = Url::parse(&format!("file://localhost{}", file.display())).unwrap();
        let response = FileMethod::new().get(&url).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"#butlerstart\nfoo\n#butlerend");
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let url = Url::parse("file://localhost/nonexistent/butler/a.yml").unwrap();
        let err = FileMethod::new().get(&url).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Status { code: 404, .. }));
    }
}
