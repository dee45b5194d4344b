//! Local filesystem source retrieval.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, instrument};

use dataflow_shared::{DataflowError, Fetcher, Result};

/// Reads `<root>/<source id>` from disk.
pub struct FileFetcher {
    root: PathBuf,
}

impl FileFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Source ids must stay inside `root`.
    fn resolve(&self, source_id: &str) -> Result<PathBuf> {
        let relative = Path::new(source_id);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if source_id.is_empty() || escapes {
            return Err(DataflowError::retrieval(
                source_id,
                "source id must be a relative path inside the source root",
            ));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Fetcher for FileFetcher {
    #[instrument(skip(self))]
    async fn get(&self, source_id: &str) -> Result<Vec<u8>> {
        let path = self.resolve(source_id)?;
        debug!(path = %path.display(), "reading");

        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| DataflowError::retrieval(source_id, format!("{}: {e}", path.display())))?;

        debug!(path = %path.display(), bytes = data.len(), "finished reading");
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("df-fetch-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn reads_file_under_root() {
        let root = temp_root();
        std::fs::write(root.join("a.jsonl"), b"line\n").unwrap();

        let fetcher = FileFetcher::new(&root);
        assert_eq!(fetcher.get("a.jsonl").await.unwrap(), b"line\n");

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn missing_file_is_retrieval_error() {
        let root = temp_root();
        let fetcher = FileFetcher::new(&root);
        let err = fetcher.get("nope.jsonl").await.unwrap_err();
        assert!(matches!(err, DataflowError::Retrieval { .. }));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn rejects_paths_outside_root() {
        let fetcher = FileFetcher::new("/srv/sources");
        assert!(fetcher.resolve("../etc/passwd").is_err());
        assert!(fetcher.resolve("/etc/passwd").is_err());
        assert!(fetcher.resolve("").is_err());
        assert_eq!(
            fetcher.resolve("nested/b.jsonl").unwrap(),
            PathBuf::from("/srv/sources/nested/b.jsonl")
        );
    }
}
