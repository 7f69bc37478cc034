//! Storage for binary artifacts (generated images) uploaded by workers.
//!
//! The dispatch layer only needs "put these bytes somewhere and give me a
//! URL"; [`ArtifactStore`] is that seam. [`LocalArtifactStore`] writes into a
//! directory that the router serves under [`IMAGES_ROUTE`].

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

/// URL prefix under which stored artifacts are served.
pub const IMAGES_ROUTE: &str = "/images";

/// Maximum length of an artifact file name.
const MAX_NAME_LEN: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Invalid artifact name: {0:?}")]
    InvalidName(String),

    #[error("Artifact already exists: {0:?}")]
    AlreadyExists(String),

    #[error("Failed to write artifact: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination for worker-uploaded artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist `bytes` under `name` and return the URL clients fetch it from.
    /// An existing artifact is never replaced.
    async fn save(&self, name: &str, bytes: &[u8]) -> Result<String, ArtifactError>;
}

/// Allowed name characters: alphanumeric, hyphen, underscore, dot. No
/// leading dot, so neither `..` nor hidden files get through.
pub fn is_safe_artifact_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// Writes artifacts as plain files into one directory.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    dir: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn save(&self, name: &str, bytes: &[u8]) -> Result<String, ArtifactError> {
        if !is_safe_artifact_name(name) {
            return Err(ArtifactError::InvalidName(name.to_string()));
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(name);
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(ArtifactError::AlreadyExists(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(bytes).await?;
        file.flush().await?;
        tracing::info!(path = %path.display(), size = bytes.len(), "Saved artifact");

        Ok(format!("{IMAGES_ROUTE}/{name}"))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn safe_artifact_names() {
        assert!(is_safe_artifact_name("T.png"));
        assert!(is_safe_artifact_name("3f2a_20240101_120000.webp"));
        assert!(is_safe_artifact_name("my-image_1.png"));
    }

    #[test]
    fn unsafe_artifact_names() {
        assert!(!is_safe_artifact_name(""));
        assert!(!is_safe_artifact_name(".."));
        assert!(!is_safe_artifact_name(".hidden"));
        assert!(!is_safe_artifact_name("../etc/passwd"));
        assert!(!is_safe_artifact_name("a/b.png"));
        assert!(!is_safe_artifact_name("a b.png"));
        assert!(!is_safe_artifact_name(&"a".repeat(200)));
    }

    #[tokio::test]
    async fn save_writes_file_and_returns_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path().join("outputs"));

        let url = store.save("t-1.png", b"png-bytes").await.unwrap();

        assert_eq!(url, "/images/t-1.png");
        let written = std::fs::read(dir.path().join("outputs").join("t-1.png")).unwrap();
        assert_eq!(written, b"png-bytes");
    }

    #[tokio::test]
    async fn save_never_overwrites_existing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        store.save("t-1.png", b"first").await.unwrap();

        let err = store.save("t-1.png", b"second").await.unwrap_err();

        assert_matches!(err, ArtifactError::AlreadyExists(name) if name == "t-1.png");
        assert_eq!(std::fs::read(dir.path().join("t-1.png")).unwrap(), b"first");
    }

    #[tokio::test]
    async fn save_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());

        let err = store.save("../escape.png", b"x").await.unwrap_err();
        assert_matches!(err, ArtifactError::InvalidName(_));
    }
}
