//! Object storage abstraction and deterministic key derivation.
//!
//! All cross-stage state flows through keyed object storage, never through
//! in-process memory. Keys are pure functions of immutable upstream
//! identity, so duplicate event deliveries converge on the same object and
//! the last successful writer wins.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Prefix for intermediate OCR results within the temp container.
pub const INTERMEDIATE_PREFIX: &str = "ocr/";

/// Errors from object storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {container}/{key}")]
    NotFound { container: String, key: String },

    #[error("storage io error at {container}/{key}: {source}")]
    Io {
        container: String,
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Keyed object storage used for all cross-stage communication.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object's full contents.
    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Write an object, replacing any existing content at the key.
    async fn put(&self, container: &str, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Whether an object exists at the key.
    async fn exists(&self, container: &str, key: &str) -> Result<bool, StorageError>;
}

/// Filesystem-backed object store. Containers map to subdirectories of a
/// single data root.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, container: &str, key: &str) -> PathBuf {
        self.root.join(container).join(key)
    }

    fn io_err(container: &str, key: &str, source: std::io::Error) -> StorageError {
        StorageError::Io {
            container: container.to_string(),
            key: key.to_string(),
            source,
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(container, key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                container: container.to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(Self::io_err(container, key, e)),
        }
    }

    async fn put(&self, container: &str, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.object_path(container, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::io_err(container, key, e))?;
        }

        // Write-then-rename so readers only ever observe complete objects.
        // Concurrent writers race on the same part file; rename keeps the
        // last completed write.
        let part = path.with_extension("part");
        tokio::fs::write(&part, bytes)
            .await
            .map_err(|e| Self::io_err(container, key, e))?;
        tokio::fs::rename(&part, &path)
            .await
            .map_err(|e| Self::io_err(container, key, e))?;
        Ok(())
    }

    async fn exists(&self, container: &str, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(container, key);
        match tokio::fs::try_exists(&path).await {
            Ok(found) => Ok(found),
            Err(e) => Err(Self::io_err(container, key, e)),
        }
    }
}

/// Reduce an object key to a filename stem safe for embedding in derived keys.
pub fn sanitize_stem(name: &str) -> String {
    let base = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");

    let mut stem: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    stem.truncate(64);
    if stem.is_empty() {
        stem.push_str("document");
    }
    stem
}

/// Digest of the immutable source identity (container, key, generation).
fn identity_digest(bucket: &str, name: &str, generation: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bucket.as_bytes());
    hasher.update([0u8]);
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(generation.as_bytes());
    hex::encode(&hasher.finalize()[..6])
}

/// Derive the intermediate OCR-result key for a source object.
///
/// `{INTERMEDIATE_PREFIX}{stem}-{digest12}.json` where the digest covers
/// (container, key, generation). Repeated deliveries for the same source
/// generation converge on the same key.
pub fn intermediate_key(bucket: &str, name: &str, generation: &str) -> String {
    format!(
        "{}{}-{}.json",
        INTERMEDIATE_PREFIX,
        sanitize_stem(name),
        identity_digest(bucket, name, generation)
    )
}

/// Whether a key follows the intermediate OCR-result naming convention.
///
/// The generation handler uses this to ignore unrelated writes in the temp
/// container, including its own.
pub fn is_intermediate_key(key: &str) -> bool {
    key.starts_with(INTERMEDIATE_PREFIX) && key.ends_with(".json")
}

/// Derive the final artifact key from an intermediate key.
///
/// `ocr/{stem}-{digest}.json` becomes `{stem}-{digest}.md`. The digest is
/// retained so distinct source generations never collide in the output
/// container.
pub fn output_key(intermediate: &str) -> String {
    let base = intermediate
        .strip_prefix(INTERMEDIATE_PREFIX)
        .unwrap_or(intermediate);
    let base = base.strip_suffix(".json").unwrap_or(base);
    format!("{}.md", base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_stem() {
        assert_eq!(sanitize_stem("books/My Scan (2).pdf"), "My-Scan--2-");
        assert_eq!(sanitize_stem("plain.pdf"), "plain");
        assert_eq!(sanitize_stem("日本語.pdf"), "---");
    }

    #[test]
    fn test_intermediate_key_deterministic() {
        let a = intermediate_key("incoming", "books/scan.pdf", "1712");
        let b = intermediate_key("incoming", "books/scan.pdf", "1712");
        assert_eq!(a, b);
        assert!(a.starts_with("ocr/scan-"));
        assert!(a.ends_with(".json"));
    }

    #[test]
    fn test_intermediate_key_varies_with_identity() {
        let base = intermediate_key("incoming", "scan.pdf", "1");
        assert_ne!(base, intermediate_key("incoming", "scan.pdf", "2"));
        assert_ne!(base, intermediate_key("other", "scan.pdf", "1"));
        assert_ne!(base, intermediate_key("incoming", "scan2.pdf", "1"));
    }

    #[test]
    fn test_is_intermediate_key() {
        let key = intermediate_key("incoming", "scan.pdf", "1");
        assert!(is_intermediate_key(&key));
        assert!(!is_intermediate_key("scan.pdf"));
        assert!(!is_intermediate_key("ocr/scan.pdf"));
        assert!(!is_intermediate_key("other/scan.json"));
    }

    #[test]
    fn test_output_key() {
        let inter = intermediate_key("incoming", "scan.pdf", "1");
        let out = output_key(&inter);
        assert!(out.ends_with(".md"));
        assert!(!out.contains('/'));
        assert!(out.starts_with("scan-"));
    }

    #[tokio::test]
    async fn test_local_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        assert!(!store.exists("temp", "ocr/a.json").await.unwrap());
        store.put("temp", "ocr/a.json", b"{}").await.unwrap();
        assert!(store.exists("temp", "ocr/a.json").await.unwrap());
        assert_eq!(store.get("temp", "ocr/a.json").await.unwrap(), b"{}");

        // Overwrite wins
        store.put("temp", "ocr/a.json", b"{\"v\":2}").await.unwrap();
        assert_eq!(store.get("temp", "ocr/a.json").await.unwrap(), b"{\"v\":2}");
    }

    #[tokio::test]
    async fn test_local_store_missing_object() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let err = store.get("temp", "missing.json").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }
}
