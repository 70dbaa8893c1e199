use std::fmt::Debug;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;

use crate::documents::domain::{BlobReference, UploadedFile};

#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    #[error("media host returned {status}: {detail}")]
    Upstream { status: u16, detail: String },
    #[error("media host unreachable: {0}")]
    Transport(String),
    #[error("unexpected media host response: {0}")]
    InvalidResponse(String),
    #[error("local media storage failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("refusing to touch path outside the media root: {0}")]
    InvalidPath(String),
}

/// Opaque file host. Calls may fail independently of the local store.
#[async_trait]
pub trait BlobStore: Debug + Send + Sync {
    async fn store(&self, file: UploadedFile, name: &str) -> Result<BlobReference, BlobStoreError>;
    async fn delete(&self, id: &str) -> Result<(), BlobStoreError>;
    async fn rename(&self, id: &str, name: &str) -> Result<(), BlobStoreError>;
}

/// Writes files beneath a media root, dated the way the upload pages expect.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
    prefix: String,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_prefix(root, "user_uploads")
    }

    pub fn with_prefix(root: impl Into<PathBuf>, prefix: &str) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, BlobStoreError> {
        let candidate = Path::new(relative);
        let escapes = candidate
            .components()
            .any(|part| !matches!(part, Component::Normal(_)));
        if relative.is_empty() || escapes {
            return Err(BlobStoreError::InvalidPath(relative.to_string()));
        }
        Ok(self.root.join(candidate))
    }
}

/// Keeps alphanumerics, dots, dashes, and underscores; everything else becomes `_`.
pub(crate) fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn store(&self, file: UploadedFile, name: &str) -> Result<BlobReference, BlobStoreError> {
        let dated = Utc::now().format("%Y/%m/%d").to_string();
        let directory = format!("{}/{}", self.prefix, dated);
        tokio::fs::create_dir_all(self.resolve(&directory)?).await?;

        let file_name = sanitize_file_name(&file.file_name);
        let mut relative = format!("{directory}/{file_name}");
        let mut attempt = 1;
        while tokio::fs::try_exists(self.resolve(&relative)?).await? {
            relative = format!("{directory}/{attempt}_{file_name}");
            attempt += 1;
        }

        tokio::fs::write(self.resolve(&relative)?, &file.bytes).await?;
        Ok(BlobReference::Local {
            path: relative,
            display_name: name.to_string(),
        })
    }

    async fn delete(&self, id: &str) -> Result<(), BlobStoreError> {
        match tokio::fs::remove_file(self.resolve(id)?).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn rename(&self, id: &str, _name: &str) -> Result<(), BlobStoreError> {
        // Display names live on the reference; the file on disk keeps its path.
        self.resolve(id).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_root(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("loan-docs-blob-{label}-{}", std::process::id()))
    }

    #[test]
    fn sanitizes_client_supplied_names() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\scan 01.pdf"), "scan_01.pdf");
        assert_eq!(sanitize_file_name(".."), "document");
    }

    #[test]
    fn rejects_paths_escaping_the_root() {
        let store = LocalBlobStore::new(scratch_root("escape"));
        assert!(matches!(
            store.resolve("../secrets"),
            Err(BlobStoreError::InvalidPath(_))
        ));
        assert!(matches!(
            store.resolve("/etc/passwd"),
            Err(BlobStoreError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn stores_and_deletes_files_under_the_root() {
        let root = scratch_root("roundtrip");
        let store = LocalBlobStore::new(&root);

        let first = store
            .store(UploadedFile::new("w2.pdf", b"one".to_vec()), "W2 - w2.pdf")
            .await
            .expect("stored");
        let second = store
            .store(UploadedFile::new("w2.pdf", b"two".to_vec()), "W2 - w2.pdf")
            .await
            .expect("stored again");

        assert_ne!(first.storage_id(), second.storage_id());
        assert_eq!(first.display_name(), "W2 - w2.pdf");
        assert!(first.url().starts_with("/media/user_uploads/"));

        let on_disk = root.join(second.storage_id());
        assert_eq!(std::fs::read(&on_disk).expect("file written"), b"two");

        store.delete(second.storage_id()).await.expect("deleted");
        assert!(!on_disk.exists());
        store
            .delete(second.storage_id())
            .await
            .expect("deleting twice is a no-op");

        let _ = std::fs::remove_dir_all(root);
    }
}
