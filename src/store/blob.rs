//! Blob store abstraction (§1: "agnostic to whether the blob store is an
//! S3-compatible service, a local filesystem, or any other byte container
//! addressed by an opaque path"). `BurnStore` talks to this trait only; the
//! concrete backend is swappable without touching any of the burn protocol
//! logic in `store::notes` / `store::files`.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("object already exists: {0}")]
    AlreadyExists(String),
    #[error("blob backend I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` to `path`, overwriting any existing object.
    async fn put(&self, path: &str, bytes: Vec<u8>) -> BlobResult<()>;

    /// Write `bytes` to `path` only if no object exists there yet (§5:
    /// "the store operates in create-or-fail mode"). Returns `Ok(true)` if
    /// this call performed the write, `Ok(false)` if an object already
    /// existed — the upload handler treats that as idempotent success.
    async fn put_if_absent(&self, path: &str, bytes: Vec<u8>) -> BlobResult<bool>;

    async fn get(&self, path: &str) -> BlobResult<Vec<u8>>;

    async fn exists(&self, path: &str) -> BlobResult<bool>;

    /// Remove a single object. Not an error if it's already gone — callers
    /// (the burn protocol, the sweeper) treat delete as idempotent.
    async fn delete(&self, path: &str) -> BlobResult<()>;

    /// List object names directly under `prefix` (used for chunked file
    /// directories and sweeper orphan discovery).
    async fn list_prefix(&self, prefix: &str) -> BlobResult<Vec<String>>;

    /// Remove every object under `prefix` (and the prefix directory itself,
    /// for filesystem-shaped backends). Returns the number of objects
    /// removed.
    async fn delete_prefix(&self, prefix: &str) -> BlobResult<u64>;
}

/// Filesystem-backed implementation: the default, zero-external-dependency
/// blob store. An S3-compatible backend would implement the same trait
/// against object keys instead of paths; nothing above this layer would
/// need to change.
pub struct LocalFsBlobStore {
    root: std::path::PathBuf,
}

impl LocalFsBlobStore {
    pub fn new(root: impl Into<std::path::PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn resolve(&self, path: &str) -> std::path::PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl BlobStore for LocalFsBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> BlobResult<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, bytes).await?;
        Ok(())
    }

    async fn put_if_absent(&self, path: &str, bytes: Vec<u8>) -> BlobResult<bool> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full)
            .await
        {
            Ok(mut file) => {
                use tokio::io::AsyncWriteExt;
                file.write_all(&bytes).await?;
                file.flush().await?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, path: &str) -> BlobResult<Vec<u8>> {
        match tokio::fs::read(self.resolve(path)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &str) -> BlobResult<bool> {
        Ok(tokio::fs::try_exists(self.resolve(path)).await?)
    }

    async fn delete(&self, path: &str) -> BlobResult<()> {
        match tokio::fs::remove_file(self.resolve(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_prefix(&self, prefix: &str) -> BlobResult<Vec<String>> {
        let dir = self.resolve(prefix);
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete_prefix(&self, prefix: &str) -> BlobResult<u64> {
        let dir = self.resolve(prefix);
        let count = self.list_prefix(prefix).await?.len() as u64;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(count),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}
