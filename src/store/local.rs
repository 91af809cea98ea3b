use super::{ObjectFetcher, ObjectMetadata, ObjectWriter, StoreError};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// Directory under the root holding per-object metadata sidecars.
const META_DIR: &str = ".meta";

/// Filesystem-backed store for local runs.
///
/// ```text
/// <root>/
/// ├── uploads/photos/cat.jpg                  # bucket "uploads", key "photos/cat.jpg"
/// ├── renditions/photos/cat-200.webp          # gzip bytes as stored
/// └── .meta/renditions/photos/cat-200.webp.json   # content type + encoding
/// ```
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `bucket/key` to a path, refusing anything that would escape
    /// the bucket directory.
    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
        let bucket_ok = !bucket.is_empty()
            && !bucket.starts_with('.')
            && !bucket.contains(['/', '\\']);
        if !bucket_ok {
            return Err(StoreError::InvalidKey(format!("{bucket}/{key}")));
        }
        let relative = Path::new(key);
        let key_ok = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !key_ok {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(bucket).join(relative))
    }

    fn metadata_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root
            .join(META_DIR)
            .join(bucket)
            .join(format!("{key}.json"))
    }

    /// Read the stored metadata sidecar for `bucket/key`, if any.
    pub async fn metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectMetadata>, StoreError> {
        self.object_path(bucket, key)?;
        match tokio::fs::read(self.metadata_path(bucket, key)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Backend(format!("corrupt metadata for {key}: {e}"))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

#[async_trait]
impl ObjectFetcher for LocalStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.object_path(bucket, key)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            ErrorKind::PermissionDenied => StoreError::AccessDenied {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            _ => StoreError::Io(e),
        })
    }
}

#[async_trait]
impl ObjectWriter for LocalStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<(), StoreError> {
        let path = self.object_path(bucket, key)?;
        let sidecar = serde_json::to_vec_pretty(metadata)
            .map_err(|e| StoreError::Backend(format!("metadata serialization: {e}")))?;
        write_file(&path, body).await?;
        write_file(&self.metadata_path(bucket, key), &sidecar).await
    }
}
