use anyhow::{Result, bail};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

/// Bucket-on-disk object store for uploaded food photos.
///
/// Each object is a single flat file at `{root}/{bucket}/{key}`. Keys are
/// opaque, generated by [`ObjectStore::unique_key`], and never reused.
pub struct ObjectStore {
    root: PathBuf,
    bucket: String,
}

impl ObjectStore {
    pub async fn new(root: PathBuf, bucket: String) -> Result<Self> {
        fs::create_dir_all(root.join(&bucket)).await?;
        info!("Object storage at {} (bucket {})", root.display(), bucket);
        Ok(Self { root, bucket })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Generate a globally unique object key, keeping the original file
    /// extension when it looks sane.
    pub fn unique_key(original_filename: Option<&str>) -> String {
        let id = Uuid::new_v4();
        let ext = original_filename
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(char::is_alphanumeric));
        match ext {
            Some(ext) => format!("{}.{}", id, ext.to_ascii_lowercase()),
            None => id.to_string(),
        }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        // Keys are single path components; anything else is traversal.
        if key.is_empty() || key.contains('/') || key.contains('\\') || key.contains("..") {
            bail!("Invalid object key: {}", key);
        }
        Ok(self.root.join(&self.bucket).join(key))
    }

    /// Store an object under the given key.
    pub async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.object_path(key)?;
        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    /// Fetch an object's bytes, or None if no such key exists.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
