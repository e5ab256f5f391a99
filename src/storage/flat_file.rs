use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{IndexStorage, StorageError};
use crate::index::IndexSnapshot;

/// Whole-index snapshot in one bincode file.
///
/// Saves write to `<path>.tmp` and rename over the target, so a crash
/// mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct FlatFileStorage {
    path: PathBuf,
}

impl FlatFileStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[async_trait]
impl IndexStorage for FlatFileStorage {
    fn name(&self) -> &str {
        "flat_file"
    }

    fn location(&self) -> &Path {
        &self.path
    }

    async fn save(&self, snapshot: &IndexSnapshot) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let bytes = bincode::serialize(snapshot)?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        tracing::debug!(
            path = %self.path.display(),
            entries = snapshot.entries.len(),
            bytes = bytes.len(),
            "index saved"
        );
        Ok(())
    }

    async fn load(&self) -> Result<Option<IndexSnapshot>, StorageError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot: IndexSnapshot = bincode::deserialize(&bytes)?;
        tracing::debug!(
            path = %self.path.display(),
            entries = snapshot.entries.len(),
            "index loaded"
        );
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::sample_snapshot;
    use tempfile::TempDir;

    #[tokio::test]
    async fn round_trips_snapshot() {
        let tmp = TempDir::new().unwrap();
        let storage = FlatFileStorage::new(tmp.path().join("nested/kb.index"));
        let snapshot = sample_snapshot();
        storage.save(&snapshot).await.unwrap();

        let loaded = storage.load().await.unwrap().unwrap();
        assert_eq!(loaded.dims, 3);
        assert_eq!(loaded.updated_at, snapshot.updated_at);
        assert_eq!(loaded.entries.len(), 2);
        assert_eq!(loaded.entries[1].chunk, snapshot.entries[1].chunk);
        assert_eq!(loaded.entries[1].embedding, snapshot.entries[1].embedding);
        assert!(storage.size_bytes().await > 0);
        assert!(!storage.temp_path().exists());
    }

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let tmp = TempDir::new().unwrap();
        let storage = FlatFileStorage::new(tmp.path().join("kb.index"));
        assert!(storage.load().await.unwrap().is_none());
        assert_eq!(storage.size_bytes().await, 0);
    }

    #[tokio::test]
    async fn garbage_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("kb.index");
        std::fs::write(&path, b"not an index").unwrap();
        let err = FlatFileStorage::new(&path).load().await.unwrap_err();
        assert!(matches!(err, StorageError::Encoding(_)));
    }
}
