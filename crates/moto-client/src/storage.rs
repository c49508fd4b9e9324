use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use moto_core::error::AppError;
use moto_core::traits::{ObjectStorage, StorageCapability};

/// Object storage on the local filesystem, served by an external web server.
///
/// Objects are written to `{root}/{key}` and published as
/// `{public_base_url}/{key}`. The backend cannot download by itself, so it
/// asks for bytes.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: Arc<PathBuf>,
    public_base_url: Arc<str>,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: Arc::new(root.into()),
            public_base_url: public_base_url.trim_end_matches('/').into(),
        }
    }

    /// Durable URL of `key`.
    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{key}", self.public_base_url)
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, AppError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(AppError::StorageError(format!("Invalid object key '{key}'")));
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStorage for FsStorage {
    fn capability(&self) -> StorageCapability {
        StorageCapability::ByBytes
    }

    async fn store_by_url(&self, source_url: &str, key: &str) -> Result<String, AppError> {
        Err(AppError::StorageError(format!(
            "filesystem storage cannot fetch {source_url} for {key}; pass bytes instead"
        )))
    }

    async fn store_by_bytes(&self, bytes: Vec<u8>, key: &str) -> Result<String, AppError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::StorageError(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }
        tokio::fs::write(&path, &bytes).await.map_err(|e| {
            AppError::StorageError(format!("Failed to write {}: {e}", path.display()))
        })?;

        tracing::debug!(%key, size = bytes.len(), "Object stored");
        Ok(self.url_for(key))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn stores_bytes_under_key() {
        let tmp = TempDir::new().unwrap();
        let storage = FsStorage::new(tmp.path(), "https://static.example/media/");

        let url = storage
            .store_by_bytes(vec![1, 2, 3], "listings/abc/0")
            .await
            .unwrap();

        assert_eq!(url, "https://static.example/media/listings/abc/0");
        let written = std::fs::read(tmp.path().join("listings/abc/0")).unwrap();
        assert_eq!(written, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn overwrites_same_key() {
        let tmp = TempDir::new().unwrap();
        let storage = FsStorage::new(tmp.path(), "https://static.example");

        storage.store_by_bytes(vec![1], "listings/a/0").await.unwrap();
        storage.store_by_bytes(vec![2], "listings/a/0").await.unwrap();

        assert_eq!(std::fs::read(tmp.path().join("listings/a/0")).unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let tmp = TempDir::new().unwrap();
        let storage = FsStorage::new(tmp.path(), "https://static.example");

        for key in ["../outside", "/etc/passwd", "", "listings/../../x"] {
            let err = storage.store_by_bytes(vec![0], key).await.unwrap_err();
            assert!(matches!(err, AppError::StorageError(_)), "{key}");
        }
    }

    #[tokio::test]
    async fn by_url_is_not_supported() {
        let tmp = TempDir::new().unwrap();
        let storage = FsStorage::new(tmp.path(), "https://static.example");

        assert_eq!(storage.capability(), StorageCapability::ByBytes);
        assert!(
            storage
                .store_by_url("https://jmmoto.ru/a.jpg", "listings/a/0")
                .await
                .is_err()
        );
    }
}
