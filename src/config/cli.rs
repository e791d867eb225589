use crate::core::Storage;
use crate::utils::error::Result;
use std::path::{Path, PathBuf};

/// File storage rooted at a directory (presets live here).
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.base_path.join(path)
    }
}

impl Storage for LocalStorage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let data = tokio::fs::read(self.full_path(path)).await?;
        Ok(data)
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(path);

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(full_path, data).await?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> bool {
        tokio::fs::try_exists(self.full_path(path))
            .await
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());

        assert!(!storage.exists("nested/presets.json").await);
        storage
            .write_file("nested/presets.json", b"{\"Presets\":[]}")
            .await
            .unwrap();
        assert!(storage.exists("nested/presets.json").await);

        let data = storage.read_file("nested/presets.json").await.unwrap();
        assert_eq!(data, b"{\"Presets\":[]}");
        assert!(storage.read_file("missing.json").await.is_err());
    }
}
