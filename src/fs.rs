use std::future::Future;
use std::path::Path;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub path: String,
    pub size: u64,
}

/// Host filesystem access used by the local attachment sources.
pub trait FileAccess: Send + Sync {
    /// File bytes as base64, `None` when unreadable.
    fn read_base64(&self, path: &str) -> impl Future<Output = Option<String>> + Send;

    fn exists(&self, path: &str) -> impl Future<Output = bool> + Send;

    fn file_info(&self, path: &str) -> impl Future<Output = Option<FileInfo>> + Send;

    fn is_dir(&self, path: &str) -> impl Future<Output = bool> + Send;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl FileAccess for LocalFs {
    async fn read_base64(&self, path: &str) -> Option<String> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Some(STANDARD.encode(bytes)),
            Err(e) => {
                warn!(path, "failed to read file: {e}");
                None
            }
        }
    }

    async fn exists(&self, path: &str) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn file_info(&self, path: &str) -> Option<FileInfo> {
        let meta = tokio::fs::metadata(path).await.ok()?;
        if !meta.is_file() {
            return None;
        }
        let name = Path::new(path).file_name()?.to_string_lossy().into_owned();
        Some(FileInfo {
            name,
            path: path.to_string(),
            size: meta.len(),
        })
    }

    async fn is_dir(&self, path: &str) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_fs_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();
        let path = path.to_string_lossy().into_owned();

        let fs = LocalFs;
        assert!(fs.exists(&path).await);
        assert_eq!(fs.read_base64(&path).await.as_deref(), Some("aGVsbG8="));

        let info = fs.file_info(&path).await.unwrap();
        assert_eq!(info.name, "notes.txt");
        assert_eq!(info.size, 5);

        assert!(fs.is_dir(&dir.path().to_string_lossy()).await);
        assert!(!fs.is_dir(&path).await);
    }

    #[tokio::test]
    async fn test_local_fs_missing_file() {
        let fs = LocalFs;
        assert!(!fs.exists("/definitely/not/here.bin").await);
        assert_eq!(fs.read_base64("/definitely/not/here.bin").await, None);
        assert_eq!(fs.file_info("/definitely/not/here.bin").await, None);
    }
}
