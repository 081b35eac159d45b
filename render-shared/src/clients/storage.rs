use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

use crate::errors::{AppError, ErrorCode};

/// Top-level folders under the upload root. Each one is served statically
/// under the public prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageCategory {
    Images,
    Profile,
    Chat,
    Enhanced,
}

impl StorageCategory {
    pub fn dir(&self) -> &'static str {
        match self {
            StorageCategory::Images => "images",
            StorageCategory::Profile => "profile",
            StorageCategory::Chat => "chat",
            StorageCategory::Enhanced => "enhanced",
        }
    }

    pub fn all() -> [StorageCategory; 4] {
        [
            StorageCategory::Images,
            StorageCategory::Profile,
            StorageCategory::Chat,
            StorageCategory::Enhanced,
        ]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("stored file not found: {0}")]
    NotFound(String),

    #[error("invalid storage path: {0}")]
    InvalidPath(String),

    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(path) => {
                AppError::new(ErrorCode::ImageFileMissing, format!("stored file is missing: {path}"))
            }
            StorageError::InvalidPath(path) => {
                AppError::new(ErrorCode::BadRequest, format!("invalid file path: {path}"))
            }
            StorageError::Io(e) => AppError::Internal(anyhow::Error::new(e).context("file storage failed")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Path relative to the upload root, e.g. `images/3f2a....png`.
    pub relative_path: String,
    pub public_url: String,
    pub size_bytes: i64,
}

/// Disk-backed file store rooted at one directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    public_prefix: String,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, public_prefix: &str) -> Self {
        Self {
            root: root.into(),
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the category folders. Called once at startup.
    pub async fn ensure_layout(&self) -> Result<(), StorageError> {
        for category in StorageCategory::all() {
            tokio::fs::create_dir_all(self.root.join(category.dir())).await?;
        }
        tracing::info!(root = %self.root.display(), "upload directories ready");
        Ok(())
    }

    pub fn public_url(&self, relative_path: &str) -> String {
        format!("{}/{}", self.public_prefix, relative_path.trim_start_matches('/'))
    }

    /// Writes `bytes` under a fresh name in `category` and returns where it landed.
    pub async fn save(
        &self,
        category: StorageCategory,
        extension: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, StorageError> {
        let file_name = format!("{}.{}", Uuid::new_v4(), extension.trim_start_matches('.').to_lowercase());
        let relative_path = format!("{}/{}", category.dir(), file_name);
        let dir = self.root.join(category.dir());
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(&file_name), bytes).await?;

        tracing::debug!(path = %relative_path, size = bytes.len(), "file stored");

        Ok(StoredFile {
            public_url: self.public_url(&relative_path),
            relative_path,
            size_bytes: bytes.len() as i64,
        })
    }

    pub async fn read(&self, relative_path: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(relative_path)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(relative_path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Copies an existing file into `category` under a fresh name.
    pub async fn copy(
        &self,
        relative_path: &str,
        category: StorageCategory,
    ) -> Result<StoredFile, StorageError> {
        let bytes = self.read(relative_path).await?;
        let extension = Path::new(relative_path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        self.save(category, extension, &bytes).await
    }

    /// Removes a file. Failures are logged and swallowed: a row whose file
    /// is already gone must still be deletable.
    pub async fn delete_best_effort(&self, relative_path: &str) {
        let path = match self.resolve(relative_path) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "refusing to delete file outside upload root");
                return;
            }
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!(path = %relative_path, "file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %relative_path, "file already missing on delete");
            }
            Err(e) => tracing::warn!(path = %relative_path, error = %e, "failed to remove file"),
        }
    }

    /// Maps a relative path onto the root, rejecting anything that could
    /// escape it.
    fn resolve(&self, relative_path: &str) -> Result<PathBuf, StorageError> {
        let trimmed = relative_path.trim_start_matches(&self.public_prefix).trim_start_matches('/');
        let candidate = Path::new(trimmed);
        let safe = !trimmed.is_empty()
            && candidate
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidPath(relative_path.to_string()));
        }
        Ok(self.root.join(candidate))
    }
}
