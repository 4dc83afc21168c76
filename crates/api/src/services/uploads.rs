//! Listing image storage on the local filesystem.
//!
//! Uploaded images are written to the upload directory as
//! `{unix_millis}-{uuid}.{ext}` and served under `/uploads/`. A listing's
//! `image` is either such a stored filename or an absolute URL (seeded data);
//! URLs are never touched on disk.

use std::path::{Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;

/// Longest extension kept from the uploaded filename.
const MAX_EXTENSION_LEN: usize = 8;

/// Errors that can occur while storing an image.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid stored image name: {0:?}")]
    InvalidName(String),
}

/// Whether an image reference is an absolute URL rather than a stored file.
#[must_use]
pub fn is_remote(image: &str) -> bool {
    image.starts_with("http://") || image.starts_with("https://")
}

/// Directory-backed image store.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The upload directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the upload directory if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `UploadError::Io` if the directory cannot be created.
    pub async fn ensure_dir(&self) -> Result<(), UploadError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Write an uploaded image and return its stored filename.
    ///
    /// # Errors
    ///
    /// Returns `UploadError::Io` if the file cannot be written.
    pub async fn save(&self, original_name: Option<&str>, bytes: &[u8]) -> Result<String, UploadError> {
        let name = stored_name(original_name, chrono::Utc::now().timestamp_millis());
        tokio::fs::write(self.dir.join(&name), bytes).await?;
        tracing::debug!(file = %name, size = bytes.len(), "Stored listing image");
        Ok(name)
    }

    /// Remove a stored image, best effort.
    ///
    /// URLs and missing files are ignored; other failures are logged.
    pub async fn remove(&self, image: &str) {
        if image.is_empty() || is_remote(image) {
            return;
        }

        let path = match self.path_for(image) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(error = %e, "Refusing to remove image");
                return;
            }
        };

        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!(file = %image, "Removed listing image"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(file = %image, error = %e, "Failed to remove listing image"),
        }
    }

    /// Resolve a stored filename inside the upload directory.
    fn path_for(&self, name: &str) -> Result<PathBuf, UploadError> {
        if name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(UploadError::InvalidName(name.to_owned()));
        }
        Ok(self.dir.join(name))
    }
}

/// `{millis}-{uuid}.{ext}`; the extension comes from the uploaded filename.
fn stored_name(original_name: Option<&str>, millis: i64) -> String {
    let ext = original_name
        .and_then(|n| Path::new(n).extension())
        .and_then(|e| e.to_str())
        .filter(|e| {
            !e.is_empty()
                && e.len() <= MAX_EXTENSION_LEN
                && e.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map_or_else(|| "bin".to_owned(), str::to_ascii_lowercase);

    format!("{millis}-{}.{ext}", Uuid::new_v4().simple())
}
