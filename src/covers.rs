//! Cover image storage.
//!
//! The catalog only keeps the URL returned by a [`CoverStore`]. The bundled
//! [`DiskCoverStore`] writes images under a directory and hands out URLs that
//! the server's `/covers/{name}` route serves back.

use crate::config::CoversConfig;
use crate::error::{AppError, Result};
use std::path::{Path, PathBuf};

/// Durable storage for uploaded cover images.
pub trait CoverStore: Send + Sync {
    /// Store an image and return the URL it can be fetched from.
    fn store(&self, bytes: &[u8], content_type: &str) -> Result<String>;
}

/// File extension for an accepted image MIME type.
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// MIME type for a stored cover file name.
pub fn content_type_for(name: &str) -> &'static str {
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("jpg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Resolve a stored file name inside `dir`. Names that could escape the
/// directory are rejected.
pub fn resolve_path(dir: &Path, name: &str) -> Option<PathBuf> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');

    valid.then(|| dir.join(name))
}

/// Cover store backed by a local directory.
pub struct DiskCoverStore {
    dir: PathBuf,
    public_base: String,
    max_bytes: usize,
}

impl DiskCoverStore {
    /// Create the store, making sure the directory exists.
    pub fn new(config: &CoversConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.dir)?;

        Ok(Self {
            dir: config.dir.clone(),
            public_base: config.public_base.trim_end_matches('/').to_string(),
            max_bytes: config.max_bytes,
        })
    }

    /// Path of a stored cover.
    pub fn path_for(&self, name: &str) -> Option<PathBuf> {
        resolve_path(&self.dir, name)
    }
}

impl CoverStore for DiskCoverStore {
    fn store(&self, bytes: &[u8], content_type: &str) -> Result<String> {
        let ext = extension_for(content_type).ok_or_else(|| {
            AppError::InvalidFormat("Cover must be a JPEG, PNG or WebP image".to_string())
        })?;

        if bytes.is_empty() {
            return Err(AppError::InvalidFormat("Cover image is empty".to_string()));
        }

        if bytes.len() > self.max_bytes {
            return Err(AppError::InvalidFormat(format!(
                "Cover image exceeds {} bytes",
                self.max_bytes
            )));
        }

        let name = format!("{}.{}", uuid::Uuid::new_v4(), ext);
        std::fs::write(self.dir.join(&name), bytes)
            .map_err(|e| AppError::Storage(format!("Failed to write cover {}: {}", name, e)))?;

        tracing::debug!(name = %name, size = bytes.len(), "Stored cover");
        Ok(format!("{}/{}", self.public_base, name))
    }
}
