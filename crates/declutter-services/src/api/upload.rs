//! Storage of uploaded capture images.

use std::path::{Path, PathBuf};

use base64::Engine as _;
use tracing::{debug, warn};

use declutter_types::config::StorageConfig;

use super::ApiError;

/// Most images accepted in one upload request.
pub const MAX_BATCH_IMAGES: usize = 16;

/// Longest file name most filesystems accept, in bytes.
pub const MAX_FILE_NAME_LEN: usize = 255;

const DEFAULT_EXTENSION: &str = "jpg";

/// Validates and writes uploaded images into one directory.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
    max_bytes: usize,
    allowed_extensions: Vec<String>,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: usize, allowed_extensions: Vec<String>) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(
            config.upload_path(),
            config.max_upload_bytes,
            config.allowed_extensions.clone(),
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Body limit covering a full batch of base64-encoded images.
    pub fn request_body_limit(&self) -> usize {
        let per_image = self.max_bytes.saturating_mul(4) / 3 + 4096;
        per_image.saturating_mul(MAX_BATCH_IMAGES)
    }

    /// Lower-cased extension of `filename`, or `jpg` when none is given.
    pub fn extension_for(&self, filename: Option<&str>) -> Result<String, ApiError> {
        let ext = match filename {
            None => DEFAULT_EXTENSION.to_string(),
            Some(name) => Path::new(name)
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase)
                .ok_or_else(|| ApiError::BadRequest(format!("file {name:?} has no extension")))?,
        };
        if self.allowed_extensions.iter().any(|a| a == &ext) {
            Ok(ext)
        } else {
            Err(ApiError::BadRequest(format!(
                "file type .{ext} not allowed (allowed: {})",
                self.allowed_extensions.join(", ")
            )))
        }
    }

    /// Decode base64 image data, accepting a `data:` URL prefix.
    pub fn decode(&self, data: &str) -> Result<Vec<u8>, ApiError> {
        let payload = match data.split_once(";base64,") {
            Some((prefix, rest)) if prefix.starts_with("data:") => rest,
            _ => data,
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| ApiError::BadRequest(format!("image is not valid base64: {e}")))?;
        if bytes.is_empty() {
            return Err(ApiError::BadRequest("image payload is empty".into()));
        }
        if bytes.len() > self.max_bytes {
            return Err(ApiError::PayloadTooLarge(format!(
                "image is {} bytes, limit is {}",
                bytes.len(),
                self.max_bytes
            )));
        }
        Ok(bytes)
    }

    /// `<dir>/<session_id>_<captured_at_ms>.<ext>`, rejected when the file
    /// name would not fit on disk.
    pub fn path_for(
        &self,
        session_id: &str,
        captured_at_ms: i64,
        ext: &str,
    ) -> Result<PathBuf, ApiError> {
        let name = format!("{session_id}_{captured_at_ms}.{ext}");
        if name.len() > MAX_FILE_NAME_LEN {
            return Err(ApiError::BadRequest(format!(
                "upload file name is {} bytes, limit is {MAX_FILE_NAME_LEN}",
                name.len()
            )));
        }
        Ok(self.dir.join(name))
    }

    /// Write `bytes` to `path`, a path from [`UploadStore::path_for`].
    pub async fn save(&self, path: &Path, bytes: &[u8]) -> Result<(), ApiError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ApiError::Internal(format!("cannot create upload dir: {e}")))?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| ApiError::Internal(format!("cannot store upload: {e}")))?;
        debug!(path = %path.display(), bytes = bytes.len(), "upload stored");
        Ok(())
    }

    /// Remove uploads of a request that was not accepted.
    pub async fn discard<'a>(&self, paths: impl IntoIterator<Item = &'a Path>) {
        for path in paths {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!(path = %path.display(), error = %e, "cannot remove upload");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> UploadStore {
        UploadStore::new(dir, 8, vec!["JPG".into(), ".png".into()])
    }

    #[test]
    fn extension_checks() {
        let s = store(Path::new("/tmp"));
        assert_eq!(s.extension_for(None).unwrap(), "jpg");
        assert_eq!(s.extension_for(Some("a.PNG")).unwrap(), "png");
        assert!(matches!(s.extension_for(Some("a.gif")), Err(ApiError::BadRequest(_))));
        assert!(matches!(s.extension_for(Some("noext")), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn decode_limits() {
        let s = store(Path::new("/tmp"));
        assert_eq!(s.decode("YWJj").unwrap(), b"abc");
        assert_eq!(s.decode("data:image/png;base64,YWJj").unwrap(), b"abc");
        assert!(matches!(s.decode("!!!"), Err(ApiError::BadRequest(_))));
        assert!(matches!(s.decode(""), Err(ApiError::BadRequest(_))));
        // 9 bytes > limit of 8
        assert!(matches!(s.decode("MTIzNDU2Nzg5"), Err(ApiError::PayloadTooLarge(_))));
    }

    #[tokio::test]
    async fn save_names_file_by_session() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(&tmp.path().join("up"));
        let path = s.path_for("s1", 42, "png").unwrap();
        assert_eq!(path, tmp.path().join("up").join("s1_42.png"));
        s.save(&path, b"abc").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");

        s.discard([path.as_path()]).await;
        assert!(!path.exists());
    }

    #[test]
    fn path_for_rejects_names_too_long_for_disk() {
        let s = store(Path::new("/tmp"));
        let stamp = 1_700_000_000_000_i64;
        // `_` + 13 digits + `.jpg` leaves 237 bytes for the id.
        assert!(s.path_for(&"a".repeat(237), stamp, "jpg").is_ok());
        assert!(matches!(
            s.path_for(&"a".repeat(238), stamp, "jpg"),
            Err(ApiError::BadRequest(_))
        ));
    }
}
