//! Local filesystem storage for receipt uploads.
//!
//! Files land under `{root}/{service_request_id}/{uuid}.{ext}`; the stored
//! path (relative to the root's parent, e.g. `receipts/<id>/<file>`) is what
//! service requests record.

use anyhow::{Context, Result};
use std::path::{Component, Path, PathBuf};
use url::Url;
use uuid::Uuid;

use crate::domain::WorkflowError;

/// Accepted upload types and the extension they are stored with
const ALLOWED_TYPES: [(&str, &str); 4] = [
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/webp", "webp"),
    ("application/pdf", "pdf"),
];

const PATH_PREFIX: &str = "receipts";

/// A file pulled out of a multipart upload
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct ReceiptStorage {
    root: PathBuf,
    public_base: Url,
    max_bytes: usize,
}

impl ReceiptStorage {
    pub fn new(root: impl Into<PathBuf>, public_base: Url, max_bytes: usize) -> Self {
        Self {
            root: root.into(),
            public_base,
            max_bytes,
        }
    }

    /// Check size and type; returns the extension to store the file with.
    pub fn validate(&self, index: usize, file: &UploadedFile) -> Result<&'static str, WorkflowError> {
        let field = format!("receipts.{index}");
        if file.bytes.is_empty() {
            return Err(WorkflowError::invalid(field, "Uploaded file is empty"));
        }
        if file.bytes.len() > self.max_bytes {
            return Err(WorkflowError::invalid(
                field,
                format!("Files may not exceed {} KB", self.max_bytes / 1024),
            ));
        }

        let content_type = file
            .content_type
            .as_deref()
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_lowercase())
            .unwrap_or_default();
        ALLOWED_TYPES
            .iter()
            .find(|(mime, _)| *mime == content_type)
            .map(|(_, ext)| *ext)
            .ok_or_else(|| {
                WorkflowError::invalid(field, "Only JPEG, PNG, WEBP or PDF receipts are accepted")
            })
    }

    /// Write a validated file and return its stored path.
    pub async fn store(&self, service_request_id: Uuid, extension: &str, bytes: &[u8]) -> Result<String> {
        let dir = self.root.join(service_request_id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let file_name = format!("{}.{}", Uuid::new_v4(), extension);
        tokio::fs::write(dir.join(&file_name), bytes)
            .await
            .context("Failed to write receipt file")?;

        let stored = format!("{}/{}/{}", PATH_PREFIX, service_request_id, file_name);
        tracing::debug!(path = %stored, size = bytes.len(), "Stored receipt file");
        Ok(stored)
    }

    /// Delete a stored file. Missing files are not an error.
    pub async fn delete(&self, stored_path: &str) -> Result<()> {
        let Some(path) = self.resolve(stored_path) else {
            tracing::warn!(path = %stored_path, "Refusing to delete path outside receipt storage");
            return Ok(());
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }

    /// Read a stored file back with its content type; `None` once it is gone.
    pub async fn read(&self, stored_path: &str) -> Result<Option<(Vec<u8>, &'static str)>> {
        let Some(path) = self.resolve(stored_path) else {
            return Ok(None);
        };
        let content_type = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ALLOWED_TYPES.iter().find(|(_, known)| *known == ext))
            .map(|(mime, _)| *mime)
            .unwrap_or("application/octet-stream");

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some((bytes, content_type))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    /// Public URL clients can fetch a stored file from
    pub fn public_url(&self, stored_path: &str) -> Option<String> {
        self.public_base.join(stored_path).ok().map(String::from)
    }

    /// Map a stored path back onto the storage root, rejecting traversal.
    fn resolve(&self, stored_path: &str) -> Option<PathBuf> {
        let normalized = stored_path.replace('\\', "/");
        let relative = normalized
            .trim_start_matches('/')
            .strip_prefix(PATH_PREFIX)?
            .trim_start_matches('/');
        let relative = Path::new(relative);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(root: PathBuf) -> ReceiptStorage {
        ReceiptStorage::new(
            root,
            Url::parse("https://cdn.example/storage/").unwrap(),
            1024,
        )
    }

    fn file(content_type: &str, len: usize) -> UploadedFile {
        UploadedFile {
            file_name: Some("receipt".into()),
            content_type: Some(content_type.into()),
            bytes: vec![7u8; len],
        }
    }

    #[test]
    fn validates_type_and_size() {
        let s = storage(std::env::temp_dir());
        assert_eq!(s.validate(0, &file("image/png", 10)).unwrap(), "png");
        assert_eq!(
            s.validate(0, &file("application/pdf; charset=binary", 10)).unwrap(),
            "pdf"
        );

        let too_big = s.validate(2, &file("image/png", 2048)).unwrap_err();
        assert_eq!(too_big.field(), Some("receipts.2"));
        assert!(s.validate(0, &file("text/html", 10)).is_err());
        assert!(s.validate(0, &file("image/png", 0)).is_err());
    }

    #[test]
    fn public_urls_and_traversal_guard() {
        let s = storage(PathBuf::from("/srv/receipts"));
        assert_eq!(
            s.public_url("receipts/abc/x.png").as_deref(),
            Some("https://cdn.example/storage/receipts/abc/x.png")
        );
        assert_eq!(
            s.resolve("receipts/abc/x.png"),
            Some(PathBuf::from("/srv/receipts/abc/x.png"))
        );
        assert_eq!(s.resolve("receipts/../../etc/passwd"), None);
        assert_eq!(s.resolve("avatars/x.png"), None);
    }

    #[tokio::test]
    async fn store_then_delete_round_trip() {
        let root = std::env::temp_dir().join(format!("repairdesk-test-{}", Uuid::new_v4()));
        let s = storage(root.clone());
        let request_id = Uuid::new_v4();

        let stored = s.store(request_id, "png", b"png-bytes").await.unwrap();
        assert!(stored.starts_with(&format!("receipts/{}/", request_id)));

        let on_disk = s.resolve(&stored).unwrap();
        assert_eq!(tokio::fs::read(&on_disk).await.unwrap(), b"png-bytes");
        let (bytes, content_type) = s.read(&stored).await.unwrap().unwrap();
        assert_eq!(bytes, b"png-bytes");
        assert_eq!(content_type, "image/png");

        s.delete(&stored).await.unwrap();
        assert!(!on_disk.exists());
        // Deleting twice is fine
        s.delete(&stored).await.unwrap();
        assert!(s.read(&stored).await.unwrap().is_none());
        assert!(s.read("receipts/../secrets.png").await.unwrap().is_none());

        let _ = tokio::fs::remove_dir_all(root).await;
    }
}
