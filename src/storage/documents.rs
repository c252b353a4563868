//! # Document Store
//!
//! Per-patient file management on top of the blob adapter. A document is one
//! blob at `root/<pid>/<file_name>`; a patient "folder" is nothing stored —
//! patient P exists exactly when at least one blob key lives under
//! `root/P/`. Creating a patient therefore writes one seed document, and
//! deleting a patient deletes every blob under the prefix.
//!
//! ## Media Dispatch:
//! The media kind of a document is inferred from its file-name extension:
//! `json` is structured, `md`/`txt` is markdown text, `png`/`jpg`/`jpeg` are
//! images, everything else is opaque bytes.

use crate::storage::blob::BlobStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// File written when a patient folder is created.
pub const SEED_FILE_NAME: &str = "patient_info.md";

/// Starter content for the seed document.
pub const SEED_FILE_CONTENT: &str = "# Patient Profile\nName: \nAge: ";

/// Typed failures at the document-store boundary.
///
/// Handlers convert these to HTTP responses (see `error::ApiError`); nothing
/// above this module sees a raw backend error.
#[derive(Debug)]
pub enum StoreError {
    /// No blob exists at the derived key.
    FileNotFound { path: String },

    /// The patient folder has zero blobs.
    PatientNotFound { pid: String },

    /// The patient folder already has at least one blob.
    PatientExists { pid: String },

    /// A patient id or file name is not a single, safe path segment.
    InvalidName(String),

    /// The blob backend failed or returned unusable content.
    Unavailable(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::FileNotFound { path } => write!(f, "File not found: {}", path),
            StoreError::PatientNotFound { pid } => write!(f, "Patient not found: {}", pid),
            StoreError::PatientExists { pid } => write!(f, "Patient already exists: {}", pid),
            StoreError::InvalidName(name) => write!(f, "Invalid name: {}", name),
            StoreError::Unavailable(msg) => write!(f, "Storage unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        StoreError::Unavailable(format!("{:#}", err))
    }
}

/// Media kind inferred from a file-name extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Json,
    Markdown,
    Png,
    Jpeg,
    Binary,
}

impl MediaKind {
    /// Dispatch on the text after the last `.`, case-insensitive. A name
    /// without a dot falls through to `Binary`.
    pub fn from_file_name(file_name: &str) -> Self {
        let ext = file_name
            .rsplit('.')
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "json" => MediaKind::Json,
            "md" | "txt" => MediaKind::Markdown,
            "png" => MediaKind::Png,
            "jpg" | "jpeg" => MediaKind::Jpeg,
            _ => MediaKind::Binary,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            MediaKind::Json => "application/json",
            MediaKind::Markdown => "text/markdown",
            MediaKind::Png => "image/png",
            MediaKind::Jpeg => "image/jpeg",
            MediaKind::Binary => "application/octet-stream",
        }
    }
}

/// A fetched document: raw bytes plus the inferred media kind.
#[derive(Debug, Clone)]
pub struct Document {
    pub content: Vec<u8>,
    pub kind: MediaKind,
}

/// One row of a patient's file listing.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentEntry {
    /// File name with the patient prefix stripped
    pub name: String,

    /// Full blob key
    pub full_path: String,

    /// Content size in bytes
    pub size: u64,

    /// Last-modified timestamp
    pub updated: DateTime<Utc>,
}

/// Patient document store over any blob backend.
pub struct DocumentStore {
    blobs: Arc<dyn BlobStore>,
    root: String,
}

impl DocumentStore {
    /// `root` is the key prefix all patient folders live under, without
    /// surrounding slashes (e.g. `patient_profile`).
    pub fn new(blobs: Arc<dyn BlobStore>, root: String) -> Self {
        Self { blobs, root }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Patient ids and file names must be single path segments so the key
    /// mapping stays total and deterministic.
    fn validate_segment(name: &str) -> Result<(), StoreError> {
        let safe = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains('/')
            && !name.contains('\\');
        if safe {
            Ok(())
        } else {
            Err(StoreError::InvalidName(name.to_string()))
        }
    }

    fn blob_key(&self, pid: &str, file_name: &str) -> Result<String, StoreError> {
        Self::validate_segment(pid)?;
        Self::validate_segment(file_name)?;
        Ok(format!("{}/{}/{}", self.root, pid, file_name))
    }

    fn patient_prefix(&self, pid: &str) -> Result<String, StoreError> {
        Self::validate_segment(pid)?;
        Ok(format!("{}/{}/", self.root, pid))
    }

    /// Fetch one document, dispatching its media kind by extension.
    pub async fn fetch(&self, pid: &str, file_name: &str) -> Result<Document, StoreError> {
        let key = self.blob_key(pid, file_name)?;
        match self.blobs.get(&key).await? {
            Some(content) => Ok(Document {
                content,
                kind: MediaKind::from_file_name(file_name),
            }),
            None => Err(StoreError::FileNotFound { path: key }),
        }
    }

    /// Fetch a document as UTF-8 text (used for seed context and scripts).
    pub async fn fetch_text(&self, pid: &str, file_name: &str) -> Result<String, StoreError> {
        let document = self.fetch(pid, file_name).await?;
        String::from_utf8(document.content).map_err(|_| {
            StoreError::Unavailable(format!(
                "Document {}/{} is not valid UTF-8",
                pid, file_name
            ))
        })
    }

    /// Create or overwrite a document. Returns the blob key written.
    pub async fn save(
        &self,
        pid: &str,
        file_name: &str,
        content: Vec<u8>,
    ) -> Result<String, StoreError> {
        let key = self.blob_key(pid, file_name)?;
        self.blobs.put(&key, content).await?;
        info!("Saved document {}", key);
        Ok(key)
    }

    /// List every document under the patient's prefix, names stripped of the
    /// prefix. A zero-length stripped name is the folder's own directory
    /// marker and is excluded.
    pub async fn list(&self, pid: &str) -> Result<Vec<DocumentEntry>, StoreError> {
        let prefix = self.patient_prefix(pid)?;
        let blobs = self.blobs.list(&prefix).await?;

        Ok(blobs
            .into_iter()
            .filter_map(|meta| {
                let name = meta.key.strip_prefix(&prefix)?.to_string();
                if name.is_empty() {
                    return None;
                }
                Some(DocumentEntry {
                    name,
                    full_path: meta.key,
                    size: meta.size,
                    updated: meta.updated,
                })
            })
            .collect())
    }

    /// Delete one document. Absent documents are a typed `FileNotFound`.
    pub async fn remove(&self, pid: &str, file_name: &str) -> Result<(), StoreError> {
        let key = self.blob_key(pid, file_name)?;
        if self.blobs.delete(&key).await? {
            info!("Deleted document {}", key);
            Ok(())
        } else {
            Err(StoreError::FileNotFound { path: key })
        }
    }

    /// Create a patient folder by writing its seed document. Fails if the
    /// folder already holds any blob.
    pub async fn create_patient(&self, pid: &str) -> Result<String, StoreError> {
        let prefix = self.patient_prefix(pid)?;
        if !self.blobs.list(&prefix).await?.is_empty() {
            return Err(StoreError::PatientExists {
                pid: pid.to_string(),
            });
        }

        let key = self
            .save(pid, SEED_FILE_NAME, SEED_FILE_CONTENT.as_bytes().to_vec())
            .await?;
        info!("Created patient folder for {}", pid);
        Ok(key)
    }

    /// Delete every blob under the patient's prefix. Best-effort across
    /// blobs: individual failures are logged and skipped, and the count of
    /// successful deletions is returned. Zero blobs is `PatientNotFound`.
    pub async fn delete_patient(&self, pid: &str) -> Result<usize, StoreError> {
        let prefix = self.patient_prefix(pid)?;
        let blobs = self.blobs.list(&prefix).await?;
        if blobs.is_empty() {
            return Err(StoreError::PatientNotFound {
                pid: pid.to_string(),
            });
        }

        let mut deleted = 0;
        for meta in blobs {
            match self.blobs.delete(&meta.key).await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(err) => warn!("Failed to delete blob {}: {:#}", meta.key, err),
            }
        }

        info!("Deleted patient folder {} ({} blobs)", pid, deleted);
        Ok(deleted)
    }

    /// Distinct first-level folder names under the root prefix.
    pub async fn list_patients(&self) -> Result<Vec<String>, StoreError> {
        let prefix = format!("{}/", self.root);
        let blobs = self.blobs.list(&prefix).await?;

        let patients: BTreeSet<String> = blobs
            .into_iter()
            .filter_map(|meta| {
                let relative = meta.key.strip_prefix(&prefix)?;
                let (pid, rest) = relative.split_once('/')?;
                if pid.is_empty() || rest.is_empty() {
                    return None;
                }
                Some(pid.to_string())
            })
            .collect();

        Ok(patients.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::blob::MemoryBlobStore;

    fn store() -> DocumentStore {
        DocumentStore::new(
            Arc::new(MemoryBlobStore::new()),
            "patient_profile".to_string(),
        )
    }

    #[test]
    fn test_media_kind_dispatch() {
        assert_eq!(MediaKind::from_file_name("labs.json"), MediaKind::Json);
        assert_eq!(MediaKind::from_file_name("history.md"), MediaKind::Markdown);
        assert_eq!(MediaKind::from_file_name("notes.TXT"), MediaKind::Markdown);
        assert_eq!(MediaKind::from_file_name("xray.png"), MediaKind::Png);
        assert_eq!(MediaKind::from_file_name("scan.JPG"), MediaKind::Jpeg);
        assert_eq!(MediaKind::from_file_name("scan.jpeg"), MediaKind::Jpeg);
        assert_eq!(MediaKind::from_file_name("blob.bin"), MediaKind::Binary);
        assert_eq!(MediaKind::from_file_name("README"), MediaKind::Binary);
        assert_eq!(MediaKind::Png.content_type(), "image/png");
        assert_eq!(MediaKind::Markdown.content_type(), "text/markdown");
    }

    #[tokio::test]
    async fn test_document_roundtrip_by_kind() {
        let store = store();

        // JSON: structurally equal after decode
        let labs = br#"{"wbc": 7, "rbc": [4, 5]}"#.to_vec();
        store.save("p001", "labs.json", labs.clone()).await.unwrap();
        let doc = store.fetch("p001", "labs.json").await.unwrap();
        assert_eq!(doc.kind, MediaKind::Json);
        let fetched: serde_json::Value = serde_json::from_slice(&doc.content).unwrap();
        let original: serde_json::Value = serde_json::from_slice(&labs).unwrap();
        assert_eq!(fetched, original);

        // Markdown: text equal
        store
            .save("p001", "history.md", b"# Hx\nAsthma".to_vec())
            .await
            .unwrap();
        let doc = store.fetch("p001", "history.md").await.unwrap();
        assert_eq!(doc.kind, MediaKind::Markdown);
        assert_eq!(doc.content, b"# Hx\nAsthma");

        // PNG: byte-exact with the image content type
        let png = vec![0x89, b'P', b'N', b'G', 0, 1, 2, 3];
        store.save("p001", "xray.png", png.clone()).await.unwrap();
        let doc = store.fetch("p001", "xray.png").await.unwrap();
        assert_eq!(doc.kind, MediaKind::Png);
        assert_eq!(doc.kind.content_type(), "image/png");
        assert_eq!(doc.content, png);
    }

    #[tokio::test]
    async fn test_fetch_missing_reports_derived_path() {
        let store = store();
        match store.fetch("p001", "missing.md").await {
            Err(StoreError::FileNotFound { path }) => {
                assert_eq!(path, "patient_profile/p001/missing.md");
            }
            other => panic!("expected FileNotFound, got {:?}", other.map(|d| d.kind)),
        }
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let store = store();
        store.save("p001", "note.md", b"v1".to_vec()).await.unwrap();
        store.save("p001", "note.md", b"v2".to_vec()).await.unwrap();
        let doc = store.fetch("p001", "note.md").await.unwrap();
        assert_eq!(doc.content, b"v2");
    }

    #[tokio::test]
    async fn test_list_strips_prefix_and_skips_marker() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let store = DocumentStore::new(blobs.clone(), "patient_profile".to_string());

        store.save("p001", "a.md", b"a".to_vec()).await.unwrap();
        store.save("p001", "b.json", b"{}".to_vec()).await.unwrap();
        store.save("p002", "c.md", b"c".to_vec()).await.unwrap();
        // Directory marker, as some object stores materialize folders
        blobs.put("patient_profile/p001/", vec![]).await.unwrap();

        let entries = store.list("p001").await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.md", "b.json"]);
        assert_eq!(entries[0].full_path, "patient_profile/p001/a.md");
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_found() {
        let store = store();
        store.save("p001", "a.md", b"a".to_vec()).await.unwrap();
        assert!(store.remove("p001", "a.md").await.is_ok());
        assert!(matches!(
            store.remove("p001", "a.md").await,
            Err(StoreError::FileNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_patient_twice_fails() {
        let store = store();
        store.create_patient("p001").await.unwrap();

        // Folder now exists via its seed document
        let doc = store.fetch("p001", SEED_FILE_NAME).await.unwrap();
        assert_eq!(doc.content, SEED_FILE_CONTENT.as_bytes());

        assert!(matches!(
            store.create_patient("p001").await,
            Err(StoreError::PatientExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_patient_semantics() {
        let store = store();

        // Zero blobs: not found
        assert!(matches!(
            store.delete_patient("ghost").await,
            Err(StoreError::PatientNotFound { .. })
        ));

        // Three blobs: all deleted, folder disappears from the listing
        store.save("p003", "a.md", b"a".to_vec()).await.unwrap();
        store.save("p003", "b.md", b"b".to_vec()).await.unwrap();
        store.save("p003", "c.png", b"c".to_vec()).await.unwrap();
        store.save("p004", "keep.md", b"k".to_vec()).await.unwrap();

        assert_eq!(store.delete_patient("p003").await.unwrap(), 3);
        assert_eq!(store.list_patients().await.unwrap(), vec!["p004"]);
    }

    #[tokio::test]
    async fn test_list_patients_distinct_first_level() {
        let store = store();
        store.save("p001", "a.md", b"a".to_vec()).await.unwrap();
        store.save("p001", "b.md", b"b".to_vec()).await.unwrap();
        store.save("p002", "a.md", b"a".to_vec()).await.unwrap();

        assert_eq!(store.list_patients().await.unwrap(), vec!["p001", "p002"]);
    }

    #[tokio::test]
    async fn test_segment_validation() {
        let store = store();
        assert!(matches!(
            store.fetch("../etc", "passwd").await,
            Err(StoreError::InvalidName(_))
        ));
        assert!(matches!(
            store.fetch("p001", "a/b.md").await,
            Err(StoreError::InvalidName(_))
        ));
        assert!(matches!(
            store.save("", "a.md", vec![]).await,
            Err(StoreError::InvalidName(_))
        ));
    }
}
