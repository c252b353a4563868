//! # Blob Store Adapter
//!
//! Uniform get/put/list/delete over a prefix-addressed key space. No business
//! logic lives here — patient-folder semantics, content types, and typed
//! errors are layered on top by the document store.
//!
//! ## Key Space:
//! Keys are slash-separated strings (e.g. `patient_profile/p001/history.md`).
//! Existence is per-key; "directories" are nothing but shared key prefixes.
//!
//! ## Backends:
//! - `MemoryBlobStore`: in-process map, used by tests and local development
//! - `FsBlobStore`: a file per blob under a root directory
//!
//! A remote object store implements the same trait in deployments that need
//! one; nothing above this module knows which backend is in use.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

/// Metadata for one stored blob, as returned by prefix listing.
#[derive(Debug, Clone, Serialize)]
pub struct BlobMeta {
    /// Full key of the blob
    pub key: String,

    /// Content size in bytes
    pub size: u64,

    /// Last-modified timestamp
    pub updated: DateTime<Utc>,
}

/// Key/value blob storage with list-by-prefix.
///
/// ## Contract:
/// - `get` returns `None` (not an error) for an absent key
/// - `put` creates or overwrites unconditionally
/// - `list` returns every blob whose key starts with `prefix`, sorted by key
/// - `delete` returns whether a blob existed at the key
///
/// Errors mean the backend itself failed, never "not found".
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()>;

    async fn list(&self, prefix: &str) -> Result<Vec<BlobMeta>>;

    async fn delete(&self, key: &str) -> Result<bool>;
}

/// One entry in the in-memory backend.
#[derive(Debug, Clone)]
struct StoredBlob {
    data: Vec<u8>,
    updated: DateTime<Utc>,
}

/// In-memory blob store backed by a sorted map.
///
/// A `BTreeMap` keeps keys ordered, so prefix listing is a filtered scan that
/// comes back already sorted. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, StoredBlob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let blobs = self.blobs.read().unwrap();
        Ok(blobs.get(key).map(|blob| blob.data.clone()))
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let mut blobs = self.blobs.write().unwrap();
        blobs.insert(
            key.to_string(),
            StoredBlob {
                data,
                updated: Utc::now(),
            },
        );
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobMeta>> {
        let blobs = self.blobs.read().unwrap();
        Ok(blobs
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, blob)| BlobMeta {
                key: key.clone(),
                size: blob.data.len() as u64,
                updated: blob.updated,
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut blobs = self.blobs.write().unwrap();
        Ok(blobs.remove(key).is_some())
    }
}

/// Filesystem blob store: one file per blob under `root`.
///
/// Key segments map directly to path segments. Empty directories left behind
/// by deletions are harmless — existence is always judged by listing keys,
/// never by directory presence.
#[derive(Debug)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create the store, making sure the root directory exists.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create storage root {}", root.display()))?;
        Ok(Self { root })
    }

    /// Resolve a key to a path, rejecting keys that would escape the root.
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(anyhow::anyhow!("Invalid blob key: {:?}", key));
        }
        Ok(self.root.join(relative))
    }

    /// Key for a path under the root, with `/` separators on every platform.
    fn key_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(segments.join("/"))
    }

    /// Collect every file under the root with its metadata.
    async fn walk(&self) -> Result<Vec<(PathBuf, std::fs::Metadata)>> {
        let mut files = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("Failed to read directory {}", dir.display()))
                }
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .with_context(|| format!("Failed to walk directory {}", dir.display()))?
            {
                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    pending.push(entry.path());
                } else {
                    files.push((entry.path(), metadata));
                }
            }
        }

        Ok(files)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("Failed to read blob {}", key)),
        }
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create parent directories for {}", key))?;
        }
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("Failed to write blob {}", key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobMeta>> {
        let mut blobs = Vec::new();

        for (path, metadata) in self.walk().await? {
            let Some(key) = self.key_of(&path) else {
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            let updated = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            blobs.push(BlobMeta {
                key,
                size: metadata.len(),
                updated,
            });
        }

        blobs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(blobs)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("Failed to delete blob {}", key)),
        }
    }
}
