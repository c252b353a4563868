//! # Storage Module
//!
//! Blob-backed patient document storage.
//!
//! ## Key Components:
//! - **Blob Store Adapter**: uniform get/put/list/delete over string keys,
//!   with in-memory and filesystem backends behind one trait
//! - **Document Store**: `(patient, file)` addressing, media-kind dispatch,
//!   and patient-folder existence semantics on top of the adapter
//!
//! A patient folder is never stored as its own entity: it exists exactly
//! while at least one blob key lives under its prefix.

pub mod blob;
pub mod documents;

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use documents::{DocumentStore, MediaKind, StoreError};
