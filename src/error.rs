//! # Error Handling
//!
//! The HTTP boundary for document-store failures. Storage code reports
//! `StoreError` (see `storage::documents`); this module converts those into
//! the typed response bodies of the document API, so no storage or engine
//! fault ever crosses into actix as an unhandled error.
//!
//! ## HTTP Status Code Mapping:
//! - FileNotFound / PatientNotFound → 404
//! - PatientExists / InvalidName → 400
//! - Storage → 500 (full detail logged server-side, message in the body)

use crate::storage::documents::StoreError;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use tracing::error;

/// Errors surfaced by the document management API.
#[derive(Debug)]
pub enum ApiError {
    /// No blob exists at the derived key.
    FileNotFound { path: String },

    /// The patient folder has zero blobs under its prefix.
    PatientNotFound { pid: String },

    /// The patient folder already has at least one blob.
    PatientExists { pid: String },

    /// A patient id or file name is not a valid single path segment.
    InvalidName(String),

    /// The underlying blob store failed or returned something unusable.
    Storage(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::FileNotFound { path } => write!(f, "File not found: {}", path),
            ApiError::PatientNotFound { pid } => write!(f, "Patient not found: {}", pid),
            ApiError::PatientExists { pid } => write!(f, "Patient already exists: {}", pid),
            ApiError::InvalidName(name) => write!(f, "Invalid name: {}", name),
            ApiError::Storage(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

/// Converts each variant into the response body the document API promises.
///
/// The fetch 404 carries the derived blob path so the client can see exactly
/// which key was probed; the patient 404/400 bodies are bare messages.
impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        match self {
            ApiError::FileNotFound { path } => HttpResponse::NotFound().json(json!({
                "error": "File not found",
                "path": path,
            })),
            ApiError::PatientNotFound { .. } => HttpResponse::NotFound().json(json!({
                "error": "Patient not found",
            })),
            ApiError::PatientExists { .. } => HttpResponse::BadRequest().json(json!({
                "error": "Patient already exists",
            })),
            ApiError::InvalidName(name) => HttpResponse::BadRequest().json(json!({
                "error": format!("Invalid name: {}", name),
            })),
            ApiError::Storage(msg) => {
                error!("Storage error surfaced to client: {}", msg);
                HttpResponse::InternalServerError().json(json!({
                    "error": msg,
                }))
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::FileNotFound { path } => ApiError::FileNotFound { path },
            StoreError::PatientNotFound { pid } => ApiError::PatientNotFound { pid },
            StoreError::PatientExists { pid } => ApiError::PatientExists { pid },
            StoreError::InvalidName(name) => ApiError::InvalidName(name),
            StoreError::Unavailable(msg) => ApiError::Storage(msg),
        }
    }
}

/// Shorthand for handler results that surface `ApiError` bodies.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_status_mapping() {
        let err = ApiError::FileNotFound {
            path: "patient_profile/p001/missing.md".to_string(),
        };
        assert_eq!(err.error_response().status(), StatusCode::NOT_FOUND);

        let err = ApiError::PatientExists {
            pid: "p001".to_string(),
        };
        assert_eq!(err.error_response().status(), StatusCode::BAD_REQUEST);

        let err = ApiError::Storage("backend offline".to_string());
        assert_eq!(
            err.error_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_store_error_conversion() {
        let api: ApiError = StoreError::PatientNotFound {
            pid: "p009".to_string(),
        }
        .into();
        match api {
            ApiError::PatientNotFound { pid } => assert_eq!(pid, "p009"),
            other => panic!("unexpected conversion: {:?}", other),
        }
    }
}
