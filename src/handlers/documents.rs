//! # Patient File Handlers
//!
//! The per-file half of the document management API. Bodies and status codes
//! follow the document store contract: typed 404/400s, `500 {error}` for
//! backend failures, success bodies typed by file extension.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::storage::documents::MediaKind;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

/// Body of `POST /api/get-patient-file`.
#[derive(Debug, Deserialize)]
pub struct PatientFileRequest {
    /// e.g. "p001"
    pub pid: String,
    /// e.g. "lab_results.png" or "history.md"
    pub file_name: String,
}

/// Body of `POST /api/admin/save-file`.
#[derive(Debug, Deserialize)]
pub struct SaveFileRequest {
    pub pid: String,
    pub file_name: String,
    pub content: String,
}

/// Query of `DELETE /api/admin/delete-file`.
#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub pid: String,
    pub file_name: String,
}

/// Fetch one patient file, response typed by extension: JSON documents come
/// back parsed, markdown/text as `text/markdown`, images with their image
/// content type, everything else as raw bytes.
pub async fn get_patient_file(
    state: web::Data<AppState>,
    body: web::Json<PatientFileRequest>,
) -> ApiResult<HttpResponse> {
    let request = body.into_inner();
    info!("Fetching document {}/{}", request.pid, request.file_name);

    let document = state
        .documents()
        .fetch(&request.pid, &request.file_name)
        .await?;

    let response = match document.kind {
        MediaKind::Json => {
            let value: serde_json::Value =
                serde_json::from_slice(&document.content).map_err(|err| {
                    ApiError::Storage(format!("Stored JSON document is invalid: {}", err))
                })?;
            HttpResponse::Ok().json(value)
        }
        kind => HttpResponse::Ok()
            .content_type(kind.content_type())
            .body(document.content),
    };

    Ok(response)
}

/// List every file in a patient's folder.
pub async fn list_patient_files(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let pid = path.into_inner();
    let files = state.documents().list(&pid).await?;
    Ok(HttpResponse::Ok().json(json!({ "files": files })))
}

/// Create or overwrite a text-based file.
pub async fn save_patient_file(
    state: web::Data<AppState>,
    body: web::Json<SaveFileRequest>,
) -> ApiResult<HttpResponse> {
    let request = body.into_inner();
    let path = state
        .documents()
        .save(&request.pid, &request.file_name, request.content.into_bytes())
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "File saved successfully",
        "path": path,
    })))
}

/// Delete one file; absent files are a typed 404.
pub async fn delete_patient_file(
    state: web::Data<AppState>,
    query: web::Query<FileQuery>,
) -> ApiResult<HttpResponse> {
    state
        .documents()
        .remove(&query.pid, &query.file_name)
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "File deleted successfully",
    })))
}
