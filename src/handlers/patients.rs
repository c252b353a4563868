//! # Patient Folder Handlers
//!
//! Folder-level operations. A patient exists exactly while its prefix holds
//! at least one blob, so creation writes the seed document and deletion
//! clears the whole prefix.

use crate::error::ApiResult;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

/// Body of `POST /api/admin/create-patient`.
#[derive(Debug, Deserialize)]
pub struct PatientRequest {
    pub pid: String,
}

/// Query of `DELETE /api/admin/delete-patient`.
#[derive(Debug, Deserialize)]
pub struct PatientQuery {
    pub pid: String,
}

/// Distinct first-level folder names under the root prefix.
pub async fn list_patients(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let patients = state.documents().list_patients().await?;
    Ok(HttpResponse::Ok().json(json!({ "patients": patients })))
}

/// Create a patient folder by seeding its profile document; 400 if the
/// folder already has any file.
pub async fn create_patient(
    state: web::Data<AppState>,
    body: web::Json<PatientRequest>,
) -> ApiResult<HttpResponse> {
    state.documents().create_patient(&body.pid).await?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Patient created",
        "pid": body.pid,
    })))
}

/// Delete a patient folder and every file inside it; 404 if the folder has
/// no files.
pub async fn delete_patient(
    state: web::Data<AppState>,
    query: web::Query<PatientQuery>,
) -> ApiResult<HttpResponse> {
    let deleted = state.documents().delete_patient(&query.pid).await?;

    Ok(HttpResponse::Ok().json(json!({
        "message": format!("Deleted {} files for patient {}", deleted, query.pid),
    })))
}
