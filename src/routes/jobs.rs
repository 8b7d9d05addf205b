use std::sync::Arc;

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::engine::JobStore;
use crate::middleware::AuthUser;
use crate::models::{ApiResponse, CreateJob, Job, UpdateJob};

type ApiError = (StatusCode, Json<serde_json::Value>);

fn internal(e: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()})))
}

/// GET /jobs
pub async fn list(
    Extension(auth): Extension<AuthUser>,
    State(store): State<Arc<dyn JobStore>>,
) -> Result<Json<ApiResponse<Vec<Job>>>, ApiError> {
    let jobs = store.list_jobs(&auth.user_id).await.map_err(internal)?;
    Ok(Json(ApiResponse::new(jobs)))
}

/// POST /jobs
pub async fn create(
    Extension(auth): Extension<AuthUser>,
    State(store): State<Arc<dyn JobStore>>,
    Json(mut body): Json<CreateJob>,
) -> Result<Json<ApiResponse<Job>>, ApiError> {
    if body.name.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, Json(json!({"error": "name is required"}))));
    }
    body.user_id = auth.user_id;
    let job = store.create_job(body).await.map_err(internal)?;
    Ok(Json(ApiResponse::new(job)))
}

/// GET /jobs/:id
pub async fn get_one(
    Extension(auth): Extension<AuthUser>,
    State(store): State<Arc<dyn JobStore>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Job>>, ApiError> {
    let job = store.get_job(id).await.map_err(internal)?;
    match job {
        Some(job) if job.user_id == auth.user_id => Ok(Json(ApiResponse::new(job))),
        _ => Err((StatusCode::NOT_FOUND, Json(json!({"error": "job not found"})))),
    }
}

/// PATCH /jobs/:id
pub async fn update(
    Extension(auth): Extension<AuthUser>,
    State(store): State<Arc<dyn JobStore>>,
    Path(id): Path<Uuid>,
    Json(patch): Json<UpdateJob>,
) -> Result<Json<ApiResponse<Job>>, ApiError> {
    let existing = store.get_job(id).await.map_err(internal)?;
    match existing {
        Some(job) if job.user_id == auth.user_id => {}
        _ => return Err((StatusCode::NOT_FOUND, Json(json!({"error": "job not found"})))),
    }

    let job = store.update_job(id, patch).await.map_err(internal)?;
    match job {
        Some(job) => Ok(Json(ApiResponse::new(job))),
        None => Err((StatusCode::NOT_FOUND, Json(json!({"error": "job not found"})))),
    }
}

/// DELETE /jobs/:id — soft delete. Only the owning user may delete a job.
pub async fn remove(
    Extension(auth): Extension<AuthUser>,
    State(store): State<Arc<dyn JobStore>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let existing = store.get_job(id).await.map_err(internal)?;
    match existing {
        Some(job) if job.user_id == auth.user_id => {}
        _ => return Err((StatusCode::NOT_FOUND, Json(json!({"error": "job not found"})))),
    }

    let deleted = store.soft_delete_job(id).await.map_err(internal)?;
    if deleted {
        Ok(Json(ApiResponse::new(())))
    } else {
        Err((StatusCode::NOT_FOUND, Json(json!({"error": "job not found"}))))
    }
}
