use std::sync::Arc;

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::engine::JobStore;
use crate::middleware::AuthUser;
use crate::models::{ApiResponse, Task};

type ApiError = (StatusCode, Json<serde_json::Value>);

fn internal(e: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()})))
}

/// GET /jobs/:job_id/tasks
pub async fn list_by_job(
    Extension(auth): Extension<AuthUser>,
    State(store): State<Arc<dyn JobStore>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<Task>>>, ApiError> {
    let job = store.get_job(job_id).await.map_err(internal)?;
    match job {
        Some(job) if job.user_id == auth.user_id => {}
        _ => return Err((StatusCode::NOT_FOUND, Json(json!({"error": "job not found"})))),
    }

    let tasks = store.list_tasks_for_job(job_id).await.map_err(internal)?;
    Ok(Json(ApiResponse::new(tasks)))
}

/// GET /tasks/:id
pub async fn get_one(
    Extension(auth): Extension<AuthUser>,
    State(store): State<Arc<dyn JobStore>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Task>>, ApiError> {
    let task = store.get_task(id).await.map_err(internal)?;
    let Some(task) = task else {
        return Err((StatusCode::NOT_FOUND, Json(json!({"error": "task not found"}))));
    };

    let job = store.get_job(task.cron_job_id).await.map_err(internal)?;
    match job {
        Some(job) if job.user_id == auth.user_id => Ok(Json(ApiResponse::new(task))),
        _ => Err((StatusCode::NOT_FOUND, Json(json!({"error": "task not found"})))),
    }
}
