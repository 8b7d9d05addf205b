use std::sync::Arc;

use axum::{
    middleware as axum_mw,
    routing::get,
    Router,
};

use crate::engine::JobStore;
use crate::middleware::auth_middleware;

mod jobs;
mod tasks;

/// Minimal job/task CRUD control surface. The engine itself never calls into
/// this layer — it's the external collaborator that creates, updates, and
/// soft-deletes jobs on behalf of their owning user.
pub fn api_router(store: Arc<dyn JobStore>) -> Router {
    Router::new()
        .route("/jobs", get(jobs::list).post(jobs::create))
        .route(
            "/jobs/{id}",
            get(jobs::get_one).patch(jobs::update).delete(jobs::remove),
        )
        .route("/jobs/{id}/tasks", get(tasks::list_by_job))
        .route("/tasks/{id}", get(tasks::get_one))
        .layer(axum_mw::from_fn(auth_middleware))
        .with_state(store)
}
