// Task catalog HTTP routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use cascade_core::{CreateTask, NodeType, Task};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::common::{error_status, AppState};

/// Request to create a task
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(rename = "type")]
    pub task_type: NodeType,
    pub http_method: String,
    pub action: String,
    pub params: String,
    pub max_retries: Option<i32>,
}

/// Create task routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/tasks", post(create_task))
        .route("/v1/tasks/:task_id", get(get_task))
        .with_state(state)
}

/// POST /v1/tasks - Create a new task
#[utoipa::path(
    post,
    path = "/v1/tasks",
    request_body = CreateTaskRequest,
    responses(
        (status = 201, description = "Task created successfully", body = Task),
        (status = 500, description = "Internal server error")
    ),
    tag = "tasks"
)]
pub async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), StatusCode> {
    let input = CreateTask {
        title: req.title,
        task_type: req.task_type,
        http_method: req.http_method,
        action: req.action,
        params: req.params,
        max_retries: req.max_retries,
    };

    let task = state.db.create_task(input).await.map_err(|e| {
        tracing::error!("Failed to create task: {}", e);
        error_status(&e)
    })?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// GET /v1/tasks/:task_id
#[utoipa::path(
    get,
    path = "/v1/tasks/{task_id}",
    responses(
        (status = 200, description = "Task found", body = Task),
        (status = 404, description = "Task not found")
    ),
    tag = "tasks"
)]
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Task>, StatusCode> {
    let task = state.db.get_task(task_id).await.map_err(|e| {
        tracing::error!("Failed to get task {}: {}", task_id, e);
        error_status(&e)
    })?;
    Ok(Json(task))
}
