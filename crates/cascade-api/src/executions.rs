// Workflow execution HTTP routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use cascade_core::{Journal, WorkflowExecution};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::common::{error_status, AppState, RunAccepted};

/// Request to create an execution under a workflow
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateExecutionRequest {
    /// Caller-supplied correlation key
    pub reference_number: String,
}

/// Create execution routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/workflows/:workflow_id/executions",
            post(create_execution),
        )
        .route("/v1/executions/:execution_id", get(get_execution))
        .route("/v1/executions/:execution_id/execute", post(execute))
        .route("/v1/executions/:execution_id/cancel", post(cancel))
        .with_state(state)
}

/// POST /v1/workflows/:workflow_id/executions - Create an execution
#[utoipa::path(
    post,
    path = "/v1/workflows/{workflow_id}/executions",
    request_body = CreateExecutionRequest,
    responses(
        (status = 201, description = "Execution created", body = WorkflowExecution),
        (status = 404, description = "Workflow not found")
    ),
    tag = "executions"
)]
pub async fn create_execution(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    Json(req): Json<CreateExecutionRequest>,
) -> Result<(StatusCode, Json<WorkflowExecution>), StatusCode> {
    // 404 on unknown workflows rather than a foreign-key violation
    state.db.get_workflow(workflow_id).await.map_err(|e| {
        tracing::error!("Failed to resolve workflow {}: {}", workflow_id, e);
        error_status(&e)
    })?;

    let execution = state
        .db
        .create_execution(workflow_id, &req.reference_number)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create execution: {}", e);
            error_status(&e)
        })?;
    Ok((StatusCode::CREATED, Json(execution)))
}

/// GET /v1/executions/:execution_id
#[utoipa::path(
    get,
    path = "/v1/executions/{execution_id}",
    responses(
        (status = 200, description = "Execution found", body = WorkflowExecution),
        (status = 404, description = "Execution not found")
    ),
    tag = "executions"
)]
pub async fn get_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> Result<Json<WorkflowExecution>, StatusCode> {
    let execution = state.db.get_execution(execution_id).await.map_err(|e| {
        tracing::error!("Failed to get execution {}: {}", execution_id, e);
        error_status(&e)
    })?;
    Ok(Json(execution))
}

/// POST /v1/executions/:execution_id/execute - Run in the background
#[utoipa::path(
    post,
    path = "/v1/executions/{execution_id}/execute",
    responses(
        (status = 202, description = "Execution accepted", body = RunAccepted),
        (status = 404, description = "Execution not found")
    ),
    tag = "executions"
)]
pub async fn execute(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> Result<(StatusCode, Json<RunAccepted>), StatusCode> {
    state.db.get_execution(execution_id).await.map_err(|e| {
        tracing::error!("Failed to resolve execution {}: {}", execution_id, e);
        error_status(&e)
    })?;

    state
        .runner
        .start_execution(execution_id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to start execution {}: {}", execution_id, e);
            error_status(&e)
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(RunAccepted {
            id: execution_id,
            status: "executing".to_string(),
        }),
    ))
}

/// POST /v1/executions/:execution_id/cancel - Raise the cancellation signal
#[utoipa::path(
    post,
    path = "/v1/executions/{execution_id}/cancel",
    responses(
        (status = 202, description = "Cancellation requested", body = RunAccepted),
        (status = 404, description = "No active run for this execution")
    ),
    tag = "executions"
)]
pub async fn cancel(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> Result<(StatusCode, Json<RunAccepted>), StatusCode> {
    state.runner.cancel(execution_id).await.map_err(|e| {
        tracing::error!("Failed to cancel execution {}: {}", execution_id, e);
        error_status(&e)
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(RunAccepted {
            id: execution_id,
            status: "cancelling".to_string(),
        }),
    ))
}
