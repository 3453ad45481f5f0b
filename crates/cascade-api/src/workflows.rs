// Workflow CRUD, execute, and rollback HTTP routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use cascade_core::{
    CreateWorkflow, GraphStore, RollbackCoordinator, RollbackScope, Workflow, WorkflowError,
    WorkflowLog,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::common::{error_status, AppState, ListResponse, RunAccepted};

/// Request to create a workflow
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateWorkflowRequest {
    pub name: String,
    pub description: Option<String>,
    pub starting_node_id: Option<Uuid>,
}

/// Request to attach a node to a workflow
#[derive(Debug, Deserialize, ToSchema)]
pub struct AttachNodeRequest {
    pub node_id: Uuid,
    #[serde(default)]
    pub is_starting_node: bool,
}

/// Request to roll back from a node. When no scope is given, the node's
/// default rollback scope applies.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RollbackRequest {
    pub node_id: Uuid,
    pub scope: Option<RollbackScope>,
}

/// Create workflow routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/workflows", post(create_workflow))
        .route("/v1/workflows/:workflow_id", get(get_workflow))
        .route("/v1/workflows/:workflow_id/nodes", post(attach_node))
        .route("/v1/workflows/:workflow_id/logs", get(list_logs))
        .route("/v1/workflows/:workflow_id/execute", post(execute_workflow))
        .route("/v1/workflows/:workflow_id/rollback", post(rollback))
        .with_state(state)
}

/// POST /v1/workflows - Create a new workflow
#[utoipa::path(
    post,
    path = "/v1/workflows",
    request_body = CreateWorkflowRequest,
    responses(
        (status = 201, description = "Workflow created successfully", body = Workflow),
        (status = 500, description = "Internal server error")
    ),
    tag = "workflows"
)]
pub async fn create_workflow(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkflowRequest>,
) -> Result<(StatusCode, Json<Workflow>), StatusCode> {
    let input = CreateWorkflow {
        name: req.name,
        description: req.description,
        starting_node_id: req.starting_node_id,
    };

    let workflow = state.db.create_workflow(input).await.map_err(|e| {
        tracing::error!("Failed to create workflow: {}", e);
        error_status(&e)
    })?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

/// GET /v1/workflows/:workflow_id
#[utoipa::path(
    get,
    path = "/v1/workflows/{workflow_id}",
    responses(
        (status = 200, description = "Workflow found", body = Workflow),
        (status = 404, description = "Workflow not found")
    ),
    tag = "workflows"
)]
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> Result<Json<Workflow>, StatusCode> {
    let workflow = state.db.get_workflow(workflow_id).await.map_err(|e| {
        tracing::error!("Failed to get workflow {}: {}", workflow_id, e);
        error_status(&e)
    })?;
    Ok(Json(workflow))
}

/// POST /v1/workflows/:workflow_id/nodes - Attach a node
#[utoipa::path(
    post,
    path = "/v1/workflows/{workflow_id}/nodes",
    request_body = AttachNodeRequest,
    responses(
        (status = 201, description = "Node attached to workflow"),
        (status = 404, description = "Workflow or node not found")
    ),
    tag = "workflows"
)]
pub async fn attach_node(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    Json(req): Json<AttachNodeRequest>,
) -> Result<StatusCode, StatusCode> {
    state
        .db
        .add_workflow_node(workflow_id, req.node_id, req.is_starting_node)
        .await
        .map_err(|e| {
            tracing::error!("Failed to attach node to workflow {}: {}", workflow_id, e);
            error_status(&e)
        })?;
    Ok(StatusCode::CREATED)
}

/// GET /v1/workflows/:workflow_id/logs - Journal rows for the workflow
#[utoipa::path(
    get,
    path = "/v1/workflows/{workflow_id}/logs",
    responses(
        (status = 200, description = "Journal rows ordered by executed_at", body = ListResponse<WorkflowLog>),
        (status = 500, description = "Internal server error")
    ),
    tag = "workflows"
)]
pub async fn list_logs(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> Result<Json<ListResponse<WorkflowLog>>, StatusCode> {
    let logs = state.db.list_workflow_logs(workflow_id).await.map_err(|e| {
        tracing::error!("Failed to list logs of workflow {}: {}", workflow_id, e);
        error_status(&e)
    })?;
    Ok(Json(logs.into()))
}

/// POST /v1/workflows/:workflow_id/execute - Run the workflow in the
/// background
#[utoipa::path(
    post,
    path = "/v1/workflows/{workflow_id}/execute",
    responses(
        (status = 202, description = "Execution accepted", body = RunAccepted),
        (status = 404, description = "Workflow or starting node not found"),
        (status = 409, description = "Graph failed the acyclicity gate")
    ),
    tag = "workflows"
)]
pub async fn execute_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> Result<(StatusCode, Json<RunAccepted>), StatusCode> {
    // Surface graph problems synchronously before the run goes to the
    // background
    let start = state
        .db
        .get_starting_node(workflow_id)
        .await
        .map_err(|e| {
            tracing::error!("Refusing to execute workflow {}: {}", workflow_id, e);
            error_status(&e)
        })?;
    state.db.validate_acyclic(start.id).await.map_err(|e| {
        tracing::error!("Refusing to execute workflow {}: {}", workflow_id, e);
        error_status(&e)
    })?;

    state.runner.start_workflow(workflow_id).await.map_err(|e| {
        tracing::error!("Failed to start workflow {}: {}", workflow_id, e);
        error_status(&e)
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(RunAccepted {
            id: workflow_id,
            status: "executing".to_string(),
        }),
    ))
}

/// POST /v1/workflows/:workflow_id/rollback - Roll back along the executed
/// path
#[utoipa::path(
    post,
    path = "/v1/workflows/{workflow_id}/rollback",
    request_body = RollbackRequest,
    responses(
        (status = 200, description = "Rollback completed"),
        (status = 400, description = "No scope given and the node has no default"),
        (status = 404, description = "Workflow or node not found")
    ),
    tag = "workflows"
)]
pub async fn rollback(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    Json(req): Json<RollbackRequest>,
) -> Result<StatusCode, StatusCode> {
    let result = async {
        state.db.get_workflow(workflow_id).await?;
        let node = state.db.get_node(req.node_id).await?;
        let scope = req.scope.or(node.rollback_scope).ok_or_else(|| {
            WorkflowError::invalid(format!(
                "node {} has no default rollback scope and none was given",
                node.id
            ))
        })?;

        let coordinator = RollbackCoordinator::new(state.db.clone(), state.db.clone());
        coordinator.rollback(workflow_id, req.node_id, scope).await
    }
    .await;

    result.map_err(|e| {
        tracing::error!("Rollback of workflow {} failed: {}", workflow_id, e);
        error_status(&e)
    })?;
    Ok(StatusCode::OK)
}
