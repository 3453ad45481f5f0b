// Node CRUD and graph-shape HTTP routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use cascade_core::{CreateNode, Node, NodeTask, NodeType, RollbackScope};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::common::{error_status, AppState, ListResponse};

/// Request to create a node
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateNodeRequest {
    pub title: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub description: Option<String>,
    pub rollback_scope: Option<RollbackScope>,
}

/// Request to relate this node (the ancestor) to a descendant
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRelationshipRequest {
    pub descendant_id: Uuid,
}

/// Request to bind a task to a node
#[derive(Debug, Deserialize, ToSchema)]
pub struct AttachTaskRequest {
    pub task_id: Uuid,
    pub task_order: i32,
}

/// Create node routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/nodes", post(create_node))
        .route("/v1/nodes/:node_id", get(get_node))
        .route("/v1/nodes/:node_id/relationships", post(add_relationship))
        .route("/v1/nodes/:node_id/descendants", get(get_descendants))
        .route(
            "/v1/nodes/:node_id/tasks",
            post(attach_task).get(list_node_tasks),
        )
        .with_state(state)
}

/// POST /v1/nodes - Create a new node
#[utoipa::path(
    post,
    path = "/v1/nodes",
    request_body = CreateNodeRequest,
    responses(
        (status = 201, description = "Node created successfully", body = Node),
        (status = 500, description = "Internal server error")
    ),
    tag = "nodes"
)]
pub async fn create_node(
    State(state): State<AppState>,
    Json(req): Json<CreateNodeRequest>,
) -> Result<(StatusCode, Json<Node>), StatusCode> {
    let input = CreateNode {
        title: req.title,
        node_type: req.node_type,
        description: req.description,
        rollback_scope: req.rollback_scope,
    };

    let node = state.db.create_node(input).await.map_err(|e| {
        tracing::error!("Failed to create node: {}", e);
        error_status(&e)
    })?;

    Ok((StatusCode::CREATED, Json(node)))
}

/// GET /v1/nodes/:node_id
#[utoipa::path(
    get,
    path = "/v1/nodes/{node_id}",
    responses(
        (status = 200, description = "Node found", body = Node),
        (status = 404, description = "Node not found")
    ),
    tag = "nodes"
)]
pub async fn get_node(
    State(state): State<AppState>,
    Path(node_id): Path<Uuid>,
) -> Result<Json<Node>, StatusCode> {
    use cascade_core::GraphStore;

    let node = state.db.get_node(node_id).await.map_err(|e| {
        tracing::error!("Failed to get node {}: {}", node_id, e);
        error_status(&e)
    })?;
    Ok(Json(node))
}

/// POST /v1/nodes/:node_id/relationships - Add a descendant edge
#[utoipa::path(
    post,
    path = "/v1/nodes/{node_id}/relationships",
    request_body = CreateRelationshipRequest,
    responses(
        (status = 201, description = "Relationship created"),
        (status = 404, description = "Node not found"),
        (status = 409, description = "Edge would create a cycle")
    ),
    tag = "nodes"
)]
pub async fn add_relationship(
    State(state): State<AppState>,
    Path(node_id): Path<Uuid>,
    Json(req): Json<CreateRelationshipRequest>,
) -> Result<StatusCode, StatusCode> {
    state
        .db
        .add_relationship(node_id, req.descendant_id)
        .await
        .map_err(|e| {
            tracing::error!(
                "Failed to relate {} -> {}: {}",
                node_id,
                req.descendant_id,
                e
            );
            error_status(&e)
        })?;
    Ok(StatusCode::CREATED)
}

/// GET /v1/nodes/:node_id/descendants
#[utoipa::path(
    get,
    path = "/v1/nodes/{node_id}/descendants",
    responses(
        (status = 200, description = "Descendants of the node", body = ListResponse<Node>),
        (status = 500, description = "Internal server error")
    ),
    tag = "nodes"
)]
pub async fn get_descendants(
    State(state): State<AppState>,
    Path(node_id): Path<Uuid>,
) -> Result<Json<ListResponse<Node>>, StatusCode> {
    let nodes = state.db.get_descendants(node_id).await.map_err(|e| {
        tracing::error!("Failed to list descendants of {}: {}", node_id, e);
        error_status(&e)
    })?;
    Ok(Json(nodes.into()))
}

/// POST /v1/nodes/:node_id/tasks - Bind a task to the node
#[utoipa::path(
    post,
    path = "/v1/nodes/{node_id}/tasks",
    request_body = AttachTaskRequest,
    responses(
        (status = 201, description = "Task bound to node", body = NodeTask),
        (status = 404, description = "Node or task not found")
    ),
    tag = "nodes"
)]
pub async fn attach_task(
    State(state): State<AppState>,
    Path(node_id): Path<Uuid>,
    Json(req): Json<AttachTaskRequest>,
) -> Result<(StatusCode, Json<NodeTask>), StatusCode> {
    let node_task = state
        .db
        .add_task_to_node(node_id, req.task_id, req.task_order)
        .await
        .map_err(|e| {
            tracing::error!("Failed to attach task to node {}: {}", node_id, e);
            error_status(&e)
        })?;
    Ok((StatusCode::CREATED, Json(node_task)))
}

/// GET /v1/nodes/:node_id/tasks
#[utoipa::path(
    get,
    path = "/v1/nodes/{node_id}/tasks",
    responses(
        (status = 200, description = "Tasks bound to the node", body = ListResponse<NodeTask>),
        (status = 500, description = "Internal server error")
    ),
    tag = "nodes"
)]
pub async fn list_node_tasks(
    State(state): State<AppState>,
    Path(node_id): Path<Uuid>,
) -> Result<Json<ListResponse<NodeTask>>, StatusCode> {
    use cascade_core::GraphStore;

    let tasks = state.db.get_node_tasks(node_id).await.map_err(|e| {
        tracing::error!("Failed to list tasks of node {}: {}", node_id, e);
        error_status(&e)
    })?;
    Ok(Json(tasks.into()))
}
