// Cascade API server

mod common;
mod executions;
mod nodes;
mod tasks;
mod workflows;

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use cascade_core::{ExecutionRunner, WorkflowExecutor};
use cascade_storage::Database;
use common::AppState;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        nodes::create_node,
        nodes::get_node,
        nodes::add_relationship,
        nodes::get_descendants,
        nodes::attach_task,
        nodes::list_node_tasks,
        tasks::create_task,
        tasks::get_task,
        workflows::create_workflow,
        workflows::get_workflow,
        workflows::attach_node,
        workflows::list_logs,
        workflows::execute_workflow,
        workflows::rollback,
        executions::create_execution,
        executions::get_execution,
        executions::execute,
        executions::cancel,
    ),
    components(
        schemas(
            cascade_core::Node,
            cascade_core::NodeType,
            cascade_core::Task,
            cascade_core::NodeTask,
            cascade_core::NodeTaskStatus,
            cascade_core::Workflow,
            cascade_core::WorkflowStatus,
            cascade_core::WorkflowExecution,
            cascade_core::WorkflowLog,
            cascade_core::LogStatus,
            cascade_core::LogActionType,
            cascade_core::RollbackScope,
            nodes::CreateNodeRequest,
            nodes::CreateRelationshipRequest,
            nodes::AttachTaskRequest,
            tasks::CreateTaskRequest,
            workflows::CreateWorkflowRequest,
            workflows::AttachNodeRequest,
            workflows::RollbackRequest,
            executions::CreateExecutionRequest,
            common::RunAccepted,
        )
    ),
    tags(
        (name = "nodes", description = "Node catalog and graph-shape endpoints"),
        (name = "tasks", description = "Task catalog endpoints"),
        (name = "workflows", description = "Workflow management, execution and rollback"),
        (name = "executions", description = "Workflow execution instances")
    ),
    info(
        title = "Cascade API",
        version = "0.2.0",
        description = "DAG workflow orchestration over HTTP side effects",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cascade_api=debug,cascade_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("cascade-api starting...");
    dotenvy::dotenv().ok();

    // Initialize database
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let db = Arc::new(Database::from_url(&database_url).await?);
    db.migrate().await.context("failed to run migrations")?;

    // Engine and background runner over the same store
    let executor = WorkflowExecutor::new(db.clone(), db.clone());
    let runner = Arc::new(ExecutionRunner::new(executor));

    let state = AppState { db, runner };

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(nodes::routes(state.clone()))
        .merge(tasks::routes(state.clone()))
        .merge(workflows::routes(state.clone()))
        .merge(executions::routes(state.clone()))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!("cascade-api listening on {}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
