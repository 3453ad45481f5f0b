// Shared state and DTOs for the public API

use axum::http::StatusCode;
use cascade_core::{AllTasksCompleted, ExecutionRunner, WorkflowError};
use cascade_storage::Database;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

/// Background runner over the Postgres-backed engine
pub type Runner = ExecutionRunner<Database, Database, AllTasksCompleted>;

/// App state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub runner: Arc<Runner>,
}

/// Response wrapper for list endpoints.
/// All list endpoints return responses wrapped in a `data` field.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListResponse<T> {
    /// Array of items returned by the list operation.
    pub data: Vec<T>,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(data: Vec<T>) -> Self {
        Self { data }
    }
}

/// Acknowledgement for fire-and-forget triggers (execute, cancel)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RunAccepted {
    /// Workflow or execution id the run is keyed by
    pub id: Uuid,
    pub status: String,
}

/// Map engine errors onto HTTP statuses; client errors never touch
/// workflow state
pub fn error_status(err: &WorkflowError) -> StatusCode {
    match err {
        WorkflowError::Invalid(_) => StatusCode::BAD_REQUEST,
        WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
        WorkflowError::Cycle(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
