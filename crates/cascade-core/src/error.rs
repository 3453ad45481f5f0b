// Error types for the workflow engine

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Errors that can occur while building or executing a workflow
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Bad input (unknown type, malformed method, missing scope, ...)
    #[error("invalid request: {0}")]
    Invalid(String),

    /// Missing node, task, workflow, or execution
    #[error("not found: {0}")]
    NotFound(String),

    /// Adding the edge would violate the closure-table acyclicity invariant
    #[error("cyclic dependency detected at node {0}")]
    Cycle(Uuid),

    /// A task used up its whole retry budget
    #[error("task {task_id} failed after {attempts} attempts")]
    TaskExhausted { task_id: Uuid, attempts: u32 },

    /// The remote endpoint answered outside the [200, 300) window
    #[error("downstream endpoint returned {code}")]
    Downstream { code: u16, body: String },

    /// The request never produced an HTTP response
    #[error("transport error: {0}")]
    Transport(String),

    /// Execution was cancelled by the caller
    #[error("execution cancelled")]
    Cancelled,

    /// Journal or store write failure; unrecoverable by the engine
    #[error("persistence error: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl WorkflowError {
    /// Create an invalid-input error
    pub fn invalid(msg: impl Into<String>) -> Self {
        WorkflowError::Invalid(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        WorkflowError::NotFound(msg.into())
    }

    /// Wrap a store or journal failure
    pub fn persistence(err: impl Into<anyhow::Error>) -> Self {
        WorkflowError::Persistence(err.into())
    }
}
