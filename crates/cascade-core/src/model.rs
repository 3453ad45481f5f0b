// Domain model shared by the engine, the storage layer, and the API
//
// Status vocabularies are wire-stable: they round-trip through Display /
// FromStr using the exact strings persisted in Postgres and exposed over
// HTTP.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Node type, dispatched on by the interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum NodeType {
    Start,
    Task,
    Decision,
    Fork,
    Join,
    End,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeType::Start => write!(f, "Start"),
            NodeType::Task => write!(f, "Task"),
            NodeType::Decision => write!(f, "Decision"),
            NodeType::Fork => write!(f, "Fork"),
            NodeType::Join => write!(f, "Join"),
            NodeType::End => write!(f, "End"),
        }
    }
}

impl std::str::FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Start" => Ok(NodeType::Start),
            "Task" => Ok(NodeType::Task),
            "Decision" => Ok(NodeType::Decision),
            "Fork" => Ok(NodeType::Fork),
            "Join" => Ok(NodeType::Join),
            "End" => Ok(NodeType::End),
            _ => Err(format!("Unknown node type: {}", s)),
        }
    }
}

/// Workflow (and workflow execution) status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Idle,
    Executing,
    Completed,
    Error,
    Finished,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Idle => write!(f, "idle"),
            WorkflowStatus::Executing => write!(f, "executing"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Error => write!(f, "error"),
            WorkflowStatus::Finished => write!(f, "finished"),
        }
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(WorkflowStatus::Idle),
            "executing" => Ok(WorkflowStatus::Executing),
            "completed" => Ok(WorkflowStatus::Completed),
            "error" => Ok(WorkflowStatus::Error),
            "finished" => Ok(WorkflowStatus::Finished),
            _ => Err(format!("Unknown workflow status: {}", s)),
        }
    }
}

/// Per-node task status; mutated only by the task runner and rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum NodeTaskStatus {
    Pending,
    Completed,
    Failed,
    Reverted,
}

impl std::fmt::Display for NodeTaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeTaskStatus::Pending => write!(f, "pending"),
            NodeTaskStatus::Completed => write!(f, "completed"),
            NodeTaskStatus::Failed => write!(f, "failed"),
            NodeTaskStatus::Reverted => write!(f, "reverted"),
        }
    }
}

impl std::str::FromStr for NodeTaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NodeTaskStatus::Pending),
            "completed" => Ok(NodeTaskStatus::Completed),
            "failed" => Ok(NodeTaskStatus::Failed),
            "reverted" => Ok(NodeTaskStatus::Reverted),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// Status recorded on a journal row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Executing,
    Completed,
    Failed,
    Cancelled,
    Reverted,
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogStatus::Executing => write!(f, "executing"),
            LogStatus::Completed => write!(f, "completed"),
            LogStatus::Failed => write!(f, "failed"),
            LogStatus::Cancelled => write!(f, "cancelled"),
            LogStatus::Reverted => write!(f, "reverted"),
        }
    }
}

impl std::str::FromStr for LogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "executing" => Ok(LogStatus::Executing),
            "completed" => Ok(LogStatus::Completed),
            "failed" => Ok(LogStatus::Failed),
            "cancelled" => Ok(LogStatus::Cancelled),
            "reverted" => Ok(LogStatus::Reverted),
            _ => Err(format!("Unknown log status: {}", s)),
        }
    }
}

/// Whether a journal row was written by forward execution or by rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogActionType {
    Execution,
    Rollback,
}

impl std::fmt::Display for LogActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogActionType::Execution => write!(f, "execution"),
            LogActionType::Rollback => write!(f, "rollback"),
        }
    }
}

impl std::str::FromStr for LogActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "execution" => Ok(LogActionType::Execution),
            "rollback" => Ok(LogActionType::Rollback),
            _ => Err(format!("Unknown log action type: {}", s)),
        }
    }
}

/// How far a rollback walks back along the executed path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RollbackScope {
    /// Walk immediate-ancestor links all the way to the Start node
    Start,
    /// Roll back the current node and its immediate ancestor
    One,
    /// Roll back only the current node and finish the workflow
    Finish,
}

impl std::fmt::Display for RollbackScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollbackScope::Start => write!(f, "start"),
            RollbackScope::One => write!(f, "one"),
            RollbackScope::Finish => write!(f, "finish"),
        }
    }
}

impl std::str::FromStr for RollbackScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(RollbackScope::Start),
            "one" => Ok(RollbackScope::One),
            "finish" => Ok(RollbackScope::Finish),
            _ => Err(format!("Unknown rollback scope: {}", s)),
        }
    }
}

/// A node in the workflow graph
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Node {
    pub id: Uuid,
    pub title: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub description: Option<String>,
    /// Default scope used when a rollback request names no scope
    pub rollback_scope: Option<RollbackScope>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// An HTTP side effect from the shared task catalog; immutable after creation
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    #[serde(rename = "type")]
    pub task_type: NodeType,
    pub http_method: String,
    /// Target URL
    pub action: String,
    /// Request body, sent verbatim
    pub params: String,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A task bound to a node, with per-binding mutable execution state
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NodeTask {
    pub id: Uuid,
    pub node_id: Uuid,
    pub task_id: Uuid,
    pub task_order: i32,
    pub status: NodeTaskStatus,
    pub retry_count: i32,
    pub http_code: Option<i32>,
    pub response: Option<String>,
    pub error: Option<String>,
    pub task: Task,
}

/// A workflow definition pointing into the shared node catalog
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub starting_node_id: Option<Uuid>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A single run of a workflow, correlated by a caller-supplied reference
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub reference_number: String,
    pub status: WorkflowStatus,
    pub last_executed_node_id: Option<Uuid>,
    pub last_executed_task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable journal row
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkflowLog {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub node_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub status: LogStatus,
    pub message: String,
    pub http_code: Option<i32>,
    pub response: Option<String>,
    pub error: Option<String>,
    pub action_type: LogActionType,
    /// Monotonic stamp assigned at write time
    pub executed_at: DateTime<Utc>,
}

/// Input for appending a journal row; `executed_at` is stamped by the journal
#[derive(Debug, Clone)]
pub struct NewWorkflowLog {
    pub workflow_id: Uuid,
    pub node_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub status: LogStatus,
    pub message: String,
    pub http_code: Option<i32>,
    pub response: Option<String>,
    pub error: Option<String>,
    pub action_type: LogActionType,
}

impl NewWorkflowLog {
    /// Workflow-level execution row (no node or task)
    pub fn workflow(workflow_id: Uuid, status: LogStatus, message: impl Into<String>) -> Self {
        Self {
            workflow_id,
            node_id: None,
            task_id: None,
            status,
            message: message.into(),
            http_code: None,
            response: None,
            error: None,
            action_type: LogActionType::Execution,
        }
    }

    /// Node-level execution row
    pub fn node(
        workflow_id: Uuid,
        node_id: Uuid,
        status: LogStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            node_id: Some(node_id),
            ..Self::workflow(workflow_id, status, message)
        }
    }

    /// Task-level execution row
    pub fn task(
        workflow_id: Uuid,
        node_id: Uuid,
        task_id: Uuid,
        status: LogStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            task_id: Some(task_id),
            ..Self::node(workflow_id, node_id, status, message)
        }
    }

    /// Flip the row to the rollback action type
    pub fn for_rollback(mut self) -> Self {
        self.action_type = LogActionType::Rollback;
        self
    }

    /// Attach the HTTP outcome of a task attempt
    pub fn with_http(mut self, http_code: i32, response: impl Into<String>) -> Self {
        self.http_code = Some(http_code);
        self.response = Some(response.into());
        self
    }

    /// Attach an error description
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Input for creating a node
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateNode {
    pub title: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub description: Option<String>,
    pub rollback_scope: Option<RollbackScope>,
}

/// Input for creating a task
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateTask {
    pub title: String,
    #[serde(rename = "type")]
    pub task_type: NodeType,
    pub http_method: String,
    pub action: String,
    pub params: String,
    /// Total attempts are `max_retries + 1`; defaults to 3 when unset
    pub max_retries: Option<i32>,
}

/// Input for creating a workflow
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateWorkflow {
    pub name: String,
    pub description: Option<String>,
    pub starting_node_id: Option<Uuid>,
}
