// Database rows (internal; the domain model lives in cascade-core)
//
// Status and type columns are stored as their wire strings and parsed on
// the way out. A row that fails to parse is corrupt data, surfaced as a
// persistence error.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use cascade_core::{
    LogActionType, LogStatus, Node, NodeTask, NodeTaskStatus, Result, RollbackScope, Task,
    Workflow, WorkflowError, WorkflowExecution, WorkflowLog, WorkflowStatus,
};

fn parse_column<T>(value: &str, column: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e: String| WorkflowError::persistence(anyhow::anyhow!("corrupt {column} column: {e}")))
}

/// Node row from database
#[derive(Debug, Clone, FromRow)]
pub struct NodeRow {
    pub id: Uuid,
    pub title: String,
    pub node_type: String,
    pub description: Option<String>,
    pub rollback_scope: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl NodeRow {
    pub fn into_node(self) -> Result<Node> {
        let rollback_scope = self
            .rollback_scope
            .as_deref()
            .map(|s| parse_column::<RollbackScope>(s, "rollback_scope"))
            .transpose()?;
        Ok(Node {
            id: self.id,
            title: self.title,
            node_type: parse_column(&self.node_type, "type")?,
            description: self.description,
            rollback_scope,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

/// Task row from database
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub id: Uuid,
    pub title: String,
    pub task_type: String,
    pub http_method: String,
    pub action: String,
    pub params: String,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TaskRow {
    pub fn into_task(self) -> Result<Task> {
        Ok(Task {
            id: self.id,
            title: self.title,
            task_type: parse_column(&self.task_type, "type")?,
            http_method: self.http_method,
            action: self.action,
            params: self.params,
            max_retries: self.max_retries,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

/// Node-task binding joined with its task
#[derive(Debug, Clone, FromRow)]
pub struct NodeTaskRow {
    pub id: Uuid,
    pub node_id: Uuid,
    pub task_id: Uuid,
    pub task_order: i32,
    pub status: String,
    pub retry_count: i32,
    pub http_code: Option<i32>,
    pub response: Option<String>,
    pub error: Option<String>,
    pub task_title: String,
    pub task_type: String,
    pub http_method: String,
    pub action: String,
    pub params: String,
    pub max_retries: i32,
    pub task_created_at: DateTime<Utc>,
    pub task_updated_at: DateTime<Utc>,
    pub task_deleted_at: Option<DateTime<Utc>>,
}

impl NodeTaskRow {
    pub fn into_node_task(self) -> Result<NodeTask> {
        let task = Task {
            id: self.task_id,
            title: self.task_title,
            task_type: parse_column(&self.task_type, "type")?,
            http_method: self.http_method,
            action: self.action,
            params: self.params,
            max_retries: self.max_retries,
            created_at: self.task_created_at,
            updated_at: self.task_updated_at,
            deleted_at: self.task_deleted_at,
        };
        Ok(NodeTask {
            id: self.id,
            node_id: self.node_id,
            task_id: self.task_id,
            task_order: self.task_order,
            status: parse_column::<NodeTaskStatus>(&self.status, "status")?,
            retry_count: self.retry_count,
            http_code: self.http_code,
            response: self.response,
            error: self.error,
            task,
        })
    }
}

/// Workflow row from database
#[derive(Debug, Clone, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub starting_node_id: Option<Uuid>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl WorkflowRow {
    pub fn into_workflow(self) -> Result<Workflow> {
        Ok(Workflow {
            id: self.id,
            name: self.name,
            description: self.description,
            starting_node_id: self.starting_node_id,
            status: parse_column::<WorkflowStatus>(&self.status, "status")?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

/// Workflow execution row from database
#[derive(Debug, Clone, FromRow)]
pub struct WorkflowExecutionRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub reference_number: String,
    pub status: String,
    pub last_executed_node_id: Option<Uuid>,
    pub last_executed_task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowExecutionRow {
    pub fn into_execution(self) -> Result<WorkflowExecution> {
        Ok(WorkflowExecution {
            id: self.id,
            workflow_id: self.workflow_id,
            reference_number: self.reference_number,
            status: parse_column::<WorkflowStatus>(&self.status, "status")?,
            last_executed_node_id: self.last_executed_node_id,
            last_executed_task_id: self.last_executed_task_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Journal row from database
#[derive(Debug, Clone, FromRow)]
pub struct WorkflowLogRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub node_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub status: String,
    pub message: String,
    pub http_code: Option<i32>,
    pub response: Option<String>,
    pub error: Option<String>,
    pub action_type: String,
    pub executed_at: DateTime<Utc>,
}

impl WorkflowLogRow {
    pub fn into_log(self) -> Result<WorkflowLog> {
        Ok(WorkflowLog {
            id: self.id,
            workflow_id: self.workflow_id,
            node_id: self.node_id,
            task_id: self.task_id,
            status: parse_column::<LogStatus>(&self.status, "status")?,
            message: self.message,
            http_code: self.http_code,
            response: self.response,
            error: self.error,
            action_type: parse_column::<LogActionType>(&self.action_type, "action_type")?,
            executed_at: self.executed_at,
        })
    }
}
