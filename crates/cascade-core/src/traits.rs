// Engine seams
//
// The executor, interpreter, task runner, and rollback coordinator only see
// these traits. The Postgres implementation lives in cascade-storage; the
// in-memory implementation lives in this crate.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{
    LogStatus, NewWorkflowLog, Node, NodeTask, NodeTaskStatus, WorkflowExecution, WorkflowStatus,
};

/// Read side of the node graph: nodes, closure-table queries, task bindings.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Fetch a node; `NotFound` if absent or soft-deleted
    async fn get_node(&self, node_id: Uuid) -> Result<Node>;

    /// Resolve a workflow's starting node
    async fn get_starting_node(&self, workflow_id: Uuid) -> Result<Node>;

    /// Depth-1 descendants, the set the interpreter schedules from
    async fn get_children(&self, node_id: Uuid) -> Result<Vec<Node>>;

    /// Depth-1 ancestors, used for Join readiness
    async fn get_parents(&self, node_id: Uuid) -> Result<Vec<Node>>;

    /// The unique depth-1 ancestor; `NotFound` when absent or ambiguous
    async fn get_immediate_ancestor(&self, node_id: Uuid) -> Result<Node>;

    /// Task bindings of a node ordered by `task_order`, excluding tasks
    /// typed Start or End and soft-deleted rows
    async fn get_node_tasks(&self, node_id: Uuid) -> Result<Vec<NodeTask>>;

    /// Gate before every run: the start node must have exactly one
    /// self-closure row, at depth 0
    async fn validate_acyclic(&self, start_node_id: Uuid) -> Result<()>;
}

/// Append-only journal plus the mutable cursors it owns.
///
/// Write-ahead discipline: engine components append the journal row before
/// (or in the same logical step as) the matching mutable-field update.
#[async_trait]
pub trait Journal: Send + Sync {
    /// Append a journal row; `executed_at` is stamped at write time
    async fn append(&self, log: NewWorkflowLog) -> Result<()>;

    async fn update_workflow_status(&self, workflow_id: Uuid, status: WorkflowStatus)
        -> Result<()>;

    async fn get_execution(&self, execution_id: Uuid) -> Result<WorkflowExecution>;

    async fn update_execution_status(
        &self,
        execution_id: Uuid,
        status: WorkflowStatus,
    ) -> Result<()>;

    /// Advance the rolling last-executed pointers; `None` leaves a pointer
    /// unchanged
    async fn update_execution_cursor(
        &self,
        execution_id: Uuid,
        node_id: Option<Uuid>,
        task_id: Option<Uuid>,
    ) -> Result<()>;

    /// Update a node-task binding's mutable fields. `None` for http_code,
    /// response, or error leaves the column unchanged.
    async fn update_task_status(
        &self,
        node_task_id: Uuid,
        status: NodeTaskStatus,
        retry_count: i32,
        http_code: Option<i32>,
        response: Option<String>,
        error: Option<String>,
    ) -> Result<()>;

    /// Whether an execution-typed row with the given status exists for the
    /// node; Join readiness reads completion through this
    async fn node_log_exists(
        &self,
        workflow_id: Uuid,
        node_id: Uuid,
        status: LogStatus,
    ) -> Result<bool>;
}

/// Decision-branch predicate, evaluated against each child in turn.
///
/// Must be pure and total: no side effects, an answer for every input.
pub trait ConditionPredicate: Send + Sync {
    fn evaluate(&self, parent: &Node, child: &Node, parent_tasks: &[NodeTask]) -> bool;
}

/// Default predicate: take the branch once every parent task completed.
pub struct AllTasksCompleted;

impl ConditionPredicate for AllTasksCompleted {
    fn evaluate(&self, _parent: &Node, _child: &Node, parent_tasks: &[NodeTask]) -> bool {
        parent_tasks
            .iter()
            .all(|nt| nt.status == NodeTaskStatus::Completed)
    }
}

/// Compensating side effect invoked for each node being rolled back.
///
/// A hook failure halts the rollback at that node; tasks of the failing
/// node keep their prior status.
#[async_trait]
pub trait RollbackHook: Send + Sync {
    async fn revert(&self, node: &Node, tasks: &[NodeTask]) -> Result<()>;
}

/// Default hook: no compensating call, tasks are only marked reverted.
pub struct NoopRollbackHook;

#[async_trait]
impl RollbackHook for NoopRollbackHook {
    async fn revert(&self, _node: &Node, _tasks: &[NodeTask]) -> Result<()> {
        Ok(())
    }
}
