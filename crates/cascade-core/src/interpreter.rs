// Node interpreter: per-type dispatch
//
// Interpretation is decomposed the same way as the executor/workflow split
// elsewhere in the engine: interpret() performs the node's side effects and
// returns a NodeAction; the executor owns the frontier and applies it.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, WorkflowError};
use crate::executor::RunContext;
use crate::model::{LogStatus, NewWorkflowLog, Node, NodeType};
use crate::task_runner::TaskRunner;
use crate::traits::{ConditionPredicate, GraphStore, Journal};

/// Scheduling decision returned to the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeAction {
    /// Push these nodes onto the frontier
    Enqueue(Vec<Uuid>),
    /// Fork: run one strand per child and barrier on all of them
    Branch(Vec<Uuid>),
    /// Join with incomplete parents; nothing ran, try again later
    Defer,
    /// Terminal for this branch; nothing to schedule
    Halt,
}

/// Interprets one node: runs its tasks, brackets them with journal rows,
/// and decides what the executor schedules next
pub struct NodeInterpreter<S, J, C> {
    store: Arc<S>,
    journal: Arc<J>,
    condition: Arc<C>,
    runner: TaskRunner<J>,
}

impl<S, J, C> NodeInterpreter<S, J, C>
where
    S: GraphStore,
    J: Journal,
    C: ConditionPredicate,
{
    pub fn new(store: Arc<S>, journal: Arc<J>, condition: Arc<C>) -> Self {
        let runner = TaskRunner::new(journal.clone());
        Self {
            store,
            journal,
            condition,
            runner,
        }
    }

    pub async fn interpret(&self, ctx: &RunContext, node: &Node) -> Result<NodeAction> {
        if node.node_type == NodeType::Join && !self.join_ready(ctx, node).await? {
            debug!(node_id = %node.id, "Join parents incomplete, deferring");
            return Ok(NodeAction::Defer);
        }

        self.journal
            .append(NewWorkflowLog::node(
                ctx.workflow_id,
                node.id,
                LogStatus::Executing,
                "node execution started",
            ))
            .await?;

        if let Err(err) = self.run_tasks(ctx, node).await {
            // A cancelled node is incomplete, not failed
            let row = match &err {
                WorkflowError::Cancelled => NewWorkflowLog::node(
                    ctx.workflow_id,
                    node.id,
                    LogStatus::Cancelled,
                    "node execution cancelled",
                ),
                _ => NewWorkflowLog::node(
                    ctx.workflow_id,
                    node.id,
                    LogStatus::Failed,
                    "node execution failed",
                )
                .with_error(err.to_string()),
            };
            self.journal.append(row).await?;
            return Err(err);
        }

        if let Some(execution_id) = ctx.execution_id {
            self.journal
                .update_execution_cursor(execution_id, Some(node.id), None)
                .await?;
        }

        // The completed row must land before descendants are enqueued so a
        // downstream Join can observe this node as done
        self.journal
            .append(NewWorkflowLog::node(
                ctx.workflow_id,
                node.id,
                LogStatus::Completed,
                "node execution completed",
            ))
            .await?;

        let action = match node.node_type {
            NodeType::Start | NodeType::Task | NodeType::Join => {
                NodeAction::Enqueue(self.child_ids(node.id).await?)
            }
            NodeType::Decision => self.pick_branch(node).await?,
            NodeType::Fork => NodeAction::Branch(self.child_ids(node.id).await?),
            NodeType::End => NodeAction::Halt,
        };
        Ok(action)
    }

    /// Whether every non-End depth-1 parent has a completed execution row
    pub async fn join_ready(&self, ctx: &RunContext, node: &Node) -> Result<bool> {
        let parents = self.store.get_parents(node.id).await?;
        for parent in parents.iter().filter(|p| p.node_type != NodeType::End) {
            if !self
                .journal
                .node_log_exists(ctx.workflow_id, parent.id, LogStatus::Completed)
                .await?
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn run_tasks(&self, ctx: &RunContext, node: &Node) -> Result<()> {
        // Start nodes never run tasks
        if node.node_type == NodeType::Start {
            return Ok(());
        }
        let node_tasks = self.store.get_node_tasks(node.id).await?;
        for node_task in &node_tasks {
            self.runner.execute(ctx, node.id, node_task).await?;
        }
        Ok(())
    }

    /// First child whose predicate holds wins; no match terminates the branch
    async fn pick_branch(&self, node: &Node) -> Result<NodeAction> {
        let node_tasks = self.store.get_node_tasks(node.id).await?;
        let children = self.store.get_children(node.id).await?;
        for child in &children {
            if self.condition.evaluate(node, child, &node_tasks) {
                return Ok(NodeAction::Enqueue(vec![child.id]));
            }
        }
        debug!(node_id = %node.id, "Decision matched no child, branch ends here");
        Ok(NodeAction::Halt)
    }

    async fn child_ids(&self, node_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .store
            .get_children(node_id)
            .await?
            .into_iter()
            .map(|n| n.id)
            .collect())
    }
}
