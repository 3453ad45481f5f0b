// Rollback coordinator
//
// Walks the executed path in reverse along immediate-ancestor links. The
// compensating side effect itself is a caller-supplied hook; the
// coordinator marks tasks reverted and journals rollback rows. A hook
// failure halts the walk at the failing node and leaves the workflow
// status untouched.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{LogStatus, NewWorkflowLog, Node, NodeTaskStatus, NodeType, RollbackScope, WorkflowStatus};
use crate::traits::{GraphStore, Journal, NoopRollbackHook, RollbackHook};

pub struct RollbackCoordinator<S, J, H = NoopRollbackHook> {
    store: Arc<S>,
    journal: Arc<J>,
    hook: Arc<H>,
}

impl<S, J> RollbackCoordinator<S, J>
where
    S: GraphStore,
    J: Journal,
{
    /// Coordinator without a compensating hook; tasks are only marked
    /// reverted
    pub fn new(store: Arc<S>, journal: Arc<J>) -> Self {
        Self::with_hook(store, journal, Arc::new(NoopRollbackHook))
    }
}

impl<S, J, H> RollbackCoordinator<S, J, H>
where
    S: GraphStore,
    J: Journal,
    H: RollbackHook,
{
    pub fn with_hook(store: Arc<S>, journal: Arc<J>, hook: Arc<H>) -> Self {
        Self {
            store,
            journal,
            hook,
        }
    }

    /// Roll back from `current_node_id` with the given scope:
    /// `finish` reverts only the current node, `one` the current node and
    /// its immediate ancestor, `start` everything up to and including the
    /// Start node. A completed rollback finishes the workflow.
    pub async fn rollback(
        &self,
        workflow_id: Uuid,
        current_node_id: Uuid,
        scope: RollbackScope,
    ) -> Result<()> {
        info!(
            workflow_id = %workflow_id,
            node_id = %current_node_id,
            scope = %scope,
            "Starting rollback"
        );

        match scope {
            RollbackScope::Finish => {
                let node = self.store.get_node(current_node_id).await?;
                self.rollback_node(workflow_id, &node).await?;
            }
            RollbackScope::One => {
                let node = self.store.get_node(current_node_id).await?;
                self.rollback_node(workflow_id, &node).await?;
                let ancestor = self.store.get_immediate_ancestor(current_node_id).await?;
                self.rollback_node(workflow_id, &ancestor).await?;
            }
            RollbackScope::Start => {
                let mut cursor = current_node_id;
                loop {
                    let node = self.store.get_node(cursor).await?;
                    self.rollback_node(workflow_id, &node).await?;
                    if node.node_type == NodeType::Start {
                        break;
                    }
                    cursor = self.store.get_immediate_ancestor(cursor).await?.id;
                }
            }
        }

        self.journal
            .update_workflow_status(workflow_id, WorkflowStatus::Finished)
            .await?;
        info!(workflow_id = %workflow_id, "Rollback completed, workflow finished");
        Ok(())
    }

    async fn rollback_node(&self, workflow_id: Uuid, node: &Node) -> Result<()> {
        debug!(node_id = %node.id, "Rolling back node");
        let node_tasks = self.store.get_node_tasks(node.id).await?;

        // The hook runs first; marking tasks reverted before the
        // compensating call succeeded would lie in the journal
        self.hook.revert(node, &node_tasks).await?;

        for node_task in &node_tasks {
            self.journal
                .append(
                    NewWorkflowLog::task(
                        workflow_id,
                        node.id,
                        node_task.task_id,
                        LogStatus::Reverted,
                        "task reverted",
                    )
                    .for_rollback(),
                )
                .await?;
            self.journal
                .update_task_status(
                    node_task.id,
                    NodeTaskStatus::Reverted,
                    node_task.retry_count,
                    None,
                    None,
                    None,
                )
                .await?;
        }

        self.journal
            .append(
                NewWorkflowLog::node(workflow_id, node.id, LogStatus::Reverted, "node rolled back")
                    .for_rollback(),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkflowError;
    use crate::executor::WorkflowExecutor;
    use crate::inmemory::InMemoryStore;
    use crate::model::*;
    use async_trait::async_trait;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn make_node(store: &InMemoryStore, title: &str, node_type: NodeType) -> Node {
        store
            .create_node(CreateNode {
                title: title.to_string(),
                node_type,
                description: None,
                rollback_scope: None,
            })
            .await
            .unwrap()
    }

    /// Linear S -> A -> E workflow, executed to completion
    async fn executed_linear_workflow(
        store: &Arc<InMemoryStore>,
        server: &MockServer,
    ) -> (Workflow, Node, Node, Node, NodeTask) {
        Mock::given(method("POST"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;

        let s = make_node(store, "s", NodeType::Start).await;
        let a = make_node(store, "a", NodeType::Task).await;
        let e = make_node(store, "e", NodeType::End).await;
        store.add_relationship(s.id, a.id).await.unwrap();
        store.add_relationship(a.id, e.id).await.unwrap();

        let task = store
            .create_task(CreateTask {
                title: "a task".into(),
                task_type: NodeType::Task,
                http_method: "POST".into(),
                action: format!("{}/a", server.uri()),
                params: "{}".into(),
                max_retries: None,
            })
            .await
            .unwrap();
        let node_task = store.add_task_to_node(a.id, task.id, 1).await.unwrap();

        let workflow = store
            .create_workflow(CreateWorkflow {
                name: "wf".into(),
                description: None,
                starting_node_id: None,
            })
            .await
            .unwrap();
        for (node, starting) in [(&s, true), (&a, false), (&e, false)] {
            store
                .add_workflow_node(workflow.id, node.id, starting)
                .await
                .unwrap();
        }

        let executor = WorkflowExecutor::new(store.clone(), store.clone());
        executor.run(workflow.id).await.unwrap();

        (workflow, s, a, e, node_task)
    }

    #[tokio::test]
    async fn rollback_to_start_walks_the_path_in_reverse() {
        let server = MockServer::start().await;
        let store = Arc::new(InMemoryStore::new());
        let (workflow, s, a, e, node_task) = executed_linear_workflow(&store, &server).await;

        let coordinator = RollbackCoordinator::new(store.clone(), store.clone());
        coordinator
            .rollback(workflow.id, e.id, RollbackScope::Start)
            .await
            .unwrap();

        let rollback_nodes: Vec<Uuid> = store
            .logs()
            .await
            .iter()
            .filter(|l| l.action_type == LogActionType::Rollback && l.task_id.is_none())
            .filter_map(|l| l.node_id)
            .collect();
        assert_eq!(rollback_nodes, vec![e.id, a.id, s.id]);

        assert_eq!(
            store.get_node_task(node_task.id).await.unwrap().status,
            NodeTaskStatus::Reverted
        );
        assert_eq!(
            store.get_workflow(workflow.id).await.unwrap().status,
            WorkflowStatus::Finished
        );
    }

    #[tokio::test]
    async fn rollback_one_reverts_current_then_ancestor() {
        let server = MockServer::start().await;
        let store = Arc::new(InMemoryStore::new());
        let (workflow, _s, a, e, _node_task) = executed_linear_workflow(&store, &server).await;

        let coordinator = RollbackCoordinator::new(store.clone(), store.clone());
        coordinator
            .rollback(workflow.id, e.id, RollbackScope::One)
            .await
            .unwrap();

        let rollback_nodes: Vec<Uuid> = store
            .logs()
            .await
            .iter()
            .filter(|l| l.action_type == LogActionType::Rollback && l.task_id.is_none())
            .filter_map(|l| l.node_id)
            .collect();
        assert_eq!(rollback_nodes, vec![e.id, a.id]);
    }

    #[tokio::test]
    async fn rollback_finish_is_idempotent_at_the_task_level() {
        let server = MockServer::start().await;
        let store = Arc::new(InMemoryStore::new());
        let (workflow, _s, a, _e, node_task) = executed_linear_workflow(&store, &server).await;

        let coordinator = RollbackCoordinator::new(store.clone(), store.clone());
        coordinator
            .rollback(workflow.id, a.id, RollbackScope::Finish)
            .await
            .unwrap();
        coordinator
            .rollback(workflow.id, a.id, RollbackScope::Finish)
            .await
            .unwrap();

        let reverted = store.get_node_task(node_task.id).await.unwrap();
        assert_eq!(reverted.status, NodeTaskStatus::Reverted);
        // The completed attempt's outcome is preserved alongside
        assert_eq!(reverted.http_code, Some(200));
        assert_eq!(
            store.get_workflow(workflow.id).await.unwrap().status,
            WorkflowStatus::Finished
        );
    }

    #[tokio::test]
    async fn failing_hook_halts_the_walk_and_keeps_workflow_status() {
        struct RefusesNode(Uuid);

        #[async_trait]
        impl RollbackHook for RefusesNode {
            async fn revert(&self, node: &Node, _tasks: &[NodeTask]) -> Result<()> {
                if node.id == self.0 {
                    return Err(WorkflowError::Downstream {
                        code: 502,
                        body: "compensation rejected".into(),
                    });
                }
                Ok(())
            }
        }

        let server = MockServer::start().await;
        let store = Arc::new(InMemoryStore::new());
        let (workflow, s, a, e, node_task) = executed_linear_workflow(&store, &server).await;

        let coordinator =
            RollbackCoordinator::with_hook(store.clone(), store.clone(), Arc::new(RefusesNode(a.id)));
        let err = coordinator
            .rollback(workflow.id, e.id, RollbackScope::Start)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Downstream { code: 502, .. }));

        // E was reverted, the walk stopped at A, S was never reached
        let rollback_nodes: Vec<Uuid> = store
            .logs()
            .await
            .iter()
            .filter(|l| l.action_type == LogActionType::Rollback && l.task_id.is_none())
            .filter_map(|l| l.node_id)
            .collect();
        assert_eq!(rollback_nodes, vec![e.id]);
        assert!(!rollback_nodes.contains(&s.id));

        assert_eq!(
            store.get_node_task(node_task.id).await.unwrap().status,
            NodeTaskStatus::Completed
        );
        // Prior status survives a halted rollback
        assert_eq!(
            store.get_workflow(workflow.id).await.unwrap().status,
            WorkflowStatus::Completed
        );
    }
}
