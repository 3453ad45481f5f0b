// In-memory graph store and journal
//
// Default backend for tests and for embedders that do not want Postgres.
// The closure-table maintenance here is contractually identical to the SQL
// implementation in cascade-storage: self-rows at depth 0, direct edges at
// depth 1, transitive rows derived on every edge insert, cycles rejected
// before anything is written.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Result, WorkflowError};
use crate::model::*;
use crate::traits::{GraphStore, Journal};

#[derive(Default)]
struct State {
    nodes: HashMap<Uuid, Node>,
    closure: HashSet<(Uuid, Uuid, i32)>,
    tasks: HashMap<Uuid, Task>,
    node_tasks: HashMap<Uuid, NodeTask>,
    workflows: HashMap<Uuid, Workflow>,
    workflow_nodes: Vec<(Uuid, Uuid, bool)>,
    executions: HashMap<Uuid, WorkflowExecution>,
    logs: Vec<WorkflowLog>,
}

/// In-memory store implementing both engine seams behind a tokio RwLock
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node and its self-closure row
    pub async fn create_node(&self, input: CreateNode) -> Result<Node> {
        let now = Utc::now();
        let node = Node {
            id: Uuid::now_v7(),
            title: input.title,
            node_type: input.node_type,
            description: input.description,
            rollback_scope: input.rollback_scope,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let mut state = self.state.write().await;
        state.closure.insert((node.id, node.id, 0));
        state.nodes.insert(node.id, node.clone());
        Ok(node)
    }

    pub async fn create_task(&self, input: CreateTask) -> Result<Task> {
        let now = Utc::now();
        let task = Task {
            id: Uuid::now_v7(),
            title: input.title,
            task_type: input.task_type,
            http_method: input.http_method,
            action: input.action,
            params: input.params,
            max_retries: input.max_retries.unwrap_or(3),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let mut state = self.state.write().await;
        state.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    /// Bind a task to a node at the given position
    pub async fn add_task_to_node(
        &self,
        node_id: Uuid,
        task_id: Uuid,
        task_order: i32,
    ) -> Result<NodeTask> {
        let mut state = self.state.write().await;
        if !state.nodes.contains_key(&node_id) {
            return Err(WorkflowError::not_found(format!("node {}", node_id)));
        }
        let task = state
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| WorkflowError::not_found(format!("task {}", task_id)))?;

        let node_task = NodeTask {
            id: Uuid::now_v7(),
            node_id,
            task_id,
            task_order,
            status: NodeTaskStatus::Pending,
            retry_count: 0,
            http_code: None,
            response: None,
            error: None,
            task,
        };
        state.node_tasks.insert(node_task.id, node_task.clone());
        Ok(node_task)
    }

    /// Insert an ancestor -> descendant edge, maintaining the transitive
    /// closure: one row (A', descendant, d + 1) for every existing row
    /// (A', ancestor, d). The ancestor's self-row yields the direct edge at
    /// depth 1. Rejects any edge that would close a cycle.
    pub async fn add_relationship(&self, ancestor: Uuid, descendant: Uuid) -> Result<()> {
        if ancestor == descendant {
            return Err(WorkflowError::Cycle(descendant));
        }

        let mut state = self.state.write().await;
        if !state.nodes.contains_key(&ancestor) {
            return Err(WorkflowError::not_found(format!("node {}", ancestor)));
        }
        if !state.nodes.contains_key(&descendant) {
            return Err(WorkflowError::not_found(format!("node {}", descendant)));
        }
        if state
            .closure
            .iter()
            .any(|(a, d, _)| *a == descendant && *d == ancestor)
        {
            return Err(WorkflowError::Cycle(descendant));
        }

        let new_rows: Vec<(Uuid, Uuid, i32)> = state
            .closure
            .iter()
            .filter(|(_, d, _)| *d == ancestor)
            .map(|(a, _, depth)| (*a, descendant, depth + 1))
            .collect();
        state.closure.extend(new_rows);
        Ok(())
    }

    pub async fn create_workflow(&self, input: CreateWorkflow) -> Result<Workflow> {
        let now = Utc::now();
        let workflow = Workflow {
            id: Uuid::now_v7(),
            name: input.name,
            description: input.description,
            starting_node_id: input.starting_node_id,
            status: WorkflowStatus::Idle,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let mut state = self.state.write().await;
        state.workflows.insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    /// Attach a node to a workflow; a starting node also becomes the
    /// workflow's entry point
    pub async fn add_workflow_node(
        &self,
        workflow_id: Uuid,
        node_id: Uuid,
        is_starting_node: bool,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.nodes.contains_key(&node_id) {
            return Err(WorkflowError::not_found(format!("node {}", node_id)));
        }
        let workflow = state
            .workflows
            .get_mut(&workflow_id)
            .ok_or_else(|| WorkflowError::not_found(format!("workflow {}", workflow_id)))?;
        if is_starting_node {
            workflow.starting_node_id = Some(node_id);
            workflow.updated_at = Utc::now();
        }
        state
            .workflow_nodes
            .push((workflow_id, node_id, is_starting_node));
        Ok(())
    }

    pub async fn create_execution(
        &self,
        workflow_id: Uuid,
        reference_number: &str,
    ) -> Result<WorkflowExecution> {
        let mut state = self.state.write().await;
        if !state.workflows.contains_key(&workflow_id) {
            return Err(WorkflowError::not_found(format!("workflow {}", workflow_id)));
        }
        let now = Utc::now();
        let execution = WorkflowExecution {
            id: Uuid::now_v7(),
            workflow_id,
            reference_number: reference_number.to_string(),
            status: WorkflowStatus::Idle,
            last_executed_node_id: None,
            last_executed_task_id: None,
            created_at: now,
            updated_at: now,
        };
        state.executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    pub async fn get_workflow(&self, workflow_id: Uuid) -> Result<Workflow> {
        self.state
            .read()
            .await
            .workflows
            .get(&workflow_id)
            .filter(|w| w.deleted_at.is_none())
            .cloned()
            .ok_or_else(|| WorkflowError::not_found(format!("workflow {}", workflow_id)))
    }

    pub async fn get_node_task(&self, node_task_id: Uuid) -> Result<NodeTask> {
        self.state
            .read()
            .await
            .node_tasks
            .get(&node_task_id)
            .cloned()
            .ok_or_else(|| WorkflowError::not_found(format!("node task {}", node_task_id)))
    }

    /// All journal rows in append order
    pub async fn logs(&self) -> Vec<WorkflowLog> {
        self.state.read().await.logs.clone()
    }

    /// Raw closure rows, mostly useful to tests
    pub async fn closure_rows(&self) -> Vec<(Uuid, Uuid, i32)> {
        self.state.read().await.closure.iter().copied().collect()
    }

    /// Every node on a closure row from this one (the reflexive closure)
    pub async fn get_descendants(&self, node_id: Uuid) -> Result<Vec<Node>> {
        let state = self.state.read().await;
        let mut nodes = Vec::new();
        if let Some(node) = Self::node_if_live(&state, node_id) {
            nodes.push(node);
        }
        nodes.extend(Self::related(&state, node_id, false, None));
        Ok(nodes)
    }

    fn node_if_live(state: &State, node_id: Uuid) -> Option<Node> {
        state
            .nodes
            .get(&node_id)
            .filter(|n| n.deleted_at.is_none())
            .cloned()
    }

    fn related(state: &State, node_id: Uuid, parents: bool, depth: Option<i32>) -> Vec<Node> {
        let mut ids: Vec<Uuid> = state
            .closure
            .iter()
            .filter(|(a, d, k)| {
                let (from, to) = if parents { (*d, *a) } else { (*a, *d) };
                from == node_id && depth.map_or(true, |want| *k == want) && to != node_id
            })
            .map(|(a, d, _)| if parents { *a } else { *d })
            .collect();
        ids.sort();
        ids.dedup();
        let mut nodes: Vec<Node> = ids
            .into_iter()
            .filter_map(|id| Self::node_if_live(state, id))
            .collect();
        // Stable call-to-call ordering: creation order, ids as tie-breaker
        nodes.sort_by_key(|n| (n.created_at, n.id));
        nodes
    }
}

#[async_trait]
impl GraphStore for InMemoryStore {
    async fn get_node(&self, node_id: Uuid) -> Result<Node> {
        let state = self.state.read().await;
        Self::node_if_live(&state, node_id)
            .ok_or_else(|| WorkflowError::not_found(format!("node {}", node_id)))
    }

    async fn get_starting_node(&self, workflow_id: Uuid) -> Result<Node> {
        let state = self.state.read().await;
        let workflow = state
            .workflows
            .get(&workflow_id)
            .filter(|w| w.deleted_at.is_none())
            .ok_or_else(|| WorkflowError::not_found(format!("workflow {}", workflow_id)))?;
        let start_id = workflow.starting_node_id.ok_or_else(|| {
            WorkflowError::not_found(format!("starting node of workflow {}", workflow_id))
        })?;
        Self::node_if_live(&state, start_id).ok_or_else(|| {
            WorkflowError::not_found(format!("starting node of workflow {}", workflow_id))
        })
    }

    async fn get_children(&self, node_id: Uuid) -> Result<Vec<Node>> {
        let state = self.state.read().await;
        Ok(Self::related(&state, node_id, false, Some(1)))
    }

    async fn get_parents(&self, node_id: Uuid) -> Result<Vec<Node>> {
        let state = self.state.read().await;
        Ok(Self::related(&state, node_id, true, Some(1)))
    }

    async fn get_immediate_ancestor(&self, node_id: Uuid) -> Result<Node> {
        let parents = self.get_parents(node_id).await?;
        match parents.as_slice() {
            [parent] => Ok(parent.clone()),
            _ => Err(WorkflowError::not_found(format!(
                "immediate ancestor of node {}",
                node_id
            ))),
        }
    }

    async fn get_node_tasks(&self, node_id: Uuid) -> Result<Vec<NodeTask>> {
        let state = self.state.read().await;
        let mut tasks: Vec<NodeTask> = state
            .node_tasks
            .values()
            .filter(|nt| {
                nt.node_id == node_id
                    && !matches!(nt.task.task_type, NodeType::Start | NodeType::End)
                    && nt.task.deleted_at.is_none()
            })
            .cloned()
            .collect();
        tasks.sort_by_key(|nt| nt.task_order);
        Ok(tasks)
    }

    async fn validate_acyclic(&self, start_node_id: Uuid) -> Result<()> {
        let state = self.state.read().await;
        let self_rows: Vec<i32> = state
            .closure
            .iter()
            .filter(|(a, d, _)| *a == start_node_id && *d == start_node_id)
            .map(|(_, _, depth)| *depth)
            .collect();
        match self_rows.as_slice() {
            [0] => Ok(()),
            _ => Err(WorkflowError::Cycle(start_node_id)),
        }
    }
}

#[async_trait]
impl Journal for InMemoryStore {
    async fn append(&self, log: NewWorkflowLog) -> Result<()> {
        let mut state = self.state.write().await;
        state.logs.push(WorkflowLog {
            id: Uuid::now_v7(),
            workflow_id: log.workflow_id,
            node_id: log.node_id,
            task_id: log.task_id,
            status: log.status,
            message: log.message,
            http_code: log.http_code,
            response: log.response,
            error: log.error,
            action_type: log.action_type,
            executed_at: Utc::now(),
        });
        Ok(())
    }

    async fn update_workflow_status(
        &self,
        workflow_id: Uuid,
        status: WorkflowStatus,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let workflow = state
            .workflows
            .get_mut(&workflow_id)
            .ok_or_else(|| WorkflowError::not_found(format!("workflow {}", workflow_id)))?;
        workflow.status = status;
        workflow.updated_at = Utc::now();
        Ok(())
    }

    async fn get_execution(&self, execution_id: Uuid) -> Result<WorkflowExecution> {
        self.state
            .read()
            .await
            .executions
            .get(&execution_id)
            .cloned()
            .ok_or_else(|| WorkflowError::not_found(format!("execution {}", execution_id)))
    }

    async fn update_execution_status(
        &self,
        execution_id: Uuid,
        status: WorkflowStatus,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let execution = state
            .executions
            .get_mut(&execution_id)
            .ok_or_else(|| WorkflowError::not_found(format!("execution {}", execution_id)))?;
        execution.status = status;
        execution.updated_at = Utc::now();
        Ok(())
    }

    async fn update_execution_cursor(
        &self,
        execution_id: Uuid,
        node_id: Option<Uuid>,
        task_id: Option<Uuid>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let execution = state
            .executions
            .get_mut(&execution_id)
            .ok_or_else(|| WorkflowError::not_found(format!("execution {}", execution_id)))?;
        if node_id.is_some() {
            execution.last_executed_node_id = node_id;
        }
        if task_id.is_some() {
            execution.last_executed_task_id = task_id;
        }
        execution.updated_at = Utc::now();
        Ok(())
    }

    async fn update_task_status(
        &self,
        node_task_id: Uuid,
        status: NodeTaskStatus,
        retry_count: i32,
        http_code: Option<i32>,
        response: Option<String>,
        error: Option<String>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let node_task = state
            .node_tasks
            .get_mut(&node_task_id)
            .ok_or_else(|| WorkflowError::not_found(format!("node task {}", node_task_id)))?;
        node_task.status = status;
        node_task.retry_count = retry_count;
        if http_code.is_some() {
            node_task.http_code = http_code;
        }
        if response.is_some() {
            node_task.response = response;
        }
        if error.is_some() {
            node_task.error = error;
        }
        Ok(())
    }

    async fn node_log_exists(
        &self,
        workflow_id: Uuid,
        node_id: Uuid,
        status: LogStatus,
    ) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.logs.iter().any(|l| {
            l.workflow_id == workflow_id
                && l.node_id == Some(node_id)
                && l.task_id.is_none()
                && l.status == status
                && l.action_type == LogActionType::Execution
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn node(store: &InMemoryStore, title: &str, node_type: NodeType) -> Node {
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

    #[tokio::test]
    async fn create_node_inserts_single_self_closure_row() {
        let store = InMemoryStore::new();
        let n = node(&store, "start", NodeType::Start).await;

        let self_rows: Vec<_> = store
            .closure_rows()
            .await
            .into_iter()
            .filter(|(a, d, _)| *a == n.id && *d == n.id)
            .collect();
        assert_eq!(self_rows, vec![(n.id, n.id, 0)]);
    }

    #[tokio::test]
    async fn add_relationship_builds_transitive_rows() {
        let store = InMemoryStore::new();
        let s = node(&store, "s", NodeType::Start).await;
        let a = node(&store, "a", NodeType::Task).await;
        let b = node(&store, "b", NodeType::Task).await;

        store.add_relationship(s.id, a.id).await.unwrap();
        store.add_relationship(a.id, b.id).await.unwrap();

        let rows = store.closure_rows().await;
        assert!(rows.contains(&(s.id, a.id, 1)));
        assert!(rows.contains(&(a.id, b.id, 1)));
        assert!(rows.contains(&(s.id, b.id, 2)));
        // No direct edge at depth 0; that convention is reserved for self-rows
        assert!(!rows.contains(&(s.id, a.id, 0)));
    }

    #[tokio::test]
    async fn add_relationship_is_idempotent() {
        let store = InMemoryStore::new();
        let s = node(&store, "s", NodeType::Start).await;
        let a = node(&store, "a", NodeType::Task).await;

        store.add_relationship(s.id, a.id).await.unwrap();
        let before = store.closure_rows().await.len();
        store.add_relationship(s.id, a.id).await.unwrap();
        assert_eq!(store.closure_rows().await.len(), before);
    }

    #[tokio::test]
    async fn add_relationship_rejects_cycles_before_writing() {
        let store = InMemoryStore::new();
        let s = node(&store, "s", NodeType::Start).await;
        let a = node(&store, "a", NodeType::Task).await;
        let b = node(&store, "b", NodeType::Task).await;

        store.add_relationship(s.id, a.id).await.unwrap();
        store.add_relationship(a.id, b.id).await.unwrap();

        let before = store.closure_rows().await.len();
        assert!(matches!(
            store.add_relationship(b.id, s.id).await,
            Err(WorkflowError::Cycle(_))
        ));
        assert!(matches!(
            store.add_relationship(a.id, a.id).await,
            Err(WorkflowError::Cycle(_))
        ));
        assert_eq!(store.closure_rows().await.len(), before);

        store.validate_acyclic(s.id).await.unwrap();
    }

    #[tokio::test]
    async fn children_are_depth_one_descendants_are_reflexive() {
        let store = InMemoryStore::new();
        let s = node(&store, "s", NodeType::Start).await;
        let a = node(&store, "a", NodeType::Task).await;
        let b = node(&store, "b", NodeType::Task).await;

        store.add_relationship(s.id, a.id).await.unwrap();
        store.add_relationship(a.id, b.id).await.unwrap();

        let children: Vec<Uuid> = store
            .get_children(s.id)
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(children, vec![a.id]);

        let parents: Vec<Uuid> = store
            .get_parents(b.id)
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(parents, vec![a.id]);

        let mut descendants: Vec<Uuid> = store
            .get_descendants(s.id)
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        descendants.sort();
        let mut expected = vec![s.id, a.id, b.id];
        expected.sort();
        assert_eq!(descendants, expected);
    }

    #[tokio::test]
    async fn immediate_ancestor_requires_exactly_one_parent() {
        let store = InMemoryStore::new();
        let s = node(&store, "s", NodeType::Start).await;
        let a = node(&store, "a", NodeType::Task).await;
        let b = node(&store, "b", NodeType::Task).await;
        let j = node(&store, "j", NodeType::Join).await;

        store.add_relationship(s.id, a.id).await.unwrap();
        store.add_relationship(s.id, b.id).await.unwrap();
        store.add_relationship(a.id, j.id).await.unwrap();
        store.add_relationship(b.id, j.id).await.unwrap();

        assert_eq!(store.get_immediate_ancestor(a.id).await.unwrap().id, s.id);
        // Start has no ancestor; Join has two
        assert!(matches!(
            store.get_immediate_ancestor(s.id).await,
            Err(WorkflowError::NotFound(_))
        ));
        assert!(matches!(
            store.get_immediate_ancestor(j.id).await,
            Err(WorkflowError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn node_tasks_are_ordered_and_skip_start_end_typed_tasks() {
        let store = InMemoryStore::new();
        let n = node(&store, "n", NodeType::Task).await;

        let second = store
            .create_task(CreateTask {
                title: "second".into(),
                task_type: NodeType::Task,
                http_method: "POST".into(),
                action: "http://example.test/b".into(),
                params: "{}".into(),
                max_retries: None,
            })
            .await
            .unwrap();
        let first = store
            .create_task(CreateTask {
                title: "first".into(),
                task_type: NodeType::Task,
                http_method: "POST".into(),
                action: "http://example.test/a".into(),
                params: "{}".into(),
                max_retries: Some(1),
            })
            .await
            .unwrap();
        let marker = store
            .create_task(CreateTask {
                title: "marker".into(),
                task_type: NodeType::End,
                http_method: "POST".into(),
                action: "http://example.test/end".into(),
                params: "{}".into(),
                max_retries: None,
            })
            .await
            .unwrap();

        store.add_task_to_node(n.id, second.id, 2).await.unwrap();
        store.add_task_to_node(n.id, first.id, 1).await.unwrap();
        store.add_task_to_node(n.id, marker.id, 3).await.unwrap();

        let tasks = store.get_node_tasks(n.id).await.unwrap();
        let ids: Vec<Uuid> = tasks.iter().map(|nt| nt.task_id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert_eq!(tasks[0].task.max_retries, 1);
        // Unset retry budget defaults to 3
        assert_eq!(tasks[1].task.max_retries, 3);
    }

    #[tokio::test]
    async fn update_task_status_keeps_columns_when_none() {
        let store = InMemoryStore::new();
        let n = node(&store, "n", NodeType::Task).await;
        let task = store
            .create_task(CreateTask {
                title: "t".into(),
                task_type: NodeType::Task,
                http_method: "POST".into(),
                action: "http://example.test".into(),
                params: "{}".into(),
                max_retries: None,
            })
            .await
            .unwrap();
        let nt = store.add_task_to_node(n.id, task.id, 1).await.unwrap();

        store
            .update_task_status(
                nt.id,
                NodeTaskStatus::Completed,
                2,
                Some(200),
                Some("ok".into()),
                None,
            )
            .await
            .unwrap();
        store
            .update_task_status(nt.id, NodeTaskStatus::Reverted, 2, None, None, None)
            .await
            .unwrap();

        let updated = store.get_node_task(nt.id).await.unwrap();
        assert_eq!(updated.status, NodeTaskStatus::Reverted);
        assert_eq!(updated.http_code, Some(200));
        assert_eq!(updated.response.as_deref(), Some("ok"));
    }
}
