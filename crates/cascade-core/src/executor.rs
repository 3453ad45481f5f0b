// Workflow executor
//
// A single worker drains a FIFO frontier and drives the interpreter node by
// node. Fork nodes spawn one strand per child and barrier on all of them;
// strands share the visited set and the cancellation signal. Workflow and
// execution status transitions are journaled before the mutable fields
// change.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Result, WorkflowError};
use crate::interpreter::{NodeAction, NodeInterpreter};
use crate::model::{LogStatus, NewWorkflowLog, NodeType, WorkflowStatus};
use crate::traits::{AllTasksCompleted, ConditionPredicate, GraphStore, Journal};

/// Cooperative cancellation flag shared by every strand of a run
#[derive(Clone, Debug, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-run state threaded through the interpreter and task runner
#[derive(Clone)]
pub struct RunContext {
    pub workflow_id: Uuid,
    pub execution_id: Option<Uuid>,
    pub cancel: CancelSignal,
    visited: Arc<Mutex<HashSet<Uuid>>>,
}

impl RunContext {
    pub fn new(workflow_id: Uuid, execution_id: Option<Uuid>, cancel: CancelSignal) -> Self {
        Self {
            workflow_id,
            execution_id,
            cancel,
            visited: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Atomically mark a node visited; false means another strand owns it
    async fn claim(&self, node_id: Uuid) -> bool {
        self.visited.lock().await.insert(node_id)
    }

    /// Give a claimed slot back (a Join that turned out not to be ready)
    async fn unclaim(&self, node_id: Uuid) {
        self.visited.lock().await.remove(&node_id);
    }

    async fn is_visited(&self, node_id: Uuid) -> bool {
        self.visited.lock().await.contains(&node_id)
    }
}

/// Top-level driver for one workflow run
pub struct WorkflowExecutor<S, J, C = AllTasksCompleted> {
    store: Arc<S>,
    journal: Arc<J>,
    interpreter: Arc<NodeInterpreter<S, J, C>>,
}

impl<S, J, C> Clone for WorkflowExecutor<S, J, C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            journal: self.journal.clone(),
            interpreter: self.interpreter.clone(),
        }
    }
}

impl<S, J> WorkflowExecutor<S, J>
where
    S: GraphStore + 'static,
    J: Journal + 'static,
{
    /// Executor with the default "all parent tasks completed" predicate
    pub fn new(store: Arc<S>, journal: Arc<J>) -> Self {
        Self::with_condition(store, journal, Arc::new(AllTasksCompleted))
    }
}

impl<S, J, C> WorkflowExecutor<S, J, C>
where
    S: GraphStore + 'static,
    J: Journal + 'static,
    C: ConditionPredicate + 'static,
{
    pub fn with_condition(store: Arc<S>, journal: Arc<J>, condition: Arc<C>) -> Self {
        let interpreter = Arc::new(NodeInterpreter::new(
            store.clone(),
            journal.clone(),
            condition,
        ));
        Self {
            store,
            journal,
            interpreter,
        }
    }

    pub async fn run(&self, workflow_id: Uuid) -> Result<()> {
        self.run_inner(workflow_id, None, CancelSignal::new()).await
    }

    pub async fn run_with_cancel(&self, workflow_id: Uuid, cancel: CancelSignal) -> Result<()> {
        self.run_inner(workflow_id, None, cancel).await
    }

    /// Run a workflow under an execution row, advancing its status and
    /// last-executed cursors as the traversal proceeds
    pub async fn run_execution(&self, execution_id: Uuid, cancel: CancelSignal) -> Result<()> {
        let execution = self.journal.get_execution(execution_id).await?;
        self.run_inner(execution.workflow_id, Some(execution.id), cancel)
            .await
    }

    async fn run_inner(
        &self,
        workflow_id: Uuid,
        execution_id: Option<Uuid>,
        cancel: CancelSignal,
    ) -> Result<()> {
        let start = self.store.get_starting_node(workflow_id).await?;
        self.store.validate_acyclic(start.id).await?;

        self.journal
            .append(NewWorkflowLog::workflow(
                workflow_id,
                LogStatus::Executing,
                "workflow execution started",
            ))
            .await?;
        self.journal
            .update_workflow_status(workflow_id, WorkflowStatus::Executing)
            .await?;
        if let Some(execution_id) = execution_id {
            self.journal
                .update_execution_status(execution_id, WorkflowStatus::Executing)
                .await?;
        }
        info!(workflow_id = %workflow_id, start_node = %start.id, "Workflow execution started");

        let ctx = RunContext::new(workflow_id, execution_id, cancel);
        let outcome = self
            .clone()
            .run_strand(ctx, VecDeque::from([start.id]))
            .await;

        match outcome {
            Ok(()) => {
                self.journal
                    .append(NewWorkflowLog::workflow(
                        workflow_id,
                        LogStatus::Completed,
                        "workflow execution completed",
                    ))
                    .await?;
                self.journal
                    .update_workflow_status(workflow_id, WorkflowStatus::Completed)
                    .await?;
                if let Some(execution_id) = execution_id {
                    self.journal
                        .update_execution_status(execution_id, WorkflowStatus::Completed)
                        .await?;
                }
                info!(workflow_id = %workflow_id, "Workflow completed");
                Ok(())
            }
            Err(err) => {
                self.finalize_failure(workflow_id, execution_id, &err).await;
                Err(err)
            }
        }
    }

    async fn finalize_failure(
        &self,
        workflow_id: Uuid,
        execution_id: Option<Uuid>,
        err: &WorkflowError,
    ) {
        error!(workflow_id = %workflow_id, error = %err, "Workflow execution failed");
        if matches!(err, WorkflowError::Persistence(_)) {
            // The journal itself is unreachable; leave the workflow as-is so
            // a later run can resume from the last durable row
            return;
        }
        let row =
            NewWorkflowLog::workflow(workflow_id, LogStatus::Failed, "workflow execution failed")
                .with_error(err.to_string());
        if let Err(journal_err) = self.journal.append(row).await {
            warn!(workflow_id = %workflow_id, error = %journal_err, "Failed to journal workflow failure");
        }
        if let Err(journal_err) = self
            .journal
            .update_workflow_status(workflow_id, WorkflowStatus::Error)
            .await
        {
            warn!(workflow_id = %workflow_id, error = %journal_err, "Failed to record workflow error status");
        }
        if let Some(execution_id) = execution_id {
            if let Err(journal_err) = self
                .journal
                .update_execution_status(execution_id, WorkflowStatus::Error)
                .await
            {
                warn!(execution_id = %execution_id, error = %journal_err, "Failed to record execution error status");
            }
        }
    }

    /// One traversal strand. The initial call covers the whole run; Fork
    /// nodes spawn further strands that share the same context.
    fn run_strand(
        self,
        ctx: RunContext,
        mut frontier: VecDeque<Uuid>,
    ) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            let mut stalled = 0usize;
            while let Some(current) = frontier.pop_front() {
                if ctx.cancel.is_cancelled() {
                    self.abandon(&ctx, current, &frontier).await;
                    return Err(WorkflowError::Cancelled);
                }
                if ctx.is_visited(current).await {
                    continue;
                }
                let node = self.store.get_node(current).await?;

                // An unready Join must not claim its visited slot: the strand
                // that completes its last parent is the one that may run it
                if node.node_type == NodeType::Join
                    && !self.interpreter.join_ready(&ctx, &node).await?
                {
                    stalled += 1;
                    if stalled > frontier.len() {
                        debug!(
                            node_id = %current,
                            "No strand-local progress possible, leaving join to its remaining parents"
                        );
                        continue;
                    }
                    frontier.push_back(current);
                    continue;
                }

                if !ctx.claim(current).await {
                    continue;
                }

                let action = match self.interpreter.interpret(&ctx, &node).await {
                    Ok(action) => action,
                    Err(err) => {
                        // The interpreter journals the node it was on; the
                        // rest of this strand's frontier still needs its
                        // cancelled rows
                        if matches!(err, WorkflowError::Cancelled) {
                            if let Some(next) = frontier.pop_front() {
                                self.abandon(&ctx, next, &frontier).await;
                            }
                        }
                        return Err(err);
                    }
                };
                match action {
                    NodeAction::Enqueue(children) => {
                        stalled = 0;
                        frontier.extend(children);
                    }
                    NodeAction::Branch(children) => {
                        stalled = 0;
                        debug!(node_id = %current, strands = children.len(), "Fork barrier");
                        let mut handles = Vec::with_capacity(children.len());
                        for child in children {
                            let strand = self.clone();
                            let strand_ctx = ctx.clone();
                            handles.push(tokio::spawn(
                                strand.run_strand(strand_ctx, VecDeque::from([child])),
                            ));
                        }
                        for joined in join_all(handles).await {
                            joined.map_err(|e| {
                                WorkflowError::persistence(anyhow::anyhow!("strand panicked: {e}"))
                            })??;
                        }
                    }
                    NodeAction::Defer => {
                        // interpret re-checks readiness under the claim
                        ctx.unclaim(current).await;
                        stalled += 1;
                        if stalled > frontier.len() {
                            continue;
                        }
                        frontier.push_back(current);
                    }
                    NodeAction::Halt => {
                        stalled = 0;
                    }
                }
            }
            Ok(())
        })
    }

    /// Journal a cancelled row for the node in hand and everything still
    /// waiting on this strand's frontier
    async fn abandon(&self, ctx: &RunContext, current: Uuid, rest: &VecDeque<Uuid>) {
        for node_id in std::iter::once(current).chain(rest.iter().copied()) {
            if ctx.is_visited(node_id).await {
                continue;
            }
            let row = NewWorkflowLog::node(
                ctx.workflow_id,
                node_id,
                LogStatus::Cancelled,
                "execution cancelled",
            );
            if let Err(err) = self.journal.append(row).await {
                warn!(node_id = %node_id, error = %err, "Failed to journal cancelled node");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inmemory::InMemoryStore;
    use crate::model::*;
    use std::time::Duration;
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

    async fn attach_task(
        store: &InMemoryStore,
        node: &Node,
        url: String,
        max_retries: Option<i32>,
    ) -> NodeTask {
        let task = store
            .create_task(CreateTask {
                title: format!("{} task", node.title),
                task_type: NodeType::Task,
                http_method: "POST".into(),
                action: url,
                params: "{}".into(),
                max_retries,
            })
            .await
            .unwrap();
        store.add_task_to_node(node.id, task.id, 1).await.unwrap()
    }

    async fn make_workflow(store: &InMemoryStore, start: &Node, rest: &[&Node]) -> Workflow {
        let workflow = store
            .create_workflow(CreateWorkflow {
                name: "wf".into(),
                description: None,
                starting_node_id: None,
            })
            .await
            .unwrap();
        store
            .add_workflow_node(workflow.id, start.id, true)
            .await
            .unwrap();
        for node in rest {
            store
                .add_workflow_node(workflow.id, node.id, false)
                .await
                .unwrap();
        }
        workflow
    }

    fn node_logs(logs: &[WorkflowLog], node_id: Uuid, status: LogStatus) -> Vec<usize> {
        logs.iter()
            .enumerate()
            .filter(|(_, l)| {
                l.node_id == Some(node_id) && l.task_id.is_none() && l.status == status
            })
            .map(|(i, _)| i)
            .collect()
    }

    #[tokio::test]
    async fn linear_path_runs_to_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryStore::new());
        let s = make_node(&store, "s", NodeType::Start).await;
        let a = make_node(&store, "a", NodeType::Task).await;
        let e = make_node(&store, "e", NodeType::End).await;
        store.add_relationship(s.id, a.id).await.unwrap();
        store.add_relationship(a.id, e.id).await.unwrap();
        let node_task = attach_task(&store, &a, format!("{}/a", server.uri()), None).await;
        let workflow = make_workflow(&store, &s, &[&a, &e]).await;

        let executor = WorkflowExecutor::new(store.clone(), store.clone());
        executor.run(workflow.id).await.unwrap();

        assert_eq!(
            store.get_workflow(workflow.id).await.unwrap().status,
            WorkflowStatus::Completed
        );

        let logs = store.logs().await;
        assert_eq!(node_logs(&logs, s.id, LogStatus::Executing).len(), 1);
        assert_eq!(node_logs(&logs, a.id, LogStatus::Completed).len(), 1);
        assert_eq!(node_logs(&logs, e.id, LogStatus::Completed).len(), 1);

        let task_logs: Vec<&WorkflowLog> = logs
            .iter()
            .filter(|l| l.task_id == Some(node_task.task_id))
            .collect();
        assert_eq!(task_logs.len(), 1);
        assert_eq!(task_logs[0].http_code, Some(200));

        let updated = store.get_node_task(node_task.id).await.unwrap();
        assert_eq!(updated.status, NodeTaskStatus::Completed);
    }

    #[tokio::test]
    async fn flaky_task_retries_and_the_workflow_still_completes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryStore::new());
        let s = make_node(&store, "s", NodeType::Start).await;
        let a = make_node(&store, "a", NodeType::Task).await;
        let e = make_node(&store, "e", NodeType::End).await;
        store.add_relationship(s.id, a.id).await.unwrap();
        store.add_relationship(a.id, e.id).await.unwrap();
        let node_task = attach_task(&store, &a, format!("{}/a", server.uri()), Some(2)).await;
        let workflow = make_workflow(&store, &s, &[&a, &e]).await;

        let executor = WorkflowExecutor::new(store.clone(), store.clone());
        executor.run(workflow.id).await.unwrap();

        assert_eq!(
            store.get_workflow(workflow.id).await.unwrap().status,
            WorkflowStatus::Completed
        );

        let task_statuses: Vec<LogStatus> = store
            .logs()
            .await
            .iter()
            .filter(|l| l.task_id == Some(node_task.task_id))
            .map(|l| l.status)
            .collect();
        assert_eq!(
            task_statuses,
            vec![LogStatus::Failed, LogStatus::Failed, LogStatus::Completed]
        );
    }

    #[tokio::test]
    async fn exhausted_task_fails_the_workflow_and_stops_the_branch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(3)
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryStore::new());
        let s = make_node(&store, "s", NodeType::Start).await;
        let a = make_node(&store, "a", NodeType::Task).await;
        let e = make_node(&store, "e", NodeType::End).await;
        store.add_relationship(s.id, a.id).await.unwrap();
        store.add_relationship(a.id, e.id).await.unwrap();
        attach_task(&store, &a, format!("{}/a", server.uri()), Some(2)).await;
        let workflow = make_workflow(&store, &s, &[&a, &e]).await;

        let executor = WorkflowExecutor::new(store.clone(), store.clone());
        let err = executor.run(workflow.id).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::TaskExhausted { attempts: 3, .. }
        ));

        assert_eq!(
            store.get_workflow(workflow.id).await.unwrap().status,
            WorkflowStatus::Error
        );

        // The End node was never reached
        let logs = store.logs().await;
        assert!(logs.iter().all(|l| l.node_id != Some(e.id)));
        assert_eq!(node_logs(&logs, a.id, LogStatus::Failed).len(), 1);
    }

    #[tokio::test]
    async fn fork_runs_branches_and_join_waits_for_both() {
        let server = MockServer::start().await;
        for p in ["/b", "/c"] {
            Mock::given(method("POST"))
                .and(path(p))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server)
                .await;
        }

        let store = Arc::new(InMemoryStore::new());
        let s = make_node(&store, "s", NodeType::Start).await;
        let f = make_node(&store, "f", NodeType::Fork).await;
        let b = make_node(&store, "b", NodeType::Task).await;
        let c = make_node(&store, "c", NodeType::Task).await;
        let j = make_node(&store, "j", NodeType::Join).await;
        let e = make_node(&store, "e", NodeType::End).await;
        store.add_relationship(s.id, f.id).await.unwrap();
        store.add_relationship(f.id, b.id).await.unwrap();
        store.add_relationship(f.id, c.id).await.unwrap();
        store.add_relationship(b.id, j.id).await.unwrap();
        store.add_relationship(c.id, j.id).await.unwrap();
        store.add_relationship(j.id, e.id).await.unwrap();
        let b_task = attach_task(&store, &b, format!("{}/b", server.uri()), None).await;
        let c_task = attach_task(&store, &c, format!("{}/c", server.uri()), None).await;
        let workflow = make_workflow(&store, &s, &[&f, &b, &c, &j, &e]).await;

        let executor = WorkflowExecutor::new(store.clone(), store.clone());
        executor.run(workflow.id).await.unwrap();

        assert_eq!(
            store.get_workflow(workflow.id).await.unwrap().status,
            WorkflowStatus::Completed
        );
        assert_eq!(
            store.get_node_task(b_task.id).await.unwrap().status,
            NodeTaskStatus::Completed
        );
        assert_eq!(
            store.get_node_task(c_task.id).await.unwrap().status,
            NodeTaskStatus::Completed
        );

        // The join ran exactly once, and only after both branches completed
        let logs = store.logs().await;
        let join_started = node_logs(&logs, j.id, LogStatus::Executing);
        assert_eq!(join_started.len(), 1);
        let b_done = node_logs(&logs, b.id, LogStatus::Completed)[0];
        let c_done = node_logs(&logs, c.id, LogStatus::Completed)[0];
        assert!(join_started[0] > b_done);
        assert!(join_started[0] > c_done);
        assert_eq!(node_logs(&logs, e.id, LogStatus::Completed).len(), 1);
    }

    #[tokio::test]
    async fn join_defers_until_its_slower_parent_completes() {
        let store = Arc::new(InMemoryStore::new());
        let s = make_node(&store, "s", NodeType::Start).await;
        // Created before b so the short branch is scheduled first
        let c = make_node(&store, "c", NodeType::Task).await;
        let b = make_node(&store, "b", NodeType::Task).await;
        let d = make_node(&store, "d", NodeType::Task).await;
        let j = make_node(&store, "j", NodeType::Join).await;
        store.add_relationship(s.id, c.id).await.unwrap();
        store.add_relationship(s.id, b.id).await.unwrap();
        store.add_relationship(b.id, d.id).await.unwrap();
        store.add_relationship(c.id, j.id).await.unwrap();
        store.add_relationship(d.id, j.id).await.unwrap();
        let workflow = make_workflow(&store, &s, &[&b, &c, &d, &j]).await;

        let executor = WorkflowExecutor::new(store.clone(), store.clone());
        executor.run(workflow.id).await.unwrap();

        assert_eq!(
            store.get_workflow(workflow.id).await.unwrap().status,
            WorkflowStatus::Completed
        );
        let logs = store.logs().await;
        let join_started = node_logs(&logs, j.id, LogStatus::Executing);
        assert_eq!(join_started.len(), 1);
        assert!(join_started[0] > node_logs(&logs, d.id, LogStatus::Completed)[0]);
    }

    #[tokio::test]
    async fn decision_takes_the_first_matching_child_only() {
        struct TitleIs(&'static str);
        impl ConditionPredicate for TitleIs {
            fn evaluate(&self, _parent: &Node, child: &Node, _tasks: &[NodeTask]) -> bool {
                child.title == self.0
            }
        }

        let store = Arc::new(InMemoryStore::new());
        let s = make_node(&store, "s", NodeType::Start).await;
        let d = make_node(&store, "d", NodeType::Decision).await;
        let x = make_node(&store, "x", NodeType::Task).await;
        let y = make_node(&store, "y", NodeType::Task).await;
        store.add_relationship(s.id, d.id).await.unwrap();
        store.add_relationship(d.id, x.id).await.unwrap();
        store.add_relationship(d.id, y.id).await.unwrap();
        let workflow = make_workflow(&store, &s, &[&d, &x, &y]).await;

        let executor =
            WorkflowExecutor::with_condition(store.clone(), store.clone(), Arc::new(TitleIs("y")));
        executor.run(workflow.id).await.unwrap();

        assert_eq!(
            store.get_workflow(workflow.id).await.unwrap().status,
            WorkflowStatus::Completed
        );
        let logs = store.logs().await;
        assert_eq!(node_logs(&logs, y.id, LogStatus::Completed).len(), 1);
        // The sibling branch was never visited
        assert!(logs.iter().all(|l| l.node_id != Some(x.id)));
    }

    #[tokio::test]
    async fn default_predicate_picks_the_first_child() {
        let store = Arc::new(InMemoryStore::new());
        let s = make_node(&store, "s", NodeType::Start).await;
        let d = make_node(&store, "d", NodeType::Decision).await;
        let x = make_node(&store, "x", NodeType::Task).await;
        let y = make_node(&store, "y", NodeType::Task).await;
        store.add_relationship(s.id, d.id).await.unwrap();
        store.add_relationship(d.id, x.id).await.unwrap();
        store.add_relationship(d.id, y.id).await.unwrap();
        let workflow = make_workflow(&store, &s, &[&d, &x, &y]).await;

        let executor = WorkflowExecutor::new(store.clone(), store.clone());
        executor.run(workflow.id).await.unwrap();

        let logs = store.logs().await;
        assert_eq!(node_logs(&logs, x.id, LogStatus::Completed).len(), 1);
        assert!(logs.iter().all(|l| l.node_id != Some(y.id)));
    }

    #[tokio::test]
    async fn cancellation_marks_the_rest_of_the_path_cancelled() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryStore::new());
        let s = make_node(&store, "s", NodeType::Start).await;
        let a = make_node(&store, "a", NodeType::Task).await;
        let b = make_node(&store, "b", NodeType::Task).await;
        let e = make_node(&store, "e", NodeType::End).await;
        store.add_relationship(s.id, a.id).await.unwrap();
        store.add_relationship(a.id, b.id).await.unwrap();
        store.add_relationship(b.id, e.id).await.unwrap();
        attach_task(&store, &a, format!("{}/a", server.uri()), None).await;
        let workflow = make_workflow(&store, &s, &[&a, &b, &e]).await;

        let executor = WorkflowExecutor::new(store.clone(), store.clone());
        let cancel = CancelSignal::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = executor
            .run_with_cancel(workflow.id, cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Cancelled));

        assert_eq!(
            store.get_workflow(workflow.id).await.unwrap().status,
            WorkflowStatus::Error
        );
        let logs = store.logs().await;
        assert_eq!(node_logs(&logs, b.id, LogStatus::Cancelled).len(), 1);
        assert!(logs.iter().all(|l| l.node_id != Some(e.id)));
    }

    #[tokio::test]
    async fn cancellation_between_retries_marks_the_node_cancelled() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_millis(300)))
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryStore::new());
        let s = make_node(&store, "s", NodeType::Start).await;
        let a = make_node(&store, "a", NodeType::Task).await;
        let e = make_node(&store, "e", NodeType::End).await;
        store.add_relationship(s.id, a.id).await.unwrap();
        store.add_relationship(a.id, e.id).await.unwrap();
        let node_task = attach_task(&store, &a, format!("{}/a", server.uri()), Some(2)).await;
        let workflow = make_workflow(&store, &s, &[&a, &e]).await;

        let executor = WorkflowExecutor::new(store.clone(), store.clone());
        let cancel = CancelSignal::new();
        let trigger = cancel.clone();
        // Fires while the first attempt is still in flight; the runner
        // notices at the retry boundary
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = executor
            .run_with_cancel(workflow.id, cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Cancelled));

        assert_eq!(
            store.get_workflow(workflow.id).await.unwrap().status,
            WorkflowStatus::Error
        );

        let logs = store.logs().await;
        // One failed attempt, then the retry was cancelled
        let task_statuses: Vec<LogStatus> = logs
            .iter()
            .filter(|l| l.task_id == Some(node_task.task_id))
            .map(|l| l.status)
            .collect();
        assert_eq!(task_statuses, vec![LogStatus::Failed, LogStatus::Cancelled]);

        // The node itself is cancelled, not failed
        assert_eq!(node_logs(&logs, a.id, LogStatus::Cancelled).len(), 1);
        assert!(node_logs(&logs, a.id, LogStatus::Failed).is_empty());
        assert!(logs.iter().all(|l| l.node_id != Some(e.id)));
    }

    #[tokio::test]
    async fn execution_cursor_and_status_advance_with_the_run() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryStore::new());
        let s = make_node(&store, "s", NodeType::Start).await;
        let a = make_node(&store, "a", NodeType::Task).await;
        let e = make_node(&store, "e", NodeType::End).await;
        store.add_relationship(s.id, a.id).await.unwrap();
        store.add_relationship(a.id, e.id).await.unwrap();
        let node_task = attach_task(&store, &a, format!("{}/a", server.uri()), None).await;
        let workflow = make_workflow(&store, &s, &[&a, &e]).await;
        let execution = store.create_execution(workflow.id, "ref-42").await.unwrap();

        let executor = WorkflowExecutor::new(store.clone(), store.clone());
        executor
            .run_execution(execution.id, CancelSignal::new())
            .await
            .unwrap();

        let updated = store.get_execution(execution.id).await.unwrap();
        assert_eq!(updated.status, WorkflowStatus::Completed);
        assert_eq!(updated.last_executed_node_id, Some(e.id));
        assert_eq!(updated.last_executed_task_id, Some(node_task.task_id));
        assert_eq!(updated.reference_number, "ref-42");
    }

    #[tokio::test]
    async fn missing_starting_node_fails_before_any_state_change() {
        let store = Arc::new(InMemoryStore::new());
        let workflow = store
            .create_workflow(CreateWorkflow {
                name: "wf".into(),
                description: None,
                starting_node_id: None,
            })
            .await
            .unwrap();

        let executor = WorkflowExecutor::new(store.clone(), store.clone());
        let err = executor.run(workflow.id).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
        assert_eq!(
            store.get_workflow(workflow.id).await.unwrap().status,
            WorkflowStatus::Idle
        );
        assert!(store.logs().await.is_empty());
    }
}
