// Background execution runner using Tokio tasks
//
// Lets callers kick off a run and return immediately. Tracks live runs and
// their cancellation signals; a run cleans up after itself when it ends.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, WorkflowError};
use crate::executor::{CancelSignal, WorkflowExecutor};
use crate::traits::{AllTasksCompleted, ConditionPredicate, GraphStore, Journal};

pub struct ExecutionRunner<S, J, C = AllTasksCompleted> {
    executor: WorkflowExecutor<S, J, C>,
    /// Active runs (run id -> task handle)
    active: Arc<RwLock<HashMap<Uuid, JoinHandle<()>>>>,
    /// Cancellation signals (run id -> signal)
    cancel_signals: Arc<Mutex<HashMap<Uuid, CancelSignal>>>,
}

impl<S, J, C> ExecutionRunner<S, J, C>
where
    S: GraphStore + 'static,
    J: Journal + 'static,
    C: ConditionPredicate + 'static,
{
    pub fn new(executor: WorkflowExecutor<S, J, C>) -> Self {
        Self {
            executor,
            active: Arc::new(RwLock::new(HashMap::new())),
            cancel_signals: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run a workflow in the background, keyed by its workflow id
    pub async fn start_workflow(&self, workflow_id: Uuid) -> Result<()> {
        info!(workflow_id = %workflow_id, "Starting background workflow run");
        self.spawn(workflow_id, None).await
    }

    /// Run a workflow under an execution row, keyed by the execution id
    pub async fn start_execution(&self, execution_id: Uuid) -> Result<()> {
        info!(execution_id = %execution_id, "Starting background execution run");
        self.spawn(execution_id, Some(execution_id)).await
    }

    async fn spawn(&self, run_id: Uuid, execution_id: Option<Uuid>) -> Result<()> {
        if self.active.read().await.contains_key(&run_id) {
            return Err(WorkflowError::invalid(format!(
                "run {} is already active",
                run_id
            )));
        }

        let cancel = CancelSignal::new();
        self.cancel_signals
            .lock()
            .await
            .insert(run_id, cancel.clone());

        let executor = self.executor.clone();
        let active = self.active.clone();
        let cancel_signals = self.cancel_signals.clone();

        let handle = tokio::spawn(async move {
            let result = match execution_id {
                Some(execution_id) => executor.run_execution(execution_id, cancel).await,
                None => executor.run_with_cancel(run_id, cancel).await,
            };
            if let Err(err) = result {
                warn!(run_id = %run_id, error = %err, "Background run finished with error");
            }

            cancel_signals.lock().await.remove(&run_id);
            active.write().await.remove(&run_id);
        });

        self.active.write().await.insert(run_id, handle);
        Ok(())
    }

    /// Raise the run's cancellation signal; the strands stop at the next
    /// node or retry boundary
    pub async fn cancel(&self, run_id: Uuid) -> Result<()> {
        let signals = self.cancel_signals.lock().await;
        let signal = signals
            .get(&run_id)
            .ok_or_else(|| WorkflowError::not_found(format!("active run {}", run_id)))?;
        signal.cancel();
        info!(run_id = %run_id, "Cancellation requested");
        Ok(())
    }

    pub async fn is_active(&self, run_id: Uuid) -> bool {
        self.active.read().await.contains_key(&run_id)
    }
}
