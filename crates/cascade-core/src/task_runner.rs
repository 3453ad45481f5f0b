// Task runner: one HTTP side effect, bounded retries
//
// Retry budget is max_retries + 1 total attempts. Transport failures count
// as code-500 attempts. Every attempt writes a journal row before the
// node_tasks columns are touched.

use std::sync::Arc;

use reqwest::header;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, WorkflowError};
use crate::executor::RunContext;
use crate::model::{LogStatus, NewWorkflowLog, NodeTask, NodeTaskStatus, Task};
use crate::traits::Journal;

/// Retry budget used when a task does not carry one
const DEFAULT_RETRY_LIMIT: i32 = 3;

struct AttemptSuccess {
    http_code: i32,
    response: String,
}

/// Executes a single node task against its remote endpoint
pub struct TaskRunner<J> {
    http: reqwest::Client,
    journal: Arc<J>,
}

impl<J: Journal> TaskRunner<J> {
    pub fn new(journal: Arc<J>) -> Self {
        Self {
            http: reqwest::Client::new(),
            journal,
        }
    }

    /// Run the task to completion or exhaustion.
    ///
    /// Observes the cancellation signal before every attempt; a cancelled
    /// run journals a `cancelled` row and returns `Cancelled` without
    /// consuming further budget.
    pub async fn execute(&self, ctx: &RunContext, node_id: Uuid, node_task: &NodeTask) -> Result<()> {
        let task = &node_task.task;
        let limit = if task.max_retries < 0 {
            DEFAULT_RETRY_LIMIT
        } else {
            task.max_retries
        };

        for attempt in 0..=limit {
            if ctx.cancel.is_cancelled() {
                self.journal
                    .append(NewWorkflowLog::task(
                        ctx.workflow_id,
                        node_id,
                        task.id,
                        LogStatus::Cancelled,
                        "task cancelled before attempt",
                    ))
                    .await?;
                return Err(WorkflowError::Cancelled);
            }

            match self.attempt(task).await {
                Ok(success) => {
                    info!(
                        task_id = %task.id,
                        node_id = %node_id,
                        attempt = attempt + 1,
                        http_code = success.http_code,
                        "Task completed"
                    );
                    self.journal
                        .append(
                            NewWorkflowLog::task(
                                ctx.workflow_id,
                                node_id,
                                task.id,
                                LogStatus::Completed,
                                format!("task completed on attempt {}", attempt + 1),
                            )
                            .with_http(success.http_code, success.response.clone()),
                        )
                        .await?;
                    self.journal
                        .update_task_status(
                            node_task.id,
                            NodeTaskStatus::Completed,
                            attempt,
                            Some(success.http_code),
                            Some(success.response),
                            None,
                        )
                        .await?;
                    if let Some(execution_id) = ctx.execution_id {
                        self.journal
                            .update_execution_cursor(execution_id, None, Some(task.id))
                            .await?;
                    }
                    return Ok(());
                }
                Err(err) => {
                    let (http_code, response, error) = match &err {
                        WorkflowError::Transport(msg) => (500, String::new(), msg.clone()),
                        WorkflowError::Downstream { code, body } => {
                            (*code as i32, body.clone(), err.to_string())
                        }
                        // Malformed method or URL never becomes retryable
                        _ => return Err(err),
                    };
                    warn!(
                        task_id = %task.id,
                        node_id = %node_id,
                        attempt = attempt + 1,
                        http_code,
                        "Task attempt failed"
                    );
                    self.journal
                        .append(
                            NewWorkflowLog::task(
                                ctx.workflow_id,
                                node_id,
                                task.id,
                                LogStatus::Failed,
                                format!("task attempt {} failed", attempt + 1),
                            )
                            .with_http(http_code, response.clone())
                            .with_error(error.clone()),
                        )
                        .await?;
                    self.journal
                        .update_task_status(
                            node_task.id,
                            NodeTaskStatus::Failed,
                            attempt,
                            Some(http_code),
                            Some(response),
                            Some(error),
                        )
                        .await?;
                }
            }
        }

        if let Some(execution_id) = ctx.execution_id {
            self.journal
                .update_execution_cursor(execution_id, None, Some(task.id))
                .await?;
        }
        Err(WorkflowError::TaskExhausted {
            task_id: task.id,
            attempts: (limit + 1) as u32,
        })
    }

    /// One HTTP attempt: method, URL, and body come from the task verbatim
    async fn attempt(&self, task: &Task) -> Result<AttemptSuccess> {
        let method = reqwest::Method::from_bytes(task.http_method.to_uppercase().as_bytes())
            .map_err(|_| {
                WorkflowError::invalid(format!("unsupported http method: {}", task.http_method))
            })?;

        let response = self
            .http
            .request(method, &task.action)
            .header(header::CONTENT_TYPE, "application/json")
            .body(task.params.clone())
            .send()
            .await
            .map_err(|e| WorkflowError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_success() {
            Ok(AttemptSuccess {
                http_code: status.as_u16() as i32,
                response: body,
            })
        } else {
            Err(WorkflowError::Downstream {
                code: status.as_u16(),
                body,
            })
        }
    }
}
