// Repository layer for database operations
//
// One Database handle over a PgPool. Graph mutations that span rows (node +
// self-closure, edge + transitive rows) run in a transaction. The engine
// sees this type through the GraphStore and Journal traits.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use cascade_core::{
    CreateNode, CreateTask, CreateWorkflow, GraphStore, Journal, LogStatus, NewWorkflowLog, Node,
    NodeTask, NodeTaskStatus, Result, Task, Workflow, WorkflowError, WorkflowExecution,
    WorkflowLog, WorkflowStatus,
};

use crate::models::*;

const NODE_COLUMNS: &str =
    "id, title, type AS node_type, description, rollback_scope, created_at, updated_at, deleted_at";

const NODE_TASK_COLUMNS: &str = r#"
    nt.id, nt.node_id, nt.task_id, nt.task_order, nt.status, nt.retry_count,
    nt.http_code, nt.response, nt.error,
    t.title AS task_title, t.type AS task_type, t.http_method, t.action, t.params, t.max_retries,
    t.created_at AS task_created_at, t.updated_at AS task_updated_at, t.deleted_at AS task_deleted_at
"#;

fn db_err(err: sqlx::Error) -> WorkflowError {
    WorkflowError::persistence(err)
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create database connection from URL
    pub async fn from_url(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("failed to connect to database")?;
        Ok(Self { pool })
    }

    /// Apply pending migrations
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!().run(&self.pool).await?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ============================================
    // Nodes and closure
    // ============================================

    /// Insert a node together with its self-closure row
    pub async fn create_node(&self, input: CreateNode) -> Result<Node> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query_as::<_, NodeRow>(&format!(
            r#"
            INSERT INTO nodes (id, title, type, description, rollback_scope)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {NODE_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(&input.title)
        .bind(input.node_type.to_string())
        .bind(&input.description)
        .bind(input.rollback_scope.map(|s| s.to_string()))
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query("INSERT INTO node_closure (ancestor, descendant, depth) VALUES ($1, $1, 0)")
            .bind(row.id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        row.into_node()
    }

    /// Insert an ancestor -> descendant edge and every derived transitive
    /// row: (A', descendant, d + 1) for each existing row (A', ancestor, d).
    /// The ancestor's self-row yields the direct edge at depth 1. Edges that
    /// would close a cycle are rejected before anything is written.
    pub async fn add_relationship(&self, ancestor: Uuid, descendant: Uuid) -> Result<()> {
        if ancestor == descendant {
            return Err(WorkflowError::Cycle(descendant));
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let (known,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM nodes WHERE id IN ($1, $2) AND deleted_at IS NULL",
        )
        .bind(ancestor)
        .bind(descendant)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        if known != 2 {
            return Err(WorkflowError::not_found(format!(
                "node {} or {}",
                ancestor, descendant
            )));
        }

        let (closes_cycle,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM node_closure WHERE ancestor = $1 AND descendant = $2 AND depth > 0)",
        )
        .bind(descendant)
        .bind(ancestor)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        if closes_cycle {
            return Err(WorkflowError::Cycle(descendant));
        }

        sqlx::query(
            r#"
            INSERT INTO node_closure (ancestor, descendant, depth)
            SELECT nc.ancestor, $2, nc.depth + 1
            FROM node_closure nc
            WHERE nc.descendant = $1
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(ancestor)
        .bind(descendant)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        tracing::debug!(ancestor = %ancestor, descendant = %descendant, "Relationship added");
        Ok(())
    }

    /// Every node on a closure row from `ancestor` (the reflexive closure)
    pub async fn get_descendants(&self, ancestor: Uuid) -> Result<Vec<Node>> {
        let rows = sqlx::query_as::<_, NodeRow>(
            r#"
            SELECT DISTINCT n.id, n.title, n.type AS node_type, n.description, n.rollback_scope,
                   n.created_at, n.updated_at, n.deleted_at
            FROM nodes n
            JOIN node_closure nc ON nc.descendant = n.id
            WHERE nc.ancestor = $1 AND n.deleted_at IS NULL
            ORDER BY n.created_at, n.id
            "#,
        )
        .bind(ancestor)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(NodeRow::into_node).collect()
    }

    async fn related(&self, node_id: Uuid, parents: bool) -> Result<Vec<Node>> {
        let sql = if parents {
            r#"
            SELECT n.id, n.title, n.type AS node_type, n.description, n.rollback_scope,
                   n.created_at, n.updated_at, n.deleted_at
            FROM nodes n
            JOIN node_closure nc ON nc.ancestor = n.id
            WHERE nc.descendant = $1 AND nc.depth = 1 AND n.deleted_at IS NULL
            ORDER BY n.created_at, n.id
            "#
        } else {
            r#"
            SELECT n.id, n.title, n.type AS node_type, n.description, n.rollback_scope,
                   n.created_at, n.updated_at, n.deleted_at
            FROM nodes n
            JOIN node_closure nc ON nc.descendant = n.id
            WHERE nc.ancestor = $1 AND nc.depth = 1 AND n.deleted_at IS NULL
            ORDER BY n.created_at, n.id
            "#
        };
        let rows = sqlx::query_as::<_, NodeRow>(sql)
            .bind(node_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(NodeRow::into_node).collect()
    }

    // ============================================
    // Tasks
    // ============================================

    pub async fn create_task(&self, input: CreateTask) -> Result<Task> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            INSERT INTO tasks (id, title, type, http_method, action, params, max_retries)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, title, type AS task_type, http_method, action, params, max_retries,
                      created_at, updated_at, deleted_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&input.title)
        .bind(input.task_type.to_string())
        .bind(&input.http_method)
        .bind(&input.action)
        .bind(&input.params)
        .bind(input.max_retries.unwrap_or(3))
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        row.into_task()
    }

    pub async fn get_task(&self, task_id: Uuid) -> Result<Task> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, title, type AS task_type, http_method, action, params, max_retries,
                   created_at, updated_at, deleted_at
            FROM tasks
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| WorkflowError::not_found(format!("task {}", task_id)))?;
        row.into_task()
    }

    /// Bind a task to a node at the given position
    pub async fn add_task_to_node(
        &self,
        node_id: Uuid,
        task_id: Uuid,
        task_order: i32,
    ) -> Result<NodeTask> {
        let id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO node_tasks (id, node_id, task_id, task_order)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(id)
        .bind(node_id)
        .bind(task_id)
        .bind(task_order)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        self.get_node_task(id).await
    }

    pub async fn get_node_task(&self, node_task_id: Uuid) -> Result<NodeTask> {
        let row = sqlx::query_as::<_, NodeTaskRow>(&format!(
            r#"
            SELECT {NODE_TASK_COLUMNS}
            FROM node_tasks nt
            JOIN tasks t ON t.id = nt.task_id
            WHERE nt.id = $1 AND nt.deleted_at IS NULL
            "#
        ))
        .bind(node_task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| WorkflowError::not_found(format!("node task {}", node_task_id)))?;
        row.into_node_task()
    }

    // ============================================
    // Workflows and executions
    // ============================================

    pub async fn create_workflow(&self, input: CreateWorkflow) -> Result<Workflow> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            r#"
            INSERT INTO workflows (id, name, description, starting_node_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, description, starting_node_id, status, created_at, updated_at, deleted_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.starting_node_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        row.into_workflow()
    }

    pub async fn get_workflow(&self, workflow_id: Uuid) -> Result<Workflow> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            r#"
            SELECT id, name, description, starting_node_id, status, created_at, updated_at, deleted_at
            FROM workflows
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| WorkflowError::not_found(format!("workflow {}", workflow_id)))?;
        row.into_workflow()
    }

    /// Attach a node to a workflow; a starting node also becomes the
    /// workflow's entry point
    pub async fn add_workflow_node(
        &self,
        workflow_id: Uuid,
        node_id: Uuid,
        is_starting_node: bool,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_nodes (id, workflow_id, node_id, is_starting_node)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(workflow_id)
        .bind(node_id)
        .bind(is_starting_node)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if is_starting_node {
            sqlx::query(
                "UPDATE workflows SET starting_node_id = $2, updated_at = NOW() WHERE id = $1",
            )
            .bind(workflow_id)
            .bind(node_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    pub async fn create_execution(
        &self,
        workflow_id: Uuid,
        reference_number: &str,
    ) -> Result<WorkflowExecution> {
        let row = sqlx::query_as::<_, WorkflowExecutionRow>(
            r#"
            INSERT INTO workflow_executions (id, workflow_id, reference_number)
            VALUES ($1, $2, $3)
            RETURNING id, workflow_id, reference_number, status,
                      last_executed_node_id, last_executed_task_id, created_at, updated_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(workflow_id)
        .bind(reference_number)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        row.into_execution()
    }

    pub async fn list_workflow_logs(&self, workflow_id: Uuid) -> Result<Vec<WorkflowLog>> {
        let rows = sqlx::query_as::<_, WorkflowLogRow>(
            r#"
            SELECT id, workflow_id, node_id, task_id, status, message, http_code, response, error,
                   action_type, executed_at
            FROM workflow_logs
            WHERE workflow_id = $1
            ORDER BY executed_at, id
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(WorkflowLogRow::into_log).collect()
    }
}

#[async_trait]
impl GraphStore for Database {
    async fn get_node(&self, node_id: Uuid) -> Result<Node> {
        let row = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| WorkflowError::not_found(format!("node {}", node_id)))?;
        row.into_node()
    }

    async fn get_starting_node(&self, workflow_id: Uuid) -> Result<Node> {
        let row = sqlx::query_as::<_, NodeRow>(
            r#"
            SELECT n.id, n.title, n.type AS node_type, n.description, n.rollback_scope,
                   n.created_at, n.updated_at, n.deleted_at
            FROM nodes n
            JOIN workflows w ON w.starting_node_id = n.id
            WHERE w.id = $1 AND w.deleted_at IS NULL AND n.deleted_at IS NULL
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| {
            WorkflowError::not_found(format!("starting node of workflow {}", workflow_id))
        })?;
        row.into_node()
    }

    async fn get_children(&self, node_id: Uuid) -> Result<Vec<Node>> {
        self.related(node_id, false).await
    }

    async fn get_parents(&self, node_id: Uuid) -> Result<Vec<Node>> {
        self.related(node_id, true).await
    }

    async fn get_immediate_ancestor(&self, node_id: Uuid) -> Result<Node> {
        let parents = self.related(node_id, true).await?;
        match <[Node; 1]>::try_from(parents) {
            Ok([parent]) => Ok(parent),
            Err(_) => Err(WorkflowError::not_found(format!(
                "immediate ancestor of node {}",
                node_id
            ))),
        }
    }

    async fn get_node_tasks(&self, node_id: Uuid) -> Result<Vec<NodeTask>> {
        let rows = sqlx::query_as::<_, NodeTaskRow>(&format!(
            r#"
            SELECT {NODE_TASK_COLUMNS}
            FROM node_tasks nt
            JOIN tasks t ON t.id = nt.task_id
            WHERE nt.node_id = $1 AND nt.deleted_at IS NULL
              AND t.type NOT IN ('Start', 'End')
            ORDER BY nt.task_order ASC
            "#
        ))
        .bind(node_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(NodeTaskRow::into_node_task).collect()
    }

    async fn validate_acyclic(&self, start_node_id: Uuid) -> Result<()> {
        let depths: Vec<(i32,)> = sqlx::query_as(
            "SELECT depth FROM node_closure WHERE ancestor = $1 AND descendant = $1",
        )
        .bind(start_node_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        match depths.as_slice() {
            [(0,)] => Ok(()),
            _ => Err(WorkflowError::Cycle(start_node_id)),
        }
    }
}

#[async_trait]
impl Journal for Database {
    async fn append(&self, log: NewWorkflowLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_logs
                (id, workflow_id, node_id, task_id, status, message, http_code, response, error,
                 action_type, executed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(log.workflow_id)
        .bind(log.node_id)
        .bind(log.task_id)
        .bind(log.status.to_string())
        .bind(&log.message)
        .bind(log.http_code)
        .bind(&log.response)
        .bind(&log.error)
        .bind(log.action_type.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_workflow_status(
        &self,
        workflow_id: Uuid,
        status: WorkflowStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE workflows SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(workflow_id)
            .bind(status.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_execution(&self, execution_id: Uuid) -> Result<WorkflowExecution> {
        let row = sqlx::query_as::<_, WorkflowExecutionRow>(
            r#"
            SELECT id, workflow_id, reference_number, status,
                   last_executed_node_id, last_executed_task_id, created_at, updated_at
            FROM workflow_executions
            WHERE id = $1
            "#,
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| WorkflowError::not_found(format!("execution {}", execution_id)))?;
        row.into_execution()
    }

    async fn update_execution_status(
        &self,
        execution_id: Uuid,
        status: WorkflowStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE workflow_executions SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(execution_id)
            .bind(status.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn update_execution_cursor(
        &self,
        execution_id: Uuid,
        node_id: Option<Uuid>,
        task_id: Option<Uuid>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE workflow_executions
            SET
                last_executed_node_id = COALESCE($2, last_executed_node_id),
                last_executed_task_id = COALESCE($3, last_executed_task_id),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(execution_id)
        .bind(node_id)
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
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
        sqlx::query(
            r#"
            UPDATE node_tasks
            SET
                status = $2,
                retry_count = $3,
                http_code = COALESCE($4, http_code),
                response = COALESCE($5, response),
                error = COALESCE($6, error),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(node_task_id)
        .bind(status.to_string())
        .bind(retry_count)
        .bind(http_code)
        .bind(&response)
        .bind(&error)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn node_log_exists(
        &self,
        workflow_id: Uuid,
        node_id: Uuid,
        status: LogStatus,
    ) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM workflow_logs
                WHERE workflow_id = $1 AND node_id = $2 AND task_id IS NULL
                  AND status = $3 AND action_type = 'execution'
            )
            "#,
        )
        .bind(workflow_id)
        .bind(node_id)
        .bind(status.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(exists)
    }
}
