/// Persistence layer for workflow definitions and their execution history
///
/// Workflows are stored as one JSON document each, with the id, name, watched
/// table and active flag broken out into columns for indexed lookups.
/// Executions are append-only.

use crate::errors::WorkflowError;
use crate::workflow::types::{Workflow, WorkflowExecution};
use async_trait::async_trait;
use sqlx::{postgres::PgPool, Row};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Insert or replace a workflow
    async fn save(&self, workflow: &Workflow) -> Result<(), WorkflowError>;

    async fn get(&self, id: Uuid) -> Result<Option<Workflow>, WorkflowError>;

    /// Every stored workflow, most recently updated first
    async fn list(&self) -> Result<Vec<Workflow>, WorkflowError>;

    /// Remove a workflow and its executions; `false` if it did not exist
    async fn delete(&self, id: Uuid) -> Result<bool, WorkflowError>;

    async fn append_execution(&self, execution: &WorkflowExecution) -> Result<(), WorkflowError>;

    /// Latest executions of one workflow, newest first
    async fn list_executions(&self, workflow_id: Uuid, limit: u32) -> Result<Vec<WorkflowExecution>, WorkflowError>;
}

/// Postgres-backed store (`workflows` / `workflow_executions`)
#[derive(Debug, Clone)]
pub struct PgWorkflowStore {
    pool: PgPool,
    schema: String,
}

impl PgWorkflowStore {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn save(&self, workflow: &Workflow) -> Result<(), WorkflowError> {
        let definition = serde_json::to_value(workflow)?;

        sqlx::query(&format!(
            r#"
            INSERT INTO "{}"."workflows" (id, name, table_id, is_active, definition, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                table_id = excluded.table_id,
                is_active = excluded.is_active,
                definition = excluded.definition,
                updated_at = excluded.updated_at
            "#,
            self.schema
        ))
        .bind(workflow.id)
        .bind(&workflow.name)
        .bind(workflow.table_id)
        .bind(workflow.is_active)
        .bind(definition)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Workflow>, WorkflowError> {
        let row = sqlx::query(&format!("SELECT definition FROM \"{}\".\"workflows\" WHERE id = $1", self.schema))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition: serde_json::Value = row.get("definition");
                Ok(Some(serde_json::from_value(definition)?))
            }
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<Workflow>, WorkflowError> {
        let rows = sqlx::query(&format!(
            "SELECT definition FROM \"{}\".\"workflows\" ORDER BY updated_at DESC",
            self.schema
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut workflows = Vec::with_capacity(rows.len());
        for row in rows {
            let definition: serde_json::Value = row.get("definition");
            workflows.push(serde_json::from_value(definition)?);
        }
        Ok(workflows)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, WorkflowError> {
        let result = sqlx::query(&format!("DELETE FROM \"{}\".\"workflows\" WHERE id = $1", self.schema))
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn append_execution(&self, execution: &WorkflowExecution) -> Result<(), WorkflowError> {
        let status = serde_json::to_value(execution.status)?;
        let document = serde_json::to_value(execution)?;

        sqlx::query(&format!(
            r#"
            INSERT INTO "{}"."workflow_executions" (id, workflow_id, status, execution, started_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
            self.schema
        ))
        .bind(execution.id)
        .bind(execution.workflow_id)
        .bind(status.as_str().unwrap_or_default())
        .bind(document)
        .bind(execution.started_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_executions(&self, workflow_id: Uuid, limit: u32) -> Result<Vec<WorkflowExecution>, WorkflowError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT execution FROM "{}"."workflow_executions"
            WHERE workflow_id = $1
            ORDER BY started_at DESC
            LIMIT $2
            "#,
            self.schema
        ))
        .bind(workflow_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut executions = Vec::with_capacity(rows.len());
        for row in rows {
            let document: serde_json::Value = row.get("execution");
            executions.push(serde_json::from_value(document)?);
        }
        Ok(executions)
    }
}

#[derive(Default)]
struct Stored {
    workflows: BTreeMap<Uuid, Workflow>,
    executions: HashMap<Uuid, Vec<WorkflowExecution>>,
}

/// Store held in memory
///
/// Mirrors the cascade of the Postgres schema: deleting a workflow drops its
/// executions, and executions of unknown workflows are refused.
#[derive(Clone, Default)]
pub struct InMemoryWorkflowStore {
    inner: Arc<RwLock<Stored>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn save(&self, workflow: &Workflow) -> Result<(), WorkflowError> {
        self.inner.write().await.workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Workflow>, WorkflowError> {
        Ok(self.inner.read().await.workflows.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Workflow>, WorkflowError> {
        let mut workflows: Vec<Workflow> = self.inner.read().await.workflows.values().cloned().collect();
        workflows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(workflows)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, WorkflowError> {
        let mut inner = self.inner.write().await;
        inner.executions.remove(&id);
        Ok(inner.workflows.remove(&id).is_some())
    }

    async fn append_execution(&self, execution: &WorkflowExecution) -> Result<(), WorkflowError> {
        let mut inner = self.inner.write().await;
        if !inner.workflows.contains_key(&execution.workflow_id) {
            return Err(WorkflowError::NotFound(execution.workflow_id.to_string()));
        }
        inner
            .executions
            .entry(execution.workflow_id)
            .or_default()
            .push(execution.clone());
        Ok(())
    }

    async fn list_executions(&self, workflow_id: Uuid, limit: u32) -> Result<Vec<WorkflowExecution>, WorkflowError> {
        let inner = self.inner.read().await;
        let mut executions = inner.executions.get(&workflow_id).cloned().unwrap_or_default();
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        executions.truncate(limit as usize);
        Ok(executions)
    }
}
