/// Workflow management service
///
/// Validates definitions, persists them and keeps the hot registry in step
/// with storage. A workflow that fails validation is never stored.

use crate::errors::{ServiceError, StorageError, WorkflowError};
use crate::table::registry::TableRegistry;
use crate::table::service::TableDependents;
use crate::workflow::graph::CompiledWorkflow;
use crate::workflow::registry::WorkflowRegistry;
use crate::workflow::storage::WorkflowStore;
use crate::workflow::types::{Workflow, WorkflowExecution};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct WorkflowService {
    store: Arc<dyn WorkflowStore>,
    registry: Arc<WorkflowRegistry>,
    tables: Arc<dyn TableRegistry>,
}

impl WorkflowService {
    pub fn new(store: Arc<dyn WorkflowStore>, registry: Arc<WorkflowRegistry>, tables: Arc<dyn TableRegistry>) -> Self {
        Self {
            store,
            registry,
            tables,
        }
    }

    pub fn registry(&self) -> &Arc<WorkflowRegistry> {
        &self.registry
    }

    pub async fn create(&self, mut workflow: Workflow) -> Result<Workflow, WorkflowError> {
        workflow.id = Uuid::new_v4();
        workflow.created_at = Utc::now();
        workflow.updated_at = workflow.created_at;

        self.validate(&workflow).await?;
        self.store.save(&workflow).await?;
        self.registry.reload_workflow(workflow.id).await?;

        info!("✅ Created workflow '{}' ({})", workflow.name, workflow.id);
        Ok(workflow)
    }

    /// Replace the graph and settings of an existing workflow
    pub async fn update(&self, id: Uuid, mut workflow: Workflow) -> Result<Workflow, WorkflowError> {
        let existing = self.get(id).await?;
        workflow.id = id;
        workflow.created_at = existing.created_at;
        workflow.created_by = existing.created_by;
        workflow.updated_at = Utc::now();

        self.validate(&workflow).await?;
        self.store.save(&workflow).await?;
        self.registry.reload_workflow(id).await?;

        info!("✅ Updated workflow '{}' ({})", workflow.name, id);
        Ok(workflow)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), WorkflowError> {
        if !self.store.delete(id).await? {
            return Err(WorkflowError::NotFound(id.to_string()));
        }
        self.registry.remove_workflow(id);
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Workflow, WorkflowError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<Workflow>, WorkflowError> {
        self.store.list().await
    }

    pub async fn executions(&self, id: Uuid, limit: u32) -> Result<Vec<WorkflowExecution>, WorkflowError> {
        self.get(id).await?;
        self.store.list_executions(id, limit).await
    }

    /// Structural checks plus existence of every table the workflow touches
    async fn validate(&self, workflow: &Workflow) -> Result<(), WorkflowError> {
        if workflow.name.trim().is_empty() {
            return Err(WorkflowError::InvalidGraph("workflow name must not be empty".to_string()));
        }
        CompiledWorkflow::compile(workflow.clone())?;

        for table_id in workflow.referenced_tables() {
            self.require_table(table_id).await?;
        }
        Ok(())
    }

    async fn require_table(&self, table_id: Uuid) -> Result<(), WorkflowError> {
        match self.tables.get(table_id).await? {
            Some(_) => Ok(()),
            None => Err(WorkflowError::TableNotFound(table_id.to_string())),
        }
    }
}

/// Stored workflows as dependents of the tables they watch or write to
pub struct WorkflowTableReferences {
    store: Arc<dyn WorkflowStore>,
}

impl WorkflowTableReferences {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TableDependents for WorkflowTableReferences {
    async fn dependents_of(&self, table_id: Uuid) -> Result<Vec<String>, ServiceError> {
        let workflows = self.store.list().await.map_err(|e| match e {
            WorkflowError::Storage(e) => ServiceError::Storage(e),
            other => ServiceError::Storage(StorageError::store(other.to_string())),
        })?;
        Ok(workflows
            .into_iter()
            .filter(|w| w.references_table(table_id))
            .map(|w| format!("workflow '{}' ({})", w.name, w.id))
            .collect())
    }
}
