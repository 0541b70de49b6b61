/// Hot-reload workflow registry using ArcSwap
///
/// Holds every stored workflow in compiled form. Readers (the dispatcher) take
/// a lock-free snapshot; writers swap in a new map, so a reload never blocks a
/// running execution and a run keeps the version it started with.

use crate::data::events::RecordOperation;
use crate::errors::WorkflowError;
use crate::workflow::graph::CompiledWorkflow;
use crate::workflow::storage::WorkflowStore;
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};
use uuid::Uuid;

type WorkflowMap = HashMap<Uuid, Arc<CompiledWorkflow>>;

pub struct WorkflowRegistry {
    workflows: ArcSwap<WorkflowMap>,
    store: Arc<dyn WorkflowStore>,
}

impl WorkflowRegistry {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
            store,
        }
    }

    /// Load and compile every stored workflow
    ///
    /// A stored workflow that no longer compiles is logged and left out.
    pub async fn init_from_storage(&self) -> Result<usize, WorkflowError> {
        let stored = self.store.list().await?;
        let mut compiled = HashMap::with_capacity(stored.len());

        for workflow in stored {
            let id = workflow.id;
            match CompiledWorkflow::compile(workflow) {
                Ok(c) => {
                    compiled.insert(id, Arc::new(c));
                }
                Err(e) => tracing::warn!("⚠️ Skipping workflow {}: {}", id, e),
            }
        }

        let count = compiled.len();
        self.workflows.store(Arc::new(compiled));
        tracing::info!("📚 Initialized workflow registry with {} workflows", count);
        Ok(count)
    }

    /// Re-read one workflow from storage and swap it in
    pub async fn reload_workflow(&self, workflow_id: Uuid) -> Result<(), WorkflowError> {
        let workflow = self
            .store
            .get(workflow_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))?;
        let compiled = Arc::new(CompiledWorkflow::compile(workflow)?);

        self.workflows.rcu(|current| {
            let mut next = WorkflowMap::clone(current);
            next.insert(workflow_id, Arc::clone(&compiled));
            next
        });

        tracing::info!("🔄 Hot-reloaded workflow: {}", workflow_id);
        Ok(())
    }

    pub fn remove_workflow(&self, workflow_id: Uuid) {
        let previous = self.workflows.rcu(|current| {
            let mut next = WorkflowMap::clone(current);
            next.remove(&workflow_id);
            next
        });
        if previous.contains_key(&workflow_id) {
            tracing::info!("🗑️ Removed workflow from registry: {}", workflow_id);
        }
    }

    pub fn get(&self, workflow_id: Uuid) -> Option<Arc<CompiledWorkflow>> {
        self.workflows.load().get(&workflow_id).cloned()
    }

    /// Active workflows triggered by `operation` on `table_id`
    pub fn matching(&self, table_id: Uuid, operation: RecordOperation) -> Vec<Arc<CompiledWorkflow>> {
        self.workflows
            .load()
            .values()
            .filter(|w| w.matches(table_id, operation))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.workflows.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.load().is_empty()
    }
}
