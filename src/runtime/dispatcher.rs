/// Event dispatcher
///
/// Drains the record change queue and starts one task per matching workflow.
/// Each run is independent: runs for the same event may finish in any order,
/// and one failing run does not affect the others. Events caused by workflow
/// actions carry a chain depth; past `max_depth` they are not dispatched, which
/// bounds workflows that trigger each other.

use crate::data::events::SharedEvent;
use crate::runtime::engine::WorkflowEngine;
use crate::workflow::registry::WorkflowRegistry;
use crate::workflow::storage::WorkflowStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct WorkflowDispatcher {
    registry: Arc<WorkflowRegistry>,
    engine: Arc<WorkflowEngine>,
    store: Arc<dyn WorkflowStore>,
    max_depth: u32,
}

impl WorkflowDispatcher {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        engine: Arc<WorkflowEngine>,
        store: Arc<dyn WorkflowStore>,
        max_depth: u32,
    ) -> Self {
        Self {
            registry,
            engine,
            store,
            max_depth,
        }
    }

    /// Start every workflow the event triggers; returns the run handles
    pub fn dispatch(&self, event: SharedEvent) -> Vec<JoinHandle<()>> {
        if event.depth > self.max_depth {
            warn!(
                "⛔ Not dispatching {} on {}#{}: chain depth {} exceeds {}",
                event.operation.as_str(),
                event.table_name,
                event.record_id,
                event.depth,
                self.max_depth
            );
            return Vec::new();
        }

        let matching = self.registry.matching(event.table_id, event.operation);
        debug!(
            "📥 {} on {}#{} matches {} workflows",
            event.operation.as_str(),
            event.table_name,
            event.record_id,
            matching.len()
        );

        matching
            .into_iter()
            .map(|workflow| {
                let engine = Arc::clone(&self.engine);
                let store = Arc::clone(&self.store);
                let event = Arc::clone(&event);
                tokio::spawn(async move {
                    let execution = engine.run(workflow, event).await;
                    if let Err(e) = store.append_execution(&execution).await {
                        error!("❌ Failed to record execution {} of workflow {}: {}", execution.id, execution.workflow_id, e);
                    }
                })
            })
            .collect()
    }

    /// Consume the event queue until every sender is gone
    pub fn spawn(self: Arc<Self>, mut events: mpsc::Receiver<SharedEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("🎧 Workflow dispatcher listening for record changes");
            while let Some(event) = events.recv().await {
                self.dispatch(event);
            }
            info!("🛑 Workflow dispatcher stopped");
        })
    }
}
