/// Workflow Management Layer
///
/// Workflow definitions, their compiled graph form, persistence and the
/// hot-reload registry the dispatcher reads from.

// Core workflow type definitions
pub mod types;

// Graph validation and the compiled, execution-ready form
pub mod graph;

// Postgres and in-memory persistence
pub mod storage;

// Hot-reload registry using ArcSwap for zero-downtime updates
pub mod registry;

pub mod service;

pub use graph::{Branch, CompiledWorkflow};
pub use registry::WorkflowRegistry;
pub use service::{WorkflowService, WorkflowTableReferences};
pub use storage::{InMemoryWorkflowStore, PgWorkflowStore, WorkflowStore};
pub use types::{
    ActionConfig, ConditionConfig, ConditionOperator, Edge, ExecutionStatus, Node, NodeKind, NodeOutcome,
    TriggerType, Workflow, WorkflowExecution,
};
