/// tabflow: user-defined tables on PostGIS with record-triggered workflows
///
/// Users describe tables at runtime; the service turns them into physical
/// Postgres tables (with history shadows), validates and stores records, and
/// runs graph workflows in reaction to record changes.

// Core configuration and setup
pub mod config;

// Domain error types
pub mod errors;

// Physical database access - DDL application, record DML, catalog snapshots
pub mod storage;

// Logical tables - data types, DDL translation, validation, registry
pub mod table;

// Record CRUD, history and change events
pub mod data;

// Workflow management layer - definitions, graph compilation, storage, registry
pub mod workflow;

// Runtime execution engine - event dispatch and DAG evaluation
pub mod runtime;

// HTTP API layer - REST endpoints for tables, records and workflows
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use data::{CustomDataService, RecordChangeEvent, RecordOperation};
pub use server::{build_application, start_server, Application, Backends};
pub use table::{FieldDefinition, TableDefinition, TableService};
pub use workflow::{Workflow, WorkflowExecution, WorkflowService};
