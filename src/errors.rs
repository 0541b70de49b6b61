//! Error types for the table, record and workflow layers.
//!
//! Each collaborator gets its own enum; [`ServiceError`] is the union the
//! table and record services surface to callers (and the HTTP layer maps to
//! status codes).

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors from the data-type registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataTypeError {
    #[error("unsupported data type: '{0}'")]
    Unsupported(String),
    /// The name looks spatial but is not one the registry recognises.
    #[error("suspicious data type '{0}': looks like a geometry type but is not a recognised name")]
    Suspicious(String),
}

/// Errors raised while validating a table definition or materialising it.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid identifier '{0}': must match ^[a-z][a-z0-9_]*$")]
    InvalidIdentifier(String),
    #[error("identifier '{0}' is longer than 63 bytes")]
    IdentifierTooLong(String),
    #[error("table name '{0}' is reserved")]
    ReservedTable(String),
    /// The physical name would land on another table's audit shadow.
    #[error("table name '{0}' must not end with '_history'; that suffix belongs to audit tables")]
    HistorySuffix(String),
    #[error("field name '{0}' is reserved for a system column")]
    ReservedField(String),
    #[error("duplicate field name '{0}'")]
    DuplicateField(String),
    #[error("field '{field}': {source}")]
    DataType {
        field: String,
        #[source]
        source: DataTypeError,
    },
    #[error("field '{field}' is geometry-typed but its kind cannot be resolved from '{declared}'")]
    InvalidGeometryType { field: String, declared: String },
    #[error("field '{field}': {reason}")]
    InvalidField { field: String, reason: String },
    #[error("column '{column}' on '{table}' exists as '{found}' but the definition expects '{expected}'")]
    Drift {
        table: String,
        column: String,
        expected: String,
        found: String,
    },
    #[error("DDL execution failed: {0}")]
    DdlFailed(String),
}

/// A single per-field validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// All validation failures found in one payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("record failed validation with {} problem(s)", .errors.len())]
pub struct ValidationErrors {
    pub errors: Vec<ValidationError>,
}

impl ValidationErrors {
    /// Look up the failure reported for `field`, if any.
    pub fn for_field(&self, field: &str) -> Option<&ValidationError> {
        self.errors.iter().find(|e| e.field == field)
    }
}

/// Errors from the physical database and the backing stores.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },
    #[error("storage error: {message}")]
    Store { message: String },
}

impl StorageError {
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }
}

/// Errors from the logical-table registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Another table already owns the name (the concurrency conflict).
    #[error("table name '{name}' is already registered")]
    Conflict { name: String },
    #[error("table not found: {id}")]
    NotFound { id: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<sqlx::Error> for RegistryError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(StorageError::Database(err))
    }
}

/// Errors surfaced by the table and record services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("record {record_id} not found in table '{table}'")]
    RecordNotFound { table: String, record_id: i64 },
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("table '{table}' is still used by {}", .dependents.join(", "))]
    TableInUse { table: String, dependents: Vec<String> },
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Registry(RegistryError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from workflow validation and storage.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("invalid workflow graph: {0}")]
    InvalidGraph(String),
    #[error("workflow graph contains a cycle through node '{0}'")]
    Cycle(String),
    #[error("workflow not found: {0}")]
    NotFound(String),
    #[error("workflow already exists: {0}")]
    Conflict(String),
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<sqlx::Error> for WorkflowError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(StorageError::Database(err))
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(StorageError::Serialization(err))
    }
}

impl From<RegistryError> for WorkflowError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound { id } => Self::TableNotFound(id),
            RegistryError::Storage(e) => Self::Storage(e),
            RegistryError::Conflict { name } => Self::Conflict(name),
        }
    }
}

/// Errors from a single action node invocation.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("action timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("broadcast failed: {0}")]
    Broadcast(String),
}

/// Errors from emitting a record change event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmitError {
    #[error("event channel is full")]
    Full,
    #[error("event channel is closed")]
    Closed,
}
