/// Custom table layer
///
/// Runtime-defined tables: their logical definitions, the data-type registry,
/// DDL generation, record validation and the table lifecycle service.

// Logical table and field definitions
pub mod types;

// Logical type -> physical column type mapping
pub mod data_types;

// Definition -> ordered DDL plan
pub mod ddl;

// Record payload validation and normalisation
pub mod validator;

// Persistence of logical definitions
pub mod registry;

// Create / alter / drop orchestration
pub mod service;

pub use ddl::{DdlOperation, SchemaTranslator};
pub use registry::{InMemoryTableRegistry, PgTableRegistry, TableRegistry};
pub use service::{TableDependents, TableService};
pub use types::{FieldDefinition, Record, TableDefinition};
pub use validator::{PrecisionPolicy, RecordValidator, ValidationMode};
