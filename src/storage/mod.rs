/// Physical storage layer
///
/// The physical database executes generated DDL and the record DML for every
/// custom table. It sits behind the [`PhysicalDatabase`] trait so the services
/// run unchanged against Postgres/PostGIS ([`postgres::PgDatabase`]) or the
/// in-memory engine used by tests ([`memory::InMemoryDatabase`]).

// Connection pool and service-owned schema bootstrap
pub mod database;

// PostGIS-backed physical database
pub mod postgres;

// In-memory physical database
pub mod memory;

use crate::errors::StorageError;
use crate::table::ddl::{DdlOperation, HISTORY_ENVELOPE_TYPES, SYSTEM_COLUMN_TYPES};
use crate::table::types::{Record, TableDefinition};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

pub use database::DatabaseManager;
pub use memory::InMemoryDatabase;
pub use postgres::PgDatabase;

/// Catalog view of one existing column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnState {
    /// `information_schema.columns.udt_name`
    pub udt_name: String,
    pub not_null: bool,
}

/// What already exists physically for a set of tables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhysicalSnapshot {
    /// table -> column -> state
    pub tables: HashMap<String, BTreeMap<String, ColumnState>>,
    /// index name -> owning table
    pub indexes: HashMap<String, String>,
    /// constraint name -> owning table
    pub constraints: HashMap<String, String>,
}

impl PhysicalSnapshot {
    pub fn table_exists(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&ColumnState> {
        self.tables.get(table).and_then(|columns| columns.get(column))
    }

    pub fn has_index(&self, index: &str) -> bool {
        self.indexes.contains_key(index)
    }

    pub fn has_constraint(&self, constraint: &str) -> bool {
        self.constraints.contains_key(constraint)
    }

    /// Fold the effect of one DDL step into the snapshot
    pub fn record(&mut self, op: &DdlOperation) {
        match op {
            DdlOperation::CreateTable { table, columns } => {
                let entry = self.tables.entry(table.clone()).or_default();
                for (name, udt, not_null) in SYSTEM_COLUMN_TYPES {
                    entry.entry(name.to_string()).or_insert(ColumnState {
                        udt_name: udt.to_string(),
                        not_null,
                    });
                }
                for column in columns {
                    entry.entry(column.name.clone()).or_insert(ColumnState {
                        udt_name: column.column_type.udt_name().to_string(),
                        not_null: column.not_null,
                    });
                }
            }
            DdlOperation::CreateHistoryTable { table, columns } => {
                let entry = self.tables.entry(table.clone()).or_default();
                for (name, udt, not_null) in HISTORY_ENVELOPE_TYPES {
                    entry.entry(name.to_string()).or_insert(ColumnState {
                        udt_name: udt.to_string(),
                        not_null,
                    });
                }
                // mirrored system columns are nullable in the shadow
                for (name, udt, _) in SYSTEM_COLUMN_TYPES.iter().skip(1) {
                    entry.entry(name.to_string()).or_insert(ColumnState {
                        udt_name: udt.to_string(),
                        not_null: false,
                    });
                }
                for column in columns {
                    entry.entry(column.name.clone()).or_insert(ColumnState {
                        udt_name: column.column_type.udt_name().to_string(),
                        not_null: false,
                    });
                }
            }
            DdlOperation::AddColumn { table, column } => {
                self.tables.entry(table.clone()).or_default().insert(
                    column.name.clone(),
                    ColumnState {
                        udt_name: column.column_type.udt_name().to_string(),
                        not_null: column.not_null,
                    },
                );
            }
            DdlOperation::AddGeometryColumn { table, column, .. } => {
                self.tables.entry(table.clone()).or_default().insert(
                    column.clone(),
                    ColumnState {
                        udt_name: "geometry".to_string(),
                        not_null: false,
                    },
                );
            }
            DdlOperation::SetNotNull { table, column } => {
                if let Some(state) = self.tables.get_mut(table).and_then(|c| c.get_mut(column)) {
                    state.not_null = true;
                }
            }
            DdlOperation::AddForeignKey { table, constraint, .. } => {
                self.constraints.insert(constraint.clone(), table.clone());
            }
            DdlOperation::CreateSpatialIndex { index, table, .. } | DdlOperation::CreateIndex { index, table, .. } => {
                self.indexes.insert(index.clone(), table.clone());
            }
            DdlOperation::DropTable { table } => {
                self.tables.remove(table);
                self.indexes.retain(|_, owner| owner != table);
                self.constraints.retain(|_, owner| owner != table);
            }
        }
    }
}

/// Before/after images of a mutated record
#[derive(Debug, Clone, PartialEq)]
pub struct RecordChange {
    pub before: Record,
    pub after: Record,
}

/// Comparison applied by a list filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    IsNull,
    NotNull,
}

impl FilterOp {
    /// Whether the filter compares against a value
    pub fn takes_value(&self) -> bool {
        !matches!(self, Self::IsNull | Self::NotNull)
    }

    pub fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Like => "LIKE",
            Self::IsNull => "IS NULL",
            Self::NotNull => "IS NOT NULL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

/// A validated list request; field names are checked by the data service
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub filters: Vec<Filter>,
    pub sort: Vec<SortKey>,
    pub limit: u32,
    pub offset: u32,
    pub include_deleted: bool,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            sort: Vec::new(),
            limit: 50,
            offset: 0,
            include_deleted: false,
        }
    }
}

/// Executes DDL and record DML against physical tables
///
/// Every mutating record call writes the matching history row in the same
/// transaction as the primary write.
#[async_trait]
pub trait PhysicalDatabase: Send + Sync {
    /// Apply a DDL plan atomically; on error nothing of the plan remains
    async fn apply_schema(&self, plan: &[DdlOperation]) -> Result<(), StorageError>;

    /// Existing columns, indexes and constraints of the given physical tables
    async fn snapshot(&self, tables: &[String]) -> Result<PhysicalSnapshot, StorageError>;

    async fn insert_record(
        &self,
        table: &TableDefinition,
        values: &Record,
        actor: Option<&str>,
    ) -> Result<Record, StorageError>;

    /// `None` when the record does not exist or is soft-deleted
    async fn update_record(
        &self,
        table: &TableDefinition,
        id: i64,
        values: &Record,
        actor: Option<&str>,
    ) -> Result<Option<RecordChange>, StorageError>;

    /// `None` when the record does not exist or is already deleted
    async fn soft_delete_record(
        &self,
        table: &TableDefinition,
        id: i64,
        actor: Option<&str>,
    ) -> Result<Option<RecordChange>, StorageError>;

    async fn fetch_record(
        &self,
        table: &TableDefinition,
        id: i64,
        include_deleted: bool,
    ) -> Result<Option<Record>, StorageError>;

    async fn list_records(&self, table: &TableDefinition, query: &ListQuery) -> Result<Vec<Record>, StorageError>;

    /// History rows of one record, oldest first
    async fn record_history(&self, table: &TableDefinition, id: i64) -> Result<Vec<Record>, StorageError>;
}
