/// In-memory physical database
///
/// Mirrors the observable behaviour of the Postgres backend closely enough for
/// the services to be exercised without a server: DDL plans apply to a copy of
/// the catalog that is swapped in only when every step succeeds, unique
/// columns are enforced, history rows are written with each mutation, and
/// soft-deleted rows are hidden from default reads.

use crate::errors::StorageError;
use crate::storage::{FilterOp, ListQuery, PhysicalDatabase, PhysicalSnapshot, RecordChange};
use crate::table::ddl::DdlOperation;
use crate::table::types::{Record, TableDefinition};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
struct Catalog {
    snapshot: PhysicalSnapshot,
    unique: HashSet<(String, String)>,
    rows: HashMap<String, BTreeMap<i64, Record>>,
    sequences: HashMap<String, i64>,
}

impl Catalog {
    fn apply(&mut self, op: &DdlOperation) -> Result<(), StorageError> {
        match op {
            DdlOperation::AddGeometryColumn { table, column, .. } => {
                if !self.snapshot.table_exists(table) {
                    return Err(StorageError::store(format!("relation \"{table}\" does not exist")));
                }
                if self.snapshot.column(table, column).is_some() {
                    return Err(StorageError::store(format!(
                        "column \"{column}\" of relation \"{table}\" already exists"
                    )));
                }
            }
            DdlOperation::AddColumn { table, column } => {
                if !self.snapshot.table_exists(table) {
                    return Err(StorageError::store(format!("relation \"{table}\" does not exist")));
                }
                if column.not_null && self.has_rows(table) && self.snapshot.column(table, &column.name).is_none() {
                    return Err(StorageError::store(format!(
                        "column \"{}\" of relation \"{table}\" contains null values",
                        column.name
                    )));
                }
                if column.unique {
                    self.unique.insert((table.clone(), column.name.clone()));
                }
            }
            DdlOperation::SetNotNull { table, column } => {
                if self.snapshot.column(table, column).is_none() {
                    return Err(StorageError::store(format!(
                        "column \"{column}\" of relation \"{table}\" does not exist"
                    )));
                }
                let violated = self
                    .rows
                    .get(table)
                    .map(|rows| rows.values().any(|row| row.get(column).map_or(true, Value::is_null)))
                    .unwrap_or(false);
                if violated {
                    return Err(StorageError::store(format!(
                        "column \"{column}\" of relation \"{table}\" contains null values"
                    )));
                }
            }
            DdlOperation::AddForeignKey {
                constraint, ref_table, ..
            } => {
                if self.snapshot.has_constraint(constraint) {
                    return Err(StorageError::store(format!("constraint \"{constraint}\" already exists")));
                }
                if !self.snapshot.table_exists(ref_table) {
                    return Err(StorageError::store(format!("relation \"{ref_table}\" does not exist")));
                }
            }
            DdlOperation::CreateSpatialIndex { table, column, .. } | DdlOperation::CreateIndex { table, column, .. } => {
                if self.snapshot.column(table, column).is_none() {
                    return Err(StorageError::store(format!("column \"{column}\" does not exist")));
                }
            }
            DdlOperation::CreateTable { table, columns } => {
                if !self.snapshot.table_exists(table) {
                    for column in columns.iter().filter(|c| c.unique) {
                        self.unique.insert((table.clone(), column.name.clone()));
                    }
                    self.rows.entry(table.clone()).or_default();
                }
            }
            DdlOperation::CreateHistoryTable { table, .. } => {
                self.rows.entry(table.clone()).or_default();
            }
            DdlOperation::DropTable { table } => {
                self.rows.remove(table);
                self.sequences.remove(table);
                self.unique.retain(|(owner, _)| owner != table);
            }
        }
        self.snapshot.record(op);
        Ok(())
    }

    fn has_rows(&self, table: &str) -> bool {
        self.rows.get(table).map(|rows| !rows.is_empty()).unwrap_or(false)
    }

    fn next_id(&mut self, table: &str) -> i64 {
        let next = self.sequences.entry(table.to_string()).or_insert(0);
        *next += 1;
        *next
    }

    fn check_unique(&self, table: &str, id: i64, row: &Record) -> Result<(), StorageError> {
        let Some(rows) = self.rows.get(table) else {
            return Ok(());
        };
        for (owner, column) in &self.unique {
            if owner != table {
                continue;
            }
            let Some(value) = row.get(column).filter(|v| !v.is_null()) else {
                continue;
            };
            let clash = rows
                .iter()
                .any(|(other_id, other)| *other_id != id && other.get(column) == Some(value));
            if clash {
                return Err(StorageError::UniqueViolation {
                    constraint: format!("{table}_{column}_key"),
                });
            }
        }
        Ok(())
    }

    fn check_columns(&self, table: &str, values: &Record) -> Result<(), StorageError> {
        for name in values.keys() {
            if self.snapshot.column(table, name).is_none() {
                return Err(StorageError::store(format!(
                    "column \"{name}\" of relation \"{table}\" does not exist"
                )));
            }
        }
        Ok(())
    }

    fn write_history(&mut self, def: &TableDefinition, row: &Record, operation: &str, actor: Option<&str>) {
        let history = def.history_name();
        let history_id = self.next_id(&history);

        let mut entry = Record::new();
        entry.insert("history_id".to_string(), Value::from(history_id));
        entry.insert("record_id".to_string(), row.get("id").cloned().unwrap_or(Value::Null));
        entry.insert("operation".to_string(), Value::from(operation));
        entry.insert("actor".to_string(), actor.map(Value::from).unwrap_or(Value::Null));
        entry.insert("changed_at".to_string(), Value::from(now()));
        for (key, value) in row.iter().filter(|(key, _)| key.as_str() != "id") {
            entry.insert(key.clone(), value.clone());
        }

        self.rows.entry(history).or_default().insert(history_id, entry);
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Physical database held entirely in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatabase {
    catalog: Arc<RwLock<Catalog>>,
    fail_on: Arc<Mutex<Option<String>>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make any DDL step whose rendered SQL contains `pattern` fail
    pub fn fail_ddl_matching(&self, pattern: impl Into<String>) {
        if let Ok(mut fail_on) = self.fail_on.lock() {
            *fail_on = Some(pattern.into());
        }
    }

    pub fn clear_ddl_failure(&self) {
        if let Ok(mut fail_on) = self.fail_on.lock() {
            *fail_on = None;
        }
    }

    /// Names of the physical tables that currently exist
    pub async fn table_names(&self) -> Vec<String> {
        let catalog = self.catalog.read().await;
        let mut names: Vec<String> = catalog.snapshot.tables.keys().cloned().collect();
        names.sort();
        names
    }

    fn injected_failure(&self, sql: &str) -> Option<String> {
        let fail_on = self.fail_on.lock().ok()?;
        fail_on.as_ref().filter(|pattern| sql.contains(pattern.as_str())).cloned()
    }
}

fn filter_matches(row: &Record, field: &str, op: FilterOp, expected: Option<&Value>) -> bool {
    let actual = row.get(field).filter(|v| !v.is_null());
    match op {
        FilterOp::IsNull => actual.is_none(),
        FilterOp::NotNull => actual.is_some(),
        FilterOp::Like => match (actual, expected) {
            (Some(actual), Some(Value::String(pattern))) => like(&display(actual), pattern),
            _ => false,
        },
        _ => {
            let (Some(actual), Some(expected)) = (actual, expected.filter(|v| !v.is_null())) else {
                return false;
            };
            let ordering = compare(actual, expected);
            match op {
                FilterOp::Eq => ordering == Ordering::Equal,
                FilterOp::Ne => ordering != Ordering::Equal,
                FilterOp::Gt => ordering == Ordering::Greater,
                FilterOp::Gte => ordering != Ordering::Less,
                FilterOp::Lt => ordering == Ordering::Less,
                FilterOp::Lte => ordering != Ordering::Greater,
                FilterOp::Like | FilterOp::IsNull | FilterOp::NotNull => false,
            }
        }
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Numeric when both sides are numeric, textual otherwise; nulls sort last
fn compare(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => display(a).cmp(&display(b)),
    }
}

/// SQL LIKE with `%` and `_`
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut t, mut p) = (0, 0);
    let (mut star, mut mark) = (None, 0);

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            star = Some(p);
            mark = t;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            mark += 1;
            t = mark;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '%' {
        p += 1;
    }
    p == pattern.len()
}

#[async_trait]
impl PhysicalDatabase for InMemoryDatabase {
    async fn apply_schema(&self, plan: &[DdlOperation]) -> Result<(), StorageError> {
        let mut catalog = self.catalog.write().await;
        let mut staged = catalog.clone();

        for op in plan {
            let sql = op.to_sql("public");
            if let Some(pattern) = self.injected_failure(&sql) {
                return Err(StorageError::store(format!("injected failure on '{pattern}'")));
            }
            staged.apply(op)?;
        }

        *catalog = staged;
        Ok(())
    }

    async fn snapshot(&self, tables: &[String]) -> Result<PhysicalSnapshot, StorageError> {
        let catalog = self.catalog.read().await;
        let wanted: HashSet<&String> = tables.iter().collect();
        let source = &catalog.snapshot;

        Ok(PhysicalSnapshot {
            tables: source
                .tables
                .iter()
                .filter(|(name, _)| wanted.contains(name))
                .map(|(name, columns)| (name.clone(), columns.clone()))
                .collect(),
            indexes: source
                .indexes
                .iter()
                .filter(|(_, owner)| wanted.contains(owner))
                .map(|(name, owner)| (name.clone(), owner.clone()))
                .collect(),
            constraints: source
                .constraints
                .iter()
                .filter(|(_, owner)| wanted.contains(owner))
                .map(|(name, owner)| (name.clone(), owner.clone()))
                .collect(),
        })
    }

    async fn insert_record(
        &self,
        def: &TableDefinition,
        values: &Record,
        actor: Option<&str>,
    ) -> Result<Record, StorageError> {
        let table = def.physical_name();
        let mut catalog = self.catalog.write().await;
        if !catalog.snapshot.table_exists(&table) {
            return Err(StorageError::store(format!("relation \"{table}\" does not exist")));
        }
        catalog.check_columns(&table, values)?;

        let id = catalog.sequences.get(&table).copied().unwrap_or(0) + 1;
        let timestamp = now();
        let mut row = Record::new();
        row.insert("id".to_string(), Value::from(id));
        row.insert("created_at".to_string(), Value::from(timestamp.clone()));
        row.insert("updated_at".to_string(), Value::from(timestamp));
        row.insert("deleted_at".to_string(), Value::Null);
        row.insert("created_by".to_string(), actor.map(Value::from).unwrap_or(Value::Null));
        row.insert("updated_by".to_string(), actor.map(Value::from).unwrap_or(Value::Null));
        for field in &def.fields {
            row.insert(field.name.clone(), values.get(&field.name).cloned().unwrap_or(Value::Null));
        }

        for (name, state) in catalog.snapshot.tables.get(&table).into_iter().flatten() {
            if state.not_null && row.get(name).map_or(true, Value::is_null) {
                return Err(StorageError::store(format!(
                    "null value in column \"{name}\" of relation \"{table}\" violates not-null constraint"
                )));
            }
        }
        catalog.check_unique(&table, id, &row)?;

        catalog.next_id(&table);
        catalog.rows.entry(table).or_default().insert(id, row.clone());
        catalog.write_history(def, &row, "INSERT", actor);

        Ok(row)
    }

    async fn update_record(
        &self,
        def: &TableDefinition,
        id: i64,
        values: &Record,
        actor: Option<&str>,
    ) -> Result<Option<RecordChange>, StorageError> {
        let table = def.physical_name();
        let mut catalog = self.catalog.write().await;
        catalog.check_columns(&table, values)?;

        let Some(before) = catalog
            .rows
            .get(&table)
            .and_then(|rows| rows.get(&id))
            .filter(|row| row.get("deleted_at").map_or(true, Value::is_null))
            .cloned()
        else {
            return Ok(None);
        };

        let mut after = before.clone();
        for (key, value) in values {
            after.insert(key.clone(), value.clone());
        }
        after.insert("updated_at".to_string(), Value::from(now()));
        after.insert("updated_by".to_string(), actor.map(Value::from).unwrap_or(Value::Null));

        let not_null: Vec<String> = catalog
            .snapshot
            .tables
            .get(&table)
            .into_iter()
            .flatten()
            .filter(|(_, state)| state.not_null)
            .map(|(name, _)| name.clone())
            .collect();
        for name in not_null {
            if after.get(&name).map_or(true, Value::is_null) {
                return Err(StorageError::store(format!(
                    "null value in column \"{name}\" of relation \"{table}\" violates not-null constraint"
                )));
            }
        }
        catalog.check_unique(&table, id, &after)?;

        catalog.rows.entry(table).or_default().insert(id, after.clone());
        catalog.write_history(def, &after, "UPDATE", actor);

        Ok(Some(RecordChange { before, after }))
    }

    async fn soft_delete_record(
        &self,
        def: &TableDefinition,
        id: i64,
        actor: Option<&str>,
    ) -> Result<Option<RecordChange>, StorageError> {
        let table = def.physical_name();
        let mut catalog = self.catalog.write().await;

        let Some(before) = catalog
            .rows
            .get(&table)
            .and_then(|rows| rows.get(&id))
            .filter(|row| row.get("deleted_at").map_or(true, Value::is_null))
            .cloned()
        else {
            return Ok(None);
        };

        let timestamp = now();
        let mut after = before.clone();
        after.insert("deleted_at".to_string(), Value::from(timestamp.clone()));
        after.insert("updated_at".to_string(), Value::from(timestamp));
        after.insert("updated_by".to_string(), actor.map(Value::from).unwrap_or(Value::Null));

        catalog.rows.entry(table).or_default().insert(id, after.clone());
        catalog.write_history(def, &after, "DELETE", actor);

        Ok(Some(RecordChange { before, after }))
    }

    async fn fetch_record(
        &self,
        def: &TableDefinition,
        id: i64,
        include_deleted: bool,
    ) -> Result<Option<Record>, StorageError> {
        let catalog = self.catalog.read().await;
        Ok(catalog
            .rows
            .get(&def.physical_name())
            .and_then(|rows| rows.get(&id))
            .filter(|row| include_deleted || row.get("deleted_at").map_or(true, Value::is_null))
            .cloned())
    }

    async fn list_records(&self, def: &TableDefinition, query: &ListQuery) -> Result<Vec<Record>, StorageError> {
        let catalog = self.catalog.read().await;
        let Some(rows) = catalog.rows.get(&def.physical_name()) else {
            return Err(StorageError::store(format!(
                "relation \"{}\" does not exist",
                def.physical_name()
            )));
        };

        let mut matched: Vec<&Record> = rows
            .values()
            .filter(|row| query.include_deleted || row.get("deleted_at").map_or(true, Value::is_null))
            .filter(|row| {
                query
                    .filters
                    .iter()
                    .all(|f| filter_matches(row, &f.field, f.op, f.value.as_ref()))
            })
            .collect();

        matched.sort_by(|a, b| {
            for key in &query.sort {
                let ordering = compare(
                    a.get(&key.field).unwrap_or(&Value::Null),
                    b.get(&key.field).unwrap_or(&Value::Null),
                );
                let ordering = if key.descending { ordering.reverse() } else { ordering };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            compare(
                a.get("id").unwrap_or(&Value::Null),
                b.get("id").unwrap_or(&Value::Null),
            )
        });

        Ok(matched
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn record_history(&self, def: &TableDefinition, id: i64) -> Result<Vec<Record>, StorageError> {
        let catalog = self.catalog.read().await;
        Ok(catalog
            .rows
            .get(&def.history_name())
            .map(|rows| {
                rows.values()
                    .filter(|row| row.get("record_id").and_then(Value::as_i64) == Some(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
