/// PostGIS-backed physical database
///
/// Record values cross the wire as text and are cast server-side to the
/// column's type (`$n::NUMERIC(10,2)`), geometry goes through
/// `ST_GeomFromGeoJSON`. Rows are read back as JSONB with geometry columns
/// re-encoded as GeoJSON, so callers never see WKB.

use crate::errors::StorageError;
use crate::storage::{ColumnState, ListQuery, PhysicalDatabase, PhysicalSnapshot, RecordChange};
use crate::table::data_types::ColumnType;
use crate::table::ddl::DdlOperation;
use crate::table::types::{Record, TableDefinition, SYSTEM_COLUMNS};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::PgPool, Postgres, Row, Transaction};

/// Physical database over a Postgres pool
#[derive(Debug, Clone)]
pub struct PgDatabase {
    pool: PgPool,
    schema: String,
}

impl PgDatabase {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    fn table(&self, name: &str) -> String {
        format!("\"{}\".\"{}\"", self.schema, name)
    }

    /// Fetch one row inside a transaction, optionally locking it
    async fn fetch_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        def: &TableDefinition,
        id: i64,
        lock: bool,
    ) -> Result<Option<Record>, StorageError> {
        let sql = format!(
            "SELECT {} AS record FROM {} t WHERE t.id = $1 AND t.deleted_at IS NULL{}",
            select_expr(def),
            self.table(&def.physical_name()),
            if lock { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&mut **tx).await?;
        row.map(|row| decode_record(&row)).transpose()
    }

    /// Copy the current state of a row into the history shadow
    async fn write_history(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        def: &TableDefinition,
        id: i64,
        operation: &str,
        actor: Option<&str>,
    ) -> Result<(), StorageError> {
        let mut columns = vec![
            "record_id".to_string(),
            "operation".to_string(),
            "actor".to_string(),
        ];
        let mut values = vec!["t.id".to_string(), "$1".to_string(), "$2".to_string()];

        for system in SYSTEM_COLUMNS.iter().skip(1) {
            columns.push(format!("\"{system}\""));
            values.push(format!("t.\"{system}\""));
        }
        for (name, column_type) in field_columns(def) {
            columns.push(format!("\"{name}\""));
            if column_type.is_geometry() {
                values.push(format!("ST_AsGeoJSON(t.\"{name}\")::jsonb"));
            } else {
                values.push(format!("t.\"{name}\""));
            }
        }

        let sql = format!(
            "INSERT INTO {} ({}) SELECT {} FROM {} t WHERE t.id = $3",
            self.table(&def.history_name()),
            columns.join(", "),
            values.join(", "),
            self.table(&def.physical_name())
        );
        sqlx::query(&sql)
            .bind(operation)
            .bind(actor)
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

/// Non-system columns of a table with their physical types
fn field_columns(def: &TableDefinition) -> Vec<(String, ColumnType)> {
    def.ordered_fields()
        .into_iter()
        .filter_map(|field| {
            let shape = field.shape().ok()?;
            Some((field.name.clone(), field.column_type(&shape)))
        })
        .collect()
}

/// Physical type of any column a query may reference
fn column_type_of(def: &TableDefinition, name: &str) -> Option<ColumnType> {
    match name {
        "id" => Some(ColumnType::BigInt),
        "created_at" | "updated_at" | "deleted_at" => Some(ColumnType::TimestampTz),
        "created_by" | "updated_by" => Some(ColumnType::Text),
        _ => {
            let field = def.field(name)?;
            let shape = field.shape().ok()?;
            Some(field.column_type(&shape))
        }
    }
}

/// JSONB expression for a full row with geometry as GeoJSON
fn select_expr(def: &TableDefinition) -> String {
    let geometry: Vec<String> = field_columns(def)
        .into_iter()
        .filter(|(_, column_type)| column_type.is_geometry())
        .map(|(name, _)| name)
        .collect();

    if geometry.is_empty() {
        return "to_jsonb(t)".to_string();
    }

    let stripped: String = geometry.iter().map(|name| format!(" - '{name}'")).collect();
    let rebuilt: Vec<String> = geometry
        .iter()
        .map(|name| format!("'{name}', ST_AsGeoJSON(t.\"{name}\")::jsonb"))
        .collect();
    format!("(to_jsonb(t){stripped}) || jsonb_build_object({})", rebuilt.join(", "))
}

/// Placeholder with server-side cast for a column
fn placeholder(index: usize, column_type: &ColumnType) -> String {
    match column_type {
        ColumnType::Geometry { srid, .. } => format!("ST_SetSRID(ST_GeomFromGeoJSON(${index}), {srid})"),
        other => format!("${index}::{}", other.sql()),
    }
}

/// Text form bound for a value; JSON-typed and geometry columns take JSON text
fn bind_text(value: &Value, column_type: &ColumnType) -> Option<String> {
    let json_text = matches!(column_type, ColumnType::Jsonb | ColumnType::Geometry { .. });
    match value {
        Value::Null => None,
        Value::String(s) if !json_text => Some(s.clone()),
        Value::Bool(b) if !json_text => Some(b.to_string()),
        Value::Number(n) if !json_text => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn decode_record(row: &sqlx::postgres::PgRow) -> Result<Record, StorageError> {
    let value: Value = row.try_get("record")?;
    match value {
        Value::Object(record) => Ok(record),
        other => Err(StorageError::store(format!("expected a JSON object row, got {other}"))),
    }
}

fn write_error(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StorageError::UniqueViolation {
                constraint: db.constraint().unwrap_or("unique").to_string(),
            };
        }
    }
    StorageError::Database(err)
}

fn unknown_column(def: &TableDefinition, name: &str) -> StorageError {
    StorageError::store(format!("unknown column '{}' on '{}'", name, def.name))
}

#[async_trait]
impl PhysicalDatabase for PgDatabase {
    async fn apply_schema(&self, plan: &[DdlOperation]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        for op in plan {
            let sql = op.to_sql(&self.schema);
            tracing::debug!("🧱 {}", sql);
            sqlx::query(&sql).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn snapshot(&self, tables: &[String]) -> Result<PhysicalSnapshot, StorageError> {
        let mut snapshot = PhysicalSnapshot::default();
        let tables = tables.to_vec();

        let rows = sqlx::query(
            r#"
            SELECT table_name::text AS table_name, column_name::text AS column_name,
                   udt_name::text AS udt_name, is_nullable::text AS is_nullable
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = ANY($2)
            "#,
        )
        .bind(&self.schema)
        .bind(&tables)
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let table: String = row.try_get("table_name")?;
            let column: String = row.try_get("column_name")?;
            let udt_name: String = row.try_get("udt_name")?;
            let nullable: String = row.try_get("is_nullable")?;
            snapshot.tables.entry(table).or_default().insert(
                column,
                ColumnState {
                    udt_name,
                    not_null: nullable == "NO",
                },
            );
        }

        let rows = sqlx::query(
            "SELECT indexname::text AS name, tablename::text AS owner FROM pg_indexes WHERE schemaname = $1 AND tablename = ANY($2)",
        )
        .bind(&self.schema)
        .bind(&tables)
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            snapshot.indexes.insert(row.try_get("name")?, row.try_get("owner")?);
        }

        let rows = sqlx::query(
            r#"
            SELECT constraint_name::text AS name, table_name::text AS owner
            FROM information_schema.table_constraints
            WHERE table_schema = $1 AND table_name = ANY($2)
            "#,
        )
        .bind(&self.schema)
        .bind(&tables)
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            snapshot.constraints.insert(row.try_get("name")?, row.try_get("owner")?);
        }

        Ok(snapshot)
    }

    async fn insert_record(
        &self,
        def: &TableDefinition,
        values: &Record,
        actor: Option<&str>,
    ) -> Result<Record, StorageError> {
        let mut columns = vec!["\"created_by\"".to_string(), "\"updated_by\"".to_string()];
        let mut placeholders = vec!["$1".to_string(), "$1".to_string()];
        let mut binds = Vec::with_capacity(values.len());

        for (name, value) in values {
            let column_type = column_type_of(def, name).ok_or_else(|| unknown_column(def, name))?;
            binds.push(bind_text(value, &column_type));
            columns.push(format!("\"{name}\""));
            placeholders.push(placeholder(binds.len() + 1, &column_type));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING id",
            self.table(&def.physical_name()),
            columns.join(", "),
            placeholders.join(", ")
        );

        let mut tx = self.pool.begin().await?;
        let mut query = sqlx::query(&sql).bind(actor);
        for bind in binds {
            query = query.bind(bind);
        }
        let row = query.fetch_one(&mut *tx).await.map_err(write_error)?;
        let id: i64 = row.try_get("id")?;

        self.write_history(&mut tx, def, id, "INSERT", actor).await?;
        let record = self
            .fetch_in_tx(&mut tx, def, id, false)
            .await?
            .ok_or_else(|| StorageError::store(format!("inserted row {id} vanished")))?;
        tx.commit().await?;

        Ok(record)
    }

    async fn update_record(
        &self,
        def: &TableDefinition,
        id: i64,
        values: &Record,
        actor: Option<&str>,
    ) -> Result<Option<RecordChange>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let Some(before) = self.fetch_in_tx(&mut tx, def, id, true).await? else {
            return Ok(None);
        };

        let mut assignments = vec!["\"updated_at\" = now()".to_string(), "\"updated_by\" = $1".to_string()];
        let mut binds = Vec::with_capacity(values.len());
        for (name, value) in values {
            let column_type = column_type_of(def, name).ok_or_else(|| unknown_column(def, name))?;
            binds.push(bind_text(value, &column_type));
            assignments.push(format!("\"{name}\" = {}", placeholder(binds.len() + 1, &column_type)));
        }

        let sql = format!(
            "UPDATE {} SET {} WHERE id = ${} AND deleted_at IS NULL",
            self.table(&def.physical_name()),
            assignments.join(", "),
            binds.len() + 2
        );
        let mut query = sqlx::query(&sql).bind(actor);
        for bind in binds {
            query = query.bind(bind);
        }
        query.bind(id).execute(&mut *tx).await.map_err(write_error)?;

        self.write_history(&mut tx, def, id, "UPDATE", actor).await?;
        let after = self
            .fetch_in_tx(&mut tx, def, id, false)
            .await?
            .ok_or_else(|| StorageError::store(format!("updated row {id} vanished")))?;
        tx.commit().await?;

        Ok(Some(RecordChange { before, after }))
    }

    async fn soft_delete_record(
        &self,
        def: &TableDefinition,
        id: i64,
        actor: Option<&str>,
    ) -> Result<Option<RecordChange>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let Some(before) = self.fetch_in_tx(&mut tx, def, id, true).await? else {
            return Ok(None);
        };

        let sql = format!(
            "UPDATE {} SET deleted_at = now(), updated_at = now(), updated_by = $1 WHERE id = $2",
            self.table(&def.physical_name())
        );
        sqlx::query(&sql).bind(actor).bind(id).execute(&mut *tx).await?;
        self.write_history(&mut tx, def, id, "DELETE", actor).await?;

        let sql = format!(
            "SELECT {} AS record FROM {} t WHERE t.id = $1",
            select_expr(def),
            self.table(&def.physical_name())
        );
        let row = sqlx::query(&sql).bind(id).fetch_one(&mut *tx).await?;
        let after = decode_record(&row)?;
        tx.commit().await?;

        Ok(Some(RecordChange { before, after }))
    }

    async fn fetch_record(
        &self,
        def: &TableDefinition,
        id: i64,
        include_deleted: bool,
    ) -> Result<Option<Record>, StorageError> {
        let sql = format!(
            "SELECT {} AS record FROM {} t WHERE t.id = $1{}",
            select_expr(def),
            self.table(&def.physical_name()),
            if include_deleted { "" } else { " AND t.deleted_at IS NULL" }
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(|row| decode_record(&row)).transpose()
    }

    async fn list_records(&self, def: &TableDefinition, query: &ListQuery) -> Result<Vec<Record>, StorageError> {
        let mut conditions = Vec::new();
        let mut binds: Vec<Option<String>> = Vec::new();

        if !query.include_deleted {
            conditions.push("t.deleted_at IS NULL".to_string());
        }
        for filter in &query.filters {
            let column_type = column_type_of(def, &filter.field).ok_or_else(|| unknown_column(def, &filter.field))?;
            let column = format!("t.\"{}\"", filter.field);
            if !filter.op.takes_value() {
                conditions.push(format!("{column} {}", filter.op.sql()));
                continue;
            }
            let value = filter.value.clone().unwrap_or(Value::Null);
            let index = binds.len() + 1;
            if filter.op == crate::storage::FilterOp::Like {
                binds.push(bind_text(&value, &ColumnType::Text));
                conditions.push(format!("{column}::text LIKE ${index}"));
            } else {
                binds.push(bind_text(&value, &column_type));
                conditions.push(format!("{column} {} {}", filter.op.sql(), placeholder(index, &column_type)));
            }
        }

        let mut order: Vec<String> = query
            .sort
            .iter()
            .map(|key| format!("t.\"{}\" {}", key.field, if key.descending { "DESC" } else { "ASC" }))
            .collect();
        order.push("t.id ASC".to_string());

        let sql = format!(
            "SELECT {} AS record FROM {} t{} ORDER BY {} LIMIT ${} OFFSET ${}",
            select_expr(def),
            self.table(&def.physical_name()),
            if conditions.is_empty() {
                String::new()
            } else {
                format!(" WHERE {}", conditions.join(" AND "))
            },
            order.join(", "),
            binds.len() + 1,
            binds.len() + 2
        );

        let mut sql_query = sqlx::query(&sql);
        for bind in binds {
            sql_query = sql_query.bind(bind);
        }
        let rows = sql_query
            .bind(i64::from(query.limit))
            .bind(i64::from(query.offset))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_record).collect()
    }

    async fn record_history(&self, def: &TableDefinition, id: i64) -> Result<Vec<Record>, StorageError> {
        let sql = format!(
            "SELECT to_jsonb(h) AS record FROM {} h WHERE h.record_id = $1 ORDER BY h.history_id",
            self.table(&def.history_name())
        );
        let rows = sqlx::query(&sql).bind(id).fetch_all(&self.pool).await?;
        rows.iter().map(decode_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::types::FieldDefinition;
    use serde_json::json;

    fn assets() -> TableDefinition {
        TableDefinition {
            name: "assets".to_string(),
            fields: vec![
                FieldDefinition::new("label", "TEXT"),
                FieldDefinition::new("location", "POINT"),
                FieldDefinition::new("meta", "JSON"),
            ],
            ..TableDefinition::default()
        }
    }

    #[test]
    fn select_expression_reencodes_geometry() {
        assert_eq!(
            select_expr(&assets()),
            "(to_jsonb(t) - 'location') || jsonb_build_object('location', ST_AsGeoJSON(t.\"location\")::jsonb)"
        );
        let plain = TableDefinition {
            name: "plain".to_string(),
            fields: vec![FieldDefinition::new("label", "TEXT")],
            ..TableDefinition::default()
        };
        assert_eq!(select_expr(&plain), "to_jsonb(t)");
    }

    #[test]
    fn placeholders_cast_to_column_type() {
        let def = assets();
        assert_eq!(placeholder(2, &column_type_of(&def, "label").unwrap()), "$2::TEXT");
        assert_eq!(
            placeholder(3, &column_type_of(&def, "location").unwrap()),
            "ST_SetSRID(ST_GeomFromGeoJSON($3), 4326)"
        );
        assert_eq!(placeholder(1, &column_type_of(&def, "id").unwrap()), "$1::BIGINT");
        assert!(column_type_of(&def, "missing").is_none());
    }

    #[test]
    fn json_columns_bind_json_text() {
        assert_eq!(bind_text(&json!("abc"), &ColumnType::Text), Some("abc".to_string()));
        assert_eq!(bind_text(&json!("abc"), &ColumnType::Jsonb), Some("\"abc\"".to_string()));
        assert_eq!(bind_text(&json!(12), &ColumnType::Integer), Some("12".to_string()));
        assert_eq!(bind_text(&Value::Null, &ColumnType::Integer), None);
        assert_eq!(
            bind_text(&json!({"type": "Point", "coordinates": [1, 2]}), &ColumnType::Geometry {
                kind: crate::table::data_types::GeometryKind::Point,
                srid: 4326
            }),
            Some("{\"coordinates\":[1,2],\"type\":\"Point\"}".to_string())
        );
    }
}
