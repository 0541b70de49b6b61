/// Logical-table registry
///
/// Persists `TableDefinition`s independently of their physical tables. The
/// registry is the arbiter of name uniqueness: `insert` must be atomic with
/// respect to the name check so that concurrent creates of the same table
/// resolve to exactly one winner and one [`RegistryError::Conflict`].

use crate::errors::{RegistryError, StorageError};
use crate::table::types::{FieldDefinition, TableDefinition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPool, Row};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait TableRegistry: Send + Sync {
    /// Register a new definition; fails with `Conflict` if the name is taken
    async fn insert(&self, def: &TableDefinition) -> Result<(), RegistryError>;

    /// Replace the stored definition (fields included) of an existing table
    async fn update(&self, def: &TableDefinition) -> Result<(), RegistryError>;

    async fn get(&self, id: Uuid) -> Result<Option<TableDefinition>, RegistryError>;

    async fn get_by_name(&self, name: &str) -> Result<Option<TableDefinition>, RegistryError>;

    async fn list(&self) -> Result<Vec<TableDefinition>, RegistryError>;

    /// Remove a definition and its fields; `false` if it did not exist
    async fn delete(&self, id: Uuid) -> Result<bool, RegistryError>;
}

/// Registry held in memory
///
/// The name check and the insert happen under one write lock.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTableRegistry {
    tables: Arc<RwLock<BTreeMap<Uuid, TableDefinition>>>,
}

impl InMemoryTableRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TableRegistry for InMemoryTableRegistry {
    async fn insert(&self, def: &TableDefinition) -> Result<(), RegistryError> {
        let mut tables = self.tables.write().await;
        if tables.values().any(|t| t.name == def.name) || tables.contains_key(&def.id) {
            return Err(RegistryError::Conflict { name: def.name.clone() });
        }
        tables.insert(def.id, def.clone());
        Ok(())
    }

    async fn update(&self, def: &TableDefinition) -> Result<(), RegistryError> {
        let mut tables = self.tables.write().await;
        match tables.get_mut(&def.id) {
            Some(existing) => {
                *existing = def.clone();
                Ok(())
            }
            None => Err(RegistryError::NotFound { id: def.id.to_string() }),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<TableDefinition>, RegistryError> {
        Ok(self.tables.read().await.get(&id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<TableDefinition>, RegistryError> {
        Ok(self.tables.read().await.values().find(|t| t.name == name).cloned())
    }

    async fn list(&self) -> Result<Vec<TableDefinition>, RegistryError> {
        let mut tables: Vec<TableDefinition> = self.tables.read().await.values().cloned().collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tables)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RegistryError> {
        Ok(self.tables.write().await.remove(&id).is_some())
    }
}

/// Registry backed by `custom_tables` / `custom_table_fields`
///
/// Name uniqueness is enforced by the UNIQUE constraint on
/// `custom_tables.name`; a violation surfaces as `Conflict`.
#[derive(Debug, Clone)]
pub struct PgTableRegistry {
    pool: PgPool,
    schema: String,
}

impl PgTableRegistry {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    async fn load_fields(&self, id: Uuid) -> Result<Vec<FieldDefinition>, RegistryError> {
        let rows = sqlx::query(&format!(
            "SELECT definition FROM \"{}\".\"custom_table_fields\" WHERE table_id = $1 ORDER BY position",
            self.schema
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let mut fields = Vec::with_capacity(rows.len());
        for row in rows {
            let definition: serde_json::Value = row.get("definition");
            fields.push(serde_json::from_value(definition).map_err(StorageError::from)?);
        }
        Ok(fields)
    }

    async fn hydrate(&self, row: sqlx::postgres::PgRow) -> Result<TableDefinition, RegistryError> {
        let id: Uuid = row.get("id");
        Ok(TableDefinition {
            id,
            name: row.get("name"),
            display_name: row.get("display_name"),
            description: row.get("description"),
            icon: row.get("icon"),
            created_by: row.get("created_by"),
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
            fields: self.load_fields(id).await?,
        })
    }

    async fn write_fields(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        def: &TableDefinition,
    ) -> Result<(), RegistryError> {
        for (position, field) in def.fields.iter().enumerate() {
            let definition = serde_json::to_value(field).map_err(StorageError::from)?;
            sqlx::query(&format!(
                "INSERT INTO \"{}\".\"custom_table_fields\" (table_id, name, position, definition) VALUES ($1, $2, $3, $4)",
                self.schema
            ))
            .bind(def.id)
            .bind(&field.name)
            .bind(position as i32)
            .bind(definition)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

fn conflict_or(err: sqlx::Error, name: &str) -> RegistryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RegistryError::Conflict { name: name.to_string() },
        _ => RegistryError::from(err),
    }
}

#[async_trait]
impl TableRegistry for PgTableRegistry {
    async fn insert(&self, def: &TableDefinition) -> Result<(), RegistryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            r#"
            INSERT INTO "{}"."custom_tables" (id, name, display_name, description, icon, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
            self.schema
        ))
        .bind(def.id)
        .bind(&def.name)
        .bind(&def.display_name)
        .bind(&def.description)
        .bind(&def.icon)
        .bind(&def.created_by)
        .bind(def.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_or(e, &def.name))?;

        self.write_fields(&mut tx, def).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update(&self, def: &TableDefinition) -> Result<(), RegistryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(&format!(
            "UPDATE \"{}\".\"custom_tables\" SET display_name = $2, description = $3, icon = $4 WHERE id = $1",
            self.schema
        ))
        .bind(def.id)
        .bind(&def.display_name)
        .bind(&def.description)
        .bind(&def.icon)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound { id: def.id.to_string() });
        }

        sqlx::query(&format!(
            "DELETE FROM \"{}\".\"custom_table_fields\" WHERE table_id = $1",
            self.schema
        ))
        .bind(def.id)
        .execute(&mut *tx)
        .await?;
        self.write_fields(&mut tx, def).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<TableDefinition>, RegistryError> {
        let row = sqlx::query(&format!("SELECT * FROM \"{}\".\"custom_tables\" WHERE id = $1", self.schema))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<TableDefinition>, RegistryError> {
        let row = sqlx::query(&format!("SELECT * FROM \"{}\".\"custom_tables\" WHERE name = $1", self.schema))
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<TableDefinition>, RegistryError> {
        let rows = sqlx::query(&format!("SELECT * FROM \"{}\".\"custom_tables\" ORDER BY name", self.schema))
            .fetch_all(&self.pool)
            .await?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            tables.push(self.hydrate(row).await?);
        }
        Ok(tables)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RegistryError> {
        // fields go with the ON DELETE CASCADE
        let result = sqlx::query(&format!("DELETE FROM \"{}\".\"custom_tables\" WHERE id = $1", self.schema))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
