/// Table lifecycle service
///
/// Ties the registry, the schema translator and the physical database
/// together. A table only counts as created once both its logical
/// registration and its physical DDL have succeeded; a DDL failure removes the
/// registration again so the two never disagree.

use crate::errors::{RegistryError, SchemaError, ServiceError};
use crate::storage::PhysicalDatabase;
use crate::table::data_types::{self, TypeDiagnostic};
use crate::table::ddl::{DdlOperation, SchemaTranslator};
use crate::table::registry::TableRegistry;
use crate::table::types::{FieldDefinition, TableDefinition};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Anything outside the table layer that can hold on to a table
#[async_trait]
pub trait TableDependents: Send + Sync {
    /// Human-readable names of whatever still references `table_id`
    async fn dependents_of(&self, table_id: Uuid) -> Result<Vec<String>, ServiceError>;
}

#[derive(Clone)]
pub struct TableService {
    registry: Arc<dyn TableRegistry>,
    db: Arc<dyn PhysicalDatabase>,
    translator: SchemaTranslator,
    dependents: Option<Arc<dyn TableDependents>>,
}

impl TableService {
    pub fn new(registry: Arc<dyn TableRegistry>, db: Arc<dyn PhysicalDatabase>, translator: SchemaTranslator) -> Self {
        Self {
            registry,
            db,
            translator,
            dependents: None,
        }
    }

    /// Refuse table deletes while `dependents` reports references
    pub fn with_dependents(mut self, dependents: Arc<dyn TableDependents>) -> Self {
        self.dependents = Some(dependents);
        self
    }

    pub fn translator(&self) -> &SchemaTranslator {
        &self.translator
    }

    /// Register and materialise a new table
    ///
    /// The definition is translated before anything is written, so an invalid
    /// definition never reaches the registry or the database.
    pub async fn create_table(&self, mut def: TableDefinition) -> Result<TableDefinition, ServiceError> {
        self.translator.translate(&def)?;
        def.id = Uuid::new_v4();
        def.created_at = Utc::now();
        if def.display_name.is_empty() {
            def.display_name = def.name.clone();
        }

        self.registry.insert(&def).await?;

        if let Err(e) = self.materialize(&def).await {
            error!("❌ DDL failed for table '{}', removing registration: {}", def.name, e);
            if let Err(cleanup) = self.registry.delete(def.id).await {
                error!("❌ Failed to remove registration of '{}': {}", def.name, cleanup);
            }
            return Err(e.into());
        }

        info!("✅ Created table '{}' ({} fields)", def.name, def.fields.len());
        Ok(def)
    }

    /// Add one field to an existing table
    pub async fn add_field(&self, table_id: Uuid, mut field: FieldDefinition) -> Result<TableDefinition, ServiceError> {
        let current = self.get(table_id).await?;

        if field.display_name.is_empty() {
            field.display_name = field.name.clone();
        }
        if field.order == 0 {
            field.order = current.fields.iter().map(|f| f.order).max().unwrap_or(0) + 1;
        }

        let mut updated = current.clone();
        updated.fields.push(field);
        self.translator.translate(&updated)?;

        self.registry.update(&updated).await?;

        if let Err(e) = self.materialize(&updated).await {
            error!("❌ DDL failed adding field to '{}', restoring definition: {}", updated.name, e);
            if let Err(restore) = self.registry.update(&current).await {
                error!("❌ Failed to restore definition of '{}': {}", current.name, restore);
            }
            return Err(e.into());
        }

        info!("✅ Added field to table '{}'", updated.name);
        Ok(updated)
    }

    /// Remove the registration, then drop the physical tables
    ///
    /// Refused with `TableInUse` while workflows reference the table. A failed
    /// drop puts the registration back; a failed unregister drops nothing.
    pub async fn delete_table(&self, table_id: Uuid) -> Result<(), ServiceError> {
        let def = self.get(table_id).await?;
        let plan = self.translator.drop_plan(&def)?;

        if let Some(dependents) = &self.dependents {
            let users = dependents.dependents_of(def.id).await?;
            if !users.is_empty() {
                warn!("⚠️ Refusing to delete table '{}': still used by {}", def.name, users.join(", "));
                return Err(ServiceError::TableInUse {
                    table: def.name.clone(),
                    dependents: users,
                });
            }
        }

        if !self.registry.delete(def.id).await? {
            return Err(ServiceError::TableNotFound(def.id.to_string()));
        }

        if let Err(e) = self.db.apply_schema(&plan).await {
            error!("❌ Dropping tables of '{}' failed, restoring registration: {}", def.name, e);
            if let Err(restore) = self.registry.insert(&def).await {
                error!("❌ Failed to restore registration of '{}': {}", def.name, restore);
            }
            return Err(SchemaError::DdlFailed(e.to_string()).into());
        }

        info!("🗑️ Deleted table '{}'", def.name);
        Ok(())
    }

    pub async fn get(&self, table_id: Uuid) -> Result<TableDefinition, ServiceError> {
        self.registry
            .get(table_id)
            .await?
            .ok_or_else(|| ServiceError::TableNotFound(table_id.to_string()))
    }

    pub async fn get_by_name(&self, name: &str) -> Result<TableDefinition, ServiceError> {
        self.registry
            .get_by_name(name)
            .await?
            .ok_or_else(|| ServiceError::TableNotFound(name.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<TableDefinition>, ServiceError> {
        Ok(self.registry.list().await?)
    }

    /// Rendered statements that would materialise the table from scratch
    pub async fn ddl_preview(&self, table_id: Uuid) -> Result<Vec<String>, ServiceError> {
        let def = self.get(table_id).await?;
        let plan = self.translator.translate(&def)?;
        Ok(self.translator.render(&plan))
    }

    /// Fields across all tables whose declared type is ambiguous
    pub async fn type_diagnostics(&self) -> Result<Vec<TypeDiagnostic>, ServiceError> {
        let tables = self.registry.list().await?;
        Ok(data_types::diagnose(&tables))
    }

    /// Re-materialise every registered table (startup)
    ///
    /// Tables that fail are logged and skipped; returns how many succeeded.
    pub async fn materialize_all(&self) -> Result<usize, ServiceError> {
        let tables = self.registry.list().await?;
        let mut ready = 0;
        for def in &tables {
            match self.materialize(def).await {
                Ok(()) => ready += 1,
                Err(e) => warn!("⚠️ Table '{}' could not be materialized: {}", def.name, e),
            }
        }
        info!("📦 Materialized {}/{} tables", ready, tables.len());
        Ok(ready)
    }

    /// Bring the physical tables in line with `def`, applying only what is missing
    async fn materialize(&self, def: &TableDefinition) -> Result<(), SchemaError> {
        let plan = self.translator.translate(def)?;
        let snapshot = self
            .db
            .snapshot(&[def.physical_name(), def.history_name()])
            .await
            .map_err(|e| SchemaError::DdlFailed(e.to_string()))?;
        let plan: Vec<DdlOperation> = self.translator.reconcile(plan, &snapshot)?;

        if plan.is_empty() {
            return Ok(());
        }
        self.db
            .apply_schema(&plan)
            .await
            .map_err(|e| SchemaError::DdlFailed(e.to_string()))
    }
}

impl From<RegistryError> for ServiceError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound { id } => ServiceError::TableNotFound(id),
            other => ServiceError::Registry(other),
        }
    }
}
