/// Custom data service
///
/// CRUD over the physical table of a registered custom table. Each mutation
/// validates its payload, writes the row together with its history row, and
/// after the write has committed emits a change event. Emission failures are
/// logged (and dead-lettered by the sink) but never fail the write.

use crate::data::events::{EventSink, RecordChangeEvent, RecordOperation};
use crate::errors::ServiceError;
use crate::storage::{Filter, ListQuery, PhysicalDatabase, RecordChange, SortKey};
use crate::table::registry::TableRegistry;
use crate::table::types::{record_id, Record, TableDefinition, SYSTEM_COLUMNS};
use crate::table::validator::{RecordValidator, ValidationMode};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Who is writing and how deep in a workflow chain the write happens
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteContext {
    pub actor: Option<String>,
    pub depth: u32,
}

impl WriteContext {
    pub fn actor(actor: impl Into<String>) -> Self {
        Self {
            actor: Some(actor.into()),
            depth: 0,
        }
    }

    /// Context for a write caused by handling an event at `depth`
    pub fn caused_by(actor: Option<String>, depth: u32) -> Self {
        Self {
            actor,
            depth: depth + 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_size: u32,
    pub max_size: u32,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_size: 50,
            max_size: 1000,
        }
    }
}

/// Unvalidated list request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub sort: Vec<SortKey>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    #[serde(default)]
    pub include_deleted: bool,
}

/// Record creation as needed by workflow actions
#[async_trait]
pub trait RecordWriter: Send + Sync {
    async fn create_record(&self, table_id: Uuid, payload: &Value, ctx: &WriteContext) -> Result<Record, ServiceError>;
}

#[derive(Clone)]
pub struct CustomDataService {
    tables: Arc<dyn TableRegistry>,
    db: Arc<dyn PhysicalDatabase>,
    events: Arc<dyn EventSink>,
    validator: RecordValidator,
    paging: PageLimits,
}

impl CustomDataService {
    pub fn new(
        tables: Arc<dyn TableRegistry>,
        db: Arc<dyn PhysicalDatabase>,
        events: Arc<dyn EventSink>,
        validator: RecordValidator,
        paging: PageLimits,
    ) -> Self {
        Self {
            tables,
            db,
            events,
            validator,
            paging,
        }
    }

    async fn table(&self, table_id: Uuid) -> Result<TableDefinition, ServiceError> {
        self.tables
            .get(table_id)
            .await?
            .ok_or_else(|| ServiceError::TableNotFound(table_id.to_string()))
    }

    pub async fn create(&self, table_id: Uuid, payload: &Value, ctx: &WriteContext) -> Result<Record, ServiceError> {
        let def = self.table(table_id).await?;
        let values = self.validator.validate(&def, payload, ValidationMode::Create)?;

        let record = self.db.insert_record(&def, &values, ctx.actor.as_deref()).await?;
        let id = record_id(&record).unwrap_or_default();
        debug!("📝 Inserted {}#{}", def.name, id);

        self.emit(&def, RecordOperation::Insert, id, None, Some(record.clone()), ctx);
        Ok(record)
    }

    pub async fn update(
        &self,
        table_id: Uuid,
        id: i64,
        payload: &Value,
        ctx: &WriteContext,
    ) -> Result<Record, ServiceError> {
        let def = self.table(table_id).await?;
        let values = self.validator.validate(&def, payload, ValidationMode::Update)?;

        let RecordChange { before, after } = self
            .db
            .update_record(&def, id, &values, ctx.actor.as_deref())
            .await?
            .ok_or_else(|| not_found(&def, id))?;
        debug!("📝 Updated {}#{}", def.name, id);

        self.emit(&def, RecordOperation::Update, id, Some(before), Some(after.clone()), ctx);
        Ok(after)
    }

    /// Mark a record deleted; returns its final image
    pub async fn soft_delete(&self, table_id: Uuid, id: i64, ctx: &WriteContext) -> Result<Record, ServiceError> {
        let def = self.table(table_id).await?;

        let RecordChange { before, after } = self
            .db
            .soft_delete_record(&def, id, ctx.actor.as_deref())
            .await?
            .ok_or_else(|| not_found(&def, id))?;
        debug!("🗑️ Soft-deleted {}#{}", def.name, id);

        self.emit(&def, RecordOperation::Delete, id, Some(before), Some(after.clone()), ctx);
        Ok(after)
    }

    pub async fn get_by_id(&self, table_id: Uuid, id: i64) -> Result<Record, ServiceError> {
        let def = self.table(table_id).await?;
        self.db
            .fetch_record(&def, id, false)
            .await?
            .ok_or_else(|| not_found(&def, id))
    }

    pub async fn list(&self, table_id: Uuid, request: ListRequest) -> Result<Vec<Record>, ServiceError> {
        let def = self.table(table_id).await?;
        let query = self.list_query(&def, request)?;
        Ok(self.db.list_records(&def, &query).await?)
    }

    /// History rows of a record, oldest first (deleted records included)
    pub async fn history(&self, table_id: Uuid, id: i64) -> Result<Vec<Record>, ServiceError> {
        let def = self.table(table_id).await?;
        if self.db.fetch_record(&def, id, true).await?.is_none() {
            return Err(not_found(&def, id));
        }
        Ok(self.db.record_history(&def, id).await?)
    }

    /// Check filter/sort columns against the definition and clamp paging
    fn list_query(&self, def: &TableDefinition, request: ListRequest) -> Result<ListQuery, ServiceError> {
        let is_geometry = |name: &str| {
            def.field(name)
                .and_then(|f| f.shape().ok())
                .map(|shape| shape.is_geometry())
                .unwrap_or(false)
        };
        let known = |name: &str| SYSTEM_COLUMNS.contains(&name) || def.field(name).is_some();

        for filter in &request.filters {
            if !known(filter.field.as_str()) {
                return Err(ServiceError::InvalidQuery(format!("unknown filter field '{}'", filter.field)));
            }
            if is_geometry(filter.field.as_str()) && filter.op.takes_value() {
                return Err(ServiceError::InvalidQuery(format!(
                    "geometry field '{}' only supports is_null/not_null",
                    filter.field
                )));
            }
            if filter.op.takes_value() {
                match &filter.value {
                    None | Some(Value::Null) => {
                        return Err(ServiceError::InvalidQuery(format!(
                            "filter on '{}' needs a value",
                            filter.field
                        )))
                    }
                    Some(Value::Array(_)) | Some(Value::Object(_)) => {
                        return Err(ServiceError::InvalidQuery(format!(
                            "filter on '{}' needs a scalar value",
                            filter.field
                        )))
                    }
                    Some(_) => {}
                }
            }
        }
        for key in &request.sort {
            if !known(key.field.as_str()) || is_geometry(key.field.as_str()) {
                return Err(ServiceError::InvalidQuery(format!("cannot sort by '{}'", key.field)));
            }
        }

        let limit = request
            .limit
            .unwrap_or(self.paging.default_size)
            .clamp(1, self.paging.max_size.max(1));

        Ok(ListQuery {
            filters: request.filters,
            sort: request.sort,
            limit,
            offset: request.offset.unwrap_or(0),
            include_deleted: request.include_deleted,
        })
    }

    fn emit(
        &self,
        def: &TableDefinition,
        operation: RecordOperation,
        record_id: i64,
        before: Option<Record>,
        after: Option<Record>,
        ctx: &WriteContext,
    ) {
        let event = RecordChangeEvent {
            id: Uuid::new_v4(),
            table_id: def.id,
            table_name: def.name.clone(),
            operation,
            record_id,
            before,
            after,
            actor: ctx.actor.clone(),
            depth: ctx.depth,
            occurred_at: Utc::now(),
        };
        if let Err(e) = self.events.emit(event) {
            warn!("⚠️ Change event for {}#{} not delivered: {}", def.name, record_id, e);
        }
    }
}

fn not_found(def: &TableDefinition, id: i64) -> ServiceError {
    ServiceError::RecordNotFound {
        table: def.name.clone(),
        record_id: id,
    }
}

#[async_trait]
impl RecordWriter for CustomDataService {
    async fn create_record(&self, table_id: Uuid, payload: &Value, ctx: &WriteContext) -> Result<Record, ServiceError> {
        self.create(table_id, payload, ctx).await
    }
}
