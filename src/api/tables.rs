/// Table definition REST endpoints

use crate::api::{actor, ApiError, AppState};
use crate::table::data_types::TypeDiagnostic;
use crate::table::types::{FieldDefinition, TableDefinition};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use uuid::Uuid;

pub fn create_table_routes() -> Router<AppState> {
    Router::new()
        .route("/api/tables", post(create_table).get(list_tables))
        .route("/api/tables/{id}", get(get_table).delete(delete_table))
        .route("/api/tables/{id}/fields", post(add_field))
        .route("/api/tables/{id}/ddl", get(ddl_preview))
        .route("/api/diagnostics/types", get(type_diagnostics))
}

/// POST /api/tables
async fn create_table(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut def): Json<TableDefinition>,
) -> Result<(StatusCode, Json<TableDefinition>), ApiError> {
    tracing::info!("📥 Create table request: {}", def.name);
    def.created_by = actor(&headers);
    let created = state.tables.create_table(def).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_tables(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let tables = state.tables.list().await?;
    Ok(Json(json!({ "tables": tables })))
}

async fn get_table(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<TableDefinition>, ApiError> {
    Ok(Json(state.tables.get(id).await?))
}

/// DELETE /api/tables/{id} drops the base and history tables
async fn delete_table(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    state.tables.delete_table(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/tables/{id}/fields
async fn add_field(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(field): Json<FieldDefinition>,
) -> Result<Json<TableDefinition>, ApiError> {
    tracing::info!("📥 Add field '{}' to table {}", field.name, id);
    Ok(Json(state.tables.add_field(id, field).await?))
}

async fn ddl_preview(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Value>, ApiError> {
    let statements = state.tables.ddl_preview(id).await?;
    Ok(Json(json!({ "statements": statements })))
}

async fn type_diagnostics(State(state): State<AppState>) -> Result<Json<Vec<TypeDiagnostic>>, ApiError> {
    Ok(Json(state.tables.type_diagnostics().await?))
}
