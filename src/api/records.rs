/// Record REST endpoints
///
/// Listing takes its options from the query string:
/// `?limit=20&offset=40&sort=-price,name&includeDeleted=true&filter=[{"field":"price","op":"gt","value":10}]`

use crate::api::{write_context, ApiError, AppState};
use crate::data::service::ListRequest;
use crate::storage::{Filter, SortKey};
use crate::table::types::Record;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

pub fn create_record_routes() -> Router<AppState> {
    Router::new()
        .route("/api/tables/{id}/records", get(list_records).post(create_record))
        .route(
            "/api/tables/{id}/records/{record_id}",
            get(get_record).put(update_record).delete(delete_record),
        )
        .route("/api/tables/{id}/records/{record_id}/history", get(record_history))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// Comma separated; a leading `-` sorts descending
    pub sort: Option<String>,
    /// JSON array of filters
    pub filter: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
}

impl ListParams {
    pub fn into_request(self) -> Result<ListRequest, ApiError> {
        let filters: Vec<Filter> = match self.filter.as_deref().map(str::trim) {
            None | Some("") => Vec::new(),
            Some(raw) => {
                serde_json::from_str(raw).map_err(|e| ApiError::BadRequest(format!("invalid filter: {e}")))?
            }
        };
        let sort = self
            .sort
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix('-') {
                Some(field) => SortKey {
                    field: field.to_string(),
                    descending: true,
                },
                None => SortKey {
                    field: s.to_string(),
                    descending: false,
                },
            })
            .collect();

        Ok(ListRequest {
            filters,
            sort,
            limit: self.limit,
            offset: self.offset,
            include_deleted: self.include_deleted,
        })
    }
}

/// POST /api/tables/{id}/records
async fn create_record(
    State(state): State<AppState>,
    Path(table_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<Record>), ApiError> {
    let record = state.data.create(table_id, &payload, &write_context(&headers)).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_records(
    State(state): State<AppState>,
    Path(table_id): Path<Uuid>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    let records = state.data.list(table_id, params.into_request()?).await?;
    Ok(Json(json!({ "records": records })))
}

async fn get_record(
    State(state): State<AppState>,
    Path((table_id, record_id)): Path<(Uuid, i64)>,
) -> Result<Json<Record>, ApiError> {
    Ok(Json(state.data.get_by_id(table_id, record_id).await?))
}

/// PUT /api/tables/{id}/records/{record_id} (partial update)
async fn update_record(
    State(state): State<AppState>,
    Path((table_id, record_id)): Path<(Uuid, i64)>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<Json<Record>, ApiError> {
    let record = state
        .data
        .update(table_id, record_id, &payload, &write_context(&headers))
        .await?;
    Ok(Json(record))
}

/// DELETE soft-deletes; the row stays readable through history
async fn delete_record(
    State(state): State<AppState>,
    Path((table_id, record_id)): Path<(Uuid, i64)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    state
        .data
        .soft_delete(table_id, record_id, &write_context(&headers))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn record_history(
    State(state): State<AppState>,
    Path((table_id, record_id)): Path<(Uuid, i64)>,
) -> Result<Json<Value>, ApiError> {
    let history = state.data.history(table_id, record_id).await?;
    Ok(Json(json!({ "history": history })))
}
