/// HTTP API Layer
///
/// Thin axum adapter over the services:
/// - Table definitions and DDL preview
/// - Records with history
/// - Workflow CRUD and execution audit
/// - Type diagnostics

pub mod error;

// Table definition endpoints
pub mod tables;

// Record CRUD endpoints
pub mod records;

// Workflow management endpoints (POST/GET/PUT/DELETE)
pub mod workflows;

use crate::data::service::{CustomDataService, WriteContext};
use crate::table::TableService;
use crate::workflow::WorkflowService;
use axum::{http::HeaderMap, Router};
use std::sync::Arc;

pub use error::ApiError;

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub tables: TableService,
    pub data: Arc<CustomDataService>,
    pub workflows: WorkflowService,
}

/// Header naming the caller; authentication happens upstream
pub const ACTOR_HEADER: &str = "x-actor";

pub(crate) fn actor(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub(crate) fn write_context(headers: &HeaderMap) -> WriteContext {
    WriteContext {
        actor: actor(headers),
        depth: 0,
    }
}

/// All REST routes
pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        .merge(tables::create_table_routes())
        .merge(records::create_record_routes())
        .merge(workflows::create_workflow_routes())
}
