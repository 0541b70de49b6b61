/// Mapping of domain errors onto HTTP responses

use crate::errors::{RegistryError, SchemaError, ServiceError, StorageError, WorkflowError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};

#[derive(Debug)]
pub enum ApiError {
    Service(ServiceError),
    Workflow(WorkflowError),
    BadRequest(String),
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self::Service(err)
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        Self::Workflow(err)
    }
}

fn storage_status(err: &StorageError) -> StatusCode {
    match err {
        StorageError::UniqueViolation { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn schema_status(err: &SchemaError) -> StatusCode {
    match err {
        SchemaError::Drift { .. } => StatusCode::CONFLICT,
        SchemaError::DdlFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

impl ApiError {
    fn status_and_body(&self) -> (StatusCode, Value) {
        match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
            Self::Service(err) => {
                let status = match err {
                    ServiceError::TableNotFound(_) | ServiceError::RecordNotFound { .. } => StatusCode::NOT_FOUND,
                    ServiceError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
                    ServiceError::TableInUse { .. } => StatusCode::CONFLICT,
                    ServiceError::Validation(errors) => {
                        return (
                            StatusCode::UNPROCESSABLE_ENTITY,
                            json!({ "error": err.to_string(), "details": errors.errors }),
                        )
                    }
                    ServiceError::Schema(e) => schema_status(e),
                    ServiceError::Registry(RegistryError::Conflict { .. }) => StatusCode::CONFLICT,
                    ServiceError::Registry(RegistryError::NotFound { .. }) => StatusCode::NOT_FOUND,
                    ServiceError::Registry(RegistryError::Storage(e)) | ServiceError::Storage(e) => storage_status(e),
                };
                (status, json!({ "error": err.to_string() }))
            }
            Self::Workflow(err) => {
                let status = match err {
                    WorkflowError::InvalidGraph(_) | WorkflowError::Cycle(_) => StatusCode::BAD_REQUEST,
                    WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
                    WorkflowError::Conflict(_) => StatusCode::CONFLICT,
                    // a workflow referencing a missing table is a bad definition
                    WorkflowError::TableNotFound(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    WorkflowError::Storage(e) => storage_status(e),
                };
                (status, json!({ "error": err.to_string() }))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        if status.is_server_error() {
            tracing::error!("❌ Request failed: {}", body);
        }
        (status, Json(body)).into_response()
    }
}
