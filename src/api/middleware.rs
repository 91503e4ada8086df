use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, EngineError, ExecutionError};

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

fn status_for(error: &EngineError) -> StatusCode {
    match error {
        EngineError::Catalog(CatalogError::NotFound(_) | CatalogError::NoEntriesForRole(_)) => {
            StatusCode::NOT_FOUND
        }
        EngineError::Catalog(CatalogError::Empty) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Catalog(_) => StatusCode::INTERNAL_SERVER_ERROR,
        EngineError::MissingParameter { .. } => StatusCode::BAD_REQUEST,
        EngineError::Connection(_) | EngineError::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Execution(ExecutionError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        EngineError::Execution(ExecutionError::Backend(_)) => StatusCode::BAD_GATEWAY,
        EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let mut detail = ErrorDetail::new(self.code(), self.to_string());

        match &self {
            EngineError::MissingParameter { parameter, .. } => {
                detail = detail.with_details(format!("Supply '{}' in the request params.", parameter));
            }
            EngineError::Connection(_) => {
                detail = detail.with_details("The backend could not be reached. Retrying may succeed.");
            }
            _ => {}
        }

        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        (status, Json(ErrorResponse { error: detail })).into_response()
    }
}
