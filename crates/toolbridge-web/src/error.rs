//! HTTP error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use toolbridge_agent::AgentError;
use toolbridge_store::StoreError;

use crate::auth::AuthError;

/// Errors returned by REST handlers, rendered as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Store(e) | Self::Agent(AgentError::Store(e)) => store_status(e),
            Self::Agent(AgentError::InvalidRequest { .. }) => StatusCode::BAD_REQUEST,
            Self::Agent(
                AgentError::LlmRequestFailed { .. }
                | AgentError::LlmParseFailed { .. }
                | AgentError::LlmStreamError { .. },
            ) => StatusCode::BAD_GATEWAY,
            Self::Agent(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
