//! Error taxonomy for the HTTP/WebSocket boundary (§7). Each variant names
//! one of the eight error categories the core distinguishes; the boundary's
//! only job is to map them to a wire-visible status, never to retry or
//! propagate them into session state itself.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("malformed request: {0}")]
    Validation(String),

    #[error("authorization failed: {0}")]
    Authorization(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("provider error: {0}")]
    ProviderTransient(String),

    #[error("tool execution error: {0}")]
    ToolExecution(String),

    #[error("audio pipeline error: {0}")]
    AudioPipeline(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<&ServerError> for StatusCode {
    fn from(err: &ServerError) -> Self {
        match err {
            ServerError::Validation(_) => StatusCode::BAD_REQUEST,
            ServerError::Authorization(_) => StatusCode::UNAUTHORIZED,
            ServerError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::ProviderTransient(_) => StatusCode::BAD_GATEWAY,
            ServerError::ToolExecution(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::AudioPipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ServerError> for StatusCode {
    fn from(err: ServerError) -> Self {
        (&err).into()
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status: StatusCode = (&self).into();
        let body = json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_execution_maps_to_unprocessable_entity() {
        let status: StatusCode = ServerError::ToolExecution("bad args".to_string()).into();
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn authorization_maps_to_401() {
        let status: StatusCode = ServerError::Authorization("bad token".to_string()).into();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
