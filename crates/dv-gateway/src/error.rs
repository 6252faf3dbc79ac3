use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use dv_core::DocuError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("origin not allowed")]
    OriginNotAllowed,

    #[error("{message}: {details}")]
    Proxy { message: String, details: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DocuError> for GatewayError {
    fn from(error: DocuError) -> Self {
        Self::Config(error.to_string())
    }
}

impl GatewayError {
    pub(crate) fn proxy(message: &str, error: impl std::fmt::Display) -> Self {
        Self::Proxy {
            message: message.to_owned(),
            details: error.to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            GatewayError::OriginNotAllowed => (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "origin not allowed" })),
            )
                .into_response(),
            GatewayError::Proxy { message, details } => (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": "proxy_error",
                    "message": message,
                    "details": details,
                })),
            )
                .into_response(),
            other => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal_error", "message": other.to_string() })),
            )
                .into_response(),
        }
    }
}
