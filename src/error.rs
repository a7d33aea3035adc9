use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Redirect not found: {0}")]
    NotFound(String),

    #[error("Cached rule for {requested} belongs to {found}")]
    Inconsistent { requested: String, found: String },

    #[error("Store operation timed out")]
    Timeout,

    #[error("Store operation cancelled")]
    Cancelled,

    #[error("Certificate cache miss")]
    CacheMiss,

    #[error("Cache observer is already running")]
    ObserverAlreadyRunning,

    #[error("Host not configured: {0}")]
    HostNotConfigured(String),

    #[error("Store error while {context}: {source}")]
    Store {
        context: String,
        #[source]
        source: StoreError,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Redirect already exists: {0}")]
    Conflict(String),

    #[error("Invalid pagination cursor")]
    InvalidCursor,
}

impl AppError {
    /// Wraps a store failure with the operation that hit it.
    pub fn store(context: impl Into<String>, source: StoreError) -> Self {
        AppError::Store {
            context: context.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::Validation(_) | AppError::InvalidCursor => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            AppError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            AppError::Timeout => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            _ => {
                tracing::error!("Internal error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "message": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AppError::NotFound("a.com".into()), StatusCode::NOT_FOUND),
            (AppError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (AppError::InvalidCursor, StatusCode::BAD_REQUEST),
            (AppError::Conflict("a.com".into()), StatusCode::CONFLICT),
            (AppError::Timeout, StatusCode::GATEWAY_TIMEOUT),
            (
                AppError::store("loading a.com", StoreError::Unavailable("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[test]
    fn test_store_error_keeps_cause() {
        let error = AppError::store("loading a.com", StoreError::Query("boom".into()));
        assert_eq!(
            error.to_string(),
            "Store error while loading a.com: storage query failed: boom"
        );
        let source = std::error::Error::source(&error).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("storage query failed: boom"));
    }
}
