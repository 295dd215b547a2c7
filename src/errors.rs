use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::store::StoreError;

/// Failures of the domain services. Every variant aborts the surrounding unit of work.
#[derive(Debug, thiserror::Error)]
pub enum LeadError {
    /// Malformed or missing input.
    #[error("{0}")]
    Validation(String),

    /// Referenced branch, staff member, product, target or lead does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Actor lacks the required role or branch scope.
    #[error("{0}")]
    Authorization(String),

    /// Lead already assigned to someone else, or a unique key is taken.
    #[error("{0}")]
    Conflict(String),

    /// Marketing allocation would exceed the branch monthly cap.
    #[error("{0}")]
    CapacityExceeded(String),

    /// Transition attempted on a closed or rejected assignment.
    #[error("{0}")]
    FinalState(String),

    /// External scoring call failed or returned garbage.
    #[error("prediction unavailable: {0}")]
    PredictionUnavailable(String),

    #[error(transparent)]
    Storage(StoreError),
}

impl From<StoreError> for LeadError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(constraint) => {
                LeadError::Conflict(format!("duplicate value violates {}", constraint))
            }
            other => LeadError::Storage(other),
        }
    }
}

impl LeadError {
    /// Short machine-readable kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LeadError::Validation(_) => "validation",
            LeadError::NotFound(_) => "not_found",
            LeadError::Authorization(_) => "authorization",
            LeadError::Conflict(_) => "conflict",
            LeadError::CapacityExceeded(_) => "capacity_exceeded",
            LeadError::FinalState(_) => "final_state",
            LeadError::PredictionUnavailable(_) => "prediction_unavailable",
            LeadError::Storage(_) => "storage",
        }
    }
}

/// Application-specific error types.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Database-related errors.
    DatabaseError(String),
    /// Resource not found error.
    NotFound(String),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// Actor is known but not allowed to do this.
    Forbidden(String),
    /// Request clashes with current state.
    Conflict(String),
    /// Well-formed request that breaks a business rule.
    Unprocessable(String),
    /// Error interacting with an external API.
    ExternalApiError(String),
    /// Internal server error.
    InternalError(String),
    /// Missing or unknown actor.
    Unauthorized(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::Unprocessable(msg) => write!(f, "Unprocessable: {}", msg),
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl AppError {
    /// Status code this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::DatabaseError(_) | AppError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ExternalApiError(_) => StatusCode::BAD_GATEWAY,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::WithContext { source, .. } => source.status(),
        }
    }
}

impl IntoResponse for AppError {
    /// Maps each variant to a status code and a `{"error": ...}` body.
    /// Storage and internal failures are logged and their details kept out of the body.
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match self {
            AppError::DatabaseError(e) => {
                tracing::error!("Database error: {}", e);
                "Database error".to_string()
            }
            AppError::ExternalApiError(msg) => {
                tracing::error!("External API error: {}", msg);
                msg
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
            AppError::Unauthorized(msg) => {
                tracing::warn!("Unauthorized access: {}", msg);
                msg
            }
            AppError::WithContext { source, context } => {
                tracing::error!("Error with context: {} -> {}", context, source);
                return source.into_response();
            }
            AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::Forbidden(msg)
            | AppError::Conflict(msg)
            | AppError::Unprocessable(msg) => msg,
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<LeadError> for AppError {
    fn from(err: LeadError) -> Self {
        match err {
            LeadError::Validation(msg) => AppError::BadRequest(msg),
            LeadError::NotFound(msg) => AppError::NotFound(msg),
            LeadError::Authorization(msg) => AppError::Forbidden(msg),
            LeadError::Conflict(msg) | LeadError::FinalState(msg) => AppError::Conflict(msg),
            LeadError::CapacityExceeded(msg) => AppError::Unprocessable(msg),
            LeadError::PredictionUnavailable(msg) => {
                AppError::ExternalApiError(format!("prediction unavailable: {}", msg))
            }
            LeadError::Storage(e) => AppError::DatabaseError(e.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        LeadError::from(err).into()
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<AppError>,
{
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e.into()),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e.into()),
            context: f(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lead_errors_map_to_documented_statuses() {
        let cases = [
            (LeadError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (LeadError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (LeadError::Authorization("x".into()), StatusCode::FORBIDDEN),
            (LeadError::Conflict("x".into()), StatusCode::CONFLICT),
            (LeadError::FinalState("x".into()), StatusCode::CONFLICT),
            (
                LeadError::CapacityExceeded("x".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                LeadError::PredictionUnavailable("x".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                LeadError::Storage(StoreError::Corrupt("x".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let kind = err.kind();
            assert_eq!(AppError::from(err).status(), expected, "{}", kind);
        }
    }

    #[test]
    fn unique_violation_becomes_conflict() {
        let err = LeadError::from(StoreError::UniqueViolation("leads_cif_key".into()));
        assert!(matches!(err, LeadError::Conflict(msg) if msg.contains("leads_cif_key")));
    }

    #[test]
    fn context_keeps_source_status() {
        let result: Result<(), LeadError> = Err(LeadError::NotFound("lead".into()));
        let err = result.context("loading lead detail").unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert!(err.to_string().starts_with("loading lead detail"));
    }

    #[test]
    fn into_response_uses_status() {
        let response = AppError::Forbidden("not your branch".into()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
