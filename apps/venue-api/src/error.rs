//! Error types for the Venue API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Venue API errors.
///
/// ## Status Mapping
/// ```text
/// ┌────────────────────────────────────────────────────────────┐
/// │  VenueError            →  HTTP status                      │
/// │  ─────────────────────────────────────────────────────     │
/// │  AuthFailed            →  401 Unauthorized                 │
/// │  Unauthorized          →  403 Forbidden                    │
/// │  NotFound              →  404 Not Found                    │
/// │  AlreadyClaimed        →  409 Conflict                     │
/// │  PairingExpired        →  410 Gone                         │
/// │  InvalidRequest        →  400 Bad Request                  │
/// │  Validation            →  422 Unprocessable Entity         │
/// │  Database / Internal   →  500 Internal Server Error        │
/// └────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, thiserror::Error)]
pub enum VenueError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Authorization failed: {0}")]
    Unauthorized(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Pairing token already claimed")]
    AlreadyClaimed,

    #[error("Pairing token expired")]
    PairingExpired,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VenueError {
    fn status(&self) -> StatusCode {
        match self {
            VenueError::Database(_) | VenueError::Migration(_) | VenueError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            VenueError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            VenueError::Unauthorized(_) => StatusCode::FORBIDDEN,
            VenueError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            VenueError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            VenueError::NotFound(_) => StatusCode::NOT_FOUND,
            VenueError::AlreadyClaimed => StatusCode::CONFLICT,
            VenueError::PairingExpired => StatusCode::GONE,
        }
    }
}

impl IntoResponse for VenueError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for VenueError {
    fn from(e: sqlx::Error) -> Self {
        VenueError::Database(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(VenueError::AlreadyClaimed.status(), StatusCode::CONFLICT);
        assert_eq!(VenueError::PairingExpired.status(), StatusCode::GONE);
        assert_eq!(
            VenueError::AuthFailed("bad token".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            VenueError::Validation("total mismatch".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
