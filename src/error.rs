// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::Serialize;

/// A raw import record that cannot be turned into an activity.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NormalizationError {
    #[error("{field}: invalid date {value:?}")]
    InvalidDate { field: String, value: String },

    #[error("{field}: speed must be positive for a paced activity, got {value:?}")]
    NonPositiveSpeed { field: String, value: Option<f64> },

    #[error("{field}: speed {value} is too slow to express as a pace")]
    SpeedOutOfRange { field: String, value: f64 },

    #[error("{field}: {message}")]
    Malformed { field: String, message: String },
}

impl NormalizationError {
    /// Name of the offending raw field (e.g. `laps[2].average_speed`).
    pub fn field(&self) -> &str {
        match self {
            NormalizationError::InvalidDate { field, .. } => field,
            NormalizationError::NonPositiveSpeed { field, .. } => field,
            NormalizationError::SpeedOutOfRange { field, .. } => field,
            NormalizationError::Malformed { field, .. } => field,
        }
    }
}

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Invalid import record: {0}")]
    Normalization(#[from] NormalizationError),

    #[error("Write conflict on activity {activity_id}")]
    Conflict { activity_id: String },

    #[error("Activity {activity_id} is already stored on {stored_date}")]
    IdCollision {
        activity_id: String,
        stored_date: NaiveDate,
    },

    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("Reconciliation failed for user {user_id} on {date} (candidate {candidate_id}): {source}")]
    Reconciliation {
        user_id: String,
        date: NaiveDate,
        candidate_id: String,
        #[source]
        source: Box<AppError>,
    },

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// True if the error means a concurrent writer won, so the whole
    /// read-decide-write sequence may be re-run.
    pub fn is_conflict(&self) -> bool {
        match self {
            AppError::Conflict { .. } => true,
            AppError::Reconciliation { source, .. } => source.is_conflict(),
            _ => false,
        }
    }

    /// True if the id is taken by a record on another date. Re-running
    /// reconciliation can't clear this.
    pub fn is_id_collision(&self) -> bool {
        match self {
            AppError::IdCollision { .. } => true,
            AppError::Reconciliation { source, .. } => source.is_id_collision(),
            _ => false,
        }
    }

    /// Attach the reconciliation scope to an error.
    pub fn in_scope(self, user_id: &str, date: NaiveDate, candidate_id: &str) -> Self {
        match self {
            AppError::Reconciliation { .. } => self,
            other => AppError::Reconciliation {
                user_id: user_id.to_string(),
                date,
                candidate_id: candidate_id.to_string(),
                source: Box::new(other),
            },
        }
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Normalization(_) => (StatusCode::BAD_REQUEST, "invalid_import_record"),
            AppError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
            AppError::IdCollision { .. } => (StatusCode::CONFLICT, "id_collision"),
            AppError::PersistenceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "persistence_unavailable")
            }
            AppError::Reconciliation { source, .. } => source.status_and_code(),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = self.status_and_code();

        let details = match &self {
            AppError::PersistenceUnavailable(msg) => {
                tracing::error!(error = %msg, "Persistence unavailable");
                None
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                None
            }
            other => Some(other.to_string()),
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
