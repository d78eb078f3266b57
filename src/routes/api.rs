// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for activity history and imports.
//!
//! Authentication happens in front of this service; the user id arrives as
//! a path segment.

use crate::error::{AppError, Result};
use crate::models::{ActivityResponse, ImportContext, NewActivity};
use crate::services::BatchReport;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

const MAX_USER_ID_LEN: usize = 128;
const MAX_IMPORT_RECORDS: usize = 1000;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/users/{user_id}/activities",
            get(list_activities).post(create_activity),
        )
        .route("/api/users/{user_id}/imports", post(import_records))
}

fn check_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty() || user_id.len() > MAX_USER_ID_LEN {
        return Err(AppError::BadRequest(format!(
            "user_id must be 1-{} characters",
            MAX_USER_ID_LEN
        )));
    }
    Ok(())
}

// ─── Activities ──────────────────────────────────────────────

/// List a user's activities in default order.
async fn list_activities(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<ActivityResponse>>> {
    check_user_id(&user_id)?;

    let activities = state.processor.list_activities(&user_id).await?;
    Ok(Json(activities.into_iter().map(ActivityResponse::from).collect()))
}

/// Log a workout by hand.
async fn create_activity(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(new): Json<NewActivity>,
) -> Result<(StatusCode, Json<ActivityResponse>)> {
    check_user_id(&user_id)?;
    new.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let activity = state.processor.create_manual(&user_id, new).await?;
    Ok((StatusCode::CREATED, Json(activity.into())))
}

// ─── Imports ─────────────────────────────────────────────────

/// One delivery from the import feed.
#[derive(Deserialize)]
struct ImportRequest {
    /// Batch reference; generated when absent
    import_ref: Option<String>,
    /// Decoded one by one so a bad record can't sink the batch
    records: Vec<serde_json::Value>,
}

/// Reconcile a batch of decoded feed records into the user's history.
async fn import_records(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(request): Json<ImportRequest>,
) -> Result<Json<BatchReport>> {
    check_user_id(&user_id)?;
    if request.records.len() > MAX_IMPORT_RECORDS {
        return Err(AppError::BadRequest(format!(
            "At most {} records per import",
            MAX_IMPORT_RECORDS
        )));
    }

    let context = ImportContext {
        user_id,
        import_ref: request
            .import_ref
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
    };

    let report = state
        .processor
        .import_feed(&context, &request.records)
        .await?;
    Ok(Json(report))
}
