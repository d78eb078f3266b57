// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer.
//!
//! The reconciliation core only needs two things from storage: the user's
//! activities for one date, and an upsert that detects lost races. Both
//! backends implement [`ActivityStore`].

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::InMemoryStore;

use crate::error::AppError;
use crate::models::Activity;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Collection names as constants.
pub mod collections {
    pub const ACTIVITIES: &str = "activities";
}

/// Persistence capability consumed by the activity processor.
#[async_trait]
pub trait ActivityStore: Send + Sync + 'static {
    /// All of a user's activities on one date, in default order.
    async fn query_by_user_and_date(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<Activity>, AppError>;

    /// A user's full history, in default order.
    async fn query_by_user(&self, user_id: &str) -> Result<Vec<Activity>, AppError>;

    /// Upsert keyed by `activity.id`.
    ///
    /// `activity.version` must equal the stored version (0 if the record does
    /// not exist yet), otherwise this fails with [`AppError::Conflict`].
    /// Inserting an id that is already stored on another date fails with
    /// [`AppError::IdCollision`], which no amount of re-reading will clear.
    async fn save(&self, activity: &Activity) -> Result<(), AppError>;

    /// Fresh id for a manually created record.
    fn generate_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Decide whether `activity` may overwrite what is stored under its id.
pub(crate) fn check_write(
    stored: Option<&Activity>,
    activity: &Activity,
) -> Result<(), AppError> {
    let Some(stored) = stored else {
        return if activity.version == 0 {
            Ok(())
        } else {
            Err(AppError::Conflict {
                activity_id: activity.id.clone(),
            })
        };
    };

    if stored.user_id != activity.user_id {
        return Err(AppError::BadRequest(format!(
            "Activity {} belongs to another user",
            activity.id
        )));
    }
    if activity.version == 0 && stored.date != activity.date {
        return Err(AppError::IdCollision {
            activity_id: activity.id.clone(),
            stored_date: stored.date,
        });
    }
    if stored.version != activity.version {
        tracing::debug!(
            activity_id = %activity.id,
            stored_version = stored.version,
            read_version = activity.version,
            "Stale write rejected"
        );
        return Err(AppError::Conflict {
            activity_id: activity.id.clone(),
        });
    }
    Ok(())
}
