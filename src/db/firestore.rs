// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore-backed activity store.
//!
//! Activities live in the `activities` collection, one document per
//! activity id. A write reads the stored version inside its transaction and
//! commits with an existence precondition, so a writer holding a stale copy
//! gets a conflict instead of silently overwriting.

use crate::db::{check_write, collections, ActivityStore};
use crate::error::AppError;
use crate::models::{sort_default, Activity};
use async_trait::async_trait;
use chrono::NaiveDate;
use firestore::{FirestoreConsistencySelector, FirestoreWritePrecondition};

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id).await.map_err(|e| {
            AppError::PersistenceUnavailable(format!("Failed to connect to Firestore: {}", e))
        })?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::PersistenceUnavailable(format!(
                "Failed to connect to Firestore Emulator: {}",
                e
            ))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client.as_ref().ok_or_else(|| {
            AppError::PersistenceUnavailable("Database not connected (offline mode)".to_string())
        })
    }
}

fn unavailable(e: impl std::fmt::Display) -> AppError {
    AppError::PersistenceUnavailable(e.to_string())
}

/// Firestore aborts a transaction that lost a contention race, and fails
/// the create precondition when someone inserted the document first.
fn commit_error(activity_id: &str, e: impl std::fmt::Display) -> AppError {
    let msg = e.to_string();
    let lost_race = [
        "ABORTED",
        "Aborted",
        "contention",
        "FAILED_PRECONDITION",
        "FailedPrecondition",
        "already exists",
    ]
    .iter()
    .any(|marker| msg.contains(marker));
    if lost_race {
        AppError::Conflict {
            activity_id: activity_id.to_string(),
        }
    } else {
        AppError::PersistenceUnavailable(format!("Transaction commit failed: {}", msg))
    }
}

#[async_trait]
impl ActivityStore for FirestoreDb {
    async fn query_by_user_and_date(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<Activity>, AppError> {
        let date = date.to_string();

        let mut activities: Vec<Activity> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::ACTIVITIES)
            .filter(|q| {
                q.for_all([
                    q.field("user_id").eq(user_id),
                    q.field("date").eq(date.as_str()),
                ])
            })
            .obj()
            .query()
            .await
            .map_err(unavailable)?;

        sort_default(&mut activities);
        Ok(activities)
    }

    async fn query_by_user(&self, user_id: &str) -> Result<Vec<Activity>, AppError> {
        let mut activities: Vec<Activity> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::ACTIVITIES)
            .filter(|q| q.for_all([q.field("user_id").eq(user_id)]))
            .obj()
            .query()
            .await
            .map_err(unavailable)?;

        sort_default(&mut activities);
        Ok(activities)
    }

    async fn save(&self, activity: &Activity) -> Result<(), AppError> {
        let client = self.get_client()?;

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| unavailable(format!("Failed to begin transaction: {}", e)))?;

        // Reading through the transaction puts the document in its read set,
        // so a concurrent writer makes our commit abort.
        let tx_client = client.clone_with_consistency_selector(
            FirestoreConsistencySelector::Transaction(transaction.transaction_id().clone()),
        );
        let current: Option<Activity> = tx_client
            .fluent()
            .select()
            .by_id_in(collections::ACTIVITIES)
            .obj()
            .one(&activity.id)
            .await
            .map_err(unavailable)?;

        if let Err(e) = check_write(current.as_ref(), activity) {
            let _ = transaction.rollback().await;
            return Err(e);
        }

        let mut next = activity.clone();
        next.version = activity.version + 1;

        // Also covers the insert race the read set can't: the document
        // must still be absent when we create it.
        let precondition = FirestoreWritePrecondition::Exists(current.is_some());

        client
            .fluent()
            .update()
            .in_col(collections::ACTIVITIES)
            .precondition(precondition)
            .document_id(&next.id)
            .object(&next)
            .add_to_transaction(&mut transaction)
            .map_err(|e| unavailable(format!("Failed to add activity to transaction: {}", e)))?;

        transaction
            .commit()
            .await
            .map_err(|e| commit_error(&activity.id, e))?;

        Ok(())
    }
}
