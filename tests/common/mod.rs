// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use activity_reconciler::config::Config;
use activity_reconciler::db::{FirestoreDb, InMemoryStore};
use activity_reconciler::models::{ExternalId, ImportContext, RawImportRecord};
use activity_reconciler::routes::create_router;
use activity_reconciler::services::ActivityProcessor;
use activity_reconciler::AppState;
use std::sync::Arc;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Processor over a fresh in-memory store.
#[allow(dead_code)]
pub fn test_processor() -> (ActivityProcessor, Arc<InMemoryStore>) {
    let config = Config::test_default();
    let store = Arc::new(InMemoryStore::new());
    let processor = ActivityProcessor::new(
        store.clone(),
        config.conflict_retry_limit,
        config.max_concurrent_dates,
    );
    (processor, store)
}

/// Create a test app backed by an in-memory store.
/// Returns the router and the store.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<InMemoryStore>) {
    let (processor, store) = test_processor();
    let state = Arc::new(AppState {
        config: Config::test_default(),
        processor,
    });
    (create_router(state), store)
}

#[allow(dead_code)]
pub fn import_context(user_id: &str, import_ref: &str) -> ImportContext {
    ImportContext {
        user_id: user_id.to_string(),
        import_ref: import_ref.to_string(),
    }
}

/// A feed run record at 07:00 local time.
#[allow(dead_code)]
pub fn raw_run(id: u64, date: &str, moving_time: u32, average_speed: f64) -> RawImportRecord {
    RawImportRecord {
        id: ExternalId::Number(id),
        activity_type: "Run".to_string(),
        start_date_local: format!("{}T07:00:00Z", date),
        name: format!("Feed Run {}", id),
        moving_time: Some(moving_time),
        average_speed: Some(average_speed),
        laps: None,
    }
}
