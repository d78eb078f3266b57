// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore store tests. Require the Firestore emulator
//! (`FIRESTORE_EMULATOR_HOST`) and skip otherwise.

use activity_reconciler::db::ActivityStore;
use activity_reconciler::services::{normalize, ActivityProcessor, ReconcileAction};
use std::sync::Arc;

mod common;
use common::{import_context, raw_run, test_db};

/// Unique user per test run so reruns against a live emulator don't collide.
fn unique_user(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

#[tokio::test]
async fn test_firestore_save_and_query_day() {
    require_emulator!();
    let db = test_db().await;
    let user = unique_user("fs-save");

    let candidate = normalize(
        &raw_run(rand_id(), "2023-06-01", 1800, 2.68),
        &import_context(&user, "batch-1"),
    )
    .unwrap();
    db.save(&candidate).await.expect("Insert should succeed");

    let day = db
        .query_by_user_and_date(&user, "2023-06-01".parse().unwrap())
        .await
        .expect("Query should succeed");
    assert_eq!(day.len(), 1);
    assert_eq!(day[0].id, candidate.id);
    assert_eq!(day[0].version, 1);

    let other_day = db
        .query_by_user_and_date(&user, "2023-06-02".parse().unwrap())
        .await
        .unwrap();
    assert!(other_day.is_empty());
}

#[tokio::test]
async fn test_firestore_interleaved_writes_conflict() {
    require_emulator!();
    let db = test_db().await;
    let user = unique_user("fs-conflict");

    let candidate = normalize(
        &raw_run(rand_id(), "2023-06-01", 1800, 2.68),
        &import_context(&user, "batch-1"),
    )
    .unwrap();
    db.save(&candidate).await.unwrap();

    // Two writers start from the same read
    let read = db
        .query_by_user_and_date(&user, "2023-06-01".parse().unwrap())
        .await
        .unwrap()
        .remove(0);
    let mut first = read.clone();
    first.description = "first writer".to_string();
    let mut second = read.clone();
    second.description = "second writer".to_string();

    let (a, b) = tokio::join!(db.save(&first), db.save(&second));

    let mut saved = 0;
    for result in [&a, &b] {
        match result {
            Ok(()) => saved += 1,
            Err(e) => assert!(e.is_conflict(), "unexpected error: {}", e),
        }
    }
    assert!(saved <= 1, "both writers committed over the same read");

    let stored = db
        .query_by_user_and_date(&user, "2023-06-01".parse().unwrap())
        .await
        .unwrap()
        .remove(0);
    assert_eq!(stored.version, 1 + saved);
    if a.is_ok() {
        assert_eq!(stored.description, "first writer");
    }
    if b.is_ok() {
        assert_eq!(stored.description, "second writer");
    }

    // A copy from before the winning write is stale now
    if saved == 1 {
        let err = db.save(&read).await.unwrap_err();
        assert!(err.is_conflict());
    }
}

#[tokio::test]
async fn test_firestore_moved_record_is_collision() {
    require_emulator!();
    let db = test_db().await;
    let user = unique_user("fs-collision");
    let id = rand_id();

    let original = normalize(
        &raw_run(id, "2023-06-01", 1800, 2.68),
        &import_context(&user, "batch-1"),
    )
    .unwrap();
    db.save(&original).await.unwrap();

    let moved = normalize(
        &raw_run(id, "2023-06-02", 1800, 2.68),
        &import_context(&user, "batch-2"),
    )
    .unwrap();
    let err = db.save(&moved).await.unwrap_err();
    assert!(err.is_id_collision());
    assert!(!err.is_conflict());
}

#[tokio::test]
async fn test_firestore_replay_is_noop() {
    require_emulator!();
    let db = test_db().await;
    let user = unique_user("fs-replay");
    let processor = ActivityProcessor::new(Arc::new(db), 3, 4);

    let candidate = normalize(
        &raw_run(rand_id(), "2023-06-01", 1800, 2.68),
        &import_context(&user, "batch-1"),
    )
    .unwrap();

    let first = processor.reconcile_candidate(&candidate).await.unwrap();
    assert_eq!(first.action, ReconcileAction::Inserted);
    let second = processor.reconcile_candidate(&candidate).await.unwrap();
    assert_eq!(second.action, ReconcileAction::NoOp);
}

fn rand_id() -> u64 {
    uuid::Uuid::new_v4().as_u64_pair().0
}
