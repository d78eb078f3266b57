// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Activity processing service.
//!
//! Handles the core workflow:
//! 1. Normalize raw import records into candidates
//! 2. Lock the (user, date) scope
//! 3. Read the day, decide, and write the outcome
//! 4. Re-run the whole sequence if the write lost a race

use crate::db::ActivityStore;
use crate::error::{AppError, NormalizationError, Result};
use crate::models::{Activity, ImportContext, NewActivity, RawImportRecord};
use crate::services::normalizer::normalize;
use crate::services::reconcile::{find_match, reconcile, Outcome};
use crate::time_utils::format_utc_rfc3339;
use chrono::NaiveDate;
use dashmap::DashMap;
use futures_util::{stream, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type ScopeKey = (String, NaiveDate);

/// Per-(user, date) locks guarding read-decide-write sequences.
pub type ScopeLocks = Arc<DashMap<ScopeKey, Arc<Mutex<()>>>>;

/// Held (user, date) scope. Dropping it releases the lock and forgets the
/// entry once nobody else is waiting on it.
struct ScopeGuard<'a> {
    locks: &'a DashMap<ScopeKey, Arc<Mutex<()>>>,
    key: ScopeKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // The map's own handle is the last one; waiters hold clones.
        self.locks.remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Reconciles candidates and manual entries against the store.
#[derive(Clone)]
pub struct ActivityProcessor {
    store: Arc<dyn ActivityStore>,
    scope_locks: ScopeLocks,
    conflict_retry_limit: u32,
    max_concurrent_dates: usize,
}

/// What happened to one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileAction {
    NoOp,
    Inserted,
    Merged,
}

/// Result of reconciling one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileResult {
    /// Id of the stored record the candidate ended up as
    pub activity_id: String,
    pub action: ReconcileAction,
}

/// Per-record entry in a [`BatchReport`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordReport {
    Reconciled {
        external_id: String,
        activity_id: String,
        action: ReconcileAction,
    },
    Rejected {
        external_id: String,
        field: String,
        message: String,
    },
}

/// Summary of one import batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub import_ref: String,
    pub processed_at: String,
    pub inserted: u32,
    pub merged: u32,
    pub unchanged: u32,
    pub rejected: u32,
    pub records: Vec<RecordReport>,
}

impl ActivityProcessor {
    pub fn new(
        store: Arc<dyn ActivityStore>,
        conflict_retry_limit: u32,
        max_concurrent_dates: usize,
    ) -> Self {
        Self {
            store,
            scope_locks: Arc::new(DashMap::new()),
            conflict_retry_limit,
            max_concurrent_dates: max_concurrent_dates.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn ActivityStore> {
        &self.store
    }

    async fn lock_scope(&self, user_id: &str, date: NaiveDate) -> ScopeGuard<'_> {
        let key = (user_id.to_string(), date);
        let lock = self
            .scope_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        ScopeGuard {
            locks: &self.scope_locks,
            key,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// A user's history in default order.
    pub async fn list_activities(&self, user_id: &str) -> Result<Vec<Activity>> {
        self.store.query_by_user(user_id).await
    }

    /// Store a manually logged activity as the last one of its day.
    pub async fn create_manual(&self, user_id: &str, new: NewActivity) -> Result<Activity> {
        let _scope = self.lock_scope(user_id, new.date).await;

        let day = self.store.query_by_user_and_date(user_id, new.date).await?;

        let activity = Activity {
            id: self.store.generate_id(),
            date: new.date,
            order_within_day: next_order(&day),
            description: new.description,
            data: new.data,
            user_id: user_id.to_string(),
            import_ref: None,
            version: 0,
        };

        self.store.save(&activity).await?;

        tracing::info!(
            user_id,
            activity_id = %activity.id,
            date = %activity.date,
            "Manual activity created"
        );

        Ok(activity)
    }

    /// Reconcile one candidate under its (user, date) scope.
    ///
    /// A lost write race re-runs the full read-decide-write sequence, up to
    /// the configured retry limit.
    pub async fn reconcile_candidate(&self, candidate: &Activity) -> Result<ReconcileResult> {
        let user_id = candidate.user_id.as_str();
        let date = candidate.date;

        let _scope = self.lock_scope(user_id, date).await;

        let mut attempt = 0;
        loop {
            match self.read_decide_write(candidate).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_conflict() && attempt < self.conflict_retry_limit => {
                    attempt += 1;
                    tracing::warn!(
                        user_id,
                        %date,
                        candidate_id = %candidate.id,
                        attempt,
                        "Write conflict, re-running reconciliation"
                    );
                }
                Err(e) => return Err(e.in_scope(user_id, date, &candidate.id)),
            }
        }
    }

    async fn read_decide_write(&self, candidate: &Activity) -> Result<ReconcileResult> {
        let user_id = candidate.user_id.as_str();
        let day = self
            .store
            .query_by_user_and_date(user_id, candidate.date)
            .await?;

        match reconcile(candidate, &day) {
            Outcome::NoOp => {
                tracing::debug!(
                    user_id,
                    date = %candidate.date,
                    candidate_id = %candidate.id,
                    "Candidate already recorded (idempotent skip)"
                );
                let activity_id = find_match(candidate, &day)
                    .map_or_else(|| candidate.id.clone(), |found| found.id.clone());
                Ok(ReconcileResult {
                    activity_id,
                    action: ReconcileAction::NoOp,
                })
            }
            Outcome::Insert(mut activity) => {
                activity.order_within_day = next_order(&day);
                activity.version = 0;
                self.store.save(&activity).await?;

                tracing::info!(
                    user_id,
                    date = %candidate.date,
                    candidate_id = %candidate.id,
                    "Imported activity inserted"
                );
                Ok(ReconcileResult {
                    activity_id: activity.id,
                    action: ReconcileAction::Inserted,
                })
            }
            Outcome::MergeInto {
                mut existing,
                update,
            } => {
                update.apply(&mut existing);
                self.store.save(&existing).await?;

                tracing::info!(
                    user_id,
                    date = %candidate.date,
                    candidate_id = %candidate.id,
                    activity_id = %existing.id,
                    "Imported activity merged into manual record"
                );
                Ok(ReconcileResult {
                    activity_id: existing.id,
                    action: ReconcileAction::Merged,
                })
            }
        }
    }

    /// Normalize and reconcile one import batch for a user.
    ///
    /// Records that fail normalization are reported and skipped, as are
    /// records whose id is already stored on another date. Candidates on the
    /// same date run one after another in feed order; distinct dates run
    /// concurrently. Any other store error aborts the batch; everything
    /// applied before it stays applied and a replay is safe.
    pub async fn import_batch(
        &self,
        context: &ImportContext,
        records: &[RawImportRecord],
    ) -> Result<BatchReport> {
        let entries = records
            .iter()
            .map(|record| (record.id.to_string(), normalize(record, context)))
            .collect();
        self.reconcile_entries(context, entries).await
    }

    /// Like [`Self::import_batch`], for records still in wire form. A record
    /// that fails to decode is rejected on its own.
    pub async fn import_feed(
        &self,
        context: &ImportContext,
        records: &[serde_json::Value],
    ) -> Result<BatchReport> {
        let entries = records
            .iter()
            .map(|value| {
                let candidate = RawImportRecord::from_value(value)
                    .and_then(|record| normalize(&record, context));
                (RawImportRecord::external_id_of(value), candidate)
            })
            .collect();
        self.reconcile_entries(context, entries).await
    }

    async fn reconcile_entries(
        &self,
        context: &ImportContext,
        entries: Vec<(String, std::result::Result<Activity, NormalizationError>)>,
    ) -> Result<BatchReport> {
        tracing::info!(
            user_id = %context.user_id,
            import_ref = %context.import_ref,
            count = entries.len(),
            "Processing import batch"
        );

        let total = entries.len();
        let mut slots: Vec<Option<RecordReport>> = vec![None; total];
        let mut by_date: BTreeMap<NaiveDate, Vec<(usize, Activity)>> = BTreeMap::new();

        for (index, (external_id, normalized)) in entries.into_iter().enumerate() {
            match normalized {
                Ok(candidate) => by_date
                    .entry(candidate.date)
                    .or_default()
                    .push((index, candidate)),
                Err(e) => {
                    tracing::warn!(
                        user_id = %context.user_id,
                        %external_id,
                        field = e.field(),
                        error = %e,
                        "Rejected import record"
                    );
                    slots[index] = Some(RecordReport::Rejected {
                        external_id,
                        field: e.field().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let per_date: Vec<Vec<(usize, RecordReport)>> = stream::iter(by_date.into_values())
            .map(|candidates| async move {
                let mut done = Vec::with_capacity(candidates.len());
                for (index, candidate) in candidates {
                    let report = match self.reconcile_candidate(&candidate).await {
                        Ok(result) => RecordReport::Reconciled {
                            external_id: candidate.id,
                            activity_id: result.activity_id,
                            action: result.action,
                        },
                        Err(e) if e.is_id_collision() => {
                            tracing::warn!(
                                user_id = %candidate.user_id,
                                date = %candidate.date,
                                candidate_id = %candidate.id,
                                error = %e,
                                "Import record moved to another date"
                            );
                            RecordReport::Rejected {
                                external_id: candidate.id,
                                field: "start_date_local".to_string(),
                                message: e.to_string(),
                            }
                        }
                        Err(e) => return Err(e),
                    };
                    done.push((index, report));
                }
                Ok::<_, AppError>(done)
            })
            .buffer_unordered(self.max_concurrent_dates)
            .collect::<Vec<Result<Vec<(usize, RecordReport)>>>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        for (index, report) in per_date.into_iter().flatten() {
            slots[index] = Some(report);
        }

        let mut report = BatchReport {
            import_ref: context.import_ref.clone(),
            processed_at: format_utc_rfc3339(chrono::Utc::now()),
            inserted: 0,
            merged: 0,
            unchanged: 0,
            rejected: 0,
            records: Vec::with_capacity(total),
        };

        for entry in slots.into_iter().flatten() {
            match &entry {
                RecordReport::Reconciled { action, .. } => match action {
                    ReconcileAction::Inserted => report.inserted += 1,
                    ReconcileAction::Merged => report.merged += 1,
                    ReconcileAction::NoOp => report.unchanged += 1,
                },
                RecordReport::Rejected { .. } => report.rejected += 1,
            }
            report.records.push(entry);
        }

        tracing::info!(
            user_id = %context.user_id,
            import_ref = %context.import_ref,
            inserted = report.inserted,
            merged = report.merged,
            unchanged = report.unchanged,
            rejected = report.rejected,
            "Import batch complete"
        );

        Ok(report)
    }
}

/// Position after the last activity of the day.
fn next_order(day: &[Activity]) -> u32 {
    day.iter()
        .map(|a| a.order_within_day)
        .max()
        .map_or(0, |max| max + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryStore;
    use crate::models::{ActivityData, ActivityType, ExternalId};

    fn processor(store: Arc<InMemoryStore>) -> ActivityProcessor {
        ActivityProcessor::new(store, 3, 4)
    }

    fn context(import_ref: &str) -> ImportContext {
        ImportContext {
            user_id: "user-1".to_string(),
            import_ref: import_ref.to_string(),
        }
    }

    fn raw_run(id: u64, date: &str, moving_time: u32) -> RawImportRecord {
        RawImportRecord {
            id: ExternalId::Number(id),
            activity_type: "Run".to_string(),
            start_date_local: format!("{}T07:00:00Z", date),
            name: format!("Feed run {}", id),
            moving_time: Some(moving_time),
            average_speed: Some(2.68),
            laps: None,
        }
    }

    fn manual_run(date: &str, duration: u32) -> NewActivity {
        NewActivity {
            date: date.parse().unwrap(),
            description: "Easy loop".to_string(),
            data: ActivityData {
                activity_type: ActivityType::Run,
                duration: Some(duration),
                pace: Some(585),
                completed: false,
                laps: None,
                extra: Default::default(),
            },
        }
    }

    #[test]
    fn test_next_order() {
        assert_eq!(next_order(&[]), 0);
    }

    #[tokio::test]
    async fn test_insert_then_replay_is_noop() {
        let store = Arc::new(InMemoryStore::new());
        let processor = processor(store.clone());
        let candidate = normalize(&raw_run(1, "2023-01-01", 1800), &context("i1")).unwrap();

        let first = processor.reconcile_candidate(&candidate).await.unwrap();
        assert_eq!(first.action, ReconcileAction::Inserted);

        let second = processor.reconcile_candidate(&candidate).await.unwrap();
        assert_eq!(second.action, ReconcileAction::NoOp);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("1").unwrap().data.pace, Some(600));
    }

    #[tokio::test]
    async fn test_merge_then_replay_is_noop() {
        let store = Arc::new(InMemoryStore::new());
        let processor = processor(store.clone());

        let manual = processor
            .create_manual("user-1", manual_run("2023-01-01", 1750))
            .await
            .unwrap();
        let candidate = normalize(&raw_run(7, "2023-01-01", 1800), &context("i1")).unwrap();

        let merged = processor.reconcile_candidate(&candidate).await.unwrap();
        assert_eq!(merged.action, ReconcileAction::Merged);
        assert_eq!(merged.activity_id, manual.id);

        let stored = store.get(&manual.id).unwrap();
        let link = stored.import_ref.as_ref().unwrap();
        assert_eq!(link.batch_id, "i1");
        assert_eq!(link.external_id, "7");
        assert!(stored.data.completed);
        assert_eq!(stored.data.pace, Some(585));
        assert_eq!(stored.description, "Easy loop");

        let replay = processor.reconcile_candidate(&candidate).await.unwrap();
        assert_eq!(replay.action, ReconcileAction::NoOp);
        assert_eq!(replay.activity_id, manual.id);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_inserted_candidate_goes_last_in_day() {
        let store = Arc::new(InMemoryStore::new());
        let processor = processor(store.clone());

        let mut ride = manual_run("2023-01-01", 3600);
        ride.data.activity_type = ActivityType::Other;
        processor.create_manual("user-1", ride).await.unwrap();

        let candidate = normalize(&raw_run(2, "2023-01-01", 1800), &context("i1")).unwrap();
        processor.reconcile_candidate(&candidate).await.unwrap();

        assert_eq!(store.get("2").unwrap().order_within_day, 1);
    }

    #[tokio::test]
    async fn test_store_outage_carries_scope() {
        let store = Arc::new(InMemoryStore::new());
        let processor = processor(store.clone());
        store.set_offline(true);

        let candidate = normalize(&raw_run(3, "2023-01-01", 1800), &context("i1")).unwrap();
        let err = processor.reconcile_candidate(&candidate).await.unwrap_err();

        match err {
            AppError::Reconciliation {
                user_id,
                date,
                candidate_id,
                source,
            } => {
                assert_eq!(user_id, "user-1");
                assert_eq!(date, "2023-01-01".parse::<NaiveDate>().unwrap());
                assert_eq!(candidate_id, "3");
                assert!(matches!(*source, AppError::PersistenceUnavailable(_)));
            }
            other => panic!("expected scoped error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_batch_reports_in_feed_order() {
        let store = Arc::new(InMemoryStore::new());
        let processor = processor(store.clone());

        let mut bad = raw_run(11, "2023-01-02", 1800);
        bad.average_speed = Some(0.0);
        let records = vec![
            raw_run(10, "2023-01-03", 1800),
            bad,
            raw_run(12, "2023-01-01", 2400),
            raw_run(10, "2023-01-03", 1800),
        ];

        let report = processor
            .import_batch(&context("batch-1"), &records)
            .await
            .unwrap();

        assert_eq!(report.import_ref, "batch-1");
        assert_eq!(report.inserted, 2);
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.records.len(), 4);
        assert!(matches!(
            &report.records[1],
            RecordReport::Rejected { field, .. } if field == "average_speed"
        ));
        assert!(matches!(
            &report.records[3],
            RecordReport::Reconciled { action: ReconcileAction::NoOp, .. }
        ));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_scope_locks_released_after_work() {
        let store = Arc::new(InMemoryStore::new());
        let processor = processor(store.clone());

        processor
            .create_manual("user-1", manual_run("2023-01-01", 1750))
            .await
            .unwrap();
        for day in 1..=28 {
            let date = format!("2023-02-{:02}", day);
            let candidate = normalize(&raw_run(day, &date, 1800), &context("i1")).unwrap();
            processor.reconcile_candidate(&candidate).await.unwrap();
        }

        assert!(processor.scope_locks.is_empty());
        assert_eq!(store.len(), 29);
    }

    #[tokio::test]
    async fn test_scope_locks_released_after_contention() {
        let store = Arc::new(InMemoryStore::new());
        let processor = processor(store.clone());

        let mut handles = vec![];
        for i in 0..10 {
            let processor = processor.clone();
            handles.push(tokio::spawn(async move {
                let candidate =
                    normalize(&raw_run(50 + i, "2023-03-01", 1800), &context("i1")).unwrap();
                processor.reconcile_candidate(&candidate).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(processor.scope_locks.is_empty());
    }

    #[tokio::test]
    async fn test_moved_workout_rejected_without_retry() {
        let store = Arc::new(InMemoryStore::new());
        let processor = processor(store.clone());

        let original = normalize(&raw_run(9, "2023-01-01", 1800), &context("i1")).unwrap();
        processor.reconcile_candidate(&original).await.unwrap();

        // The user moved the workout to the next day on the tracker
        let moved = normalize(&raw_run(9, "2023-01-02", 1800), &context("i2")).unwrap();
        let err = processor.reconcile_candidate(&moved).await.unwrap_err();
        assert!(err.is_id_collision());
        assert!(!err.is_conflict());

        let records = vec![raw_run(9, "2023-01-02", 1800), raw_run(10, "2023-01-02", 600)];
        let report = processor
            .import_batch(&context("i3"), &records)
            .await
            .unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(report.inserted, 1);
        assert!(matches!(
            &report.records[0],
            RecordReport::Rejected { field, .. } if field == "start_date_local"
        ));

        assert_eq!(store.len(), 2);
        assert_eq!(
            store.get("9").unwrap().date,
            "2023-01-01".parse::<NaiveDate>().unwrap()
        );
    }
}
