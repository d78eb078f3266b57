// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Reconciliation of an imported candidate against a user's existing day.
//!
//! Everything here is pure: the caller fetches the same-day records, asks
//! [`reconcile`] what to do, and applies the returned [`Outcome`].

use crate::models::{Activity, ImportRef};

/// Durations closer than this are considered the same workout.
const DURATION_TOLERANCE_SECS: u32 = 10 * 60;

/// Fields folded into a manual record when the feed confirms it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeUpdate {
    pub import_ref: Option<ImportRef>,
}

impl MergeUpdate {
    /// Apply the merge. Everything other than the import linkage and the
    /// completion flag is left as the user wrote it.
    pub fn apply(&self, activity: &mut Activity) {
        activity.import_ref = self.import_ref.clone();
        activity.data.completed = true;
    }
}

/// What to do with a candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Already recorded
    NoOp,
    /// Persist the candidate as a new record
    Insert(Activity),
    /// Link the existing manual record to the import
    MergeInto {
        existing: Activity,
        update: MergeUpdate,
    },
}

/// Same record, or one of them was linked to the other's external id.
fn same_identity(a: &Activity, b: &Activity) -> bool {
    a.is_known_as(&b.id) || b.is_known_as(&a.id)
}

/// Whether two activities describe the same real-world workout.
pub fn matches(a: &Activity, b: &Activity) -> bool {
    if same_identity(a, b) {
        return true;
    }

    let same_date = a.date == b.date;
    let same_type = a.is_run() == b.is_run();
    let same_duration = match (a.duration(), b.duration()) {
        (Some(x), Some(y)) => x.abs_diff(y) < DURATION_TOLERANCE_SECS,
        _ => true,
    };

    same_date && same_type && same_duration
}

/// The record the candidate corresponds to, if any.
///
/// A record that already carries the candidate's identity wins wherever it
/// sits in the day; otherwise the first match in the given order wins.
pub fn find_match<'a>(candidate: &Activity, existing: &'a [Activity]) -> Option<&'a Activity> {
    existing
        .iter()
        .find(|a| a.is_known_as(&candidate.id))
        .or_else(|| existing.iter().find(|a| matches(candidate, a)))
}

/// Decide the outcome for `candidate` given every existing activity of the
/// same user on the same date, in default enumeration order.
pub fn reconcile(candidate: &Activity, existing: &[Activity]) -> Outcome {
    match find_match(candidate, existing) {
        Some(found) if found.is_known_as(&candidate.id) => Outcome::NoOp,
        None => Outcome::Insert(candidate.clone()),
        // A second import never overwrites an already linked record.
        Some(found) if found.is_import_linked() => Outcome::Insert(candidate.clone()),
        Some(found) if !found.is_import_linked() => Outcome::MergeInto {
            existing: found.clone(),
            update: MergeUpdate {
                import_ref: candidate.import_ref.clone(),
            },
        },
        // Unreachable: the arms above cover every match state.
        Some(_) => Outcome::NoOp,
    }
}
