// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Activity model for storage and API.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Coarse workout classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityType {
    Run,
    #[serde(other)]
    Other,
}

impl ActivityType {
    /// Classify an external type string. Only an exact `"Run"` is a run.
    pub fn classify(raw: &str) -> Self {
        if raw == "Run" {
            ActivityType::Run
        } else {
            ActivityType::Other
        }
    }

    pub fn is_run(self) -> bool {
        self == ActivityType::Run
    }
}

/// One lap of a workout. Shaped like [`ActivityData`] without laps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lap {
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pace: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(default)]
    pub completed: bool,
}

/// Semi-structured workout payload.
///
/// Keys this crate does not interpret are kept in `extra` and written back
/// untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityData {
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    /// Duration in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    /// Seconds per mile (runs only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pace: Option<u32>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub laps: Option<Vec<Lap>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Link from an activity to the import that produced or confirmed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRef {
    /// Import batch the record arrived in
    pub batch_id: String,
    /// Workout id in the external feed
    pub external_id: String,
}

/// Stored activity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Generated for manual records, external workout id for imports
    pub id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub order_within_day: u32,
    #[serde(default)]
    pub description: String,
    pub data: ActivityData,
    /// Owning user (never changes)
    pub user_id: String,
    /// Set once the record is linked to the import feed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_ref: Option<ImportRef>,
    /// Optimistic concurrency token, bumped by the store on every save
    #[serde(default)]
    pub version: u64,
}

impl Activity {
    pub fn is_run(&self) -> bool {
        self.data.activity_type.is_run()
    }

    pub fn is_import_linked(&self) -> bool {
        self.import_ref.is_some()
    }

    pub fn duration(&self) -> Option<u32> {
        self.data.duration
    }

    /// True if `id` names this record, either directly or as the external
    /// workout it was linked to.
    pub fn is_known_as(&self, id: &str) -> bool {
        self.id == id
            || self
                .import_ref
                .as_ref()
                .is_some_and(|link| link.external_id == id)
    }
}

/// Default enumeration order: date, then position within the day.
///
/// Ties fall back to the id so that enumeration is deterministic regardless
/// of how the store returned the records.
pub fn default_order(a: &Activity, b: &Activity) -> Ordering {
    a.date
        .cmp(&b.date)
        .then(a.order_within_day.cmp(&b.order_within_day))
        .then_with(|| a.id.cmp(&b.id))
}

/// Sort activities in place using [`default_order`].
pub fn sort_default(activities: &mut [Activity]) {
    activities.sort_by(default_order);
}

/// Manually logged activity as submitted by the user.
#[derive(Debug, Clone, Deserialize, validator::Validate)]
pub struct NewActivity {
    pub date: NaiveDate,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub description: String,
    pub data: ActivityData,
}

/// Activity representation returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityResponse {
    pub id: String,
    pub date: NaiveDate,
    pub order: u32,
    pub description: String,
    pub data: ActivityData,
    pub import_linked: bool,
}

impl From<Activity> for ActivityResponse {
    fn from(activity: Activity) -> Self {
        let import_linked = activity.is_import_linked();
        Self {
            id: activity.id,
            date: activity.date,
            order: activity.order_within_day,
            description: activity.description,
            data: activity.data,
            import_linked,
        }
    }
}
