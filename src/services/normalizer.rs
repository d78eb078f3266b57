// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Import normalization: raw feed record -> candidate activity.
//!
//! Pure transformation. Derives the activity type, calendar date, pace and
//! lap breakdown, and a deterministic id from the external workout id so
//! that a replayed record produces the same candidate.

use crate::error::NormalizationError;
use crate::models::{
    Activity, ActivityData, ActivityType, ImportContext, ImportRef, Lap, RawImportRecord, RawLap,
};
use crate::time_utils::parse_local_date;

/// Meters in a mile, as used for pace conversion.
const METERS_PER_MILE: f64 = 1609.3;

/// Convert an import record into a candidate activity.
pub fn normalize(
    record: &RawImportRecord,
    context: &ImportContext,
) -> Result<Activity, NormalizationError> {
    let activity_type = ActivityType::classify(&record.activity_type);

    let date = parse_local_date(&record.start_date_local).ok_or_else(|| {
        NormalizationError::InvalidDate {
            field: "start_date_local".to_string(),
            value: record.start_date_local.clone(),
        }
    })?;

    let pace = if activity_type.is_run() {
        Some(to_seconds_per_mile(record.average_speed, "average_speed")?)
    } else {
        None
    };

    let laps = match record.laps.as_deref() {
        Some(laps) if !laps.is_empty() => Some(parse_laps(laps)?),
        _ => None,
    };

    let id = record.id.to_string();

    Ok(Activity {
        id: id.clone(),
        date,
        order_within_day: 0,
        description: record.name.clone(),
        data: ActivityData {
            activity_type,
            duration: record.moving_time,
            pace,
            completed: true,
            laps,
            extra: Default::default(),
        },
        user_id: context.user_id.clone(),
        import_ref: Some(ImportRef {
            batch_id: context.import_ref.clone(),
            external_id: id,
        }),
        version: 0,
    })
}

/// Laps are always runs in the feed's convention.
fn parse_laps(laps: &[RawLap]) -> Result<Vec<Lap>, NormalizationError> {
    laps.iter()
        .enumerate()
        .map(|(i, lap)| {
            let field = format!("laps[{}].average_speed", i);
            Ok(Lap {
                activity_type: ActivityType::Run,
                pace: Some(to_seconds_per_mile(lap.average_speed, &field)?),
                duration: lap.moving_time,
                completed: true,
            })
        })
        .collect()
}

/// Meters per second -> seconds per mile, rounded half away from zero.
fn to_seconds_per_mile(speed: Option<f64>, field: &str) -> Result<u32, NormalizationError> {
    let mps = match speed {
        Some(mps) if mps.is_finite() && mps > 0.0 => mps,
        other => {
            return Err(NormalizationError::NonPositiveSpeed {
                field: field.to_string(),
                value: other,
            })
        }
    };

    let pace = (METERS_PER_MILE / mps).round();
    if !pace.is_finite() || pace > f64::from(u32::MAX) {
        return Err(NormalizationError::SpeedOutOfRange {
            field: field.to_string(),
            value: mps,
        });
    }
    Ok(pace as u32)
}
