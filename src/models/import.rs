// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Raw import feed records, as decoded by the ingestion side.

use crate::error::NormalizationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// External workout id. The feed sends either a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExternalId {
    Number(u64),
    Text(String),
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalId::Number(n) => write!(f, "{}", n),
            ExternalId::Text(s) => f.write_str(s),
        }
    }
}

/// One workout from the import feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawImportRecord {
    pub id: ExternalId,
    #[serde(rename = "type")]
    pub activity_type: String,
    pub start_date_local: String,
    #[serde(default)]
    pub name: String,
    /// Moving time in seconds
    #[serde(default)]
    pub moving_time: Option<u32>,
    /// Meters per second
    #[serde(default)]
    pub average_speed: Option<f64>,
    #[serde(default)]
    pub laps: Option<Vec<RawLap>>,
}

impl RawImportRecord {
    /// Decode one record of a feed delivery. A record that doesn't fit is
    /// rejected on its own, naming the first field at fault.
    pub fn from_value(value: &Value) -> Result<Self, NormalizationError> {
        Self::deserialize(value).map_err(|e| {
            let message = e.to_string();
            NormalizationError::Malformed {
                field: offending_field(value, &message),
                message,
            }
        })
    }

    /// External id as sent, for reporting records that failed to decode.
    pub fn external_id_of(value: &Value) -> String {
        match value.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    }
}

const RECORD_FIELDS: [&str; 7] = [
    "id",
    "type",
    "start_date_local",
    "name",
    "moving_time",
    "average_speed",
    "laps",
];

fn offending_field(value: &Value, message: &str) -> String {
    let Some(object) = value.as_object() else {
        return "record".to_string();
    };

    if let Some(start) = message.find("missing field `") {
        let rest = &message[start + "missing field `".len()..];
        if let Some(name) = rest.split('`').next() {
            return name.to_string();
        }
    }

    RECORD_FIELDS
        .iter()
        .find_map(|name| {
            let field = object.get(*name)?;
            match *name {
                "laps" => bad_lap_field(field),
                _ if fits(name, field) => None,
                _ => Some(name.to_string()),
            }
        })
        .unwrap_or_else(|| "record".to_string())
}

fn bad_lap_field(laps: &Value) -> Option<String> {
    let laps = match laps {
        Value::Null => return None,
        Value::Array(laps) => laps,
        _ => return Some("laps".to_string()),
    };

    laps.iter().enumerate().find_map(|(i, lap)| {
        let Some(lap) = lap.as_object() else {
            return Some(format!("laps[{}]", i));
        };
        ["average_speed", "moving_time"]
            .iter()
            .find(|name| lap.get(**name).is_some_and(|v| !fits(name, v)))
            .map(|name| format!("laps[{}].{}", i, name))
    })
}

/// Whether a single value has the shape its field expects.
fn fits(name: &str, value: &Value) -> bool {
    match name {
        "id" => ExternalId::deserialize(value).is_ok(),
        "type" | "start_date_local" | "name" => value.is_string(),
        "moving_time" => Option::<u32>::deserialize(value).is_ok(),
        "average_speed" => Option::<f64>::deserialize(value).is_ok(),
        _ => true,
    }
}

/// One lap of an imported workout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLap {
    #[serde(default)]
    pub average_speed: Option<f64>,
    #[serde(default)]
    pub moving_time: Option<u32>,
}

/// Who an import belongs to and which batch it arrived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportContext {
    pub user_id: String,
    pub import_ref: String,
}
