// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod activity;
pub mod import;

pub use activity::{
    default_order, sort_default, Activity, ActivityData, ActivityResponse, ActivityType,
    ImportRef, Lap, NewActivity,
};
pub use import::{ExternalId, ImportContext, RawImportRecord, RawLap};
