// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Activity Reconciler: one workout history from manual logs and an import feed
//!
//! This crate normalizes workouts arriving from a fitness-tracking feed and
//! reconciles them against what the user logged by hand, so each real
//! workout is stored once.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use services::ActivityProcessor;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub processor: ActivityProcessor,
}
