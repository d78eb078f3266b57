// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod activity;
pub mod normalizer;
pub mod reconcile;

pub use activity::{ActivityProcessor, BatchReport, ReconcileAction, ReconcileResult, RecordReport};
pub use normalizer::normalize;
pub use reconcile::{find_match, matches, reconcile, MergeUpdate, Outcome};
