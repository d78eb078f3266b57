// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process activity store, used for local runs and tests.

use crate::db::{check_write, ActivityStore};
use crate::error::AppError;
use crate::models::{sort_default, Activity};
use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// DashMap-backed store keyed by activity id.
#[derive(Default)]
pub struct InMemoryStore {
    activities: DashMap<String, Activity>,
    offline: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store becoming unreachable (or reachable again).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of stored activities across all users.
    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    /// Fetch one record by id.
    pub fn get(&self, id: &str) -> Option<Activity> {
        self.activities.get(id).map(|a| a.value().clone())
    }

    fn check_online(&self) -> Result<(), AppError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::PersistenceUnavailable(
                "In-memory store is offline".to_string(),
            ));
        }
        Ok(())
    }

    fn collect<F>(&self, filter: F) -> Vec<Activity>
    where
        F: Fn(&Activity) -> bool,
    {
        let mut found: Vec<Activity> = self
            .activities
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        sort_default(&mut found);
        found
    }
}

#[async_trait]
impl ActivityStore for InMemoryStore {
    async fn query_by_user_and_date(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<Activity>, AppError> {
        self.check_online()?;
        Ok(self.collect(|a| a.user_id == user_id && a.date == date))
    }

    async fn query_by_user(&self, user_id: &str) -> Result<Vec<Activity>, AppError> {
        self.check_online()?;
        Ok(self.collect(|a| a.user_id == user_id))
    }

    async fn save(&self, activity: &Activity) -> Result<(), AppError> {
        self.check_online()?;

        // The entry guard holds the shard lock, so check-and-write is atomic.
        match self.activities.entry(activity.id.clone()) {
            Entry::Occupied(mut entry) => {
                check_write(Some(entry.get()), activity)?;
                let mut next = activity.clone();
                next.version += 1;
                entry.insert(next);
            }
            Entry::Vacant(entry) => {
                check_write(None, activity)?;
                let mut next = activity.clone();
                next.version = 1;
                entry.insert(next);
            }
        }

        Ok(())
    }
}
