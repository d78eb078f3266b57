// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Activity Reconciler API Server
//!
//! Accepts manually logged workouts and import feed deliveries and keeps one
//! reconciled activity history per user.

use activity_reconciler::{
    config::{Config, StoreBackend},
    db::{ActivityStore, FirestoreDb, InMemoryStore},
    services::ActivityProcessor,
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging();

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(
        port = config.port,
        backend = ?config.store_backend,
        "Starting Activity Reconciler"
    );

    let store: Arc<dyn ActivityStore> = match (&config.store_backend, &config.gcp_project_id) {
        (StoreBackend::Firestore, Some(project_id)) => {
            Arc::new(FirestoreDb::new(project_id).await?)
        }
        (StoreBackend::Firestore, None) => {
            return Err("GCP_PROJECT_ID is required for firestore".into())
        }
        (StoreBackend::Memory, _) => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            Arc::new(InMemoryStore::new())
        }
    };

    let processor = ActivityProcessor::new(
        store,
        config.conflict_retry_limit,
        config.max_concurrent_dates,
    );

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        processor,
    });

    // Build router
    let app = activity_reconciler::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("activity_reconciler=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
