// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Gradeflow Server - Classroom Control Plane
//!
//! The server is responsible for:
//! - Reconciling the course, assignments, and roster against the LMS
//! - Admitting student submissions and uploading notebooks
//! - Orchestrating grading runs and writing grades back
//!
//! Note: the pre-receive policy enforcement runs on the Git host; this
//! process only synthesizes and installs the hook script.

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};

use gradeflow_core::events::EventEmitter;
use gradeflow_core::migrations;
use gradeflow_core::store::PostgresStore;
use gradeflow_githost::{GitHostClient, GitHostConfig};
use gradeflow_lms::LmsClient;
use gradeflow_server::config::Config;
use gradeflow_server::directory::StaticDirectory;
use gradeflow_server::reconciler::{Reconciler, ReconcilerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gradeflow_server=info".parse().unwrap()),
        )
        .init();

    info!("Starting Gradeflow Server");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;
    let git_config = GitHostConfig::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        reconcile_interval_secs = config.reconcile_interval.as_secs(),
        organization = %git_config.organization,
        master_repo = %git_config.master_repo,
        "Configuration loaded"
    );

    // Connect to database
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.max_db_connections)
        .connect(&config.database_url)
        .await?;

    info!("Database connection established");

    // Verify connection
    let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await?;
    info!(result = row.0, "Database health check passed");

    info!("Running database migrations...");
    migrations::run_postgres(&pool).await?;
    info!("Migrations completed");

    let store = Arc::new(PostgresStore::new(pool.clone()));
    let lms = Arc::new(LmsClient::from_env()?);
    let git = Arc::new(GitHostClient::new(git_config.clone())?);
    let events = EventEmitter::default();

    let directory = match std::env::var("GRADEFLOW_DIRECTORY_FILE") {
        Ok(path) => Arc::new(StaticDirectory::from_file(&path)?),
        Err(_) => {
            warn!("GRADEFLOW_DIRECTORY_FILE not set, PID resolution limited to known users");
            Arc::new(StaticDirectory::default())
        }
    };

    let reconciler = Arc::new(Reconciler::new(
        store,
        lms,
        git,
        directory,
        events,
        ReconcilerConfig {
            poll_interval: config.reconcile_interval,
            organization: git_config.organization,
            master_repo: git_config.master_repo,
        },
    ));
    let reconciler_shutdown = reconciler.shutdown_handle();
    let reconciler_handle = tokio::spawn({
        let reconciler = reconciler.clone();
        async move { reconciler.run().await }
    });

    info!("Gradeflow Server initialized successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    reconciler_shutdown.notify_one();
    let _ = reconciler_handle.await;

    pool.close().await;
    info!("Shutdown complete");

    Ok(())
}
