// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for gradeflow-server.

use std::time::Duration;

/// Server configuration loaded from environment variables.
///
/// LMS and Git host adapter settings are loaded by their own crates
/// (`GRADEFLOW_LMS_*`, `GRADEFLOW_GIT_*`); this covers everything else.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection URL.
    pub database_url: String,
    /// How often the reconciler ticks.
    pub reconcile_interval: Duration,
    /// Autograder executable invoked per submission.
    pub grader_command: String,
    /// Maximum database connections in the pool.
    pub max_db_connections: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("GRADEFLOW_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .map_err(|_| ConfigError::MissingEnvVar("GRADEFLOW_DATABASE_URL or DATABASE_URL"))?;

        let reconcile_interval_secs: u64 = std::env::var("GRADEFLOW_RECONCILE_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("GRADEFLOW_RECONCILE_INTERVAL_SECS"))?;

        let grader_command =
            std::env::var("GRADEFLOW_GRADER_COMMAND").unwrap_or_else(|_| "otter".to_string());

        let max_db_connections: u32 = std::env::var("GRADEFLOW_MAX_DB_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("GRADEFLOW_MAX_DB_CONNECTIONS"))?;

        Ok(Self {
            database_url,
            reconcile_interval: Duration::from_secs(reconcile_interval_secs),
            grader_command,
            max_db_connections,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// An environment variable could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
