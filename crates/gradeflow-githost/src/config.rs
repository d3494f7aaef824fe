// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Git host adapter configuration.

use crate::error::GitHostError;

/// Git host adapter configuration.
#[derive(Debug, Clone)]
pub struct GitHostConfig {
    /// Base URL of the Git host API, e.g. `https://git.example.edu/api/v1`.
    pub base_url: String,
    /// Admin token for API calls.
    pub token: String,
    /// Organization owning the master repository.
    pub organization: String,
    /// Name of the master repository.
    pub master_repo: String,
}

impl GitHostConfig {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `GRADEFLOW_GIT_BASE_URL`
    /// - `GRADEFLOW_GIT_TOKEN`
    /// - `GRADEFLOW_GIT_ORG`
    /// - `GRADEFLOW_GIT_MASTER_REPO`
    pub fn from_env() -> Result<Self, GitHostError> {
        let get = |name: &'static str| {
            std::env::var(name).map_err(|_| GitHostError::Config(format!("missing {name}")))
        };
        Ok(Self {
            base_url: get("GRADEFLOW_GIT_BASE_URL")?,
            token: get("GRADEFLOW_GIT_TOKEN")?,
            organization: get("GRADEFLOW_GIT_ORG")?,
            master_repo: get("GRADEFLOW_GIT_MASTER_REPO")?,
        })
    }
}
