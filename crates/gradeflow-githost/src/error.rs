// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for gradeflow-githost.

use thiserror::Error;

use gradeflow_core::CoreError;

/// Result type using GitHostError.
pub type Result<T> = std::result::Result<T, GitHostError>;

/// Errors that can occur when talking to the Git host.
#[derive(Debug, Error)]
pub enum GitHostError {
    /// Configuration error (missing or invalid values).
    #[error("configuration error: {0}")]
    Config(String),

    /// The Git host returned a non-success status.
    #[error("git host returned status {status}: {body}")]
    Http {
        /// Upstream HTTP status.
        status: u16,
        /// Response body, truncated for logging.
        body: String,
    },

    /// The request never completed (connect failure, timeout).
    #[error("git host transport error: {0}")]
    Transport(String),

    /// The response body did not match the expected shape.
    #[error("unexpected git host response: {0}")]
    UnexpectedResponse(String),
}

impl GitHostError {
    /// Upstream HTTP status, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status >= 500,
            Self::Transport(_) => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for GitHostError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => GitHostError::Http {
                status: status.as_u16(),
                body: err.to_string(),
            },
            None => GitHostError::Transport(err.to_string()),
        }
    }
}

impl From<GitHostError> for CoreError {
    fn from(err: GitHostError) -> Self {
        CoreError::GitBackendError {
            status: err.status().unwrap_or(0),
            detail: err.to_string(),
        }
    }
}
