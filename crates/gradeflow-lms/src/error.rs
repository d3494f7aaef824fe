// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for gradeflow-lms.

use thiserror::Error;

use gradeflow_core::CoreError;

/// Result type using LmsError.
pub type Result<T> = std::result::Result<T, LmsError>;

/// Errors that can occur when talking to the LMS.
#[derive(Debug, Error)]
pub enum LmsError {
    /// Configuration error (missing or invalid values).
    #[error("configuration error: {0}")]
    Config(String),

    /// The LMS returned a non-success status.
    #[error("LMS returned status {status}: {body}")]
    Http {
        /// Upstream HTTP status.
        status: u16,
        /// Response body, truncated for logging.
        body: String,
    },

    /// The request never completed (connect failure, timeout).
    #[error("LMS transport error: {0}")]
    Transport(String),

    /// The response body did not match the expected shape.
    #[error("unexpected LMS response: {0}")]
    UnexpectedResponse(String),

    /// The multi-step file upload failed partway.
    #[error("file upload failed: {0}")]
    Upload(String),
}

impl LmsError {
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

impl From<reqwest::Error> for LmsError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => LmsError::Http {
                status: status.as_u16(),
                body: err.to_string(),
            },
            None => LmsError::Transport(err.to_string()),
        }
    }
}

impl From<LmsError> for CoreError {
    fn from(err: LmsError) -> Self {
        match &err {
            LmsError::Upload(detail) => CoreError::FileUploadFailed {
                detail: detail.clone(),
            },
            _ => CoreError::LmsBackendError {
                status: err.status().unwrap_or(0),
                detail: err.to_string(),
            },
        }
    }
}
