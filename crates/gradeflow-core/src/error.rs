// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for gradeflow-core.
//!
//! Provides a unified error type that maps to stable error codes and HTTP
//! status codes. Leaf adapters translate upstream failures into these kinds
//! at the boundary; interior services only catch to compensate.

use std::fmt;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// A domain precondition that was not satisfied.
///
/// These are terminal for the current request: retrying without changing
/// the state of the world will fail the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Precondition {
    /// The assignment is not published.
    AssignmentUnpublished,
    /// The assignment is not open yet for this student.
    AssignmentUpcoming,
    /// The assignment deadline has passed for this student.
    AssignmentClosed,
    /// The student has used all allowed submission attempts.
    MaxAttemptsReached,
    /// The grader configuration could not be generated from the master notebook.
    OtterConfigViolation,
    /// A manual grade batch contains the same student more than once.
    StudentGradedMultipleTimes,
    /// A graded submission does not belong to the target assignment.
    SubmissionMismatch,
    /// Autograding was requested for a manually graded assignment.
    AutogradingDisabled,
    /// The LMS refuses to unpublish the assignment (or cannot be consulted).
    AssignmentCannotBeUnpublished,
    /// The due date does not come after the available date.
    DueBeforeOpen,
}

impl Precondition {
    /// Stable code string for this precondition failure.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AssignmentUnpublished => "ASSIGNMENT_UNPUBLISHED",
            Self::AssignmentUpcoming => "ASSIGNMENT_UPCOMING",
            Self::AssignmentClosed => "ASSIGNMENT_CLOSED",
            Self::MaxAttemptsReached => "MAX_ATTEMPTS_REACHED",
            Self::OtterConfigViolation => "OTTER_CONFIG_VIOLATION",
            Self::StudentGradedMultipleTimes => "STUDENT_GRADED_MULTIPLE_TIMES",
            Self::SubmissionMismatch => "SUBMISSION_MISMATCH",
            Self::AutogradingDisabled => "AUTOGRADING_DISABLED",
            Self::AssignmentCannotBeUnpublished => "ASSIGNMENT_CANNOT_BE_UNPUBLISHED",
            Self::DueBeforeOpen => "DUE_BEFORE_OPEN",
        }
    }

    /// HTTP status this precondition surfaces as.
    ///
    /// Schedule/attempt gates are authorization-shaped (403); malformed
    /// grading input is request-shaped (400).
    pub fn http_status(&self) -> u16 {
        match self {
            Self::AssignmentUnpublished
            | Self::AssignmentUpcoming
            | Self::AssignmentClosed
            | Self::MaxAttemptsReached
            | Self::AutogradingDisabled
            | Self::AssignmentCannotBeUnpublished => 403,
            Self::OtterConfigViolation
            | Self::StudentGradedMultipleTimes
            | Self::SubmissionMismatch
            | Self::DueBeforeOpen => 400,
        }
    }
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::AssignmentUnpublished => "assignment is not published",
            Self::AssignmentUpcoming => "assignment is not open yet",
            Self::AssignmentClosed => "assignment is closed",
            Self::MaxAttemptsReached => "maximum submission attempts reached",
            Self::OtterConfigViolation => "grader configuration could not be generated",
            Self::StudentGradedMultipleTimes => "student graded more than once in one batch",
            Self::SubmissionMismatch => "submission does not belong to the target assignment",
            Self::AutogradingDisabled => "assignment is graded manually",
            Self::AssignmentCannotBeUnpublished => "assignment cannot be unpublished",
            Self::DueBeforeOpen => "due date must come after the available date",
        };
        f.write_str(msg)
    }
}

/// Core errors that can occur during request processing.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// A referenced entity does not exist.
    #[error("{resource} not found")]
    NotFound {
        /// Human-readable resource description (e.g. "assignment 5").
        resource: String,
    },

    /// An entity with the same identity already exists.
    #[error("{resource} already exists")]
    AlreadyExists {
        /// Human-readable resource description.
        resource: String,
    },

    /// The authenticated principal lacks the required permission.
    #[error("permission denied")]
    PermissionDenied,

    /// No authenticated principal.
    #[error("unauthenticated")]
    Unauthenticated,

    /// A domain precondition was not satisfied.
    #[error("precondition failed: {0}")]
    PreconditionFailed(Precondition),

    /// A database constraint (unique, foreign key, not-null) was violated.
    #[error("integrity violation: {constraint}")]
    IntegrityViolation {
        /// The violated constraint or a description of it.
        constraint: String,
    },

    /// Database or infrastructure failure; retryable by the caller.
    #[error("operational failure: {details}")]
    OperationalFailure {
        /// Error details.
        details: String,
    },

    /// The LMS returned an error response.
    #[error("LMS backend error (status {status}): {detail}")]
    LmsBackendError {
        /// Upstream HTTP status (0 when the request never completed).
        status: u16,
        /// Upstream detail.
        detail: String,
    },

    /// The Git host returned an error response.
    #[error("git backend error (status {status}): {detail}")]
    GitBackendError {
        /// Upstream HTTP status (0 when the request never completed).
        status: u16,
        /// Upstream detail.
        detail: String,
    },

    /// The directory (PID resolution) lookup timed out.
    #[error("directory lookup timed out")]
    LdapTimeout,

    /// Uploading a file to the LMS failed. Not retryable in the same call.
    #[error("file upload failed: {detail}")]
    FileUploadFailed {
        /// Failure detail.
        detail: String,
    },
}

impl CoreError {
    /// Shorthand for a NotFound error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Shorthand for an AlreadyExists error.
    pub fn already_exists(resource: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource: resource.into(),
        }
    }

    /// Get the stable error code string for this error kind.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::PreconditionFailed(p) => p.code(),
            Self::IntegrityViolation { .. } => "INTEGRITY_VIOLATION",
            Self::OperationalFailure { .. } => "OPERATIONAL_FAILURE",
            Self::LmsBackendError { .. } => "LMS_BACKEND_ERROR",
            Self::GitBackendError { .. } => "GIT_BACKEND_ERROR",
            Self::LdapTimeout => "LDAP_TIMEOUT",
            Self::FileUploadFailed { .. } => "FILE_UPLOAD_FAILED",
        }
    }

    /// HTTP status code this error surfaces as.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::AlreadyExists { .. } => 409,
            Self::PermissionDenied => 403,
            Self::Unauthenticated => 401,
            Self::PreconditionFailed(p) => p.http_status(),
            Self::IntegrityViolation { .. } => 400,
            Self::OperationalFailure { .. }
            | Self::LmsBackendError { .. }
            | Self::GitBackendError { .. }
            | Self::LdapTimeout
            | Self::FileUploadFailed { .. } => 500,
        }
    }

    /// Whether the caller may retry the same operation and expect progress.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::OperationalFailure { .. } | Self::LdapTimeout => true,
            Self::LmsBackendError { status, .. } | Self::GitBackendError { status, .. } => {
                *status >= 500
            }
            _ => false,
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => CoreError::not_found("row"),
            sqlx::Error::Database(db) => {
                // 23505 unique_violation, 23503 foreign_key_violation,
                // 23502 not_null_violation
                let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
                if code.starts_with("235") {
                    CoreError::IntegrityViolation {
                        constraint: db.constraint().unwrap_or(db.message()).to_string(),
                    }
                } else {
                    CoreError::OperationalFailure {
                        details: db.message().to_string(),
                    }
                }
            }
            _ => CoreError::OperationalFailure {
                details: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        let cases: Vec<(CoreError, &str)> = vec![
            (CoreError::not_found("assignment 5"), "NOT_FOUND"),
            (CoreError::already_exists("user jdoe"), "ALREADY_EXISTS"),
            (CoreError::PermissionDenied, "PERMISSION_DENIED"),
            (CoreError::Unauthenticated, "UNAUTHENTICATED"),
            (
                CoreError::PreconditionFailed(Precondition::MaxAttemptsReached),
                "MAX_ATTEMPTS_REACHED",
            ),
            (
                CoreError::IntegrityViolation {
                    constraint: "users_onyen_key".into(),
                },
                "INTEGRITY_VIOLATION",
            ),
            (
                CoreError::OperationalFailure {
                    details: "db down".into(),
                },
                "OPERATIONAL_FAILURE",
            ),
            (
                CoreError::LmsBackendError {
                    status: 503,
                    detail: "unavailable".into(),
                },
                "LMS_BACKEND_ERROR",
            ),
            (
                CoreError::GitBackendError {
                    status: 404,
                    detail: "missing".into(),
                },
                "GIT_BACKEND_ERROR",
            ),
            (CoreError::LdapTimeout, "LDAP_TIMEOUT"),
            (
                CoreError::FileUploadFailed {
                    detail: "connection reset".into(),
                },
                "FILE_UPLOAD_FAILED",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.error_code(), expected, "wrong code for {:?}", error);
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(CoreError::not_found("x").http_status(), 404);
        assert_eq!(CoreError::already_exists("x").http_status(), 409);
        assert_eq!(CoreError::PermissionDenied.http_status(), 403);
        assert_eq!(CoreError::Unauthenticated.http_status(), 401);
        assert_eq!(
            CoreError::PreconditionFailed(Precondition::AssignmentClosed).http_status(),
            403
        );
        assert_eq!(
            CoreError::PreconditionFailed(Precondition::SubmissionMismatch).http_status(),
            400
        );
        assert_eq!(
            CoreError::IntegrityViolation {
                constraint: "x".into()
            }
            .http_status(),
            400
        );
        assert_eq!(
            CoreError::LmsBackendError {
                status: 502,
                detail: "x".into()
            }
            .http_status(),
            500
        );
    }

    #[test]
    fn test_retryability() {
        assert!(
            CoreError::OperationalFailure {
                details: "timeout".into()
            }
            .is_retryable()
        );
        assert!(CoreError::LdapTimeout.is_retryable());
        assert!(
            CoreError::LmsBackendError {
                status: 503,
                detail: "x".into()
            }
            .is_retryable()
        );
        assert!(
            !CoreError::LmsBackendError {
                status: 403,
                detail: "x".into()
            }
            .is_retryable()
        );
        assert!(
            !CoreError::FileUploadFailed {
                detail: "x".into()
            }
            .is_retryable()
        );
        assert!(!CoreError::PreconditionFailed(Precondition::AssignmentUpcoming).is_retryable());
    }

    #[test]
    fn test_precondition_display() {
        assert_eq!(
            CoreError::PreconditionFailed(Precondition::MaxAttemptsReached).to_string(),
            "precondition failed: maximum submission attempts reached"
        );
    }
}
