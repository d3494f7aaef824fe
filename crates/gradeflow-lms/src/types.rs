// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire types for the LMS adapter.
//!
//! These mirror the LMS payload shapes the core needs; fields the core
//! never reads are not modeled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An LMS course.
#[derive(Debug, Clone, Deserialize)]
pub struct LmsCourse {
    /// LMS course id.
    pub id: i64,
    /// Course display name.
    pub name: String,
    /// Course start instant.
    pub start_at: Option<DateTime<Utc>>,
    /// Course end instant.
    pub end_at: Option<DateTime<Utc>>,
}

/// An LMS assignment.
#[derive(Debug, Clone, Deserialize)]
pub struct LmsAssignment {
    /// LMS assignment id.
    pub id: i64,
    /// Assignment display name.
    pub name: String,
    /// When the assignment unlocks.
    pub unlock_at: Option<DateTime<Utc>>,
    /// When the assignment is due.
    pub due_at: Option<DateTime<Utc>>,
    /// Whether students can see the assignment.
    pub published: bool,
    /// Allowed attempts; -1 means unlimited.
    #[serde(default = "default_allowed_attempts")]
    pub allowed_attempts: i32,
    /// Whether the LMS permits unpublishing right now.
    #[serde(default)]
    pub unpublishable: bool,
}

fn default_allowed_attempts() -> i32 {
    -1
}

impl LmsAssignment {
    /// Attempt limit as the domain sees it: `None` means unlimited.
    pub fn max_attempts(&self) -> Option<i32> {
        if self.allowed_attempts < 0 {
            None
        } else {
            Some(self.allowed_attempts)
        }
    }
}

/// Enrollment kinds the adapter can filter users by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentKind {
    /// Enrolled students.
    Student,
    /// Teachers/instructors.
    Teacher,
}

impl EnrollmentKind {
    /// Query-parameter value for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Teacher => "teacher",
        }
    }
}

/// An enrolled LMS user.
#[derive(Debug, Clone, Deserialize)]
pub struct LmsUser {
    /// LMS user id.
    pub id: i64,
    /// Institution user id (the PID), possibly realm-decorated on the wire.
    pub sis_user_id: Option<String>,
    /// Email address; absent for pending enrollments.
    pub email: Option<String>,
    /// Full display name; absent for pending enrollments.
    pub name: Option<String>,
}

impl LmsUser {
    /// Whether the enrollment is still pending (no usable identity yet).
    pub fn is_pending(&self) -> bool {
        self.sis_user_id.is_none()
            || self.email.as_deref().unwrap_or("").is_empty()
            || self.name.as_deref().unwrap_or("").is_empty()
    }
}

/// An LMS-side submission record for one (assignment, user) pair.
#[derive(Debug, Clone, Deserialize)]
pub struct LmsSubmission {
    /// LMS submission id.
    pub id: i64,
    /// Target assignment.
    pub assignment_id: i64,
    /// Submitting user.
    pub user_id: i64,
    /// Posted score, if graded.
    pub score: Option<f64>,
    /// When the submission was made.
    pub submitted_at: Option<DateTime<Utc>>,
    /// Prior versions, when history was requested.
    #[serde(default)]
    pub submission_history: Vec<LmsSubmissionVersion>,
}

/// One prior version of an LMS submission.
#[derive(Debug, Clone, Deserialize)]
pub struct LmsSubmissionVersion {
    /// Attempt number.
    pub attempt: Option<i32>,
    /// Posted score for this version.
    pub score: Option<f64>,
    /// When this version was submitted.
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Duplicate handling for file uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Replace the existing file.
    Overwrite,
    /// Keep both, renaming the new one.
    Rename,
}

impl DuplicatePolicy {
    /// Form value for this policy.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overwrite => "overwrite",
            Self::Rename => "rename",
        }
    }
}

/// First-step response of the multi-step upload flow.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadTicket {
    /// Where to send the file bytes.
    pub upload_url: String,
    /// Opaque params to echo as form fields before the file part.
    #[serde(default)]
    pub upload_params: serde_json::Map<String, serde_json::Value>,
}

/// Confirmed uploaded file.
#[derive(Debug, Clone, Deserialize)]
pub struct LmsFile {
    /// LMS file id, attachable to grade comments.
    pub id: i64,
    /// Stored display name.
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Schedule/publishedness update pushed to the LMS.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LmsAssignmentUpdate {
    /// New unlock instant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlock_at: Option<Option<DateTime<Utc>>>,
    /// New due instant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<Option<DateTime<Utc>>>,
    /// New published flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
}

/// A grade posted back to the LMS for one student.
#[derive(Debug, Clone)]
pub struct GradePost {
    /// LMS user id of the student.
    pub user_id: i64,
    /// Grade as a percentage string source value, e.g. 95.5 posts "95.5%".
    pub grade_percent: f64,
    /// File ids to attach to the grade comment.
    pub file_ids: Vec<i64>,
    /// Optional comment text (per-question feedback).
    pub comment: Option<String>,
}
