// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain store interfaces and backends for gradeflow-core.
//!
//! This module defines the record types, the `Store` abstraction, and the
//! backend implementations. All multi-row state changes commit whole or
//! roll back whole; invariants (unique onyen/email/PID, single course,
//! window ordering, foreign keys) are enforced at commit time by both
//! backends.

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryStore;
pub use self::postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::roles::RoleName;

/// The course record. At most one exists process-wide.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Course {
    /// Local course id (equals the LMS course id).
    pub id: i64,
    /// Course display name.
    pub name: String,
    /// Course start instant, if the LMS publishes one.
    pub start_at: Option<DateTime<Utc>>,
    /// Course end instant, if the LMS publishes one.
    pub end_at: Option<DateTime<Utc>>,
    /// Remote URL of the shared master repository.
    pub master_remote_url: String,
}

/// User discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserKind {
    /// Enrolled student with a fork and a schedule.
    Student,
    /// Course staff with write access to the master repository.
    Instructor,
    /// Bootstrap entity that bypasses role checks.
    Admin,
}

impl UserKind {
    /// Returns the string representation of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Instructor => "instructor",
            Self::Admin => "admin",
        }
    }

    /// Parse a kind from its string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "student" => Some(Self::Student),
            "instructor" => Some(Self::Instructor),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Student-specific attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentProfile {
    /// Student-wide extra time applied to every deadline, in seconds.
    pub base_extra_time_secs: i64,
    /// When the student joined the course.
    pub joined_at: DateTime<Utc>,
    /// When the student withdrew. Presence means withdrawn.
    pub exited_at: Option<DateTime<Utc>>,
    /// Remote URL of the student's fork, once provisioned.
    pub fork_remote_url: Option<String>,
    /// Whether the student has cloned their fork at least once.
    pub fork_cloned: bool,
}

/// Kind-specific attribute bundle.
///
/// Refinement to a specific kind is checked explicitly at call sites;
/// there is no inheritance tree.
#[derive(Debug, Clone, PartialEq)]
pub enum UserDetail {
    /// Student attributes.
    Student(StudentProfile),
    /// Instructors carry no extra state.
    Instructor,
    /// The fixed bootstrap admin.
    Admin,
}

impl UserDetail {
    /// The discriminator for this bundle.
    pub fn kind(&self) -> UserKind {
        match self {
            Self::Student(_) => UserKind::Student,
            Self::Instructor => UserKind::Instructor,
            Self::Admin => UserKind::Admin,
        }
    }
}

/// A user record, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    /// Local numeric id.
    pub id: i64,
    /// Unique, case-sensitive login handle.
    pub onyen: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Unique email address.
    pub email: String,
    /// Named permission set.
    pub role: RoleName,
    /// Kind-specific attributes.
    pub detail: UserDetail,
}

impl User {
    /// The discriminator for this user.
    pub fn kind(&self) -> UserKind {
        self.detail.kind()
    }

    /// Refine to the student profile, if this user is a student.
    pub fn student_profile(&self) -> Option<&StudentProfile> {
        match &self.detail {
            UserDetail::Student(profile) => Some(profile),
            _ => None,
        }
    }
}

/// Fields for creating a user. The id is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Unique, case-sensitive login handle.
    pub onyen: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Unique email address.
    pub email: String,
    /// Named permission set.
    pub role: RoleName,
    /// Kind-specific attributes.
    pub detail: UserDetail,
}

/// Partial update for a user.
///
/// `None` means "not provided"; for nullable fields the inner Option
/// carries "provided null".
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    /// New first name.
    pub first_name: Option<String>,
    /// New last name.
    pub last_name: Option<String>,
    /// New email address.
    pub email: Option<String>,
    /// New student-wide extra time, in seconds (students only).
    pub base_extra_time_secs: Option<i64>,
    /// New exit instant (students only).
    pub exited_at: Option<Option<DateTime<Utc>>>,
    /// New fork remote URL (students only).
    pub fork_remote_url: Option<Option<String>>,
    /// New fork-cloned flag (students only).
    pub fork_cloned: Option<bool>,
}

/// 1:1 bridge between a local onyen and the LMS-side PID.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OnyenPid {
    /// Local login handle; unique.
    pub onyen: String,
    /// LMS-side stable user id; unique.
    pub pid: String,
}

/// An assignment record. The id equals the LMS assignment id.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Assignment {
    /// Assignment id (equals the LMS assignment id).
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Directory path relative to the master repository root.
    pub directory_path: String,
    /// Master notebook path, relative to `directory_path`.
    pub master_notebook_path: String,
    /// Base available instant.
    pub available_at: Option<DateTime<Utc>>,
    /// Base due instant.
    pub due_at: Option<DateTime<Utc>>,
    /// Whether students can see the assignment.
    pub published: bool,
    /// Maximum submission attempts; `None` means unlimited.
    pub max_attempts: Option<i32>,
    /// Whether grades are entered manually instead of autograded.
    pub manual_grading: bool,
    /// Whether per-question grader feedback is posted to the LMS.
    pub grader_question_feedback: bool,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last modified.
    pub last_modified_at: DateTime<Utc>,
}

/// Fields for creating an assignment.
#[derive(Debug, Clone)]
pub struct NewAssignment {
    /// Assignment id (equals the LMS assignment id).
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Directory path relative to the master repository root.
    pub directory_path: String,
    /// Master notebook path, relative to `directory_path`.
    pub master_notebook_path: String,
    /// Base available instant.
    pub available_at: Option<DateTime<Utc>>,
    /// Base due instant.
    pub due_at: Option<DateTime<Utc>>,
    /// Whether students can see the assignment.
    pub published: bool,
    /// Maximum submission attempts; `None` means unlimited.
    pub max_attempts: Option<i32>,
}

/// Partial update for an assignment.
///
/// `None` means "not provided"; the inner Option carries "provided null"
/// for nullable fields.
#[derive(Debug, Clone, Default)]
pub struct AssignmentUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New directory path.
    pub directory_path: Option<String>,
    /// New master notebook path.
    pub master_notebook_path: Option<String>,
    /// New available instant.
    pub available_at: Option<Option<DateTime<Utc>>>,
    /// New due instant.
    pub due_at: Option<Option<DateTime<Utc>>>,
    /// New published flag.
    pub published: Option<bool>,
    /// New attempt limit.
    pub max_attempts: Option<Option<i32>>,
    /// New manual-grading flag.
    pub manual_grading: Option<bool>,
    /// New grader-question-feedback flag.
    pub grader_question_feedback: Option<bool>,
}

impl AssignmentUpdate {
    /// True when no field is provided.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.directory_path.is_none()
            && self.master_notebook_path.is_none()
            && self.available_at.is_none()
            && self.due_at.is_none()
            && self.published.is_none()
            && self.max_attempts.is_none()
            && self.manual_grading.is_none()
            && self.grader_question_feedback.is_none()
    }
}

/// Extra-time grant for one (student, assignment) pair. Unique per pair.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ExtraTime {
    /// Database primary key.
    pub id: i64,
    /// Granted student.
    pub student_id: i64,
    /// Target assignment.
    pub assignment_id: i64,
    /// Delay before the assignment opens, in seconds. Non-negative.
    pub deferred_time_secs: i64,
    /// Deadline extension, in seconds. Non-negative.
    pub extra_time_secs: i64,
}

/// A student submission. Immutable once created except for `graded`.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Submission {
    /// Database primary key.
    pub id: i64,
    /// Submitting student.
    pub student_id: i64,
    /// Target assignment.
    pub assignment_id: i64,
    /// Git commit id of the submitted tree.
    pub commit_id: String,
    /// When the submission was made.
    pub submission_time: DateTime<Utc>,
    /// Set only after a successful LMS grade writeback.
    pub graded: bool,
}

/// Append-only grade report snapshot for an assignment at an instant.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GradeReport {
    /// Database primary key.
    pub id: i64,
    /// Graded assignment.
    pub assignment_id: i64,
    /// Mean of the score vector.
    pub average: f64,
    /// Median of the score vector.
    pub median: f64,
    /// Minimum score.
    pub minimum: f64,
    /// Maximum score.
    pub maximum: f64,
    /// Standard deviation of the score vector.
    pub stdev: f64,
    /// Total points available.
    pub total_points: f64,
    /// Per-student scores as a JSON array, in submission order.
    pub scores: serde_json::Value,
    /// Number of students with an active submission.
    pub num_submitted: i32,
    /// Number of students with a passing score.
    pub num_passing: i32,
    /// Master notebook content used for this run.
    pub master_notebook_content: String,
    /// Grader configuration used for this run.
    pub otter_config_content: String,
    /// When the report was created.
    pub created_at: DateTime<Utc>,
}

/// Fields for creating a grade report.
#[derive(Debug, Clone)]
pub struct NewGradeReport {
    /// Graded assignment.
    pub assignment_id: i64,
    /// Mean of the score vector.
    pub average: f64,
    /// Median of the score vector.
    pub median: f64,
    /// Minimum score.
    pub minimum: f64,
    /// Maximum score.
    pub maximum: f64,
    /// Standard deviation of the score vector.
    pub stdev: f64,
    /// Total points available.
    pub total_points: f64,
    /// Per-student scores as a JSON array.
    pub scores: serde_json::Value,
    /// Number of students with an active submission.
    pub num_submitted: i32,
    /// Number of students with a passing score.
    pub num_passing: i32,
    /// Master notebook content used for this run.
    pub master_notebook_content: String,
    /// Grader configuration used for this run.
    pub otter_config_content: String,
}

/// Auto-issued credential secret for a provisioned user.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AutoPassword {
    /// Owning onyen; unique.
    pub onyen: String,
    /// The generated secret.
    pub password: String,
    /// When the secret was issued.
    pub created_at: DateTime<Utc>,
}

/// Transactional persistence and query boundary for the domain model.
///
/// Two backends exist: [`PostgresStore`] for production and
/// [`MemoryStore`] for tests and embedded use. Both enforce the same
/// commit-time invariants.
#[async_trait]
pub trait Store: Send + Sync {
    // ------------------------------------------------------------------
    // Course
    // ------------------------------------------------------------------

    /// Get the course, if bootstrap has run.
    ///
    /// Fails with `OperationalFailure` if more than one course row exists;
    /// that is a consistency fault, not a query result.
    async fn get_course(&self) -> Result<Option<Course>>;

    /// Create the course during initial setup.
    async fn create_course(&self, course: Course) -> Result<()>;

    /// Update the course's name and schedule.
    async fn update_course(
        &self,
        name: &str,
        start_at: Option<DateTime<Utc>>,
        end_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    // ------------------------------------------------------------------
    // Users and the onyen<->PID bridge
    // ------------------------------------------------------------------

    /// Get a user by local id.
    async fn get_user(&self, id: i64) -> Result<Option<User>>;

    /// Get a user by onyen.
    async fn get_user_by_onyen(&self, onyen: &str) -> Result<Option<User>>;

    /// List all users of one kind.
    async fn list_users(&self, kind: UserKind) -> Result<Vec<User>>;

    /// Create a user, enforcing onyen and email uniqueness.
    async fn create_user(&self, user: NewUser) -> Result<User>;

    /// Apply a partial update to a user.
    async fn update_user(&self, id: i64, update: UserUpdate) -> Result<User>;

    /// Delete a user and dependent rows (extra time, submissions, secret).
    async fn delete_user(&self, id: i64) -> Result<()>;

    /// Associate an onyen with an LMS PID. Both sides unique.
    async fn associate_pid(&self, onyen: &str, pid: &str) -> Result<()>;

    /// Remove the mapping for an onyen.
    ///
    /// Returns false when no mapping existed; callers treat that as a no-op.
    async fn unassociate_pid(&self, onyen: &str) -> Result<bool>;

    /// Resolve an LMS PID to the mapped onyen.
    async fn get_onyen_by_pid(&self, pid: &str) -> Result<Option<String>>;

    /// Resolve an onyen to the mapped LMS PID.
    async fn get_pid_by_onyen(&self, onyen: &str) -> Result<Option<String>>;

    // ------------------------------------------------------------------
    // Assignments and extra time
    // ------------------------------------------------------------------

    /// Get an assignment by id.
    async fn get_assignment(&self, id: i64) -> Result<Option<Assignment>>;

    /// List all assignments, ordered by id.
    async fn list_assignments(&self) -> Result<Vec<Assignment>>;

    /// Create an assignment, enforcing `available_at < due_at`.
    async fn create_assignment(&self, assignment: NewAssignment) -> Result<Assignment>;

    /// Apply a partial update, enforcing `available_at < due_at` on the
    /// resulting row and bumping `last_modified_at`.
    async fn update_assignment(&self, id: i64, update: AssignmentUpdate) -> Result<Assignment>;

    /// Delete an assignment together with its extra-time grants and
    /// submissions, as one transaction.
    async fn delete_assignment(&self, id: i64) -> Result<()>;

    /// Get the extra-time grant for a (student, assignment) pair.
    async fn get_extra_time(
        &self,
        student_id: i64,
        assignment_id: i64,
    ) -> Result<Option<ExtraTime>>;

    /// List all grants for one assignment.
    async fn list_extra_time_for_assignment(&self, assignment_id: i64) -> Result<Vec<ExtraTime>>;

    /// Create or replace the grant for a (student, assignment) pair.
    async fn upsert_extra_time(
        &self,
        student_id: i64,
        assignment_id: i64,
        deferred_time_secs: i64,
        extra_time_secs: i64,
    ) -> Result<ExtraTime>;

    // ------------------------------------------------------------------
    // Submissions
    // ------------------------------------------------------------------

    /// Persist a submission, enforcing that the student and assignment exist.
    async fn create_submission(
        &self,
        student_id: i64,
        assignment_id: i64,
        commit_id: &str,
        submission_time: DateTime<Utc>,
    ) -> Result<Submission>;

    /// Get a submission by id.
    async fn get_submission(&self, id: i64) -> Result<Option<Submission>>;

    /// Delete a submission row (compensation path only).
    async fn delete_submission(&self, id: i64) -> Result<()>;

    /// Number of submissions by one student for one assignment.
    async fn count_submissions(&self, student_id: i64, assignment_id: i64) -> Result<i64>;

    /// The student's most recent submission with `submission_time <= at`.
    ///
    /// Ties on `submission_time` resolve to the highest id (insertion
    /// order). Returns `None` when the student has not submitted by `at`.
    async fn get_active_submission(
        &self,
        student_id: i64,
        assignment_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<Submission>>;

    /// Active submission per student for one assignment at `at`.
    async fn list_active_submissions(
        &self,
        assignment_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Vec<Submission>>;

    /// Mark a batch of submissions as graded, as one transaction.
    async fn set_submissions_graded(&self, submission_ids: &[i64]) -> Result<()>;

    // ------------------------------------------------------------------
    // Grade reports and credentials
    // ------------------------------------------------------------------

    /// Append a grade report; returns the persisted row.
    async fn create_grade_report(&self, report: NewGradeReport) -> Result<GradeReport>;

    /// Delete a grade report (compensation path only).
    async fn delete_grade_report(&self, id: i64) -> Result<()>;

    /// Most recent grade report for an assignment.
    async fn get_latest_grade_report(&self, assignment_id: i64) -> Result<Option<GradeReport>>;

    /// Store an auto-issued credential secret for an onyen.
    async fn create_auto_password(&self, onyen: &str, password: &str) -> Result<()>;

    /// Remove the auto-issued secret for an onyen, if any.
    async fn delete_auto_password(&self, onyen: &str) -> Result<()>;

    /// Fetch the auto-issued secret for an onyen.
    async fn get_auto_password(&self, onyen: &str) -> Result<Option<AutoPassword>>;

    // ------------------------------------------------------------------
    // Coordination
    // ------------------------------------------------------------------

    /// Try to take the named fleet-wide lock without waiting.
    ///
    /// Returns false when another holder is active; callers drop the work
    /// rather than queue it.
    async fn try_acquire_named_lock(&self, name: &str) -> Result<bool>;

    /// Release the named lock taken by this session.
    async fn release_named_lock(&self, name: &str) -> Result<()>;
}
