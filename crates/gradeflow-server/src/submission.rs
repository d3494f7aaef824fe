// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Submission admission and persistence.
//!
//! `create_submission` is the single entry point for student submissions:
//! it runs the admission check against the student's adjusted schedule,
//! persists the row stamped with the commit's own time, then uploads the
//! rendered notebook to the LMS course files area. A failed upload deletes
//! the row so the attempt is not consumed.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument, warn};

use gradeflow_core::error::{CoreError, Precondition, Result};
use gradeflow_core::events::{DomainEvent, EntityKind, EventEmitter, Operation};
use gradeflow_core::schedule::{AssignmentStatus, StudentSchedule, status_for_student};
use gradeflow_core::store::{Store, Submission, User};
use gradeflow_lms::types::DuplicatePolicy;

use crate::adapters::{GitHostApi, LmsApi};

/// Fixed private folder in the LMS course files area owned by this product.
pub const PRIVATE_COURSE_FOLDER: &str = "gradeflow";

/// Folder path for one assignment's uploaded submissions.
pub fn submissions_folder(assignment_id: i64) -> String {
    format!("{PRIVATE_COURSE_FOLDER}/Student Submissions/{assignment_id}")
}

/// Admission-controlled submission intake.
pub struct SubmissionService {
    store: Arc<dyn Store>,
    lms: Arc<dyn LmsApi>,
    git: Arc<dyn GitHostApi>,
    events: EventEmitter,
    master_repo: String,
}

impl SubmissionService {
    /// Create the service. `master_repo` names the master repository the
    /// per-student forks were cut from.
    pub fn new(
        store: Arc<dyn Store>,
        lms: Arc<dyn LmsApi>,
        git: Arc<dyn GitHostApi>,
        events: EventEmitter,
        master_repo: impl Into<String>,
    ) -> Self {
        Self {
            store,
            lms,
            git,
            events,
            master_repo: master_repo.into(),
        }
    }

    /// Admit and persist a submission, then upload the rendered notebook.
    ///
    /// Admission requires the assignment to be OPEN for this student and,
    /// when `max_attempts` is set, the attempt count to be below the limit.
    #[instrument(skip(self, notebook_pdf), fields(pdf_bytes = notebook_pdf.len()))]
    pub async fn create_submission(
        &self,
        student_id: i64,
        assignment_id: i64,
        commit_id: &str,
        notebook_pdf: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Result<Submission> {
        let course = self
            .store
            .get_course()
            .await?
            .ok_or_else(|| CoreError::not_found("course"))?;
        let assignment = self
            .store
            .get_assignment(assignment_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("assignment {assignment_id}")))?;
        let student = self.require_student(student_id).await?;
        let profile = student
            .student_profile()
            .ok_or_else(|| CoreError::not_found(format!("student {student_id}")))?;

        let extra = self.store.get_extra_time(student_id, assignment_id).await?;
        let schedule = StudentSchedule::new(
            Duration::seconds(profile.base_extra_time_secs),
            extra.as_ref(),
        );
        match status_for_student(&assignment, &course, &schedule, now) {
            AssignmentStatus::Open => {}
            AssignmentStatus::Unpublished => {
                return Err(CoreError::PreconditionFailed(
                    Precondition::AssignmentUnpublished,
                ));
            }
            AssignmentStatus::Upcoming => {
                return Err(CoreError::PreconditionFailed(
                    Precondition::AssignmentUpcoming,
                ));
            }
            AssignmentStatus::Closed => {
                return Err(CoreError::PreconditionFailed(
                    Precondition::AssignmentClosed,
                ));
            }
        }

        if let Some(max_attempts) = assignment.max_attempts {
            let attempts = self
                .store
                .count_submissions(student_id, assignment_id)
                .await?;
            if attempts >= i64::from(max_attempts) {
                return Err(CoreError::PreconditionFailed(
                    Precondition::MaxAttemptsReached,
                ));
            }
        }

        // The row carries the commit's own time, not the admission instant.
        let submitted_at = self
            .resolve_commit_time(&student.onyen, commit_id)
            .await
            .unwrap_or(now);
        let submission = self
            .store
            .create_submission(student_id, assignment_id, commit_id, submitted_at)
            .await?;

        let file_name = format!("{}.pdf", student.onyen);
        if let Err(err) = self
            .lms
            .upload_course_file(
                &submissions_folder(assignment_id),
                &file_name,
                notebook_pdf,
                DuplicatePolicy::Overwrite,
            )
            .await
        {
            // The attempt must not count when the notebook never reached
            // the LMS; remove the row before re-raising.
            warn!(
                submission_id = submission.id,
                error = %err,
                "Notebook upload failed, deleting submission row"
            );
            if let Err(cleanup) = self.store.delete_submission(submission.id).await {
                warn!(
                    submission_id = submission.id,
                    error = %cleanup,
                    "Failed to delete submission after upload failure"
                );
            }
            return Err(err);
        }

        info!(
            submission_id = submission.id,
            student_id, assignment_id, "Submission created"
        );
        self.events.emit(DomainEvent::new(
            EntityKind::Submission,
            Operation::Created,
            submission.id,
        ));
        Ok(submission)
    }

    /// The student's most recent submission with `submission_time <= at`.
    pub async fn get_active_submission(
        &self,
        student_id: i64,
        assignment_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Submission> {
        self.store
            .get_active_submission(student_id, assignment_id, at)
            .await?
            .ok_or_else(|| {
                CoreError::not_found(format!(
                    "active submission for student {student_id} on assignment {assignment_id}"
                ))
            })
    }

    /// Commit time as reported by the student's fork. `None` when the host
    /// cannot supply it; the caller falls back to the admission instant.
    async fn resolve_commit_time(
        &self,
        onyen: &str,
        commit_id: &str,
    ) -> Option<DateTime<Utc>> {
        let fork_name = format!("{}-{onyen}", self.master_repo);
        match self.git.get_commit(onyen, &fork_name, commit_id).await {
            Ok(commit) => commit.created,
            Err(err) => {
                warn!(
                    onyen,
                    commit_id,
                    error = %err,
                    "Could not resolve commit time, using admission time"
                );
                None
            }
        }
    }

    async fn require_student(&self, student_id: i64) -> Result<User> {
        self.store
            .get_user(student_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("student {student_id}")))
    }
}
