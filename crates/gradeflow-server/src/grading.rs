// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Grading orchestration.
//!
//! Autograde runs the grader over every active submission and assembles an
//! aggregate report; manual grading accepts instructor-entered scores.
//! Both modes share the persistence + upsync phase: the report is persisted
//! under a per-assignment lock, grades are posted to the LMS, and the
//! `graded` flags are committed as one batch at the end. Any upsync failure
//! deletes the report and re-raises with no flags committed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, instrument, warn};

use gradeflow_core::error::{CoreError, Precondition, Result};
use gradeflow_core::events::{DomainEvent, EntityKind, EventEmitter, Operation};
use gradeflow_core::store::{Assignment, NewGradeReport, Store, Submission};
use gradeflow_lms::types::{DuplicatePolicy, EnrollmentKind, GradePost};

use crate::adapters::{GitHostApi, LmsApi};
use crate::grader::Grader;
use crate::submission::submissions_folder;

/// Fraction of total points that counts as passing.
const PASSING_FRACTION: f64 = 0.5;

/// A manually entered grade for one submission.
#[derive(Debug, Clone)]
pub struct ManualGradeEntry {
    /// Graded submission.
    pub submission_id: i64,
    /// Points earned.
    pub score: f64,
    /// Points available.
    pub total_points: f64,
    /// Optional instructor comment posted with the grade.
    pub comment: Option<String>,
}

/// One grade headed for the LMS.
struct PendingUpsync {
    submission: Submission,
    onyen: String,
    grade_percent: f64,
    rendered_notebook: Option<Vec<u8>>,
    comment: Option<String>,
}

/// Orchestrates autograde and manual grading runs.
pub struct GradingService {
    store: Arc<dyn Store>,
    lms: Arc<dyn LmsApi>,
    git: Arc<dyn GitHostApi>,
    grader: Arc<dyn Grader>,
    events: EventEmitter,
    /// Git host organization and master repository name, used to derive
    /// per-student fork coordinates.
    master_repo: String,
}

impl GradingService {
    /// Create the service.
    pub fn new(
        store: Arc<dyn Store>,
        lms: Arc<dyn LmsApi>,
        git: Arc<dyn GitHostApi>,
        grader: Arc<dyn Grader>,
        events: EventEmitter,
        master_repo: String,
    ) -> Self {
        Self {
            store,
            lms,
            git,
            grader,
            events,
            master_repo,
        }
    }

    /// Name of the per-student fork of the master repository.
    fn fork_name(&self, onyen: &str) -> String {
        format!("{}-{}", self.master_repo, onyen)
    }

    fn grading_lock(assignment_id: i64) -> String {
        format!("grading:{assignment_id}")
    }

    /// Autograde every active submission for an assignment.
    ///
    /// Returns the assembled report. Unless `dry_run`, the report is also
    /// persisted and grades are posted to the LMS.
    #[instrument(skip(self, master_notebook, requirements))]
    pub async fn autograde(
        &self,
        assignment_id: i64,
        master_notebook: &str,
        requirements: &str,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> Result<NewGradeReport> {
        let assignment = self.require_assignment(assignment_id).await?;
        if assignment.manual_grading {
            return Err(CoreError::PreconditionFailed(
                Precondition::AutogradingDisabled,
            ));
        }

        let lock = Self::grading_lock(assignment_id);
        if !self.store.try_acquire_named_lock(&lock).await? {
            return Err(CoreError::OperationalFailure {
                details: format!("grading already in progress for assignment {assignment_id}"),
            });
        }
        let result = self
            .autograde_locked(&assignment, master_notebook, requirements, dry_run, now)
            .await;
        if let Err(err) = self.store.release_named_lock(&lock).await {
            warn!(assignment_id, error = %err, "Failed to release grading lock");
        }
        result
    }

    async fn autograde_locked(
        &self,
        assignment: &Assignment,
        master_notebook: &str,
        requirements: &str,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> Result<NewGradeReport> {
        let config = self.grader.generate_config(master_notebook).await?;
        let active = self
            .store
            .list_active_submissions(assignment.id, now)
            .await?;
        info!(
            assignment_id = assignment.id,
            submissions = active.len(),
            "Autograde run starting"
        );

        let mut pending: Vec<PendingUpsync> = Vec::new();
        let mut scores: Vec<(i64, f64, f64)> = Vec::new();
        for submission in &active {
            let Some(student) = self.store.get_user(submission.student_id).await? else {
                warn!(
                    submission_id = submission.id,
                    student_id = submission.student_id,
                    "Submitting student no longer exists, skipping"
                );
                continue;
            };
            let archive = match self
                .git
                .download_archive(
                    &student.onyen,
                    &self.fork_name(&student.onyen),
                    &submission.commit_id,
                    Some(&assignment.directory_path),
                )
                .await
            {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(
                        submission_id = submission.id,
                        onyen = %student.onyen,
                        error = %err,
                        "Failed to download submission tree, skipping"
                    );
                    continue;
                }
            };
            match self.grader.grade(&archive, &config, requirements).await {
                Ok(outcome) => {
                    let comment = assignment
                        .grader_question_feedback
                        .then(|| outcome.feedback_text());
                    scores.push((submission.student_id, outcome.score, outcome.total_points));
                    pending.push(PendingUpsync {
                        submission: submission.clone(),
                        onyen: student.onyen,
                        grade_percent: percent(outcome.score, outcome.total_points),
                        rendered_notebook: outcome.rendered_notebook,
                        comment,
                    });
                }
                Err(err) => {
                    warn!(
                        submission_id = submission.id,
                        onyen = %student.onyen,
                        error = %err,
                        "Grader failed for submission, excluding from report"
                    );
                }
            }
        }

        let report = assemble_report(
            assignment.id,
            &scores,
            active.len() as i32,
            master_notebook.to_string(),
            config,
        );
        if dry_run {
            return Ok(report);
        }

        // Autograde never re-posts a grade that already reached the LMS.
        self.persist_and_upsync(assignment, report, pending, true)
            .await
    }

    /// Record instructor-entered grades for an assignment.
    ///
    /// Unlike autograde, a `graded` submission is still upsynced: the
    /// instructor is overwriting a previously posted grade.
    #[instrument(skip(self, entries), fields(count = entries.len()))]
    pub async fn manual_grade(
        &self,
        assignment_id: i64,
        entries: &[ManualGradeEntry],
        dry_run: bool,
    ) -> Result<NewGradeReport> {
        let assignment = self.require_assignment(assignment_id).await?;

        let mut seen_students: HashSet<i64> = HashSet::new();
        let mut pending: Vec<PendingUpsync> = Vec::new();
        let mut scores: Vec<(i64, f64, f64)> = Vec::new();
        for entry in entries {
            let submission = self
                .store
                .get_submission(entry.submission_id)
                .await?
                .ok_or_else(|| {
                    CoreError::not_found(format!("submission {}", entry.submission_id))
                })?;
            if submission.assignment_id != assignment_id {
                return Err(CoreError::PreconditionFailed(
                    Precondition::SubmissionMismatch,
                ));
            }
            if !seen_students.insert(submission.student_id) {
                return Err(CoreError::PreconditionFailed(
                    Precondition::StudentGradedMultipleTimes,
                ));
            }
            let student = self
                .store
                .get_user(submission.student_id)
                .await?
                .ok_or_else(|| {
                    CoreError::not_found(format!("student {}", submission.student_id))
                })?;
            scores.push((submission.student_id, entry.score, entry.total_points));
            pending.push(PendingUpsync {
                submission,
                onyen: student.onyen,
                grade_percent: percent(entry.score, entry.total_points),
                rendered_notebook: None,
                comment: entry.comment.clone(),
            });
        }

        // Manual runs carry no grader inputs.
        let report = assemble_report(
            assignment_id,
            &scores,
            entries.len() as i32,
            String::new(),
            String::new(),
        );
        if dry_run {
            return Ok(report);
        }

        let lock = Self::grading_lock(assignment_id);
        if !self.store.try_acquire_named_lock(&lock).await? {
            return Err(CoreError::OperationalFailure {
                details: format!("grading already in progress for assignment {assignment_id}"),
            });
        }
        let result = self
            .persist_and_upsync(&assignment, report, pending, false)
            .await;
        if let Err(err) = self.store.release_named_lock(&lock).await {
            warn!(assignment_id, error = %err, "Failed to release grading lock");
        }
        result
    }

    /// Persist the report, post grades, commit `graded` flags as a batch.
    ///
    /// On any upsync failure the report is deleted and the error re-raised;
    /// no `graded` flag is committed for this run.
    async fn persist_and_upsync(
        &self,
        assignment: &Assignment,
        report: NewGradeReport,
        pending: Vec<PendingUpsync>,
        skip_graded: bool,
    ) -> Result<NewGradeReport> {
        let persisted = self.store.create_grade_report(report.clone()).await?;

        let mut graded_ids: Vec<i64> = Vec::new();
        match self
            .upsync_all(assignment, &pending, skip_graded, &mut graded_ids)
            .await
        {
            Ok(()) => {}
            Err(err) => {
                warn!(
                    assignment_id = assignment.id,
                    report_id = persisted.id,
                    error = %err,
                    "Upsync failed, deleting grade report"
                );
                if let Err(cleanup) = self.store.delete_grade_report(persisted.id).await {
                    warn!(
                        report_id = persisted.id,
                        error = %cleanup,
                        "Failed to delete grade report during compensation"
                    );
                }
                return Err(err);
            }
        }

        self.store.set_submissions_graded(&graded_ids).await?;
        info!(
            assignment_id = assignment.id,
            report_id = persisted.id,
            graded = graded_ids.len(),
            "Grading run committed"
        );
        self.events.emit(DomainEvent::new(
            EntityKind::GradeReport,
            Operation::Created,
            persisted.id,
        ));
        Ok(report)
    }

    async fn upsync_all(
        &self,
        assignment: &Assignment,
        pending: &[PendingUpsync],
        skip_graded: bool,
        graded_ids: &mut Vec<i64>,
    ) -> Result<()> {
        let lms_ids = self.lms_ids_by_pid().await?;
        for item in pending {
            if skip_graded && item.submission.graded {
                continue;
            }
            let Some(pid) = self.store.get_pid_by_onyen(&item.onyen).await? else {
                warn!(onyen = %item.onyen, "No PID mapping for student, skipping upsync");
                continue;
            };
            let Some(lms_user_id) = lms_ids.get(&pid).copied() else {
                warn!(onyen = %item.onyen, "Student absent from LMS roster, skipping upsync");
                continue;
            };

            let mut file_ids = Vec::new();
            if let Some(notebook) = &item.rendered_notebook {
                let file = self
                    .lms
                    .upload_course_file(
                        &submissions_folder(assignment.id),
                        &format!("{}-graded.pdf", item.onyen),
                        notebook.clone(),
                        DuplicatePolicy::Overwrite,
                    )
                    .await?;
                file_ids.push(file.id);
            }

            self.lms
                .post_grade(
                    assignment.id,
                    &GradePost {
                        user_id: lms_user_id,
                        grade_percent: item.grade_percent,
                        file_ids,
                        comment: item.comment.clone(),
                    },
                )
                .await?;
            graded_ids.push(item.submission.id);
        }
        Ok(())
    }

    async fn lms_ids_by_pid(&self) -> Result<HashMap<String, i64>> {
        let users = self.lms.list_users(EnrollmentKind::Student).await?;
        Ok(users
            .into_iter()
            .filter_map(|u| u.sis_user_id.map(|pid| (pid, u.id)))
            .collect())
    }

    async fn require_assignment(&self, assignment_id: i64) -> Result<Assignment> {
        self.store
            .get_assignment(assignment_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("assignment {assignment_id}")))
    }
}

fn percent(score: f64, total_points: f64) -> f64 {
    if total_points <= 0.0 {
        return 0.0;
    }
    (score / total_points * 10_000.0).round() / 100.0
}

/// Assemble the aggregate report from per-student scores.
fn assemble_report(
    assignment_id: i64,
    scores: &[(i64, f64, f64)],
    num_submitted: i32,
    master_notebook_content: String,
    otter_config_content: String,
) -> NewGradeReport {
    let values: Vec<f64> = scores.iter().map(|(_, score, _)| *score).collect();
    let total_points = scores
        .iter()
        .map(|(_, _, total)| *total)
        .fold(0.0_f64, f64::max);
    let num_passing = values
        .iter()
        .filter(|score| total_points > 0.0 && **score >= total_points * PASSING_FRACTION)
        .count() as i32;

    NewGradeReport {
        assignment_id,
        average: mean(&values),
        median: median(&values),
        minimum: values.iter().copied().fold(f64::INFINITY, f64::min).min_not_nan(),
        maximum: values.iter().copied().fold(f64::NEG_INFINITY, f64::max).max_not_nan(),
        stdev: stdev(&values),
        total_points,
        scores: json!(
            scores
                .iter()
                .map(|(student_id, score, _)| json!({ "student_id": student_id, "score": score }))
                .collect::<Vec<_>>()
        ),
        num_submitted,
        num_passing,
        master_notebook_content,
        otter_config_content,
    }
}

trait FiniteOrZero {
    fn min_not_nan(self) -> f64;
    fn max_not_nan(self) -> f64;
}

impl FiniteOrZero for f64 {
    fn min_not_nan(self) -> f64 {
        if self.is_finite() { self } else { 0.0 }
    }
    fn max_not_nan(self) -> f64 {
        if self.is_finite() { self } else { 0.0 }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Population standard deviation.
fn stdev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let avg = mean(values);
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_rounds_to_two_decimals() {
        assert_eq!(percent(1.0, 3.0), 33.33);
        assert_eq!(percent(10.0, 10.0), 100.0);
        assert_eq!(percent(5.0, 0.0), 0.0);
    }

    #[test]
    fn test_aggregates_over_even_and_odd_sets() {
        let scores = vec![(1, 4.0, 10.0), (2, 6.0, 10.0), (3, 10.0, 10.0)];
        let report = assemble_report(7, &scores, 3, String::new(), String::new());
        assert_eq!(report.average, 20.0 / 3.0);
        assert_eq!(report.median, 6.0);
        assert_eq!(report.minimum, 4.0);
        assert_eq!(report.maximum, 10.0);
        assert_eq!(report.total_points, 10.0);
        // 6.0 and 10.0 clear half of the available points; 4.0 does not.
        assert_eq!(report.num_passing, 2);

        let even = vec![(1, 2.0, 10.0), (2, 8.0, 10.0)];
        let report = assemble_report(7, &even, 2, String::new(), String::new());
        assert_eq!(report.median, 5.0);
    }

    #[test]
    fn test_empty_score_set_produces_zeroed_report() {
        let report = assemble_report(7, &[], 0, String::new(), String::new());
        assert_eq!(report.average, 0.0);
        assert_eq!(report.median, 0.0);
        assert_eq!(report.minimum, 0.0);
        assert_eq!(report.maximum, 0.0);
        assert_eq!(report.stdev, 0.0);
        assert_eq!(report.num_passing, 0);
    }

    #[test]
    fn test_stdev_of_constant_vector_is_zero() {
        assert_eq!(stdev(&[5.0, 5.0, 5.0]), 0.0);
    }
}
