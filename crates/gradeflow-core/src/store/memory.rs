// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory domain store.
//!
//! Backs tests and embedded deployments. Enforces the same commit-time
//! invariants as the Postgres backend: unique onyen/email/PID, at most one
//! course, one extra-time grant per (student, assignment), window ordering,
//! and referential integrity for submissions.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{CoreError, Precondition, Result};

use super::{
    Assignment, AssignmentUpdate, AutoPassword, Course, ExtraTime, GradeReport, NewAssignment,
    NewGradeReport, NewUser, Store, Submission, User, UserDetail, UserKind, UserUpdate,
};

#[derive(Default)]
struct State {
    course: Option<Course>,
    users: HashMap<i64, User>,
    next_user_id: i64,
    onyen_pid: HashMap<String, String>,
    assignments: HashMap<i64, Assignment>,
    extra_time: HashMap<(i64, i64), ExtraTime>,
    next_extra_time_id: i64,
    submissions: HashMap<i64, Submission>,
    next_submission_id: i64,
    grade_reports: HashMap<i64, GradeReport>,
    next_grade_report_id: i64,
    auto_passwords: HashMap<String, AutoPassword>,
    held_locks: HashSet<String>,
}

/// In-memory store implementation.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_window(
    available_at: Option<DateTime<Utc>>,
    due_at: Option<DateTime<Utc>>,
) -> Result<()> {
    if let (Some(available), Some(due)) = (available_at, due_at) {
        if available >= due {
            return Err(CoreError::PreconditionFailed(Precondition::DueBeforeOpen));
        }
    }
    Ok(())
}

/// Latest-first ordering used by active-submission selection: most recent
/// `submission_time` wins, ties resolve to the highest id.
fn more_active(a: &Submission, b: &Submission) -> bool {
    (a.submission_time, a.id) > (b.submission_time, b.id)
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_course(&self) -> Result<Option<Course>> {
        Ok(self.state.read().await.course.clone())
    }

    async fn create_course(&self, course: Course) -> Result<()> {
        let mut state = self.state.write().await;
        if state.course.is_some() {
            return Err(CoreError::already_exists("course"));
        }
        state.course = Some(course);
        Ok(())
    }

    async fn update_course(
        &self,
        name: &str,
        start_at: Option<DateTime<Utc>>,
        end_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let course = state
            .course
            .as_mut()
            .ok_or_else(|| CoreError::not_found("course"))?;
        course.name = name.to_string();
        course.start_at = start_at;
        course.end_at = end_at;
        Ok(())
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn get_user_by_onyen(&self, onyen: &str) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.onyen == onyen).cloned())
    }

    async fn list_users(&self, kind: UserKind) -> Result<Vec<User>> {
        let state = self.state.read().await;
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|u| u.kind() == kind)
            .cloned()
            .collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn create_user(&self, user: NewUser) -> Result<User> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.onyen == user.onyen) {
            return Err(CoreError::IntegrityViolation {
                constraint: "users_onyen_key".to_string(),
            });
        }
        if state.users.values().any(|u| u.email == user.email) {
            return Err(CoreError::IntegrityViolation {
                constraint: "users_email_key".to_string(),
            });
        }
        state.next_user_id += 1;
        let created = User {
            id: state.next_user_id,
            onyen: user.onyen,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            role: user.role,
            detail: user.detail,
        };
        state.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_user(&self, id: i64, update: UserUpdate) -> Result<User> {
        let mut state = self.state.write().await;
        if let Some(email) = &update.email {
            if state.users.values().any(|u| u.id != id && &u.email == email) {
                return Err(CoreError::IntegrityViolation {
                    constraint: "users_email_key".to_string(),
                });
            }
        }
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found(format!("user {}", id)))?;
        if let Some(first_name) = update.first_name {
            user.first_name = first_name;
        }
        if let Some(last_name) = update.last_name {
            user.last_name = last_name;
        }
        if let Some(email) = update.email {
            user.email = email;
        }
        if let UserDetail::Student(profile) = &mut user.detail {
            if let Some(base) = update.base_extra_time_secs {
                profile.base_extra_time_secs = base;
            }
            if let Some(exited_at) = update.exited_at {
                profile.exited_at = exited_at;
            }
            if let Some(fork_url) = update.fork_remote_url {
                profile.fork_remote_url = fork_url;
            }
            if let Some(fork_cloned) = update.fork_cloned {
                profile.fork_cloned = fork_cloned;
            }
        }
        Ok(user.clone())
    }

    async fn delete_user(&self, id: i64) -> Result<()> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .remove(&id)
            .ok_or_else(|| CoreError::not_found(format!("user {}", id)))?;
        state.extra_time.retain(|_, grant| grant.student_id != id);
        state.submissions.retain(|_, s| s.student_id != id);
        state.auto_passwords.remove(&user.onyen);
        Ok(())
    }

    async fn associate_pid(&self, onyen: &str, pid: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if state.onyen_pid.contains_key(onyen) {
            return Err(CoreError::IntegrityViolation {
                constraint: "onyen_pid_onyen_key".to_string(),
            });
        }
        if state.onyen_pid.values().any(|existing| existing == pid) {
            return Err(CoreError::IntegrityViolation {
                constraint: "onyen_pid_pid_key".to_string(),
            });
        }
        state.onyen_pid.insert(onyen.to_string(), pid.to_string());
        Ok(())
    }

    async fn unassociate_pid(&self, onyen: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state.onyen_pid.remove(onyen).is_some())
    }

    async fn get_onyen_by_pid(&self, pid: &str) -> Result<Option<String>> {
        let state = self.state.read().await;
        Ok(state
            .onyen_pid
            .iter()
            .find(|(_, mapped)| mapped.as_str() == pid)
            .map(|(onyen, _)| onyen.clone()))
    }

    async fn get_pid_by_onyen(&self, onyen: &str) -> Result<Option<String>> {
        Ok(self.state.read().await.onyen_pid.get(onyen).cloned())
    }

    async fn get_assignment(&self, id: i64) -> Result<Option<Assignment>> {
        Ok(self.state.read().await.assignments.get(&id).cloned())
    }

    async fn list_assignments(&self) -> Result<Vec<Assignment>> {
        let state = self.state.read().await;
        let mut assignments: Vec<Assignment> = state.assignments.values().cloned().collect();
        assignments.sort_by_key(|a| a.id);
        Ok(assignments)
    }

    async fn create_assignment(&self, assignment: NewAssignment) -> Result<Assignment> {
        check_window(assignment.available_at, assignment.due_at)?;
        let mut state = self.state.write().await;
        if state.assignments.contains_key(&assignment.id) {
            return Err(CoreError::already_exists(format!(
                "assignment {}",
                assignment.id
            )));
        }
        let now = Utc::now();
        let created = Assignment {
            id: assignment.id,
            name: assignment.name,
            directory_path: assignment.directory_path,
            master_notebook_path: assignment.master_notebook_path,
            available_at: assignment.available_at,
            due_at: assignment.due_at,
            published: assignment.published,
            max_attempts: assignment.max_attempts,
            manual_grading: false,
            grader_question_feedback: false,
            created_at: now,
            last_modified_at: now,
        };
        state.assignments.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_assignment(&self, id: i64, update: AssignmentUpdate) -> Result<Assignment> {
        let mut state = self.state.write().await;
        let assignment = state
            .assignments
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found(format!("assignment {}", id)))?;

        let available = update.available_at.unwrap_or(assignment.available_at);
        let due = update.due_at.unwrap_or(assignment.due_at);
        check_window(available, due)?;

        if let Some(name) = update.name {
            assignment.name = name;
        }
        if let Some(dir) = update.directory_path {
            assignment.directory_path = dir;
        }
        if let Some(notebook) = update.master_notebook_path {
            assignment.master_notebook_path = notebook;
        }
        if let Some(available_at) = update.available_at {
            assignment.available_at = available_at;
        }
        if let Some(due_at) = update.due_at {
            assignment.due_at = due_at;
        }
        if let Some(published) = update.published {
            assignment.published = published;
        }
        if let Some(max_attempts) = update.max_attempts {
            assignment.max_attempts = max_attempts;
        }
        if let Some(manual) = update.manual_grading {
            assignment.manual_grading = manual;
        }
        if let Some(feedback) = update.grader_question_feedback {
            assignment.grader_question_feedback = feedback;
        }
        assignment.last_modified_at = Utc::now();
        Ok(assignment.clone())
    }

    async fn delete_assignment(&self, id: i64) -> Result<()> {
        let mut state = self.state.write().await;
        if state.assignments.remove(&id).is_none() {
            return Err(CoreError::not_found(format!("assignment {}", id)));
        }
        state.extra_time.retain(|_, grant| grant.assignment_id != id);
        state.submissions.retain(|_, s| s.assignment_id != id);
        state.grade_reports.retain(|_, r| r.assignment_id != id);
        Ok(())
    }

    async fn get_extra_time(
        &self,
        student_id: i64,
        assignment_id: i64,
    ) -> Result<Option<ExtraTime>> {
        let state = self.state.read().await;
        Ok(state.extra_time.get(&(student_id, assignment_id)).cloned())
    }

    async fn list_extra_time_for_assignment(&self, assignment_id: i64) -> Result<Vec<ExtraTime>> {
        let state = self.state.read().await;
        let mut grants: Vec<ExtraTime> = state
            .extra_time
            .values()
            .filter(|grant| grant.assignment_id == assignment_id)
            .cloned()
            .collect();
        grants.sort_by_key(|grant| grant.student_id);
        Ok(grants)
    }

    async fn upsert_extra_time(
        &self,
        student_id: i64,
        assignment_id: i64,
        deferred_time_secs: i64,
        extra_time_secs: i64,
    ) -> Result<ExtraTime> {
        if deferred_time_secs < 0 || extra_time_secs < 0 {
            return Err(CoreError::IntegrityViolation {
                constraint: "extra_time durations must be non-negative".to_string(),
            });
        }
        let mut state = self.state.write().await;
        if !state.users.contains_key(&student_id) {
            return Err(CoreError::IntegrityViolation {
                constraint: "extra_time_student_id_fkey".to_string(),
            });
        }
        if !state.assignments.contains_key(&assignment_id) {
            return Err(CoreError::IntegrityViolation {
                constraint: "extra_time_assignment_id_fkey".to_string(),
            });
        }
        state.next_extra_time_id += 1;
        let id = state.next_extra_time_id;
        let grant = state
            .extra_time
            .entry((student_id, assignment_id))
            .and_modify(|existing| {
                existing.deferred_time_secs = deferred_time_secs;
                existing.extra_time_secs = extra_time_secs;
            })
            .or_insert(ExtraTime {
                id,
                student_id,
                assignment_id,
                deferred_time_secs,
                extra_time_secs,
            });
        Ok(grant.clone())
    }

    async fn create_submission(
        &self,
        student_id: i64,
        assignment_id: i64,
        commit_id: &str,
        submission_time: DateTime<Utc>,
    ) -> Result<Submission> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&student_id) {
            return Err(CoreError::IntegrityViolation {
                constraint: "submissions_student_id_fkey".to_string(),
            });
        }
        if !state.assignments.contains_key(&assignment_id) {
            return Err(CoreError::IntegrityViolation {
                constraint: "submissions_assignment_id_fkey".to_string(),
            });
        }
        state.next_submission_id += 1;
        let submission = Submission {
            id: state.next_submission_id,
            student_id,
            assignment_id,
            commit_id: commit_id.to_string(),
            submission_time,
            graded: false,
        };
        state.submissions.insert(submission.id, submission.clone());
        Ok(submission)
    }

    async fn get_submission(&self, id: i64) -> Result<Option<Submission>> {
        Ok(self.state.read().await.submissions.get(&id).cloned())
    }

    async fn delete_submission(&self, id: i64) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .submissions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found(format!("submission {}", id)))
    }

    async fn count_submissions(&self, student_id: i64, assignment_id: i64) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state
            .submissions
            .values()
            .filter(|s| s.student_id == student_id && s.assignment_id == assignment_id)
            .count() as i64)
    }

    async fn get_active_submission(
        &self,
        student_id: i64,
        assignment_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<Submission>> {
        let state = self.state.read().await;
        let mut active: Option<&Submission> = None;
        for submission in state.submissions.values() {
            if submission.student_id != student_id
                || submission.assignment_id != assignment_id
                || submission.submission_time > at
            {
                continue;
            }
            if active.is_none_or(|current| more_active(submission, current)) {
                active = Some(submission);
            }
        }
        Ok(active.cloned())
    }

    async fn list_active_submissions(
        &self,
        assignment_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Vec<Submission>> {
        let state = self.state.read().await;
        let mut per_student: HashMap<i64, &Submission> = HashMap::new();
        for submission in state.submissions.values() {
            if submission.assignment_id != assignment_id || submission.submission_time > at {
                continue;
            }
            per_student
                .entry(submission.student_id)
                .and_modify(|current| {
                    if more_active(submission, current) {
                        *current = submission;
                    }
                })
                .or_insert(submission);
        }
        let mut active: Vec<Submission> = per_student.into_values().cloned().collect();
        active.sort_by_key(|s| s.student_id);
        Ok(active)
    }

    async fn set_submissions_graded(&self, submission_ids: &[i64]) -> Result<()> {
        let mut state = self.state.write().await;
        for id in submission_ids {
            if !state.submissions.contains_key(id) {
                return Err(CoreError::not_found(format!("submission {}", id)));
            }
        }
        for id in submission_ids {
            if let Some(submission) = state.submissions.get_mut(id) {
                submission.graded = true;
            }
        }
        Ok(())
    }

    async fn create_grade_report(&self, report: NewGradeReport) -> Result<GradeReport> {
        let mut state = self.state.write().await;
        state.next_grade_report_id += 1;
        let created = GradeReport {
            id: state.next_grade_report_id,
            assignment_id: report.assignment_id,
            average: report.average,
            median: report.median,
            minimum: report.minimum,
            maximum: report.maximum,
            stdev: report.stdev,
            total_points: report.total_points,
            scores: report.scores,
            num_submitted: report.num_submitted,
            num_passing: report.num_passing,
            master_notebook_content: report.master_notebook_content,
            otter_config_content: report.otter_config_content,
            created_at: Utc::now(),
        };
        state.grade_reports.insert(created.id, created.clone());
        Ok(created)
    }

    async fn delete_grade_report(&self, id: i64) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .grade_reports
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found(format!("grade report {}", id)))
    }

    async fn get_latest_grade_report(&self, assignment_id: i64) -> Result<Option<GradeReport>> {
        let state = self.state.read().await;
        Ok(state
            .grade_reports
            .values()
            .filter(|r| r.assignment_id == assignment_id)
            .max_by_key(|r| (r.created_at, r.id))
            .cloned())
    }

    async fn create_auto_password(&self, onyen: &str, password: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if state.auto_passwords.contains_key(onyen) {
            return Err(CoreError::IntegrityViolation {
                constraint: "auto_passwords_onyen_key".to_string(),
            });
        }
        state.auto_passwords.insert(
            onyen.to_string(),
            AutoPassword {
                onyen: onyen.to_string(),
                password: password.to_string(),
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete_auto_password(&self, onyen: &str) -> Result<()> {
        self.state.write().await.auto_passwords.remove(onyen);
        Ok(())
    }

    async fn get_auto_password(&self, onyen: &str) -> Result<Option<AutoPassword>> {
        Ok(self.state.read().await.auto_passwords.get(onyen).cloned())
    }

    async fn try_acquire_named_lock(&self, name: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state.held_locks.insert(name.to_string()))
    }

    async fn release_named_lock(&self, name: &str) -> Result<()> {
        self.state.write().await.held_locks.remove(name);
        Ok(())
    }
}
