// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed domain store.
//!
//! All operations use runtime-checked queries so no database is needed at
//! compile time. Multi-row changes run in a transaction. Named locks map
//! onto Postgres advisory locks; the backing connection is pinned for the
//! lifetime of the lock because advisory locks are session-scoped.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::pool::PoolConnection;
use sqlx::{Postgres, QueryBuilder, Row};
use tokio::sync::Mutex;

use crate::error::{CoreError, Precondition, Result};
use crate::roles::RoleName;

use super::{
    Assignment, AssignmentUpdate, AutoPassword, Course, ExtraTime, GradeReport, NewAssignment,
    NewGradeReport, NewUser, Store, StudentProfile, Submission, User, UserDetail, UserKind,
    UserUpdate,
};

/// PostgreSQL-backed store implementation.
pub struct PostgresStore {
    pool: PgPool,
    // Connections pinned while holding an advisory lock, keyed by lock name.
    held_locks: Mutex<HashMap<String, PoolConnection<Postgres>>>,
}

impl PostgresStore {
    /// Create a new Postgres-backed store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            held_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Flat user row; refined into the tagged [`User`] value.
#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    onyen: String,
    first_name: String,
    last_name: String,
    email: String,
    role: String,
    user_type: String,
    base_extra_time_secs: Option<i64>,
    joined_at: Option<DateTime<Utc>>,
    exited_at: Option<DateTime<Utc>>,
    fork_remote_url: Option<String>,
    fork_cloned: Option<bool>,
}

impl UserRow {
    fn into_user(self) -> Result<User> {
        let kind = UserKind::parse(&self.user_type).ok_or_else(|| {
            CoreError::OperationalFailure {
                details: format!("unknown user_type '{}' for user {}", self.user_type, self.id),
            }
        })?;
        let role = RoleName::parse(&self.role).ok_or_else(|| CoreError::OperationalFailure {
            details: format!("unknown role '{}' for user {}", self.role, self.id),
        })?;
        let detail = match kind {
            UserKind::Student => UserDetail::Student(StudentProfile {
                base_extra_time_secs: self.base_extra_time_secs.unwrap_or(0),
                joined_at: self.joined_at.ok_or_else(|| CoreError::OperationalFailure {
                    details: format!("student {} has no joined_at", self.id),
                })?,
                exited_at: self.exited_at,
                fork_remote_url: self.fork_remote_url,
                fork_cloned: self.fork_cloned.unwrap_or(false),
            }),
            UserKind::Instructor => UserDetail::Instructor,
            UserKind::Admin => UserDetail::Admin,
        };
        Ok(User {
            id: self.id,
            onyen: self.onyen,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            role,
            detail,
        })
    }
}

const USER_COLUMNS: &str = "id, onyen, first_name, last_name, email, role, user_type, \
     base_extra_time_secs, joined_at, exited_at, fork_remote_url, fork_cloned";

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

#[async_trait]
impl Store for PostgresStore {
    async fn get_course(&self) -> Result<Option<Course>> {
        let courses = sqlx::query_as::<_, Course>(
            "SELECT id, name, start_at, end_at, master_remote_url FROM courses",
        )
        .fetch_all(&self.pool)
        .await?;

        match courses.len() {
            0 => Ok(None),
            1 => Ok(courses.into_iter().next()),
            n => Err(CoreError::OperationalFailure {
                details: format!("expected at most one course, found {}", n),
            }),
        }
    }

    async fn create_course(&self, course: Course) -> Result<()> {
        if self.get_course().await?.is_some() {
            return Err(CoreError::already_exists("course"));
        }
        sqlx::query(
            r#"
            INSERT INTO courses (id, name, start_at, end_at, master_remote_url)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(course.id)
        .bind(&course.name)
        .bind(course.start_at)
        .bind(course.end_at)
        .bind(&course.master_remote_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_course(
        &self,
        name: &str,
        start_at: Option<DateTime<Utc>>,
        end_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE courses SET name = $1, start_at = $2, end_at = $3")
            .bind(name)
            .bind(start_at)
            .bind(end_at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("course"));
        }
        Ok(())
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserRow::into_user).transpose()
    }

    async fn get_user_by_onyen(&self, onyen: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE onyen = $1"
        ))
        .bind(onyen)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserRow::into_user).transpose()
    }

    async fn list_users(&self, kind: UserKind) -> Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE user_type = $1 ORDER BY id"
        ))
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(UserRow::into_user).collect()
    }

    async fn create_user(&self, user: NewUser) -> Result<User> {
        let (base_extra, joined_at, exited_at, fork_url, fork_cloned) = match &user.detail {
            UserDetail::Student(p) => (
                Some(p.base_extra_time_secs),
                Some(p.joined_at),
                p.exited_at,
                p.fork_remote_url.clone(),
                Some(p.fork_cloned),
            ),
            _ => (None, None, None, None, None),
        };

        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (onyen, first_name, last_name, email, role, user_type,
                               base_extra_time_secs, joined_at, exited_at,
                               fork_remote_url, fork_cloned)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.onyen)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(user.role.as_str())
        .bind(user.detail.kind().as_str())
        .bind(base_extra)
        .bind(joined_at)
        .bind(exited_at)
        .bind(fork_url)
        .bind(fork_cloned)
        .fetch_one(&self.pool)
        .await?;
        row.into_user()
    }

    async fn update_user(&self, id: i64, update: UserUpdate) -> Result<User> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE users SET id = id");
        if let Some(first_name) = &update.first_name {
            builder.push(", first_name = ").push_bind(first_name);
        }
        if let Some(last_name) = &update.last_name {
            builder.push(", last_name = ").push_bind(last_name);
        }
        if let Some(email) = &update.email {
            builder.push(", email = ").push_bind(email);
        }
        if let Some(base) = update.base_extra_time_secs {
            builder.push(", base_extra_time_secs = ").push_bind(base);
        }
        if let Some(exited_at) = update.exited_at {
            builder.push(", exited_at = ").push_bind(exited_at);
        }
        if let Some(fork_url) = &update.fork_remote_url {
            builder.push(", fork_remote_url = ").push_bind(fork_url);
        }
        if let Some(fork_cloned) = update.fork_cloned {
            builder.push(", fork_cloned = ").push_bind(fork_cloned);
        }
        builder.push(" WHERE id = ").push_bind(id);
        builder.push(format!(" RETURNING {USER_COLUMNS}"));

        let row = builder
            .build_query_as::<UserRow>()
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("user {}", id)))?;
        row.into_user()
    }

    async fn delete_user(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let onyen: Option<String> = sqlx::query("SELECT onyen FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| row.get("onyen"));
        let Some(onyen) = onyen else {
            return Err(CoreError::not_found(format!("user {}", id)));
        };

        sqlx::query("DELETE FROM extra_time WHERE student_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM submissions WHERE student_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM auto_passwords WHERE onyen = $1")
            .bind(&onyen)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn associate_pid(&self, onyen: &str, pid: &str) -> Result<()> {
        sqlx::query("INSERT INTO onyen_pid (onyen, pid) VALUES ($1, $2)")
            .bind(onyen)
            .bind(pid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn unassociate_pid(&self, onyen: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM onyen_pid WHERE onyen = $1")
            .bind(onyen)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_onyen_by_pid(&self, pid: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT onyen FROM onyen_pid WHERE pid = $1")
            .bind(pid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("onyen")))
    }

    async fn get_pid_by_onyen(&self, onyen: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT pid FROM onyen_pid WHERE onyen = $1")
            .bind(onyen)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("pid")))
    }

    async fn get_assignment(&self, id: i64) -> Result<Option<Assignment>> {
        let assignment = sqlx::query_as::<_, Assignment>(
            "SELECT * FROM assignments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(assignment)
    }

    async fn list_assignments(&self) -> Result<Vec<Assignment>> {
        let assignments =
            sqlx::query_as::<_, Assignment>("SELECT * FROM assignments ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(assignments)
    }

    async fn create_assignment(&self, assignment: NewAssignment) -> Result<Assignment> {
        check_window(assignment.available_at, assignment.due_at)?;
        let created = sqlx::query_as::<_, Assignment>(
            r#"
            INSERT INTO assignments (id, name, directory_path, master_notebook_path,
                                     available_at, due_at, published, max_attempts,
                                     manual_grading, grader_question_feedback,
                                     created_at, last_modified_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, false, false, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(assignment.id)
        .bind(&assignment.name)
        .bind(&assignment.directory_path)
        .bind(&assignment.master_notebook_path)
        .bind(assignment.available_at)
        .bind(assignment.due_at)
        .bind(assignment.published)
        .bind(assignment.max_attempts)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn update_assignment(&self, id: i64, update: AssignmentUpdate) -> Result<Assignment> {
        // Read and write in one transaction; the row lock keeps a concurrent
        // update from interleaving past the window check.
        let mut tx = self.pool.begin().await?;
        let current = sqlx::query_as::<_, Assignment>(
            "SELECT * FROM assignments WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| CoreError::not_found(format!("assignment {}", id)))?;

        // Validate the window the row will have after the update.
        let available = update.available_at.unwrap_or(current.available_at);
        let due = update.due_at.unwrap_or(current.due_at);
        check_window(available, due)?;

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("UPDATE assignments SET last_modified_at = NOW()");
        if let Some(name) = &update.name {
            builder.push(", name = ").push_bind(name);
        }
        if let Some(dir) = &update.directory_path {
            builder.push(", directory_path = ").push_bind(dir);
        }
        if let Some(notebook) = &update.master_notebook_path {
            builder.push(", master_notebook_path = ").push_bind(notebook);
        }
        if let Some(available_at) = update.available_at {
            builder.push(", available_at = ").push_bind(available_at);
        }
        if let Some(due_at) = update.due_at {
            builder.push(", due_at = ").push_bind(due_at);
        }
        if let Some(published) = update.published {
            builder.push(", published = ").push_bind(published);
        }
        if let Some(max_attempts) = update.max_attempts {
            builder.push(", max_attempts = ").push_bind(max_attempts);
        }
        if let Some(manual) = update.manual_grading {
            builder.push(", manual_grading = ").push_bind(manual);
        }
        if let Some(feedback) = update.grader_question_feedback {
            builder
                .push(", grader_question_feedback = ")
                .push_bind(feedback);
        }
        builder.push(" WHERE id = ").push_bind(id);
        builder.push(" RETURNING *");

        let assignment = builder
            .build_query_as::<Assignment>()
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(assignment)
    }

    async fn delete_assignment(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM extra_time WHERE assignment_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM submissions WHERE assignment_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM grade_reports WHERE assignment_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM assignments WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("assignment {}", id)));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_extra_time(
        &self,
        student_id: i64,
        assignment_id: i64,
    ) -> Result<Option<ExtraTime>> {
        let grant = sqlx::query_as::<_, ExtraTime>(
            "SELECT * FROM extra_time WHERE student_id = $1 AND assignment_id = $2",
        )
        .bind(student_id)
        .bind(assignment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(grant)
    }

    async fn list_extra_time_for_assignment(&self, assignment_id: i64) -> Result<Vec<ExtraTime>> {
        let grants = sqlx::query_as::<_, ExtraTime>(
            "SELECT * FROM extra_time WHERE assignment_id = $1 ORDER BY student_id",
        )
        .bind(assignment_id)
        .fetch_all(&self.pool)
        .await?;
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
        let grant = sqlx::query_as::<_, ExtraTime>(
            r#"
            INSERT INTO extra_time (student_id, assignment_id, deferred_time_secs, extra_time_secs)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (student_id, assignment_id)
            DO UPDATE SET deferred_time_secs = $3, extra_time_secs = $4
            RETURNING *
            "#,
        )
        .bind(student_id)
        .bind(assignment_id)
        .bind(deferred_time_secs)
        .bind(extra_time_secs)
        .fetch_one(&self.pool)
        .await?;
        Ok(grant)
    }

    async fn create_submission(
        &self,
        student_id: i64,
        assignment_id: i64,
        commit_id: &str,
        submission_time: DateTime<Utc>,
    ) -> Result<Submission> {
        let submission = sqlx::query_as::<_, Submission>(
            r#"
            INSERT INTO submissions (student_id, assignment_id, commit_id, submission_time, graded)
            VALUES ($1, $2, $3, $4, false)
            RETURNING *
            "#,
        )
        .bind(student_id)
        .bind(assignment_id)
        .bind(commit_id)
        .bind(submission_time)
        .fetch_one(&self.pool)
        .await?;
        Ok(submission)
    }

    async fn get_submission(&self, id: i64) -> Result<Option<Submission>> {
        let submission =
            sqlx::query_as::<_, Submission>("SELECT * FROM submissions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(submission)
    }

    async fn delete_submission(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM submissions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("submission {}", id)));
        }
        Ok(())
    }

    async fn count_submissions(&self, student_id: i64, assignment_id: i64) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM submissions WHERE student_id = $1 AND assignment_id = $2",
        )
        .bind(student_id)
        .bind(assignment_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("count"))
    }

    async fn get_active_submission(
        &self,
        student_id: i64,
        assignment_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<Submission>> {
        let submission = sqlx::query_as::<_, Submission>(
            r#"
            SELECT * FROM submissions
            WHERE student_id = $1 AND assignment_id = $2 AND submission_time <= $3
            ORDER BY submission_time DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(student_id)
        .bind(assignment_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(submission)
    }

    async fn list_active_submissions(
        &self,
        assignment_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Vec<Submission>> {
        let submissions = sqlx::query_as::<_, Submission>(
            r#"
            SELECT DISTINCT ON (student_id) *
            FROM submissions
            WHERE assignment_id = $1 AND submission_time <= $2
            ORDER BY student_id, submission_time DESC, id DESC
            "#,
        )
        .bind(assignment_id)
        .bind(at)
        .fetch_all(&self.pool)
        .await?;
        Ok(submissions)
    }

    async fn set_submissions_graded(&self, submission_ids: &[i64]) -> Result<()> {
        if submission_ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE submissions SET graded = true WHERE id = ANY($1)")
            .bind(submission_ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_grade_report(&self, report: NewGradeReport) -> Result<GradeReport> {
        let created = sqlx::query_as::<_, GradeReport>(
            r#"
            INSERT INTO grade_reports (assignment_id, average, median, minimum, maximum,
                                       stdev, total_points, scores, num_submitted, num_passing,
                                       master_notebook_content, otter_config_content, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW())
            RETURNING *
            "#,
        )
        .bind(report.assignment_id)
        .bind(report.average)
        .bind(report.median)
        .bind(report.minimum)
        .bind(report.maximum)
        .bind(report.stdev)
        .bind(report.total_points)
        .bind(&report.scores)
        .bind(report.num_submitted)
        .bind(report.num_passing)
        .bind(&report.master_notebook_content)
        .bind(&report.otter_config_content)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn delete_grade_report(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM grade_reports WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("grade report {}", id)));
        }
        Ok(())
    }

    async fn get_latest_grade_report(&self, assignment_id: i64) -> Result<Option<GradeReport>> {
        let report = sqlx::query_as::<_, GradeReport>(
            r#"
            SELECT * FROM grade_reports
            WHERE assignment_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(assignment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(report)
    }

    async fn create_auto_password(&self, onyen: &str, password: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO auto_passwords (onyen, password, created_at) VALUES ($1, $2, NOW())",
        )
        .bind(onyen)
        .bind(password)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_auto_password(&self, onyen: &str) -> Result<()> {
        sqlx::query("DELETE FROM auto_passwords WHERE onyen = $1")
            .bind(onyen)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_auto_password(&self, onyen: &str) -> Result<Option<AutoPassword>> {
        let secret = sqlx::query_as::<_, AutoPassword>(
            "SELECT * FROM auto_passwords WHERE onyen = $1",
        )
        .bind(onyen)
        .fetch_optional(&self.pool)
        .await?;
        Ok(secret)
    }

    async fn try_acquire_named_lock(&self, name: &str) -> Result<bool> {
        let mut held = self.held_locks.lock().await;
        if held.contains_key(name) {
            return Ok(false);
        }

        let mut conn = self.pool.acquire().await.map_err(CoreError::from)?;
        let row = sqlx::query("SELECT pg_try_advisory_lock(hashtextextended($1, 0)) AS acquired")
            .bind(name)
            .fetch_one(&mut *conn)
            .await?;
        let acquired: bool = row.get("acquired");

        if acquired {
            // Keep the connection checked out; the lock dies with the session.
            held.insert(name.to_string(), conn);
        }
        Ok(acquired)
    }

    async fn release_named_lock(&self, name: &str) -> Result<()> {
        let mut held = self.held_locks.lock().await;
        if let Some(mut conn) = held.remove(name) {
            sqlx::query("SELECT pg_advisory_unlock(hashtextextended($1, 0))")
                .bind(name)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }
}
