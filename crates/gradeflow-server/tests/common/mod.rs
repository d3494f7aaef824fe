// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared test doubles and fixtures for the service-level tests.
//!
//! The mocks record every write so tests can assert on side effects and on
//! the absence of side effects (idempotence). Failures are injected per
//! operation via counters: `fail_after(n)` lets n calls succeed and fails
//! the rest.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Mutex;

use gradeflow_core::error::{CoreError, Result};
use gradeflow_core::events::EventEmitter;
use gradeflow_core::roles::RoleName;
use gradeflow_core::store::{
    Course, MemoryStore, NewUser, Store, StudentProfile, User, UserDetail,
};
use gradeflow_githost::types::{
    BranchCommit, CollaboratorPermission, GitUser, Repository, RepositoryOwner,
};
use gradeflow_lms::types::{
    DuplicatePolicy, EnrollmentKind, GradePost, LmsAssignment, LmsAssignmentUpdate, LmsCourse,
    LmsFile, LmsUser,
};
use gradeflow_server::adapters::{GitHostApi, LmsApi};
use gradeflow_server::grader::{GradeOutcome, Grader};

pub const ORG: &str = "comp110";
pub const MASTER_REPO: &str = "comp110-master";

pub fn at(hour: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, hour, min, 0).unwrap()
}

/// A failure injector: calls before the threshold succeed.
#[derive(Default)]
pub struct FailAfter {
    threshold: Mutex<Option<usize>>,
    calls: AtomicUsize,
}

impl FailAfter {
    pub async fn set(&self, successes: usize) {
        *self.threshold.lock().await = Some(successes);
    }

    /// Count one call; true when this call should fail.
    pub async fn should_fail(&self) -> bool {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        matches!(*self.threshold.lock().await, Some(limit) if n >= limit)
    }
}

// ----------------------------------------------------------------------
// LMS mock
// ----------------------------------------------------------------------

pub struct MockLms {
    pub course: Mutex<LmsCourse>,
    pub assignments: Mutex<Vec<LmsAssignment>>,
    pub students: Mutex<Vec<LmsUser>>,
    pub teachers: Mutex<Vec<LmsUser>>,

    pub uploads: Mutex<Vec<(String, String, usize)>>,
    pub grade_posts: Mutex<Vec<(i64, GradePost)>>,
    pub assignment_updates: Mutex<Vec<(i64, LmsAssignmentUpdate)>>,

    pub fail_uploads: FailAfter,
    pub fail_grade_posts: FailAfter,
    pub fail_get_assignment: FailAfter,
    next_file_id: AtomicUsize,
}

impl MockLms {
    pub fn new() -> Self {
        Self {
            course: Mutex::new(LmsCourse {
                id: 77,
                name: "Intro to Data Science".to_string(),
                start_at: Some(at(0, 0)),
                end_at: Some(at(23, 59)),
            }),
            assignments: Mutex::new(Vec::new()),
            students: Mutex::new(Vec::new()),
            teachers: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            grade_posts: Mutex::new(Vec::new()),
            assignment_updates: Mutex::new(Vec::new()),
            fail_uploads: FailAfter::default(),
            fail_grade_posts: FailAfter::default(),
            fail_get_assignment: FailAfter::default(),
            next_file_id: AtomicUsize::new(9000),
        }
    }

    /// Number of mutating calls recorded so far, for idempotence checks.
    pub async fn write_count(&self) -> usize {
        self.uploads.lock().await.len()
            + self.grade_posts.lock().await.len()
            + self.assignment_updates.lock().await.len()
    }
}

#[async_trait]
impl LmsApi for MockLms {
    async fn get_course(&self) -> Result<LmsCourse> {
        Ok(self.course.lock().await.clone())
    }

    async fn list_assignments(&self) -> Result<Vec<LmsAssignment>> {
        Ok(self.assignments.lock().await.clone())
    }

    async fn get_assignment(&self, assignment_id: i64) -> Result<LmsAssignment> {
        if self.fail_get_assignment.should_fail().await {
            return Err(CoreError::LmsBackendError {
                status: 503,
                detail: "injected".to_string(),
            });
        }
        self.assignments
            .lock()
            .await
            .iter()
            .find(|a| a.id == assignment_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("assignment {assignment_id}")))
    }

    async fn list_users(&self, kind: EnrollmentKind) -> Result<Vec<LmsUser>> {
        Ok(match kind {
            EnrollmentKind::Student => self.students.lock().await.clone(),
            EnrollmentKind::Teacher => self.teachers.lock().await.clone(),
        })
    }

    async fn upload_course_file(
        &self,
        folder_path: &str,
        file_name: &str,
        content: Vec<u8>,
        _on_duplicate: DuplicatePolicy,
    ) -> Result<LmsFile> {
        if self.fail_uploads.should_fail().await {
            return Err(CoreError::FileUploadFailed {
                detail: "injected".to_string(),
            });
        }
        self.uploads
            .lock()
            .await
            .push((folder_path.to_string(), file_name.to_string(), content.len()));
        Ok(LmsFile {
            id: self.next_file_id.fetch_add(1, Ordering::SeqCst) as i64,
            display_name: Some(file_name.to_string()),
        })
    }

    async fn post_grade(&self, assignment_id: i64, post: &GradePost) -> Result<()> {
        if self.fail_grade_posts.should_fail().await {
            return Err(CoreError::LmsBackendError {
                status: 502,
                detail: "injected".to_string(),
            });
        }
        self.grade_posts
            .lock()
            .await
            .push((assignment_id, post.clone()));
        Ok(())
    }

    async fn update_assignment(
        &self,
        assignment_id: i64,
        update: &LmsAssignmentUpdate,
    ) -> Result<LmsAssignment> {
        self.assignment_updates
            .lock()
            .await
            .push((assignment_id, update.clone()));
        self.assignments
            .lock()
            .await
            .iter()
            .find(|a| a.id == assignment_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("assignment {assignment_id}")))
    }
}

// ----------------------------------------------------------------------
// Git host mock
// ----------------------------------------------------------------------

pub struct MockGit {
    pub created_users: Mutex<Vec<String>>,
    pub deleted_users: Mutex<Vec<String>>,
    pub forks: Mutex<Vec<(String, String)>>,
    pub deleted_repos: Mutex<Vec<(String, String)>>,
    pub collaborators: Mutex<Vec<(String, String, CollaboratorPermission)>>,
    pub removed_collaborators: Mutex<Vec<(String, String)>>,
    pub installed_hooks: Mutex<Vec<String>>,
    pub archives: Mutex<HashMap<String, Vec<u8>>>,
    /// Commit time per SHA; commits not listed here report no time.
    pub commit_times: Mutex<HashMap<String, DateTime<Utc>>>,

    pub fail_forks: FailAfter,
    pub fail_create_user: FailAfter,
    pub fail_downloads: FailAfter,
    pub fail_get_commit: FailAfter,
}

impl MockGit {
    pub fn new() -> Self {
        Self {
            created_users: Mutex::new(Vec::new()),
            deleted_users: Mutex::new(Vec::new()),
            forks: Mutex::new(Vec::new()),
            deleted_repos: Mutex::new(Vec::new()),
            collaborators: Mutex::new(Vec::new()),
            removed_collaborators: Mutex::new(Vec::new()),
            installed_hooks: Mutex::new(Vec::new()),
            archives: Mutex::new(HashMap::new()),
            commit_times: Mutex::new(HashMap::new()),
            fail_forks: FailAfter::default(),
            fail_create_user: FailAfter::default(),
            fail_downloads: FailAfter::default(),
            fail_get_commit: FailAfter::default(),
        }
    }

    pub async fn write_count(&self) -> usize {
        self.created_users.lock().await.len()
            + self.deleted_users.lock().await.len()
            + self.forks.lock().await.len()
            + self.deleted_repos.lock().await.len()
            + self.collaborators.lock().await.len()
            + self.removed_collaborators.lock().await.len()
            + self.installed_hooks.lock().await.len()
    }

    fn repo(owner: &str, name: &str) -> Repository {
        Repository {
            name: name.to_string(),
            owner: RepositoryOwner {
                login: owner.to_string(),
            },
            clone_url: format!("https://git.example.edu/{owner}/{name}.git"),
        }
    }
}

#[async_trait]
impl GitHostApi for MockGit {
    async fn create_user(&self, login: &str, email: &str, _password: &str) -> Result<GitUser> {
        if self.fail_create_user.should_fail().await {
            return Err(CoreError::GitBackendError {
                status: 500,
                detail: "injected".to_string(),
            });
        }
        self.created_users.lock().await.push(login.to_string());
        Ok(GitUser {
            login: login.to_string(),
            email: email.to_string(),
        })
    }

    async fn delete_user(&self, login: &str) -> Result<()> {
        self.deleted_users.lock().await.push(login.to_string());
        Ok(())
    }

    async fn get_repository(&self, owner: &str, name: &str) -> Result<Repository> {
        Ok(Self::repo(owner, name))
    }

    async fn delete_repository(&self, owner: &str, name: &str) -> Result<()> {
        self.deleted_repos
            .lock()
            .await
            .push((owner.to_string(), name.to_string()));
        Ok(())
    }

    async fn fork_repository(
        &self,
        _owner: &str,
        _name: &str,
        fork_owner: &str,
        fork_name: &str,
    ) -> Result<Repository> {
        if self.fail_forks.should_fail().await {
            return Err(CoreError::GitBackendError {
                status: 500,
                detail: "injected".to_string(),
            });
        }
        self.forks
            .lock()
            .await
            .push((fork_owner.to_string(), fork_name.to_string()));
        Ok(Self::repo(fork_owner, fork_name))
    }

    async fn add_collaborator(
        &self,
        _owner: &str,
        name: &str,
        login: &str,
        permission: CollaboratorPermission,
    ) -> Result<()> {
        self.collaborators
            .lock()
            .await
            .push((name.to_string(), login.to_string(), permission));
        Ok(())
    }

    async fn remove_collaborator(&self, _owner: &str, name: &str, login: &str) -> Result<()> {
        self.removed_collaborators
            .lock()
            .await
            .push((name.to_string(), login.to_string()));
        Ok(())
    }

    async fn download_archive(
        &self,
        owner: &str,
        _name: &str,
        tree_ish: &str,
        _path_prefix: Option<&str>,
    ) -> Result<Vec<u8>> {
        if self.fail_downloads.should_fail().await {
            return Err(CoreError::GitBackendError {
                status: 404,
                detail: "injected".to_string(),
            });
        }
        let key = format!("{owner}@{tree_ish}");
        Ok(self
            .archives
            .lock()
            .await
            .get(&key)
            .cloned()
            .unwrap_or_else(|| b"tar.gz".to_vec()))
    }

    async fn get_commit(&self, _owner: &str, _name: &str, sha: &str) -> Result<BranchCommit> {
        if self.fail_get_commit.should_fail().await {
            return Err(CoreError::GitBackendError {
                status: 500,
                detail: "injected".to_string(),
            });
        }
        Ok(BranchCommit {
            sha: sha.to_string(),
            created: self.commit_times.lock().await.get(sha).copied(),
        })
    }

    async fn install_pre_receive_hook(
        &self,
        _owner: &str,
        _name: &str,
        _hook_id: &str,
        script: &str,
    ) -> Result<()> {
        self.installed_hooks.lock().await.push(script.to_string());
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Grader mock
// ----------------------------------------------------------------------

pub struct MockGrader {
    /// Outcomes returned in order; the last one repeats.
    pub outcomes: Mutex<Vec<GradeOutcome>>,
    pub grade_calls: AtomicUsize,
    pub fail_grades: FailAfter,
}

impl MockGrader {
    pub fn scoring(outcomes: Vec<GradeOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes),
            grade_calls: AtomicUsize::new(0),
            fail_grades: FailAfter::default(),
        }
    }
}

#[async_trait]
impl Grader for MockGrader {
    async fn generate_config(&self, _master_notebook: &str) -> Result<String> {
        Ok("OK_FORMAT = true".to_string())
    }

    async fn grade(
        &self,
        _archive: &[u8],
        _config: &str,
        _requirements: &str,
    ) -> Result<GradeOutcome> {
        if self.fail_grades.should_fail().await {
            return Err(CoreError::OperationalFailure {
                details: "injected".to_string(),
            });
        }
        let n = self.grade_calls.fetch_add(1, Ordering::SeqCst);
        let outcomes = self.outcomes.lock().await;
        let index = n.min(outcomes.len().saturating_sub(1));
        Ok(outcomes[index].clone())
    }
}

// ----------------------------------------------------------------------
// Fixtures
// ----------------------------------------------------------------------

pub fn outcome(score: f64, total: f64) -> GradeOutcome {
    GradeOutcome {
        score,
        total_points: total,
        questions: Vec::new(),
        rendered_notebook: Some(b"%PDF-graded".to_vec()),
    }
}

pub fn lms_student(id: i64, pid: &str, name: &str, email: &str) -> LmsUser {
    LmsUser {
        id,
        sis_user_id: Some(pid.to_string()),
        email: Some(email.to_string()),
        name: Some(name.to_string()),
    }
}

pub fn lms_assignment(id: i64, name: &str) -> LmsAssignment {
    LmsAssignment {
        id,
        name: name.to_string(),
        unlock_at: Some(at(9, 0)),
        due_at: Some(at(17, 0)),
        published: true,
        allowed_attempts: -1,
        unpublishable: true,
    }
}

pub async fn seed_course(store: &dyn Store) -> Course {
    let course = Course {
        id: 77,
        name: "Intro to Data Science".to_string(),
        start_at: Some(at(0, 0)),
        end_at: Some(at(23, 59)),
        master_remote_url: format!("https://git.example.edu/{ORG}/{MASTER_REPO}.git"),
    };
    store.create_course(course.clone()).await.unwrap();
    course
}

pub async fn seed_student(store: &dyn Store, onyen: &str, pid: &str) -> User {
    let user = store
        .create_user(NewUser {
            onyen: onyen.to_string(),
            first_name: "Jay".to_string(),
            last_name: "Doe".to_string(),
            email: format!("{onyen}@example.edu"),
            role: RoleName::Student,
            detail: UserDetail::Student(StudentProfile {
                base_extra_time_secs: 0,
                joined_at: at(0, 0),
                exited_at: None,
                fork_remote_url: Some(format!(
                    "https://git.example.edu/{onyen}/{MASTER_REPO}-{onyen}.git"
                )),
                fork_cloned: true,
            }),
        })
        .await
        .unwrap();
    store.associate_pid(onyen, pid).await.unwrap();
    user
}

pub async fn seed_instructor(store: &dyn Store, onyen: &str) -> User {
    store
        .create_user(NewUser {
            onyen: onyen.to_string(),
            first_name: "Pat".to_string(),
            last_name: "Smith".to_string(),
            email: format!("{onyen}@example.edu"),
            role: RoleName::Instructor,
            detail: UserDetail::Instructor,
        })
        .await
        .unwrap()
}

pub fn fresh_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

pub fn emitter() -> EventEmitter {
    EventEmitter::default()
}
