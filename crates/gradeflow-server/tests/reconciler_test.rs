// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconciler cycle tests: bootstrap, idempotence, roster convergence,
//! provisioning compensation, and hook regeneration.

mod common;

use std::sync::Arc;
use std::time::Duration;

use gradeflow_core::store::{MemoryStore, Store, UserKind};
use gradeflow_githost::types::CollaboratorPermission;
use gradeflow_server::directory::StaticDirectory;
use gradeflow_server::reconciler::{Reconciler, ReconcilerConfig};

use common::{MASTER_REPO, MockGit, MockLms, ORG, emitter, fresh_store, lms_assignment, lms_student};

struct Fixture {
    store: Arc<MemoryStore>,
    lms: Arc<MockLms>,
    git: Arc<MockGit>,
    reconciler: Reconciler,
}

fn fixture(directory: StaticDirectory) -> Fixture {
    let store = fresh_store();
    let lms = Arc::new(MockLms::new());
    let git = Arc::new(MockGit::new());
    let reconciler = Reconciler::new(
        store.clone(),
        lms.clone(),
        git.clone(),
        Arc::new(directory),
        emitter(),
        ReconcilerConfig {
            poll_interval: Duration::from_secs(300),
            organization: ORG.to_string(),
            master_repo: MASTER_REPO.to_string(),
        },
    );
    Fixture {
        store,
        lms,
        git,
        reconciler,
    }
}

fn campus_directory() -> StaticDirectory {
    StaticDirectory::new([
        ("730000001".to_string(), "alice".to_string()),
        ("730000002".to_string(), "bob".to_string()),
        ("730000009".to_string(), "psmith".to_string()),
    ])
}

#[tokio::test]
async fn test_bootstrap_cycle_creates_course_assignments_and_roster() {
    let fixture = fixture(campus_directory());
    fixture.lms.assignments.lock().await.push(lms_assignment(1, "A1"));
    fixture
        .lms
        .students
        .lock()
        .await
        .push(lms_student(501, "730000001", "Alice Doe", "alice@example.edu"));
    fixture
        .lms
        .teachers
        .lock()
        .await
        .push(lms_student(509, "730000009", "Pat Smith", "psmith@example.edu"));

    fixture.reconciler.run_cycle().await.unwrap();

    let course = fixture.store.get_course().await.unwrap().unwrap();
    assert_eq!(course.id, 77);
    assert!(course.master_remote_url.contains(MASTER_REPO));

    let assignment = fixture.store.get_assignment(1).await.unwrap().unwrap();
    assert_eq!(assignment.directory_path, "A1");
    assert_eq!(assignment.master_notebook_path, "A1-prof.ipynb");
    assert!(assignment.max_attempts.is_none());

    // Student: Git user, fork, read grant on master, row, PID mapping.
    let alice = fixture.store.get_user_by_onyen("alice").await.unwrap().unwrap();
    assert_eq!(alice.first_name, "Alice");
    assert_eq!(alice.last_name, "Doe");
    let profile = alice.student_profile().unwrap();
    assert_eq!(
        profile.fork_remote_url.as_deref(),
        Some("https://git.example.edu/alice/comp110-master-alice.git")
    );
    assert_eq!(
        fixture.store.get_onyen_by_pid("730000001").await.unwrap(),
        Some("alice".to_string())
    );
    assert_eq!(
        fixture.git.forks.lock().await.as_slice(),
        &[("alice".to_string(), "comp110-master-alice".to_string())]
    );
    assert!(fixture.store.get_auto_password("alice").await.unwrap().is_some());

    // Instructor: write grant on master, no fork.
    let psmith = fixture.store.get_user_by_onyen("psmith").await.unwrap().unwrap();
    assert_eq!(psmith.kind(), UserKind::Instructor);
    let collaborators = fixture.git.collaborators.lock().await;
    assert!(collaborators.contains(&(
        MASTER_REPO.to_string(),
        "alice".to_string(),
        CollaboratorPermission::Read
    )));
    assert!(collaborators.contains(&(
        MASTER_REPO.to_string(),
        "psmith".to_string(),
        CollaboratorPermission::Write
    )));
    drop(collaborators);

    // The policy hook was installed once.
    assert_eq!(fixture.git.installed_hooks.lock().await.len(), 1);
}

#[tokio::test]
async fn test_second_cycle_on_unchanged_snapshot_writes_nothing() {
    let fixture = fixture(campus_directory());
    fixture.lms.assignments.lock().await.push(lms_assignment(1, "A1"));
    fixture
        .lms
        .students
        .lock()
        .await
        .push(lms_student(501, "730000001", "Alice Doe", "alice@example.edu"));

    fixture.reconciler.run_cycle().await.unwrap();
    let git_writes = fixture.git.write_count().await;
    let lms_writes = fixture.lms.write_count().await;

    fixture.reconciler.run_cycle().await.unwrap();
    assert_eq!(fixture.git.write_count().await, git_writes);
    assert_eq!(fixture.lms.write_count().await, lms_writes);
}

#[tokio::test]
async fn test_departed_entities_are_deleted() {
    let fixture = fixture(campus_directory());
    fixture.lms.assignments.lock().await.push(lms_assignment(1, "A1"));
    fixture.lms.assignments.lock().await.push(lms_assignment(2, "A2"));
    fixture
        .lms
        .students
        .lock()
        .await
        .push(lms_student(501, "730000001", "Alice Doe", "alice@example.edu"));
    fixture
        .lms
        .students
        .lock()
        .await
        .push(lms_student(502, "730000002", "Bob Roe", "bob@example.edu"));

    fixture.reconciler.run_cycle().await.unwrap();
    assert_eq!(fixture.store.list_users(UserKind::Student).await.unwrap().len(), 2);

    // Bob drops the course and A2 is deleted from the LMS.
    fixture.lms.students.lock().await.retain(|u| u.id != 502);
    fixture.lms.assignments.lock().await.retain(|a| a.id != 2);
    fixture.reconciler.run_cycle().await.unwrap();

    assert!(fixture.store.get_user_by_onyen("bob").await.unwrap().is_none());
    assert!(fixture.store.get_pid_by_onyen("bob").await.unwrap().is_none());
    assert!(fixture.store.get_assignment(2).await.unwrap().is_none());
    assert!(fixture.store.get_assignment(1).await.unwrap().is_some());
}

#[tokio::test]
async fn test_pending_and_unresolvable_enrollments_are_skipped() {
    let fixture = fixture(campus_directory());
    // Pending: no sis id yet. Unresolvable: PID unknown to the directory.
    fixture.lms.students.lock().await.push(gradeflow_lms::types::LmsUser {
        id: 503,
        sis_user_id: None,
        email: None,
        name: None,
    });
    fixture
        .lms
        .students
        .lock()
        .await
        .push(lms_student(504, "739999999", "Ghost User", "ghost@example.edu"));

    fixture.reconciler.run_cycle().await.unwrap();

    assert!(fixture.store.list_users(UserKind::Student).await.unwrap().is_empty());
    assert!(fixture.git.created_users.lock().await.is_empty());
}

#[tokio::test]
async fn test_failed_fork_rolls_back_provisioning() {
    let fixture = fixture(campus_directory());
    fixture
        .lms
        .students
        .lock()
        .await
        .push(lms_student(501, "730000001", "Alice Doe", "alice@example.edu"));
    fixture.git.fail_forks.set(0).await;

    let err = fixture.reconciler.run_cycle().await.unwrap_err();
    assert_eq!(err.error_code(), "GIT_BACKEND_ERROR");

    // Completed steps were undone in reverse: password secret, Git user.
    assert!(fixture.store.get_user_by_onyen("alice").await.unwrap().is_none());
    assert!(fixture.store.get_auto_password("alice").await.unwrap().is_none());
    assert_eq!(fixture.git.deleted_users.lock().await.as_slice(), &["alice".to_string()]);

    // The next cycle provisions cleanly.
    fixture.git.fail_forks.set(usize::MAX).await;
    fixture.reconciler.run_cycle().await.unwrap();
    assert!(fixture.store.get_user_by_onyen("alice").await.unwrap().is_some());
}

#[tokio::test]
async fn test_lms_side_assignment_edit_converges_locally() {
    let fixture = fixture(campus_directory());
    fixture.lms.assignments.lock().await.push(lms_assignment(1, "A1"));
    fixture.reconciler.run_cycle().await.unwrap();

    {
        let mut assignments = fixture.lms.assignments.lock().await;
        assignments[0].name = "A1 (revised)".to_string();
        assignments[0].allowed_attempts = 3;
    }
    fixture.reconciler.run_cycle().await.unwrap();

    let assignment = fixture.store.get_assignment(1).await.unwrap().unwrap();
    assert_eq!(assignment.name, "A1 (revised)");
    assert_eq!(assignment.max_attempts, Some(3));
    // Local-only fields survive the update.
    assert_eq!(assignment.directory_path, "A1");
}

#[tokio::test]
async fn test_hook_reinstalled_only_when_policy_changes() {
    let fixture = fixture(campus_directory());
    fixture.lms.assignments.lock().await.push(lms_assignment(1, "A1"));
    fixture.reconciler.run_cycle().await.unwrap();
    assert_eq!(fixture.git.installed_hooks.lock().await.len(), 1);

    fixture.reconciler.run_cycle().await.unwrap();
    assert_eq!(fixture.git.installed_hooks.lock().await.len(), 1);

    // A new assignment changes the synthesized script.
    fixture.lms.assignments.lock().await.push(lms_assignment(2, "A2"));
    fixture.reconciler.run_cycle().await.unwrap();
    let hooks = fixture.git.installed_hooks.lock().await;
    assert_eq!(hooks.len(), 2);
    assert!(hooks[1].contains("A2"));
}

#[tokio::test]
async fn test_cycle_is_dropped_while_another_holds_the_lock() {
    let fixture = fixture(campus_directory());
    fixture
        .lms
        .students
        .lock()
        .await
        .push(lms_student(501, "730000001", "Alice Doe", "alice@example.edu"));

    assert!(fixture.store.try_acquire_named_lock("reconciler").await.unwrap());
    fixture.reconciler.run_cycle().await.unwrap();
    // Nothing happened under the held lock.
    assert!(fixture.store.get_course().await.unwrap().is_none());
    fixture.store.release_named_lock("reconciler").await.unwrap();

    fixture.reconciler.run_cycle().await.unwrap();
    assert!(fixture.store.get_course().await.unwrap().is_some());
}
