// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Periodic LMS downsync.
//!
//! The reconciler treats the LMS as the authority for the course, the
//! assignment set, and the roster, and converges local state toward it.
//! One cycle runs course -> assignments -> students -> instructors -> hook
//! regeneration, strictly in that order, under a fleet-wide named lock;
//! an overlapping trigger is dropped, not queued.
//!
//! Student provisioning spans the Git host, the credential table, and the
//! database. Each in-flight user carries an explicit record of completed
//! steps; on failure the inverse steps run in reverse order and the
//! original error is re-raised.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, instrument, warn};

use gradeflow_core::Result;
use gradeflow_core::events::{DomainEvent, EntityKind, EventEmitter, Operation};
use gradeflow_core::roles::RoleName;
use gradeflow_core::schedule::{StudentSchedule, adjusted_available_at};
use gradeflow_core::store::{
    Assignment, AssignmentUpdate, Course, NewAssignment, NewUser, Store, StudentProfile, User,
    UserDetail, UserKind, UserUpdate,
};
use gradeflow_githost::hooks::{HookAssignment, synthesize_hooks};
use gradeflow_githost::types::CollaboratorPermission;
use gradeflow_lms::types::{EnrollmentKind, LmsAssignment, LmsUser};

use crate::adapters::{GitHostApi, LmsApi};
use crate::directory::Directory;

/// Fleet-wide lock name guarding the singleton cycle.
const RECONCILER_LOCK: &str = "reconciler";

/// Hook id the combined policy script installs under.
const PRE_RECEIVE_HOOK_ID: &str = "pre-receive";

const GENERATED_PASSWORD_LEN: usize = 20;

/// Configuration for the reconciler worker.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// How often to run a cycle.
    pub poll_interval: Duration,
    /// Git host organization owning the master repository.
    pub organization: String,
    /// Master repository name.
    pub master_repo: String,
}

/// A provisioning step that completed and may need to be undone.
enum ProvisionStep {
    GitUser,
    AutoPassword,
    Fork,
    MasterCollaborator,
    DbRow(i64),
    PidMapping,
}

/// Background worker that reconciles local state against the LMS.
pub struct Reconciler {
    store: Arc<dyn Store>,
    lms: Arc<dyn LmsApi>,
    git: Arc<dyn GitHostApi>,
    directory: Arc<dyn Directory>,
    events: EventEmitter,
    config: ReconcilerConfig,
    shutdown: Arc<Notify>,
    // Last installed hook script; reinstallation is skipped when unchanged.
    last_hook_script: Mutex<Option<String>>,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(
        store: Arc<dyn Store>,
        lms: Arc<dyn LmsApi>,
        git: Arc<dyn GitHostApi>,
        directory: Arc<dyn Directory>,
        events: EventEmitter,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            lms,
            git,
            directory,
            events,
            config,
            shutdown: Arc::new(Notify::new()),
            last_hook_script: Mutex::new(None),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the reconciler loop until shutdown is signalled.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Reconciler started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Reconciler received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "Reconciliation cycle failed");
                    }
                }
            }
        }

        info!("Reconciler stopped");
    }

    /// Run one reconciliation cycle, dropping it if another is in flight.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<()> {
        if !self.store.try_acquire_named_lock(RECONCILER_LOCK).await? {
            debug!("Another reconciliation cycle is active, dropping this one");
            return Ok(());
        }
        let result = self.cycle().await;
        if let Err(err) = self.store.release_named_lock(RECONCILER_LOCK).await {
            warn!(error = %err, "Failed to release reconciler lock");
        }
        result
    }

    async fn cycle(&self) -> Result<()> {
        let course = self.sync_course().await?;
        self.sync_assignments().await?;
        self.sync_students().await?;
        self.sync_instructors().await?;
        self.regenerate_hooks(&course).await?;
        debug!("Reconciliation cycle completed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Course
    // ------------------------------------------------------------------

    async fn sync_course(&self) -> Result<Course> {
        let remote = self.lms.get_course().await?;
        match self.store.get_course().await? {
            None => {
                let master = self
                    .git
                    .get_repository(&self.config.organization, &self.config.master_repo)
                    .await?;
                let course = Course {
                    id: remote.id,
                    name: remote.name,
                    start_at: remote.start_at,
                    end_at: remote.end_at,
                    master_remote_url: master.clone_url,
                };
                self.store.create_course(course.clone()).await?;
                info!(course_id = course.id, "Course created");
                self.events.emit(DomainEvent::new(
                    EntityKind::Course,
                    Operation::Created,
                    course.id,
                ));
                Ok(course)
            }
            Some(mut local) => {
                if local.name != remote.name
                    || local.start_at != remote.start_at
                    || local.end_at != remote.end_at
                {
                    self.store
                        .update_course(&remote.name, remote.start_at, remote.end_at)
                        .await?;
                    local.name = remote.name;
                    local.start_at = remote.start_at;
                    local.end_at = remote.end_at;
                    self.events.emit(DomainEvent::new(
                        EntityKind::Course,
                        Operation::Updated,
                        local.id,
                    ));
                }
                Ok(local)
            }
        }
    }

    // ------------------------------------------------------------------
    // Assignments
    // ------------------------------------------------------------------

    async fn sync_assignments(&self) -> Result<()> {
        let remote = self.lms.list_assignments().await?;
        let remote_ids: HashSet<i64> = remote.iter().map(|a| a.id).collect();

        // Deletions run before creates so an LMS-side id reuse lands on a
        // clean row.
        for local in self.store.list_assignments().await? {
            if !remote_ids.contains(&local.id) {
                info!(assignment_id = local.id, "Assignment gone from LMS, deleting");
                self.store.delete_assignment(local.id).await?;
                self.events.emit(DomainEvent::new(
                    EntityKind::Assignment,
                    Operation::Deleted,
                    local.id,
                ));
            }
        }

        for assignment in remote {
            match self.store.get_assignment(assignment.id).await? {
                None => self.create_assignment(&assignment).await?,
                Some(local) => self.update_assignment(&local, &assignment).await?,
            }
        }
        Ok(())
    }

    async fn create_assignment(&self, remote: &LmsAssignment) -> Result<()> {
        let directory_path = directory_for(&remote.name);
        let created = self
            .store
            .create_assignment(NewAssignment {
                id: remote.id,
                name: remote.name.clone(),
                master_notebook_path: format!("{directory_path}-prof.ipynb"),
                directory_path,
                available_at: remote.unlock_at,
                due_at: remote.due_at,
                published: remote.published,
                max_attempts: remote.max_attempts(),
            })
            .await?;
        info!(assignment_id = created.id, name = %created.name, "Assignment created");
        self.events.emit(DomainEvent::new(
            EntityKind::Assignment,
            Operation::Created,
            created.id,
        ));
        Ok(())
    }

    async fn update_assignment(&self, local: &Assignment, remote: &LmsAssignment) -> Result<()> {
        let mut update = AssignmentUpdate::default();
        if local.name != remote.name {
            update.name = Some(remote.name.clone());
        }
        if local.available_at != remote.unlock_at {
            update.available_at = Some(remote.unlock_at);
        }
        if local.due_at != remote.due_at {
            update.due_at = Some(remote.due_at);
        }
        if local.published != remote.published {
            update.published = Some(remote.published);
        }
        if local.max_attempts != remote.max_attempts() {
            update.max_attempts = Some(remote.max_attempts());
        }
        if update.is_empty() {
            return Ok(());
        }
        self.store.update_assignment(local.id, update).await?;
        self.events.emit(DomainEvent::new(
            EntityKind::Assignment,
            Operation::Updated,
            local.id,
        ));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Roster
    // ------------------------------------------------------------------

    async fn sync_students(&self) -> Result<()> {
        let remote = self.lms.list_users(EnrollmentKind::Student).await?;
        self.delete_departed(UserKind::Student, &remote).await?;
        for user in &remote {
            if user.is_pending() {
                debug!(lms_id = user.id, "Enrollment pending, skipping");
                continue;
            }
            self.converge_user(user, UserKind::Student).await?;
        }
        Ok(())
    }

    async fn sync_instructors(&self) -> Result<()> {
        let remote = self.lms.list_users(EnrollmentKind::Teacher).await?;
        self.delete_departed(UserKind::Instructor, &remote).await?;
        for user in &remote {
            if user.is_pending() {
                debug!(lms_id = user.id, "Enrollment pending, skipping");
                continue;
            }
            self.converge_user(user, UserKind::Instructor).await?;
        }
        Ok(())
    }

    /// Delete local users of one kind whose mapped PID left the LMS roster.
    ///
    /// Users without a PID mapping cannot be matched to the roster and are
    /// left alone.
    async fn delete_departed(&self, kind: UserKind, remote: &[LmsUser]) -> Result<()> {
        let remote_pids: HashSet<&str> = remote
            .iter()
            .filter_map(|u| u.sis_user_id.as_deref())
            .collect();

        for local in self.store.list_users(kind).await? {
            let Some(pid) = self.store.get_pid_by_onyen(&local.onyen).await? else {
                continue;
            };
            if remote_pids.contains(pid.as_str()) {
                continue;
            }
            info!(onyen = %local.onyen, "User gone from LMS roster, deleting");
            self.store.delete_user(local.id).await?;
            // A second cycle may have removed the mapping already.
            let _ = self.store.unassociate_pid(&local.onyen).await?;
            self.events.emit(DomainEvent::new(
                EntityKind::User,
                Operation::Deleted,
                local.onyen.clone(),
            ));
        }
        Ok(())
    }

    async fn converge_user(&self, remote: &LmsUser, kind: UserKind) -> Result<()> {
        // is_pending() ruled out the None cases.
        let pid = remote.sis_user_id.as_deref().unwrap_or_default();
        let email = remote.email.as_deref().unwrap_or_default();
        let (first_name, last_name) = split_name(remote.name.as_deref().unwrap_or_default());

        let onyen = match self.resolve_onyen(pid).await? {
            Some(onyen) => onyen,
            None => {
                debug!(pid, "PID not resolvable, skipping until next cycle");
                return Ok(());
            }
        };

        match self.store.get_user_by_onyen(&onyen).await? {
            Some(existing) => {
                self.update_existing(&existing, &first_name, &last_name, email)
                    .await?;
                if self.store.get_pid_by_onyen(&onyen).await?.is_none() {
                    self.store.associate_pid(&onyen, pid).await?;
                }
                Ok(())
            }
            None => match kind {
                UserKind::Student => {
                    self.provision_student(&onyen, pid, &first_name, &last_name, email)
                        .await
                }
                _ => {
                    self.provision_instructor(&onyen, pid, &first_name, &last_name, email)
                        .await
                }
            },
        }
    }

    async fn resolve_onyen(&self, pid: &str) -> Result<Option<String>> {
        if let Some(onyen) = self.store.get_onyen_by_pid(pid).await? {
            return Ok(Some(onyen));
        }
        match self.directory.onyen_for_pid(pid).await {
            Ok(onyen) => Ok(onyen),
            Err(err) if err.is_retryable() => {
                // Directory hiccups must not fail the cycle.
                warn!(pid, error = %err, "Directory lookup failed, skipping user");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn update_existing(
        &self,
        existing: &User,
        first_name: &str,
        last_name: &str,
        email: &str,
    ) -> Result<()> {
        let mut update = UserUpdate::default();
        if existing.first_name != first_name {
            update.first_name = Some(first_name.to_string());
        }
        if existing.last_name != last_name {
            update.last_name = Some(last_name.to_string());
        }
        if existing.email != email {
            update.email = Some(email.to_string());
        }
        if update.first_name.is_none() && update.last_name.is_none() && update.email.is_none() {
            return Ok(());
        }
        self.store.update_user(existing.id, update).await?;
        self.events.emit(DomainEvent::new(
            EntityKind::User,
            Operation::Updated,
            existing.onyen.clone(),
        ));
        Ok(())
    }

    /// Provision a student across the Git host, credentials, and database.
    #[instrument(skip(self, first_name, last_name, email))]
    async fn provision_student(
        &self,
        onyen: &str,
        pid: &str,
        first_name: &str,
        last_name: &str,
        email: &str,
    ) -> Result<()> {
        let fork_name = format!("{}-{}", self.config.master_repo, onyen);
        let mut completed: Vec<ProvisionStep> = Vec::new();

        let result = async {
            let password = generate_password();
            self.git.create_user(onyen, email, &password).await?;
            completed.push(ProvisionStep::GitUser);

            self.store.create_auto_password(onyen, &password).await?;
            completed.push(ProvisionStep::AutoPassword);

            let fork = self
                .git
                .fork_repository(
                    &self.config.organization,
                    &self.config.master_repo,
                    onyen,
                    &fork_name,
                )
                .await?;
            completed.push(ProvisionStep::Fork);

            self.git
                .add_collaborator(
                    &self.config.organization,
                    &self.config.master_repo,
                    onyen,
                    CollaboratorPermission::Read,
                )
                .await?;
            completed.push(ProvisionStep::MasterCollaborator);

            let user = self
                .store
                .create_user(NewUser {
                    onyen: onyen.to_string(),
                    first_name: first_name.to_string(),
                    last_name: last_name.to_string(),
                    email: email.to_string(),
                    role: RoleName::Student,
                    detail: UserDetail::Student(StudentProfile {
                        base_extra_time_secs: 0,
                        joined_at: Utc::now(),
                        exited_at: None,
                        fork_remote_url: Some(fork.clone_url),
                        fork_cloned: false,
                    }),
                })
                .await?;
            completed.push(ProvisionStep::DbRow(user.id));

            self.store.associate_pid(onyen, pid).await?;
            completed.push(ProvisionStep::PidMapping);
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                info!(onyen, "Student provisioned");
                self.events.emit(DomainEvent::new(
                    EntityKind::User,
                    Operation::Created,
                    onyen,
                ));
                Ok(())
            }
            Err(err) => {
                warn!(onyen, error = %err, "Student provisioning failed, compensating");
                self.compensate(onyen, &fork_name, completed).await;
                Err(err)
            }
        }
    }

    /// Provision an instructor: Git user, credentials, master write access.
    #[instrument(skip(self, first_name, last_name, email))]
    async fn provision_instructor(
        &self,
        onyen: &str,
        pid: &str,
        first_name: &str,
        last_name: &str,
        email: &str,
    ) -> Result<()> {
        let mut completed: Vec<ProvisionStep> = Vec::new();

        let result = async {
            let password = generate_password();
            self.git.create_user(onyen, email, &password).await?;
            completed.push(ProvisionStep::GitUser);

            self.store.create_auto_password(onyen, &password).await?;
            completed.push(ProvisionStep::AutoPassword);

            self.git
                .add_collaborator(
                    &self.config.organization,
                    &self.config.master_repo,
                    onyen,
                    CollaboratorPermission::Write,
                )
                .await?;
            completed.push(ProvisionStep::MasterCollaborator);

            let user = self
                .store
                .create_user(NewUser {
                    onyen: onyen.to_string(),
                    first_name: first_name.to_string(),
                    last_name: last_name.to_string(),
                    email: email.to_string(),
                    role: RoleName::Instructor,
                    detail: UserDetail::Instructor,
                })
                .await?;
            completed.push(ProvisionStep::DbRow(user.id));

            self.store.associate_pid(onyen, pid).await?;
            completed.push(ProvisionStep::PidMapping);
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                info!(onyen, "Instructor provisioned");
                self.events.emit(DomainEvent::new(
                    EntityKind::User,
                    Operation::Created,
                    onyen,
                ));
                Ok(())
            }
            Err(err) => {
                warn!(onyen, error = %err, "Instructor provisioning failed, compensating");
                let fork_name = format!("{}-{}", self.config.master_repo, onyen);
                self.compensate(onyen, &fork_name, completed).await;
                Err(err)
            }
        }
    }

    /// Undo completed provisioning steps in reverse order.
    ///
    /// Compensation failures are logged and skipped; the original error is
    /// what the caller re-raises.
    async fn compensate(&self, onyen: &str, fork_name: &str, completed: Vec<ProvisionStep>) {
        for step in completed.into_iter().rev() {
            let outcome = match step {
                ProvisionStep::PidMapping => {
                    self.store.unassociate_pid(onyen).await.map(|_| ())
                }
                ProvisionStep::DbRow(id) => self.store.delete_user(id).await,
                ProvisionStep::MasterCollaborator => {
                    self.git
                        .remove_collaborator(
                            &self.config.organization,
                            &self.config.master_repo,
                            onyen,
                        )
                        .await
                }
                ProvisionStep::Fork => self.git.delete_repository(onyen, fork_name).await,
                ProvisionStep::AutoPassword => self.store.delete_auto_password(onyen).await,
                ProvisionStep::GitUser => self.git.delete_user(onyen).await,
            };
            if let Err(err) = outcome {
                warn!(onyen, error = %err, "Compensation step failed, continuing");
            }
        }
    }

    // ------------------------------------------------------------------
    // Hooks
    // ------------------------------------------------------------------

    /// Re-render the policy script and reinstall it when it changed.
    async fn regenerate_hooks(&self, course: &Course) -> Result<()> {
        let now = Utc::now();
        let assignments = self.store.list_assignments().await?;
        let students = self.store.list_users(UserKind::Student).await?;

        let mut inputs: Vec<HookAssignment> = Vec::with_capacity(assignments.len());
        for assignment in &assignments {
            let merge_controlled = if assignment.available_at.is_some()
                && assignment.due_at.is_some()
                && assignment.published
            {
                self.open_to_anyone(assignment, course, &students, now)
                    .await?
            } else {
                false
            };
            inputs.push(HookAssignment {
                directory_path: assignment.directory_path.clone(),
                master_notebook_path: assignment.master_notebook_path.clone(),
                merge_controlled,
            });
        }

        let script = synthesize_hooks(&inputs);
        let mut last = self.last_hook_script.lock().await;
        if last.as_deref() == Some(script.as_str()) {
            debug!("Hook script unchanged, skipping install");
            return Ok(());
        }
        self.git
            .install_pre_receive_hook(
                &self.config.organization,
                &self.config.master_repo,
                PRE_RECEIVE_HOOK_ID,
                &script,
            )
            .await?;
        info!(bytes = script.len(), "Pre-receive hook installed");
        *last = Some(script);
        Ok(())
    }

    /// Whether the assignment is open for at least one student: the current
    /// time has reached the earliest student-adjusted available instant.
    async fn open_to_anyone(
        &self,
        assignment: &Assignment,
        course: &Course,
        students: &[User],
        now: chrono::DateTime<Utc>,
    ) -> Result<bool> {
        let grants: HashMap<i64, _> = self
            .store
            .list_extra_time_for_assignment(assignment.id)
            .await?
            .into_iter()
            .map(|grant| (grant.student_id, grant))
            .collect();

        let mut earliest: Option<chrono::DateTime<Utc>> = None;
        for student in students {
            let Some(profile) = student.student_profile() else {
                continue;
            };
            let schedule = StudentSchedule::new(
                chrono::Duration::seconds(profile.base_extra_time_secs),
                grants.get(&student.id),
            );
            if let Some(available) = adjusted_available_at(assignment, course, &schedule) {
                earliest = Some(earliest.map_or(available, |e| e.min(available)));
            }
        }
        // With no students the unadjusted schedule decides.
        let earliest = match earliest {
            Some(instant) => Some(instant),
            None => adjusted_available_at(assignment, course, &StudentSchedule::default()),
        };
        Ok(earliest.is_some_and(|instant| now >= instant))
    }
}

/// Directory name for an assignment, derived from its display name.
fn directory_for(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if c.is_whitespace() { '-' } else { c })
        .collect()
}

fn split_name(full: &str) -> (String, String) {
    match full.trim().split_once(' ') {
        Some((first, rest)) => (first.to_string(), rest.trim().to_string()),
        None => (full.trim().to_string(), String::new()),
    }
}

fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}
