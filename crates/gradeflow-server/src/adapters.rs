// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Adapter seams between the services and the external systems.
//!
//! Services depend on these traits rather than on the HTTP clients so that
//! tests can substitute in-memory doubles. The client implementations
//! translate their adapter errors into [`CoreError`] kinds at this boundary;
//! interior services never see `reqwest` types.

use async_trait::async_trait;

use gradeflow_core::Result;
use gradeflow_githost::GitHostClient;
use gradeflow_githost::types::{BranchCommit, CollaboratorPermission, GitUser, Repository};
use gradeflow_lms::LmsClient;
use gradeflow_lms::types::{
    DuplicatePolicy, EnrollmentKind, GradePost, LmsAssignment, LmsAssignmentUpdate, LmsCourse,
    LmsFile, LmsUser,
};

/// LMS operations the services consume.
#[async_trait]
pub trait LmsApi: Send + Sync {
    /// Fetch the configured course.
    async fn get_course(&self) -> Result<LmsCourse>;

    /// List all assignments in the course.
    async fn list_assignments(&self) -> Result<Vec<LmsAssignment>>;

    /// Fetch one assignment.
    async fn get_assignment(&self, assignment_id: i64) -> Result<LmsAssignment>;

    /// List enrolled users of one kind, with bare PIDs.
    async fn list_users(&self, kind: EnrollmentKind) -> Result<Vec<LmsUser>>;

    /// Upload a file into a course folder.
    async fn upload_course_file(
        &self,
        folder_path: &str,
        file_name: &str,
        content: Vec<u8>,
        on_duplicate: DuplicatePolicy,
    ) -> Result<LmsFile>;

    /// Post a grade for one student on one assignment.
    async fn post_grade(&self, assignment_id: i64, post: &GradePost) -> Result<()>;

    /// Push a schedule/publishedness update.
    async fn update_assignment(
        &self,
        assignment_id: i64,
        update: &LmsAssignmentUpdate,
    ) -> Result<LmsAssignment>;
}

#[async_trait]
impl LmsApi for LmsClient {
    async fn get_course(&self) -> Result<LmsCourse> {
        Ok(LmsClient::get_course(self).await?)
    }

    async fn list_assignments(&self) -> Result<Vec<LmsAssignment>> {
        Ok(LmsClient::list_assignments(self).await?)
    }

    async fn get_assignment(&self, assignment_id: i64) -> Result<LmsAssignment> {
        Ok(LmsClient::get_assignment(self, assignment_id).await?)
    }

    async fn list_users(&self, kind: EnrollmentKind) -> Result<Vec<LmsUser>> {
        Ok(LmsClient::list_users(self, kind).await?)
    }

    async fn upload_course_file(
        &self,
        folder_path: &str,
        file_name: &str,
        content: Vec<u8>,
        on_duplicate: DuplicatePolicy,
    ) -> Result<LmsFile> {
        Ok(LmsClient::upload_course_file(self, folder_path, file_name, content, on_duplicate)
            .await?)
    }

    async fn post_grade(&self, assignment_id: i64, post: &GradePost) -> Result<()> {
        Ok(LmsClient::post_grade(self, assignment_id, post).await?)
    }

    async fn update_assignment(
        &self,
        assignment_id: i64,
        update: &LmsAssignmentUpdate,
    ) -> Result<LmsAssignment> {
        Ok(LmsClient::update_assignment(self, assignment_id, update).await?)
    }
}

/// Git host operations the services consume.
#[async_trait]
pub trait GitHostApi: Send + Sync {
    /// Create a user on the Git host.
    async fn create_user(&self, login: &str, email: &str, password: &str) -> Result<GitUser>;

    /// Delete a user on the Git host.
    async fn delete_user(&self, login: &str) -> Result<()>;

    /// Get a repository.
    async fn get_repository(&self, owner: &str, name: &str) -> Result<Repository>;

    /// Delete a repository.
    async fn delete_repository(&self, owner: &str, name: &str) -> Result<()>;

    /// Fork and rename, returning the post-rename repository.
    async fn fork_repository(
        &self,
        owner: &str,
        name: &str,
        fork_owner: &str,
        fork_name: &str,
    ) -> Result<Repository>;

    /// Add a collaborator or change their permission.
    async fn add_collaborator(
        &self,
        owner: &str,
        name: &str,
        login: &str,
        permission: CollaboratorPermission,
    ) -> Result<()>;

    /// Remove a collaborator.
    async fn remove_collaborator(&self, owner: &str, name: &str, login: &str) -> Result<()>;

    /// Download a repository subtree at a tree-ish as a tar.gz archive.
    async fn download_archive(
        &self,
        owner: &str,
        name: &str,
        tree_ish: &str,
        path_prefix: Option<&str>,
    ) -> Result<Vec<u8>>;

    /// Fetch a single commit by SHA.
    async fn get_commit(&self, owner: &str, name: &str, sha: &str) -> Result<BranchCommit>;

    /// Install a pre-receive hook, replacing any previous script.
    async fn install_pre_receive_hook(
        &self,
        owner: &str,
        name: &str,
        hook_id: &str,
        script: &str,
    ) -> Result<()>;
}

#[async_trait]
impl GitHostApi for GitHostClient {
    async fn create_user(&self, login: &str, email: &str, password: &str) -> Result<GitUser> {
        Ok(GitHostClient::create_user(self, login, email, password).await?)
    }

    async fn delete_user(&self, login: &str) -> Result<()> {
        Ok(GitHostClient::delete_user(self, login).await?)
    }

    async fn get_repository(&self, owner: &str, name: &str) -> Result<Repository> {
        Ok(GitHostClient::get_repository(self, owner, name).await?)
    }

    async fn delete_repository(&self, owner: &str, name: &str) -> Result<()> {
        Ok(GitHostClient::delete_repository(self, owner, name).await?)
    }

    async fn fork_repository(
        &self,
        owner: &str,
        name: &str,
        fork_owner: &str,
        fork_name: &str,
    ) -> Result<Repository> {
        Ok(GitHostClient::fork_repository(self, owner, name, fork_owner, fork_name).await?)
    }

    async fn add_collaborator(
        &self,
        owner: &str,
        name: &str,
        login: &str,
        permission: CollaboratorPermission,
    ) -> Result<()> {
        Ok(GitHostClient::add_collaborator(self, owner, name, login, permission).await?)
    }

    async fn remove_collaborator(&self, owner: &str, name: &str, login: &str) -> Result<()> {
        Ok(GitHostClient::remove_collaborator(self, owner, name, login).await?)
    }

    async fn download_archive(
        &self,
        owner: &str,
        name: &str,
        tree_ish: &str,
        path_prefix: Option<&str>,
    ) -> Result<Vec<u8>> {
        Ok(GitHostClient::download_archive(self, owner, name, tree_ish, path_prefix).await?)
    }

    async fn get_commit(&self, owner: &str, name: &str, sha: &str) -> Result<BranchCommit> {
        Ok(GitHostClient::get_commit(self, owner, name, sha).await?)
    }

    async fn install_pre_receive_hook(
        &self,
        owner: &str,
        name: &str,
        hook_id: &str,
        script: &str,
    ) -> Result<()> {
        Ok(GitHostClient::install_pre_receive_hook(self, owner, name, hook_id, script).await?)
    }
}
