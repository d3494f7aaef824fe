// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Git host client for repository and user administration.
//!
//! Wraps the Git host's admin HTTP API. Calls use a 10 second timeout,
//! except the batched file modification which can carry large payloads and
//! gets 30 seconds. Content travels base64-encoded; callers pass raw bytes.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;
use tracing::{debug, instrument};

use crate::config::GitHostConfig;
use crate::error::{GitHostError, Result};
use crate::types::{
    BranchCommit, Collaborator, CollaboratorPermission, FileOperation, GitUser, Organization,
    Repository, SshKey,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MODIFY_FILES_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the Git host admin API.
pub struct GitHostClient {
    http: reqwest::Client,
    config: GitHostConfig,
}

impl GitHostClient {
    /// Create a new client from the given configuration.
    pub fn new(config: GitHostConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GitHostError::Config(e.to_string()))?;
        Ok(Self { http, config })
    }

    /// Create a client from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(GitHostConfig::from_env()?)
    }

    /// The adapter configuration.
    pub fn config(&self) -> &GitHostConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let mut body = response.text().await.unwrap_or_default();
        body.truncate(512);
        Err(GitHostError::Http {
            status: status.as_u16(),
            body,
        })
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Create a user.
    #[instrument(skip(self, password))]
    pub async fn create_user(&self, login: &str, email: &str, password: &str) -> Result<GitUser> {
        let response = self
            .http
            .post(self.url("admin/users"))
            .bearer_auth(&self.config.token)
            .json(&json!({
                "username": login,
                "email": email,
                "password": password,
                "must_change_password": false,
            }))
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    /// Delete a user.
    #[instrument(skip(self))]
    pub async fn delete_user(&self, login: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("admin/users/{login}")))
            .bearer_auth(&self.config.token)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Set an SSH key for a user.
    #[instrument(skip(self, key))]
    pub async fn set_ssh_key(&self, login: &str, title: &str, key: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("admin/users/{login}/keys")))
            .bearer_auth(&self.config.token)
            .json(&json!({ "title": title, "key": key }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// List a user's SSH keys.
    #[instrument(skip(self))]
    pub async fn list_ssh_keys(&self, login: &str) -> Result<Vec<SshKey>> {
        let response = self
            .http
            .get(self.url(&format!("users/{login}/keys")))
            .bearer_auth(&self.config.token)
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    /// Remove a user's SSH keys with the given title. Returns how many
    /// keys were removed.
    #[instrument(skip(self))]
    pub async fn remove_ssh_key(&self, login: &str, title: &str) -> Result<usize> {
        let keys = self.list_ssh_keys(login).await?;
        let mut removed = 0;
        for key in keys.iter().filter(|k| k.title == title) {
            let response = self
                .http
                .delete(self.url(&format!("admin/users/{login}/keys/{}", key.id)))
                .bearer_auth(&self.config.token)
                .send()
                .await?;
            Self::check(response).await?;
            removed += 1;
        }
        Ok(removed)
    }

    // =========================================================================
    // Organizations
    // =========================================================================

    /// Create an organization.
    #[instrument(skip(self))]
    pub async fn create_organization(&self, org: &str) -> Result<Organization> {
        let response = self
            .http
            .post(self.url("orgs"))
            .bearer_auth(&self.config.token)
            .json(&json!({ "username": org }))
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    /// Delete an organization.
    #[instrument(skip(self))]
    pub async fn delete_organization(&self, org: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("orgs/{org}")))
            .bearer_auth(&self.config.token)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    // =========================================================================
    // Repositories
    // =========================================================================

    /// Get a repository.
    #[instrument(skip(self))]
    pub async fn get_repository(&self, owner: &str, name: &str) -> Result<Repository> {
        let response = self
            .http
            .get(self.url(&format!("repos/{owner}/{name}")))
            .bearer_auth(&self.config.token)
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    /// Create a repository under an organization.
    #[instrument(skip(self))]
    pub async fn create_repository(&self, org: &str, name: &str, private: bool) -> Result<Repository> {
        let response = self
            .http
            .post(self.url(&format!("orgs/{org}/repos")))
            .bearer_auth(&self.config.token)
            .json(&json!({ "name": name, "private": private, "auto_init": false }))
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    /// Delete a repository.
    #[instrument(skip(self))]
    pub async fn delete_repository(&self, owner: &str, name: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("repos/{owner}/{name}")))
            .bearer_auth(&self.config.token)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Fork a repository into a user namespace and rename the fork.
    ///
    /// Returns the repository as it exists after the rename. The pre-rename
    /// clone URL is never exposed, so callers cannot cache it by accident.
    #[instrument(skip(self))]
    pub async fn fork_repository(
        &self,
        owner: &str,
        name: &str,
        fork_owner: &str,
        fork_name: &str,
    ) -> Result<Repository> {
        debug!("Forking repository");
        let response = self
            .http
            .post(self.url(&format!("repos/{owner}/{name}/forks")))
            .bearer_auth(&self.config.token)
            .json(&json!({ "owner": fork_owner }))
            .send()
            .await?;
        let forked: Repository = Self::check(response).await?.json().await?;

        debug!(from = %forked.name, to = fork_name, "Renaming fork");
        let response = self
            .http
            .patch(self.url(&format!("repos/{fork_owner}/{}", forked.name)))
            .bearer_auth(&self.config.token)
            .json(&json!({ "name": fork_name }))
            .send()
            .await?;
        let renamed: Repository = Self::check(response).await?.json().await?;
        Ok(renamed)
    }

    /// Apply an ordered batch of file operations as a single commit.
    #[instrument(skip(self, operations), fields(count = operations.len()))]
    pub async fn modify_files(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
        message: &str,
        operations: &[FileOperation],
    ) -> Result<()> {
        let files: Vec<serde_json::Value> = operations
            .iter()
            .map(|op| {
                let mut entry = json!({
                    "operation": op.kind,
                    "path": op.path,
                });
                if let Some(from_path) = &op.from_path {
                    entry["from_path"] = json!(from_path);
                }
                if let Some(content) = &op.content {
                    entry["content"] = json!(BASE64.encode(content));
                }
                entry
            })
            .collect();

        let response = self
            .http
            .post(self.url(&format!("repos/{owner}/{name}/contents")))
            .bearer_auth(&self.config.token)
            .timeout(MODIFY_FILES_TIMEOUT)
            .json(&json!({
                "branch": branch,
                "message": message,
                "files": files,
            }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Download a repository subtree at a tree-ish as a tar.gz archive.
    #[instrument(skip(self))]
    pub async fn download_archive(
        &self,
        owner: &str,
        name: &str,
        tree_ish: &str,
        path_prefix: Option<&str>,
    ) -> Result<Vec<u8>> {
        let mut request = self
            .http
            .get(self.url(&format!("repos/{owner}/{name}/archive/{tree_ish}.tar.gz")))
            .bearer_auth(&self.config.token);
        if let Some(prefix) = path_prefix {
            request = request.query(&[("path", prefix)]);
        }
        let response = Self::check(request.send().await?).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// List commits on a branch, newest first.
    #[instrument(skip(self))]
    pub async fn list_commits(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
    ) -> Result<Vec<BranchCommit>> {
        let response = self
            .http
            .get(self.url(&format!("repos/{owner}/{name}/commits")))
            .bearer_auth(&self.config.token)
            .query(&[("sha", branch)])
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    /// Fetch a single commit by SHA.
    #[instrument(skip(self))]
    pub async fn get_commit(&self, owner: &str, name: &str, sha: &str) -> Result<BranchCommit> {
        let response = self
            .http
            .get(self.url(&format!("repos/{owner}/{name}/git/commits/{sha}")))
            .bearer_auth(&self.config.token)
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    /// Install a pre-receive hook by id, replacing any previous script.
    #[instrument(skip(self, script), fields(bytes = script.len()))]
    pub async fn install_pre_receive_hook(
        &self,
        owner: &str,
        name: &str,
        hook_id: &str,
        script: &str,
    ) -> Result<()> {
        let response = self
            .http
            .patch(self.url(&format!("repos/{owner}/{name}/hooks/git/{hook_id}")))
            .bearer_auth(&self.config.token)
            .json(&json!({ "content": script }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    // =========================================================================
    // Collaborators
    // =========================================================================

    /// List collaborators on a repository.
    #[instrument(skip(self))]
    pub async fn list_collaborators(&self, owner: &str, name: &str) -> Result<Vec<Collaborator>> {
        let response = self
            .http
            .get(self.url(&format!("repos/{owner}/{name}/collaborators")))
            .bearer_auth(&self.config.token)
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    /// Add a collaborator or change their permission.
    #[instrument(skip(self))]
    pub async fn add_collaborator(
        &self,
        owner: &str,
        name: &str,
        login: &str,
        permission: CollaboratorPermission,
    ) -> Result<()> {
        let response = self
            .http
            .put(self.url(&format!("repos/{owner}/{name}/collaborators/{login}")))
            .bearer_auth(&self.config.token)
            .json(&json!({ "permission": permission.as_str() }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Remove a collaborator.
    #[instrument(skip(self))]
    pub async fn remove_collaborator(&self, owner: &str, name: &str, login: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("repos/{owner}/{name}/collaborators/{login}")))
            .bearer_auth(&self.config.token)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
