// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire types for the Git host adapter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A repository on the Git host.
#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    /// Repository name.
    pub name: String,
    /// Owner login (user or organization).
    pub owner: RepositoryOwner,
    /// HTTPS clone URL.
    pub clone_url: String,
}

/// Owner of a repository.
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryOwner {
    /// Owner login.
    pub login: String,
}

/// Collaborator permission level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollaboratorPermission {
    /// Pull only.
    Read,
    /// Pull and push.
    Write,
    /// Full control.
    Admin,
}

impl CollaboratorPermission {
    /// Returns the string representation of the permission.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
        }
    }
}

/// A collaborator on a repository.
#[derive(Debug, Clone, Deserialize)]
pub struct Collaborator {
    /// Collaborator login.
    pub login: String,
    /// Granted permission, when the host reports one.
    #[serde(default)]
    pub permission: Option<CollaboratorPermission>,
}

/// Kind of batched file operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOperationKind {
    Create,
    Update,
    Delete,
    Rename,
}

/// One entry in a batched file modification.
///
/// Content is supplied raw; base64 transport encoding happens inside the
/// client. Order is preserved across the batch.
#[derive(Debug, Clone)]
pub struct FileOperation {
    /// Operation kind.
    pub kind: FileOperationKind,
    /// Target path.
    pub path: String,
    /// Source path, for renames.
    pub from_path: Option<String>,
    /// New content, for creates and updates.
    pub content: Option<Vec<u8>>,
}

impl FileOperation {
    /// Create a file with the given content.
    pub fn create(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: FileOperationKind::Create,
            path: path.into(),
            from_path: None,
            content: Some(content.into()),
        }
    }

    /// Replace a file's content.
    pub fn update(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: FileOperationKind::Update,
            path: path.into(),
            from_path: None,
            content: Some(content.into()),
        }
    }

    /// Delete a file.
    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            kind: FileOperationKind::Delete,
            path: path.into(),
            from_path: None,
            content: None,
        }
    }

    /// Move a file.
    pub fn rename(from_path: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            kind: FileOperationKind::Rename,
            path: path.into(),
            from_path: Some(from_path.into()),
            content: None,
        }
    }
}

/// A commit on a branch.
#[derive(Debug, Clone, Deserialize)]
pub struct BranchCommit {
    /// Commit SHA.
    pub sha: String,
    /// Commit instant, when the host reports one.
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

/// An organization on the Git host.
#[derive(Debug, Clone, Deserialize)]
pub struct Organization {
    /// Organization login.
    pub username: String,
}

/// An SSH key registered for a user.
#[derive(Debug, Clone, Deserialize)]
pub struct SshKey {
    /// Key id assigned by the host.
    pub id: i64,
    /// Key title.
    pub title: String,
}

/// A user on the Git host.
#[derive(Debug, Clone, Deserialize)]
pub struct GitUser {
    /// User login.
    pub login: String,
    /// User email.
    pub email: String,
}
