// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Directory resolution of LMS PIDs to onyens.
//!
//! The institutional directory is the only authority for the PID -> onyen
//! mapping of users the store has never seen. A lookup that times out
//! surfaces as [`CoreError::LdapTimeout`] so the reconciler can skip the
//! user and retry next cycle.

use std::collections::HashMap;

use async_trait::async_trait;

use gradeflow_core::Result;

/// Resolves institutional PIDs to onyens.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Look up the onyen for a PID. `None` means the PID is unknown.
    async fn onyen_for_pid(&self, pid: &str) -> Result<Option<String>>;
}

/// Fixed-table directory for tests and deployments without directory access.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    entries: HashMap<String, String>,
}

impl StaticDirectory {
    /// Build a directory from (pid, onyen) pairs.
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Add one mapping.
    pub fn insert(&mut self, pid: impl Into<String>, onyen: impl Into<String>) {
        self.entries.insert(pid.into(), onyen.into());
    }

    /// Load a directory from a roster file of `<pid> <onyen>` lines.
    ///
    /// Blank lines and lines starting with `#` are ignored.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut directory = Self::default();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((pid, onyen)) = line.split_once(char::is_whitespace) {
                directory.insert(pid.trim(), onyen.trim());
            }
        }
        Ok(directory)
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn onyen_for_pid(&self, pid: &str) -> Result<Option<String>> {
        Ok(self.entries.get(pid).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_directory_lookup() {
        let mut directory = StaticDirectory::default();
        directory.insert("730123456", "jdoe");

        assert_eq!(
            directory.onyen_for_pid("730123456").await.unwrap(),
            Some("jdoe".to_string())
        );
        assert_eq!(directory.onyen_for_pid("000000000").await.unwrap(), None);
    }
}
