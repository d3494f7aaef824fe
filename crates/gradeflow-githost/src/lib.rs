// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Git host adapter for gradeflow.
//!
//! Talks to the Git host's admin API for repositories, forks, collaborators,
//! batched file commits, and archive downloads, and synthesizes the
//! pre-receive hook script that enforces assignment file policy.

pub mod client;
pub mod config;
pub mod error;
pub mod hooks;
pub mod types;

pub use client::GitHostClient;
pub use config::GitHostConfig;
pub use error::{GitHostError, Result};
