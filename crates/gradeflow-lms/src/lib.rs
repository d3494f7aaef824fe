// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Gradeflow LMS adapter.
//!
//! A narrow client over the LMS HTTP API: course/assignment/enrollment
//! reads for the reconciler, submission reads for grading, and the upsync
//! writes (file upload, grade post, assignment schedule update). PID realm
//! decoration is an adapter concern; everything above this crate deals in
//! bare PIDs.

pub mod client;
pub mod config;
pub mod error;
pub mod types;

pub use client::LmsClient;
pub use config::LmsConfig;
pub use error::{LmsError, Result};
