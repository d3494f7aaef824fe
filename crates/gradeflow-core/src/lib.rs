// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Gradeflow Core - Domain Model and Store
//!
//! This crate holds the domain model of the gradeflow control plane:
//! the course/user/assignment/submission records, the per-student schedule
//! resolver and assignment status derivation, the transactional domain
//! store (Postgres and in-memory backends), the static role/permission
//! seed, and the in-process event emitter.
//!
//! Services built on top of this crate (reconciler, submission service,
//! grading orchestrator) live in `gradeflow-server`; the LMS and Git host
//! adapters live in `gradeflow-lms` and `gradeflow-githost`.

pub mod error;
pub mod events;
pub mod migrations;
pub mod roles;
pub mod schedule;
pub mod store;

pub use error::{CoreError, Precondition, Result};
