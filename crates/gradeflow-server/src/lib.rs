// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Gradeflow Server - Control-Plane Services
//!
//! This crate composes the domain model with the LMS and Git host adapters:
//! - Reconciler: periodic downsync of course, assignments, and roster
//! - Submission service: admission control and notebook upload
//! - Grading orchestrator: autograding, manual grading, LMS writeback
//! - Assignment service: instructor-facing mutations with LMS upsync
//!
//! All services depend on the [`gradeflow_core::store::Store`] trait and
//! the adapter traits in [`adapters`], so every path is testable against
//! in-memory fakes.

pub mod adapters;
pub mod assignments;
pub mod config;
pub mod directory;
pub mod grader;
pub mod grading;
pub mod reconciler;
pub mod submission;
