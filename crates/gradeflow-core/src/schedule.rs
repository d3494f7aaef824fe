// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-student schedule resolution and assignment status derivation.
//!
//! The base assignment schedule is adjusted per student by the student's
//! base extra time and any (deferred_time, extra_time) grant. Assignment
//! status is then derived from the adjusted schedule and the published flag.
//! Everything here is pure; callers supply `now`.

use chrono::{DateTime, Duration, Utc};

use crate::store::{Assignment, Course, ExtraTime};

/// Observable lifecycle state of an assignment for one student.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentStatus {
    /// Hidden from students.
    Unpublished,
    /// Published but not yet available.
    Upcoming,
    /// Accepting submissions.
    Open,
    /// Past the adjusted due date.
    Closed,
}

impl AssignmentStatus {
    /// Returns the string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpublished => "unpublished",
            Self::Upcoming => "upcoming",
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

/// Per-student schedule inputs.
///
/// `extra` is the optional grant for this (student, assignment) pair;
/// deferred and extra time default to zero when no grant exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct StudentSchedule {
    /// Student-wide accommodation, applied to every deadline.
    pub base_extra_time: Duration,
    /// Delay before the assignment opens for this student.
    pub deferred_time: Duration,
    /// Extension of the deadline for this student.
    pub extra_time: Duration,
}

impl StudentSchedule {
    /// Build the schedule inputs from a student's accommodation and an
    /// optional extra-time grant.
    pub fn new(base_extra_time: Duration, extra: Option<&ExtraTime>) -> Self {
        Self {
            base_extra_time,
            deferred_time: extra
                .map(|e| Duration::seconds(e.deferred_time_secs))
                .unwrap_or_else(Duration::zero),
            extra_time: extra
                .map(|e| Duration::seconds(e.extra_time_secs))
                .unwrap_or_else(Duration::zero),
        }
    }
}

/// Adjusted instant at which the assignment opens for this student.
///
/// Falls back to the course start when the assignment has no available
/// date; `None` when neither is set.
pub fn adjusted_available_at(
    assignment: &Assignment,
    course: &Course,
    schedule: &StudentSchedule,
) -> Option<DateTime<Utc>> {
    let base = assignment.available_at.or(course.start_at)?;
    Some(base + schedule.deferred_time)
}

/// Adjusted deadline for this student.
///
/// Falls back to the course end when the assignment has no due date;
/// `None` when neither is set. Deferral shifts the whole window, so it
/// extends the deadline too.
pub fn adjusted_due_at(
    assignment: &Assignment,
    course: &Course,
    schedule: &StudentSchedule,
) -> Option<DateTime<Utc>> {
    let base = assignment.due_at.or(course.end_at)?;
    Some(base + schedule.deferred_time + schedule.extra_time + schedule.base_extra_time)
}

/// Derive the assignment status from the adjusted schedule.
///
/// Rules are ordered; the first match wins. Equality with either bound
/// counts as OPEN: a push at exactly the due instant is accepted.
pub fn assignment_status(
    published: bool,
    adjusted_available_at: Option<DateTime<Utc>>,
    adjusted_due_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> AssignmentStatus {
    if !published {
        return AssignmentStatus::Unpublished;
    }
    match adjusted_available_at {
        None => return AssignmentStatus::Upcoming,
        Some(available) if now < available => return AssignmentStatus::Upcoming,
        Some(_) => {}
    }
    match adjusted_due_at {
        Some(due) if now > due => AssignmentStatus::Closed,
        _ => AssignmentStatus::Open,
    }
}

/// Status of an assignment for one student at `now`.
pub fn status_for_student(
    assignment: &Assignment,
    course: &Course,
    schedule: &StudentSchedule,
    now: DateTime<Utc>,
) -> AssignmentStatus {
    assignment_status(
        assignment.published,
        adjusted_available_at(assignment, course, schedule),
        adjusted_due_at(assignment, course, schedule),
        now,
    )
}
