// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Assignment management.
//!
//! Mutations take the authenticated principal explicitly; there is no
//! ambient request state. Schedule and publishedness changes are pushed to
//! the LMS in the same call. Unpublishing is fail-closed: when the LMS
//! cannot confirm the assignment is unpublishable, the request is refused.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use gradeflow_core::error::{CoreError, Precondition, Result};
use gradeflow_core::events::{DomainEvent, EntityKind, EventEmitter, Operation};
use gradeflow_core::roles::is_authorized;
use gradeflow_core::store::{Assignment, AssignmentUpdate, ExtraTime, Store, User};
use gradeflow_lms::types::LmsAssignmentUpdate;

use crate::adapters::LmsApi;

/// Assignment reads and instructor-facing mutations.
pub struct AssignmentService {
    store: Arc<dyn Store>,
    lms: Arc<dyn LmsApi>,
    events: EventEmitter,
}

impl AssignmentService {
    /// Create the service.
    pub fn new(store: Arc<dyn Store>, lms: Arc<dyn LmsApi>, events: EventEmitter) -> Self {
        Self { store, lms, events }
    }

    /// Get an assignment.
    pub async fn get_assignment(&self, principal: &User, id: i64) -> Result<Assignment> {
        authorize(principal, "assignment:get")?;
        self.store
            .get_assignment(id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("assignment {id}")))
    }

    /// List all assignments.
    pub async fn list_assignments(&self, principal: &User) -> Result<Vec<Assignment>> {
        authorize(principal, "assignment:get")?;
        self.store.list_assignments().await
    }

    /// Apply a partial update and push schedule changes to the LMS.
    ///
    /// Unpublishing consults the LMS first and refuses unless the LMS
    /// positively reports the assignment as unpublishable.
    #[instrument(skip(self, principal, update), fields(principal = %principal.onyen))]
    pub async fn update_assignment(
        &self,
        principal: &User,
        id: i64,
        update: AssignmentUpdate,
    ) -> Result<Assignment> {
        authorize(principal, "assignment:modify")?;
        let current = self
            .store
            .get_assignment(id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("assignment {id}")))?;

        if update.published == Some(false) && current.published {
            match self.lms.get_assignment(id).await {
                Ok(remote) if remote.unpublishable => {}
                Ok(_) => {
                    return Err(CoreError::PreconditionFailed(
                        Precondition::AssignmentCannotBeUnpublished,
                    ));
                }
                Err(err) => {
                    // Without a positive answer the unpublish is refused.
                    warn!(assignment_id = id, error = %err, "Unpublishable check failed");
                    return Err(CoreError::PreconditionFailed(
                        Precondition::AssignmentCannotBeUnpublished,
                    ));
                }
            }
        }

        let upsync = LmsAssignmentUpdate {
            unlock_at: update.available_at,
            due_at: update.due_at,
            published: update.published,
        };
        let updated = self.store.update_assignment(id, update).await?;

        if upsync.unlock_at.is_some() || upsync.due_at.is_some() || upsync.published.is_some() {
            self.lms.update_assignment(id, &upsync).await?;
        }

        info!(assignment_id = id, "Assignment updated");
        self.events
            .emit(DomainEvent::new(EntityKind::Assignment, Operation::Updated, id));
        Ok(updated)
    }

    /// Create or replace an extra-time grant.
    pub async fn upsert_extra_time(
        &self,
        principal: &User,
        student_id: i64,
        assignment_id: i64,
        deferred_time_secs: i64,
        extra_time_secs: i64,
    ) -> Result<ExtraTime> {
        authorize(principal, "student:modify")?;
        let grant = self
            .store
            .upsert_extra_time(student_id, assignment_id, deferred_time_secs, extra_time_secs)
            .await?;
        self.events.emit(DomainEvent::new(
            EntityKind::ExtraTime,
            Operation::Updated,
            grant.id,
        ));
        Ok(grant)
    }
}

fn authorize(principal: &User, permission: &str) -> Result<()> {
    if is_authorized(principal.role, permission, false) {
        Ok(())
    } else {
        Err(CoreError::PermissionDenied)
    }
}
