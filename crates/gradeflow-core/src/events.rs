// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process domain event emitter.
//!
//! CRUD notifications are broadcast to interested listeners (websocket
//! bridges, internal observers). Delivery is best-effort: a publisher never
//! fails because a receiver is slow, lagged, or gone.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Entity kinds carried in domain events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Course,
    User,
    Assignment,
    ExtraTime,
    Submission,
    GradeReport,
}

/// CRUD operation carried in domain events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Created,
    Updated,
    Deleted,
}

/// A domain mutation notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// What kind of entity changed.
    pub entity: EntityKind,
    /// How it changed.
    pub operation: Operation,
    /// Entity id, stringified (numeric ids and onyens both occur).
    pub id: String,
}

impl DomainEvent {
    /// Build an event.
    pub fn new(entity: EntityKind, operation: Operation, id: impl ToString) -> Self {
        Self {
            entity,
            operation,
            id: id.to_string(),
        }
    }
}

/// Broadcast emitter for domain events.
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventEmitter {
    /// Create an emitter with the given per-receiver buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all current subscribers.
    ///
    /// Returns the number of receivers the event reached. Zero receivers
    /// is not an error.
    pub fn emit(&self, event: DomainEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
