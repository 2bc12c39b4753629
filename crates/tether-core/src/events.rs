//! Relation events.
//!
//! The engine publishes one event per link change, rejection, repair, and
//! detected drift. Subscribers use them to schedule follow-up reconciliation
//! or to keep an audit trail; nothing in the engine depends on delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::EntityRef;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// An event emitted by the relation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationEvent {
    pub id: EventId,
    /// Tenant of the entities involved, when known.
    pub tenant_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl RelationEvent {
    pub fn new(tenant_id: Option<String>, payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            tenant_id,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// The event payload, tagged by type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type")]
pub enum EventPayload {
    /// A link was written on one or both sides.
    RelationAdded {
        source: EntityRef,
        target: EntityRef,
        relation: String,
        writes: u8,
    },
    /// A link was removed on one or both sides.
    RelationRemoved {
        source: EntityRef,
        target: EntityRef,
        relation: String,
        writes: u8,
    },
    /// One side committed and the mirrored write failed.
    PartialFailure {
        committed: EntityRef,
        failed: EntityRef,
        field: String,
        relation: String,
        reason: String,
    },
    /// A write was refused because the tenants differ or one is missing.
    CrossTenantRejected {
        source: EntityRef,
        target: EntityRef,
        relation: String,
    },
    /// Reconciliation restored a missing reference on `entity`.
    ReferenceRepaired {
        entity: EntityRef,
        field: String,
        id: String,
    },
    /// A stored id no longer resolves to a document.
    DanglingReference {
        entity: EntityRef,
        relation: String,
        id: String,
    },
}

impl EventPayload {
    /// Short machine name for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RelationAdded { .. } => "relation_added",
            Self::RelationRemoved { .. } => "relation_removed",
            Self::PartialFailure { .. } => "partial_failure",
            Self::CrossTenantRejected { .. } => "cross_tenant_rejected",
            Self::ReferenceRepaired { .. } => "reference_repaired",
            Self::DanglingReference { .. } => "dangling_reference",
        }
    }
}
