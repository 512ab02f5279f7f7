//! Change records: the durable unit of local mutation and its consolidated
//! counterpart.

use crate::payload::FieldMap;
use crate::types::{EntityKey, RecordId, Timestamp};
use serde::{Deserialize, Serialize};

/// The kind of mutation a change carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Create an entity.
    Insert,
    /// Replace an entity's payload.
    Update,
    /// Remove an entity.
    Delete,
}

impl Operation {
    /// Returns true for `Insert`.
    #[must_use]
    pub fn is_insert(self) -> bool {
        matches!(self, Operation::Insert)
    }

    /// Returns true for `Delete`.
    #[must_use]
    pub fn is_delete(self) -> bool {
        matches!(self, Operation::Delete)
    }

    /// Whether this operation must carry a payload.
    #[must_use]
    pub fn requires_payload(self) -> bool {
        !self.is_delete()
    }

    /// Stable lowercase name, matching the wire encoding.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

/// Flush state of an outbox record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    /// Recorded locally, not yet accepted by the hub.
    Pending,
    /// Accepted by the hub; kept for audit until compaction.
    Flushed,
}

impl RecordState {
    /// Returns true for `Pending`.
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, RecordState::Pending)
    }
}

/// A local mutation before it is recorded.
///
/// The constructors are the only way to build one, so a payload is present
/// exactly when the operation requires it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalChange {
    entity: EntityKey,
    op: Operation,
    payload: Option<FieldMap>,
}

impl LocalChange {
    /// An entity creation.
    pub fn insert(entity: EntityKey, payload: FieldMap) -> Self {
        Self {
            entity,
            op: Operation::Insert,
            payload: Some(payload),
        }
    }

    /// A payload replacement.
    pub fn update(entity: EntityKey, payload: FieldMap) -> Self {
        Self {
            entity,
            op: Operation::Update,
            payload: Some(payload),
        }
    }

    /// An entity removal.
    pub fn delete(entity: EntityKey) -> Self {
        Self {
            entity,
            op: Operation::Delete,
            payload: None,
        }
    }

    /// The entity this change addresses.
    #[must_use]
    pub fn entity(&self) -> &EntityKey {
        &self.entity
    }

    /// The operation kind.
    #[must_use]
    pub fn op(&self) -> Operation {
        self.op
    }

    /// Consumes the change into its parts.
    #[must_use]
    pub fn into_parts(self) -> (EntityKey, Operation, Option<FieldMap>) {
        (self.entity, self.op, self.payload)
    }
}

/// A durable, ordered record of one local mutation.
///
/// Created by the change tracker whenever a local write happens. All fields
/// are fixed at creation except [`ChangeRecord::state`], which moves from
/// `Pending` to `Flushed` once an upload receipt names the record's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Outbox-assigned identifier; append order equals id order.
    pub id: RecordId,
    /// The entity this change addresses.
    pub entity: EntityKey,
    /// The mutation kind.
    pub op: Operation,
    /// New payload for insert/update; `None` for delete.
    pub payload: Option<FieldMap>,
    /// Wall-clock instant of the local write.
    pub origin_ts: Timestamp,
    /// Flush state.
    pub state: RecordState,
}

impl ChangeRecord {
    /// Builds a pending record from a local change.
    #[must_use]
    pub fn from_change(id: RecordId, change: LocalChange, origin_ts: Timestamp) -> Self {
        let (entity, op, payload) = change.into_parts();
        Self {
            id,
            entity,
            op,
            payload,
            origin_ts,
            state: RecordState::Pending,
        }
    }

    /// Transitions the record to `Flushed`.
    pub fn flush(&mut self) {
        self.state = RecordState::Flushed;
    }

    /// Returns true while the record awaits an upload receipt.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state.is_pending()
    }

    /// The consolidated view of this record, as the hub would serve it.
    #[must_use]
    pub fn to_remote(&self) -> RemoteChange {
        RemoteChange {
            entity: self.entity.clone(),
            op: self.op,
            payload: self.payload.clone(),
            origin_ts: self.origin_ts,
        }
    }
}

/// A consolidated change served by the hub.
///
/// Identical in shape to the mutation part of a [`ChangeRecord`]; record id
/// and flush state are site-local and never travel back down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChange {
    /// The entity this change addresses.
    pub entity: EntityKey,
    /// The mutation kind.
    pub op: Operation,
    /// New payload for insert/update; `None` for delete.
    pub payload: Option<FieldMap>,
    /// Wall-clock instant of the originating local write.
    pub origin_ts: Timestamp,
}

impl RemoteChange {
    /// An upsert as the hub would serve it.
    pub fn upsert(entity: EntityKey, op: Operation, payload: FieldMap, origin_ts: Timestamp) -> Self {
        Self {
            entity,
            op,
            payload: Some(payload),
            origin_ts,
        }
    }

    /// A deletion as the hub would serve it.
    pub fn delete(entity: EntityKey, origin_ts: Timestamp) -> Self {
        Self {
            entity,
            op: Operation::Delete,
            payload: None,
            origin_ts,
        }
    }

    /// Whether the payload shape matches the operation.
    #[must_use]
    pub fn shape_ok(&self) -> bool {
        self.payload.is_some() == self.op.requires_payload()
    }
}
