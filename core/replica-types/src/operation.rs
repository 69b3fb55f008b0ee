//! The two replication operation shapes.
//!
//! An [`Operation`] carries a field-level diff for one entity and is handed
//! to the transaction queue for network delivery. A [`GroupOperation`]
//! changes the membership of a collection and travels over the replication
//! channel. Both carry the originating [`ClientRef`] as `ref` so a client can
//! drop its own echoes.

use crate::{ClientRef, OperationId, TenantId};
use replica_diff::DiffEdit;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A field-level changeset for a single entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Unique identifier for this operation.
    pub id: OperationId,

    /// Ordered structural edits from the sender's snapshot to its current value.
    pub diff: Vec<DiffEdit>,

    /// The entity the diff applies to.
    pub entity_id: String,

    /// The client instance that produced the operation.
    #[serde(rename = "ref")]
    pub client_ref: ClientRef,

    /// Tenant the entity belongs to.
    pub tenant: TenantId,

    /// Entity type (the store name, e.g. `"organizations"`).
    pub entity: String,
}

impl Operation {
    /// Creates a new operation with a fresh id.
    #[must_use]
    pub fn new(
        entity: impl Into<String>,
        entity_id: impl Into<String>,
        tenant: TenantId,
        client_ref: ClientRef,
        diff: Vec<DiffEdit>,
    ) -> Self {
        Self {
            id: OperationId::new(),
            diff,
            entity_id: entity_id.into(),
            client_ref,
            tenant,
            entity: entity.into(),
        }
    }

    /// Whether the diff contains no edits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.diff.is_empty()
    }

    /// Whether this operation originated from `client`.
    #[must_use]
    pub fn is_from(&self, client: ClientRef) -> bool {
        self.client_ref == client
    }
}

/// The structural action of a [`GroupOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupAction {
    /// New ids exist server-side; create placeholders and fetch them.
    Append,
    /// Ids were removed; drop them locally.
    Delete,
    /// Ids changed in ways a diff does not describe; refetch them.
    Invalidate,
}

impl fmt::Display for GroupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Append => write!(f, "APPEND"),
            Self::Delete => write!(f, "DELETE"),
            Self::Invalidate => write!(f, "INVALIDATE"),
        }
    }
}

/// A collection-level change affecting one or more ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupOperation {
    pub action: GroupAction,
    pub ids: Vec<String>,
    #[serde(rename = "ref")]
    pub client_ref: ClientRef,
}

impl GroupOperation {
    /// Creates a group operation.
    #[must_use]
    pub fn new(action: GroupAction, ids: Vec<String>, client_ref: ClientRef) -> Self {
        Self {
            action,
            ids,
            client_ref,
        }
    }

    /// Creates an APPEND operation.
    #[must_use]
    pub fn append(ids: Vec<String>, client_ref: ClientRef) -> Self {
        Self::new(GroupAction::Append, ids, client_ref)
    }

    /// Creates a DELETE operation.
    #[must_use]
    pub fn delete(ids: Vec<String>, client_ref: ClientRef) -> Self {
        Self::new(GroupAction::Delete, ids, client_ref)
    }

    /// Creates an INVALIDATE operation.
    #[must_use]
    pub fn invalidate(ids: Vec<String>, client_ref: ClientRef) -> Self {
        Self::new(GroupAction::Invalidate, ids, client_ref)
    }

    /// Returns a copy re-tagged with `client_ref`.
    #[must_use]
    pub fn tagged(mut self, client_ref: ClientRef) -> Self {
        self.client_ref = client_ref;
        self
    }

    /// Whether this operation originated from `client`.
    #[must_use]
    pub fn is_from(&self, client: ClientRef) -> bool {
        self.client_ref == client
    }
}
