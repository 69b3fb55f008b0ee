//! Core type definitions for the replica sync engine.
//!
//! This crate defines the vocabulary shared by storage, stores and
//! transports:
//! - Identifiers: [`ClientRef`] (this client instance), [`TenantId`],
//!   [`OperationId`]
//! - [`Operation`]: a field-level changeset for one entity
//! - [`GroupOperation`]: a structural change (append/delete/invalidate) over
//!   a set of ids
//! - Channel wire messages ([`InboundMessage`], [`OutboundMessage`],
//!   [`PushAck`])
//!
//! Record contents are opaque here; they travel as JSON and are diffed by
//! `replica-diff`.

mod ids;
mod message;
mod operation;

pub use ids::{ClientRef, OperationId, TenantId};
pub use message::{InboundMessage, OutboundMessage, PushAck, SYNC_GROUP_PACKET, SYNC_PACKET};
pub use operation::{GroupAction, GroupOperation, Operation};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid tenant id: {0:?}")]
    InvalidTenant(String),
}
