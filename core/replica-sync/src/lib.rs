//! Optimistic, multi-writer replication stores.
//!
//! Each entity type (organizations, contacts, flows, …) gets one
//! [`Store`]: a local, mutable replica of server-owned records that the UI
//! edits immediately and that converges with other clients through a
//! per-tenant replication channel.
//!
//! # Architecture
//!
//! ## Components
//!
//! - **Entity**: one record plus its draft/commit lifecycle
//!   ([`Entity`], [`EntityHandle`])
//! - **Store**: the keyed collection; computes changesets on commit,
//!   hydrates from and persists to local storage, applies inbound operations
//! - **Collaborators**: the replication channel ([`ReplicationTransport`]),
//!   the outbound [`TransactionQueue`] and the per-type
//!   [`EntityRepository`], all injected through a [`SyncContext`]
//! - **Coordinator**: owns every store and sequences startup
//!   ([`RootCoordinator`])
//!
//! ## Write path
//!
//! 1. `draft()` captures a snapshot of the record (idempotent)
//! 2. the caller mutates the record
//! 3. `commit()` diffs snapshot → current, builds an [`Operation`] tagged
//!    with this client's `ref` and hands it to the transaction queue
//!
//! Field-level operations are never broadcast by the store itself. Structural
//! changes ([`GroupOperation`]s) are pushed over the channel with
//! [`Store::sync`].
//!
//! ## Read path
//!
//! The channel listener feeds [`Store::handle_inbound`]: own echoes are
//! dropped, `sync_packet` diffs are patched onto the matching record, and
//! `sync_group_packet`s append placeholders, delete, or refetch ids.
//!
//! # Example
//!
//! ```
//! use replica_sync::{StoreConfig, Session};
//! use replica_types::TenantId;
//!
//! let session = Session::new();
//! session.sign_in(TenantId::new("acme").unwrap());
//! assert!(session.tenant().is_some());
//!
//! let config = StoreConfig::default();
//! assert_eq!(config.append_refetch_delay.as_millis(), 1000);
//! ```

pub mod collection;
mod context;
pub mod coordinator;
mod entity;
mod error;
pub mod logging;
pub mod queue;
mod record;
pub mod repository;
mod session;
pub mod store;
pub mod transport;

pub use collection::ReplicatedCollection;
pub use context::SyncContext;
pub use coordinator::{CoordinatorConfig, RootCoordinator, StartReport};
pub use entity::{Entity, EntityHandle};
pub use error::{SyncError, SyncResult};
pub use queue::{ChannelTransactionQueue, CommitOptions, QueuedOperation, TransactionQueue};
pub use record::Record;
pub use repository::{EntityRepository, Page, PageRequest, RepositoryError};
pub use session::{Session, SessionState};
pub use store::{BootstrapMode, HydrateOptions, Lifecycle, Store, StoreConfig, StoreEvent, TEMP_ID_PREFIX};
pub use transport::{ChannelHandle, ChannelSink, Delivery, JoinRequest, ReplicationTransport};

pub use replica_types::{
    ClientRef, GroupAction, GroupOperation, InboundMessage, Operation, OutboundMessage, PushAck,
    TenantId,
};
