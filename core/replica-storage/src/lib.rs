//! Local persistence for replica stores.
//!
//! # Layout
//!
//! - One SQLite database per tenant (`<prefix>-tenant-<tenant>`), holding one
//!   logical table per store name. Switching tenants switches the namespace
//!   entirely.
//! - One shared database (`<prefix>-shared`) for data that outlives a tenant:
//!   the `Meta` table with the schema `version`, and the `Session` table.
//!
//! Every logical table is a key/value map with JSON-encoded values. Stores
//! use the keys [`DATA_KEY`] and [`BOOTSTRAPPED_KEY`].
//!
//! # Migrations
//!
//! There are none. [`Persister::attempt_purge`] compares the stored schema
//! version with [`PersisterConfig::schema_version`] and, on mismatch, drops
//! every tenant database before rewriting the marker.

mod error;
mod instance;
mod persister;

pub use error::{StorageError, StorageResult};
pub use instance::StorageInstance;
pub use persister::{Backend, Persister, PersisterConfig, PurgeOptions, PurgeOutcome};

/// Schema version the current build expects. Bump to force a cache wipe.
pub const SCHEMA_VERSION: u32 = 3;

/// Key of the persisted id → record map in a store table.
pub const DATA_KEY: &str = "data";

/// Key of the persisted "bootstrap completed" flag in a store table.
pub const BOOTSTRAPPED_KEY: &str = "isBootstrapped";

/// Shared table holding the schema version.
pub const META_TABLE: &str = "Meta";

/// Key of the schema version inside [`META_TABLE`].
pub const VERSION_KEY: &str = "version";

/// Shared table holding session information (last active tenant).
pub const SESSION_TABLE: &str = "Session";
