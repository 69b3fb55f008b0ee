use crate::error::{StorageError, StorageResult};
use crate::instance::StorageInstance;
use crate::{META_TABLE, SCHEMA_VERSION, VERSION_KEY};
use replica_types::TenantId;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

const FILE_EXTENSION: &str = "sqlite3";

/// Where databases live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// One SQLite file per database under this directory.
    Directory(PathBuf),
    /// Private in-memory SQLite connections (tests, ephemeral sessions).
    InMemory,
}

/// Configuration for the persister.
#[derive(Debug, Clone)]
pub struct PersisterConfig {
    /// Storage backend.
    pub backend: Backend,
    /// Prefix of every database name.
    pub database_prefix: String,
    /// Schema version this build expects in the shared `Meta` table.
    pub schema_version: u32,
}

impl Default for PersisterConfig {
    fn default() -> Self {
        Self {
            backend: Backend::InMemory,
            database_prefix: "replica".to_string(),
            schema_version: SCHEMA_VERSION,
        }
    }
}

/// Options for [`Persister::attempt_purge`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PurgeOptions {
    /// Purge even when the stored version matches.
    pub force: bool,
}

/// What [`Persister::attempt_purge`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeOutcome {
    /// Whether tenant databases were dropped.
    pub purged: bool,
    /// Version found in the shared namespace before the purge.
    pub previous_version: Option<u32>,
    /// Version written (or confirmed).
    pub target_version: u32,
    /// Names of the dropped databases.
    pub dropped: Vec<String>,
}

type SharedConnection = Arc<Mutex<Connection>>;

struct PersisterInner {
    config: PersisterConfig,
    databases: Mutex<HashMap<String, SharedConnection>>,
}

/// Keyed, versioned, tenant-scoped local store.
///
/// Cheap to clone; clones share open connections. Databases are opened
/// lazily on first access.
#[derive(Clone)]
pub struct Persister {
    inner: Arc<PersisterInner>,
}

impl std::fmt::Debug for Persister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persister")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Persister {
    /// Creates a persister, creating the backing directory if needed.
    pub fn open(config: PersisterConfig) -> StorageResult<Self> {
        if config.database_prefix.is_empty()
            || !config
                .database_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(StorageError::InvalidData(format!(
                "invalid database prefix: {:?}",
                config.database_prefix
            )));
        }
        if let Backend::Directory(root) = &config.backend {
            std::fs::create_dir_all(root)?;
        }
        Ok(Self {
            inner: Arc::new(PersisterInner {
                config,
                databases: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Creates an in-memory persister with default settings.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(PersisterInner {
                config: PersisterConfig::default(),
                databases: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &PersisterConfig {
        &self.inner.config
    }

    /// Storage for one store inside the given tenant's database.
    pub fn instance(&self, tenant: &TenantId, store_name: &str) -> StorageInstance {
        StorageInstance::new(self.clone(), self.tenant_database_name(tenant), store_name)
    }

    /// Storage for a table in the shared, non-tenant database.
    pub fn shared(&self, table: &str) -> StorageInstance {
        StorageInstance::new(self.clone(), self.shared_database_name(), table)
    }

    /// Name of the database that holds `tenant`'s stores.
    pub fn tenant_database_name(&self, tenant: &TenantId) -> String {
        format!("{}{}", self.tenant_prefix(), tenant)
    }

    /// Name of the shared database.
    pub fn shared_database_name(&self) -> String {
        format!("{}-shared", self.inner.config.database_prefix)
    }

    fn tenant_prefix(&self) -> String {
        format!("{}-tenant-", self.inner.config.database_prefix)
    }

    /// Enumerates every tenant database, open or on disk.
    pub fn list_tenant_databases(&self) -> StorageResult<Vec<String>> {
        let prefix = self.tenant_prefix();
        let mut names: Vec<String> = self
            .databases()
            .keys()
            .filter(|name| name.starts_with(&prefix))
            .cloned()
            .collect();

        if let Backend::Directory(root) = &self.inner.config.backend {
            for entry in std::fs::read_dir(root)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if stem.starts_with(&prefix) && !names.iter().any(|n| n == stem) {
                        names.push(stem.to_string());
                    }
                }
            }
        }

        names.sort();
        Ok(names)
    }

    /// Closes and deletes a database. Missing databases are ignored.
    pub fn drop_database(&self, name: &str) -> StorageResult<()> {
        self.databases().remove(name);

        if let Backend::Directory(root) = &self.inner.config.backend {
            let path = root.join(format!("{name}.{FILE_EXTENSION}"));
            for candidate in [
                path.clone(),
                path.with_extension(format!("{FILE_EXTENSION}-wal")),
                path.with_extension(format!("{FILE_EXTENSION}-shm")),
                path.with_extension(format!("{FILE_EXTENSION}-journal")),
            ] {
                match std::fs::remove_file(&candidate) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        debug!("Dropped database {}", name);
        Ok(())
    }

    /// Reads the schema version stored in the shared `Meta` table.
    pub fn stored_version(&self) -> StorageResult<Option<u32>> {
        self.shared(META_TABLE).get_item(VERSION_KEY)
    }

    /// Wipes every tenant database when the stored schema version differs
    /// from the configured one (or when forced), then records the configured
    /// version.
    pub fn attempt_purge(&self, options: PurgeOptions) -> StorageResult<PurgeOutcome> {
        let target_version = self.inner.config.schema_version;
        let previous_version = self.stored_version()?;

        if previous_version == Some(target_version) && !options.force {
            debug!("Local cache schema at version {}, no purge", target_version);
            return Ok(PurgeOutcome {
                purged: false,
                previous_version,
                target_version,
                dropped: Vec::new(),
            });
        }

        let dropped = self.list_tenant_databases()?;
        for name in &dropped {
            self.drop_database(name)?;
        }
        self.shared(META_TABLE).set_item(VERSION_KEY, &target_version)?;

        info!(
            "Purged {} local database(s) (stored version {:?}, target {}, forced: {})",
            dropped.len(),
            previous_version,
            target_version,
            options.force
        );

        Ok(PurgeOutcome {
            purged: true,
            previous_version,
            target_version,
            dropped,
        })
    }

    /// Returns the connection for `name`, opening it on first use.
    pub(crate) fn connection(&self, name: &str) -> StorageResult<SharedConnection> {
        let mut databases = self.databases();
        if let Some(conn) = databases.get(name) {
            return Ok(conn.clone());
        }

        let conn = match &self.inner.config.backend {
            Backend::Directory(root) => {
                Connection::open(root.join(format!("{name}.{FILE_EXTENSION}")))?
            }
            Backend::InMemory => Connection::open_in_memory()?,
        };
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv (
                store TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (store, key)
            );
            ",
        )?;

        let conn = Arc::new(Mutex::new(conn));
        databases.insert(name.to_string(), conn.clone());
        Ok(conn)
    }

    fn databases(&self) -> MutexGuard<'_, HashMap<String, SharedConnection>> {
        self.inner
            .databases
            .lock()
            .unwrap_or_else(|poisoned| {
                warn!("Database registry lock was poisoned; recovering");
                PoisonError::into_inner(poisoned)
            })
    }
}
