//! Owns every store of a client and sequences startup.
//!
//! Startup, per tenant:
//! 1. wait until the session names a tenant
//! 2. purge the local cache if its schema version is stale
//! 3. for each store, in registration order: read the bootstrap flag,
//!    hydrate from the cache, join the channel, then either refetch (warm
//!    cache) or bootstrap (cold cache)

use crate::collection::ReplicatedCollection;
use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::session::Session;
use crate::store::HydrateOptions;
use replica_storage::{PurgeOptions, PurgeOutcome, SESSION_TABLE};
use replica_types::TenantId;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key of the last active tenant in the shared `Session` table.
const TENANT_KEY: &str = "tenant";

/// Configuration for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Wipe the local cache on start even when its version matches.
    pub force_purge: bool,
    /// Join every store's channel during start.
    pub connect_channels: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            force_purge: false,
            connect_channels: true,
        }
    }
}

/// What [`RootCoordinator::start`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartReport {
    pub tenant: TenantId,
    /// `None` if the purge check itself failed.
    pub purge: Option<PurgeOutcome>,
    /// Stores loaded from scratch.
    pub bootstrapped: Vec<String>,
    /// Stores started from a warm cache and refetched.
    pub restored_from_cache: Vec<String>,
}

/// The root of a client's replication state.
pub struct RootCoordinator {
    context: SyncContext,
    config: CoordinatorConfig,
    stores: Vec<Arc<dyn ReplicatedCollection>>,
}

impl RootCoordinator {
    pub fn new(context: SyncContext, config: CoordinatorConfig) -> Self {
        Self {
            context,
            config,
            stores: Vec::new(),
        }
    }

    /// Adds a store. Stores start in registration order.
    pub fn register<C: ReplicatedCollection + 'static>(&mut self, store: C) {
        debug!("Registered store {}", store.name());
        self.stores.push(Arc::new(store));
    }

    pub fn store(&self, name: &str) -> Option<Arc<dyn ReplicatedCollection>> {
        self.stores.iter().find(|s| s.name() == name).cloned()
    }

    pub fn stores(&self) -> &[Arc<dyn ReplicatedCollection>] {
        &self.stores
    }

    pub fn context(&self) -> &SyncContext {
        &self.context
    }

    pub fn session(&self) -> &Session {
        &self.context.session
    }

    /// Whether every store is both hydrated and bootstrapped.
    pub fn is_ready(&self) -> bool {
        self.stores.iter().all(|s| s.lifecycle().is_ready())
    }

    /// Runs the startup sequence for the session's tenant, waiting for one
    /// if nobody is signed in yet.
    ///
    /// A failed purge check is logged and startup continues. Every store is
    /// started even if an earlier one fails; the first failure is returned.
    pub async fn start(&self) -> SyncResult<StartReport> {
        let tenant = self.context.session.wait_for_tenant().await;
        info!("Starting {} store(s) for tenant {}", self.stores.len(), tenant);

        let persister = self.context.persister.clone();
        let options = PurgeOptions {
            force: self.config.force_purge,
        };
        let purge = match tokio::task::spawn_blocking(move || persister.attempt_purge(options)).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(e)) => {
                warn!("Cache purge check failed: {}", e);
                None
            }
            Err(e) => {
                warn!("spawn_blocking panicked during purge: {}", e);
                None
            }
        };

        let mut report = StartReport {
            tenant,
            purge,
            bootstrapped: Vec::new(),
            restored_from_cache: Vec::new(),
        };
        let mut first_error = None;

        for store in &self.stores {
            let warm = store.check_if_can_hydrate().await;
            store.hydrate(HydrateOptions::default()).await;

            if self.config.connect_channels {
                if let Err(e) = store.connect().await {
                    warn!("[{}] could not join channel: {}", store.name(), e);
                }
            }

            let result = if warm {
                store.refetch().await
            } else {
                store.bootstrap().await
            };
            match result {
                Ok(()) if warm => report.restored_from_cache.push(store.name().to_string()),
                Ok(()) => report.bootstrapped.push(store.name().to_string()),
                Err(e) => {
                    warn!("[{}] failed to load: {}", store.name(), e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(
                    "Started: {} bootstrapped, {} restored from cache",
                    report.bootstrapped.len(),
                    report.restored_from_cache.len()
                );
                Ok(report)
            }
        }
    }

    /// Signs the session in as the last persisted tenant, if any.
    pub async fn restore_session(&self) -> SyncResult<Option<TenantId>> {
        let storage = self.context.persister.shared(SESSION_TABLE);
        let tenant = tokio::task::spawn_blocking(move || storage.get_item::<TenantId>(TENANT_KEY))
            .await
            .map_err(|e| SyncError::Task(e.to_string()))??;
        if let Some(tenant) = &tenant {
            self.context.session.sign_in(tenant.clone());
        }
        Ok(tenant)
    }

    /// Remembers `tenant` in the shared namespace and signs the session in.
    pub async fn sign_in(&self, tenant: TenantId) -> SyncResult<()> {
        let storage = self.context.persister.shared(SESSION_TABLE);
        let persisted = tenant.clone();
        tokio::task::spawn_blocking(move || storage.set_item(TENANT_KEY, &persisted))
            .await
            .map_err(|e| SyncError::Task(e.to_string()))??;
        self.context.session.sign_in(tenant);
        Ok(())
    }

    /// Empties every store and starts again for `tenant`.
    pub async fn switch_tenant(&self, tenant: TenantId) -> SyncResult<StartReport> {
        info!("Switching to tenant {}", tenant);
        self.reset_stores();
        self.sign_in(tenant).await?;
        self.start().await
    }

    /// Empties every store, forgets the persisted tenant and signs out.
    pub async fn sign_out(&self) -> SyncResult<()> {
        self.reset_stores();
        let storage = self.context.persister.shared(SESSION_TABLE);
        tokio::task::spawn_blocking(move || storage.remove_item(TENANT_KEY))
            .await
            .map_err(|e| SyncError::Task(e.to_string()))??;
        self.context.session.sign_out();
        Ok(())
    }

    fn reset_stores(&self) {
        for store in &self.stores {
            store.reset();
        }
    }
}
