//! Local cache: hydration and write-back.
//!
//! Storage failures never surface to callers. They are logged and the store
//! carries on with what it has in memory.

use super::{HydrateOptions, Store, StoreEvent, TEMP_ID_PREFIX};
use crate::entity::Entity;
use crate::record::Record;
use replica_storage::{StorageInstance, StorageResult, BOOTSTRAPPED_KEY, DATA_KEY};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

impl<T: Record> Store<T> {
    /// Whether a previous session finished a bootstrap for this tenant.
    pub async fn check_if_can_hydrate(&self) -> bool {
        let Some(storage) = self.storage() else {
            return false;
        };
        let name = self.inner.name.clone();
        match tokio::task::spawn_blocking(move || storage.get_item::<bool>(BOOTSTRAPPED_KEY)).await {
            Ok(Ok(flag)) => flag.unwrap_or(false),
            Ok(Err(e)) => {
                warn!("[{}] could not read bootstrap flag: {}", name, e);
                false
            }
            Err(e) => {
                warn!("[{}] spawn_blocking panicked reading bootstrap flag: {}", name, e);
                false
            }
        }
    }

    /// Loads the persisted collection into memory.
    ///
    /// `ids_to_drop` are removed from the cache first. Ids already held in
    /// memory are not overwritten, and records that no longer decode are
    /// skipped. The store is marked hydrated whatever happens.
    pub async fn hydrate(&self, options: HydrateOptions) {
        self.write().lifecycle.hydrating = true;

        let loaded = match self.storage() {
            Some(storage) => {
                let _guard = self.inner.persist_lock.lock().await;
                let ids_to_drop = options.ids_to_drop;
                match tokio::task::spawn_blocking(move || read_cache(&storage, &ids_to_drop)).await {
                    Ok(Ok(data)) => data,
                    Ok(Err(e)) => {
                        warn!("[{}] hydrate failed, starting empty: {}", self.inner.name, e);
                        BTreeMap::new()
                    }
                    Err(e) => {
                        warn!("[{}] spawn_blocking panicked during hydrate: {}", self.inner.name, e);
                        BTreeMap::new()
                    }
                }
            }
            None => {
                debug!("[{}] no active tenant, nothing to hydrate", self.inner.name);
                BTreeMap::new()
            }
        };

        let mut skipped = 0;
        let added = {
            let mut state = self.write();
            let mut added = Vec::new();
            for (id, raw) in loaded {
                if state.entities.contains_key(&id) {
                    continue;
                }
                match serde_json::from_value::<T>(raw) {
                    Ok(record) => {
                        state.entities.insert(id.clone(), Entity::new(id.clone(), record));
                        added.push(id);
                    }
                    Err(_) => skipped += 1,
                }
            }
            state.lifecycle.hydrating = false;
            state.lifecycle.hydrated = true;
            if !added.is_empty() {
                state.version += 1;
            }
            added
        };

        if skipped > 0 {
            warn!("[{}] skipped {} unreadable cached record(s)", self.inner.name, skipped);
        }
        info!("[{}] hydrated {} record(s)", self.inner.name, added.len());
        if !added.is_empty() {
            self.emit(StoreEvent::Changed { ids: added });
        }
    }

    /// Writes the collection to local storage. Temporary ids are left out.
    ///
    /// Writes run one at a time and each copies the state only once it holds
    /// the lock, so a later call never loses to an earlier one.
    pub(crate) async fn persist(&self) {
        if !self.inner.config.persist {
            return;
        }
        let Some(storage) = self.storage() else {
            debug!("[{}] no active tenant, skipping persist", self.inner.name);
            return;
        };
        let _guard = self.inner.persist_lock.lock().await;
        let data: BTreeMap<String, T> = self
            .read()
            .entities
            .iter()
            .filter(|(id, _)| !id.starts_with(TEMP_ID_PREFIX))
            .map(|(id, entity)| (id.clone(), entity.value().clone()))
            .collect();

        let name = self.inner.name.clone();
        match tokio::task::spawn_blocking(move || storage.set_item(DATA_KEY, &data)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("[{}] failed to persist collection: {}", name, e),
            Err(e) => warn!("[{}] spawn_blocking panicked persisting collection: {}", name, e),
        }
    }

    /// Records that a bootstrap completed for the active tenant.
    pub(crate) async fn persist_bootstrapped(&self) {
        if !self.inner.config.persist {
            return;
        }
        let Some(storage) = self.storage() else {
            return;
        };
        let name = self.inner.name.clone();
        match tokio::task::spawn_blocking(move || storage.set_item(BOOTSTRAPPED_KEY, &true)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("[{}] failed to persist bootstrap flag: {}", name, e),
            Err(e) => warn!("[{}] spawn_blocking panicked persisting bootstrap flag: {}", name, e),
        }
    }

    fn storage(&self) -> Option<StorageInstance> {
        let tenant = self.inner.context.session.tenant()?;
        Some(self.inner.context.persister.instance(&tenant, &self.inner.name))
    }
}

fn read_cache(storage: &StorageInstance, ids_to_drop: &[String]) -> StorageResult<BTreeMap<String, Value>> {
    let mut data: BTreeMap<String, Value> = storage.get_item(DATA_KEY)?.unwrap_or_default();
    let before = data.len();
    for id in ids_to_drop {
        data.remove(id);
    }
    if data.len() != before {
        storage.set_item(DATA_KEY, &data)?;
    }
    Ok(data)
}
