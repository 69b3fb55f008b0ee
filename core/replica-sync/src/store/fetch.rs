//! Loading from the repository: bootstrap, refetch and invalidate.

use super::{upsert, vanished, BootstrapMode, Store, StoreEvent};
use crate::error::SyncResult;
use crate::record::Record;
use crate::repository::{PageRequest, RepositoryError};
use std::collections::HashSet;
use tracing::{debug, info, warn};

impl<T: Record> Store<T> {
    /// Loads the authoritative collection from the repository.
    ///
    /// On success the collection and the bootstrap flag are persisted. On
    /// failure the error is recorded on the store and returned.
    pub async fn bootstrap(&self) -> SyncResult<()> {
        {
            let mut state = self.write();
            state.lifecycle.bootstrapping = true;
            state.error = None;
        }
        let result = self.reload().await;
        self.write().lifecycle.bootstrapping = false;
        if result.is_ok() {
            info!("[{}] bootstrapped with {} record(s)", self.inner.name, self.len());
        }
        result
    }

    /// Reconciles the whole collection with the repository without entering
    /// the bootstrapping state. Used after starting from a warm cache.
    pub async fn refetch(&self) -> SyncResult<()> {
        self.write().error = None;
        let result = self.reload().await;
        if result.is_ok() {
            debug!("[{}] refetched, {} record(s)", self.inner.name, self.len());
        }
        result
    }

    /// Refetches one entity.
    pub async fn invalidate(&self, id: &str) -> SyncResult<()> {
        self.invalidate_many(&[id.to_string()]).await
    }

    /// Refetches the given ids. Ids the repository no longer returns are
    /// removed locally.
    pub async fn invalidate_many(&self, ids: &[String]) -> SyncResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let missing = self.refresh(ids).await?;
        if !missing.is_empty() {
            debug!("[{}] {:?} gone server-side", self.inner.name, missing);
            self.remove_local(&missing);
        }
        self.persist().await;
        Ok(())
    }

    /// Fills in an id announced by a remote APPEND. Returns `false` while the
    /// repository does not return it yet; the placeholder is kept.
    pub(crate) async fn refetch_appended(&self, id: &str) -> SyncResult<bool> {
        if !self.contains(id) {
            return Ok(true);
        }
        let missing = self.refresh(&[id.to_string()]).await?;
        self.persist().await;
        Ok(missing.is_empty())
    }

    /// Fetches `ids` and applies what comes back. Returns the requested ids
    /// still held locally that the repository did not return. Entities with
    /// an open draft keep their local value.
    async fn refresh(&self, ids: &[String]) -> SyncResult<Vec<String>> {
        let records = match self.inner.repository.fetch_by_ids(ids).await {
            Ok(records) => records,
            Err(e) => {
                warn!("[{}] refetch of {:?} failed: {}", self.inner.name, ids, e);
                return Err(e.into());
            }
        };

        let requested: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let (changed, missing) = {
            let mut state = self.write();
            let mut returned = HashSet::new();
            let mut changed = Vec::new();
            for record in records {
                let id = record.id();
                if !requested.contains(id.as_str()) {
                    continue;
                }
                returned.insert(id.clone());
                if state.snapshots.contains_key(&id) {
                    debug!("[{}] keeping drafted {} over refetched value", self.inner.name, id);
                    continue;
                }
                changed.push(upsert(&mut state, record));
            }
            let missing: Vec<String> = ids
                .iter()
                .filter(|id| !returned.contains(id.as_str()) && state.entities.contains_key(id.as_str()))
                .cloned()
                .collect();
            if !changed.is_empty() {
                state.version += 1;
            }
            (changed, missing)
        };

        if !changed.is_empty() {
            self.emit(StoreEvent::Changed { ids: changed });
        }
        Ok(missing)
    }

    async fn reload(&self) -> SyncResult<()> {
        let records = match self.fetch_collection().await {
            Ok(records) => records,
            Err(e) => {
                warn!("[{}] loading collection failed: {}", self.inner.name, e);
                self.write().error = Some(e.to_string());
                return Err(e.into());
            }
        };

        let full = self.inner.config.bootstrap_mode == BootstrapMode::Full;
        let (changed, removed) = {
            let mut state = self.write();
            let mut changed = Vec::with_capacity(records.len());
            let mut seen = HashSet::with_capacity(records.len());
            for record in records {
                let id = record.id();
                seen.insert(id.clone());
                // An open draft keeps its local value until committed
                if state.snapshots.contains_key(&id) {
                    continue;
                }
                changed.push(upsert(&mut state, record));
            }
            let removed = if full { vanished(&state, &seen) } else { Vec::new() };
            for id in &removed {
                state.entities.remove(id);
                state.snapshots.remove(id);
            }
            state.lifecycle.bootstrapped = true;
            state.version += 1;
            (changed, removed)
        };

        if !changed.is_empty() {
            self.emit(StoreEvent::Changed { ids: changed });
        }
        if !removed.is_empty() {
            self.emit(StoreEvent::Removed { ids: removed });
        }
        self.persist().await;
        self.persist_bootstrapped().await;
        Ok(())
    }

    async fn fetch_collection(&self) -> Result<Vec<T>, RepositoryError> {
        let limit = self.inner.config.page_size.max(1);
        let mut request = PageRequest::first(limit);
        let mut records = Vec::new();
        loop {
            let page = self.inner.repository.fetch_page(request).await?;
            records.extend(page.records);
            match page.next_offset {
                Some(next)
                    if self.inner.config.bootstrap_mode == BootstrapMode::Full
                        && next > request.offset =>
                {
                    request = PageRequest {
                        offset: next,
                        limit,
                    };
                }
                _ => break,
            }
        }
        Ok(records)
    }
}
