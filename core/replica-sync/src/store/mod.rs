//! The per-entity-type replicated store.
//!
//! A [`Store`] is a keyed collection of [`Entity`] values plus the pending
//! snapshots of entities being edited. All state sits behind one
//! `std::sync::RwLock` that is never held across an `.await`: repository
//! calls, queue hand-off, channel pushes and persistence all run with the
//! lock released. An inbound patch can therefore land between `draft()` and
//! `commit()` of the same entity.

mod channel;
mod fetch;
mod persist;

use crate::context::SyncContext;
use crate::entity::{Entity, EntityHandle};
use crate::error::{SyncError, SyncResult};
use crate::queue::CommitOptions;
use crate::record::Record;
use crate::repository::EntityRepository;
use replica_diff::{diff, ConflictPolicy};
use replica_types::{ClientRef, GroupOperation, Operation, TenantId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prefix of ids assigned to optimistically created records.
pub const TEMP_ID_PREFIX: &str = "tmp-";

/// How much of the collection `bootstrap` and `refetch` load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BootstrapMode {
    /// Every page.
    #[default]
    Full,
    /// The first page only. Local ids missing from it are kept.
    FirstPage,
}

/// Configuration for a store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Grace period before refetching ids announced by a remote APPEND.
    pub append_refetch_delay: Duration,
    /// Further attempts when the server does not return an appended id
    /// yet. The delay doubles before each one.
    pub append_refetch_retries: u32,
    pub bootstrap_mode: BootstrapMode,
    /// Records per repository page.
    pub page_size: usize,
    /// How inbound field-level operations treat diverged values.
    pub conflict_policy: ConflictPolicy,
    /// Write the collection to local storage after every change.
    pub persist: bool,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            append_refetch_delay: Duration::from_secs(1),
            append_refetch_retries: 3,
            bootstrap_mode: BootstrapMode::Full,
            page_size: 200,
            conflict_policy: ConflictPolicy::LastWriterWins,
            persist: true,
            event_capacity: 256,
        }
    }
}

/// Options for [`Store::hydrate`].
#[derive(Debug, Clone, Default)]
pub struct HydrateOptions {
    /// Ids removed from the persisted map before loading.
    pub ids_to_drop: Vec<String>,
}

/// Load state of a store. Hydration and bootstrap progress independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lifecycle {
    pub hydrating: bool,
    pub hydrated: bool,
    pub bootstrapping: bool,
    pub bootstrapped: bool,
}

impl Lifecycle {
    /// Both the local cache and the server collection have been loaded.
    pub fn is_ready(&self) -> bool {
        self.hydrated && self.bootstrapped
    }
}

/// Change notifications, sent after the state lock is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Entities were inserted or their values changed.
    Changed { ids: Vec<String> },
    Removed { ids: Vec<String> },
    /// A temporary id was promoted.
    Renamed { from: String, to: String },
    /// The store was emptied.
    Reset,
    /// Inbound edits were refused by [`ConflictPolicy::RejectStale`].
    Conflict { id: String, paths: Vec<String> },
}

impl StoreEvent {
    /// Whether the event concerns `id`.
    pub fn touches(&self, id: &str) -> bool {
        match self {
            Self::Changed { ids } | Self::Removed { ids } => ids.iter().any(|i| i == id),
            Self::Renamed { from, to } => from == id || to == id,
            Self::Reset => true,
            Self::Conflict { id: conflicted, .. } => conflicted == id,
        }
    }
}

pub(crate) struct StoreState<T> {
    entities: HashMap<String, Entity<T>>,
    snapshots: HashMap<String, T>,
    lifecycle: Lifecycle,
    version: u64,
    error: Option<String>,
    channel_version: u64,
}

impl<T> Default for StoreState<T> {
    fn default() -> Self {
        Self {
            entities: HashMap::new(),
            snapshots: HashMap::new(),
            lifecycle: Lifecycle::default(),
            version: 0,
            error: None,
            channel_version: 0,
        }
    }
}

pub(crate) struct StoreInner<T: Record> {
    name: String,
    config: StoreConfig,
    context: SyncContext,
    repository: Arc<dyn EntityRepository<T>>,
    state: RwLock<StoreState<T>>,
    events: broadcast::Sender<StoreEvent>,
    channel: Mutex<Option<channel::Connection>>,
    /// Serializes cache writes so the last write holds the newest copy.
    persist_lock: tokio::sync::Mutex<()>,
}

impl<T: Record> Drop for StoreInner<T> {
    fn drop(&mut self) {
        let connection = self.channel.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(connection) = connection.take() {
            connection.listener.abort();
        }
    }
}

/// A local, mutable replica of one server collection.
///
/// Cheap to clone; clones share state.
pub struct Store<T: Record> {
    inner: Arc<StoreInner<T>>,
}

impl<T: Record> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Record> std::fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("Store")
            .field("name", &self.inner.name)
            .field("len", &state.entities.len())
            .field("version", &state.version)
            .field("lifecycle", &state.lifecycle)
            .finish_non_exhaustive()
    }
}

impl<T: Record> Store<T> {
    /// Creates an empty store. `name` is the entity type: it names the
    /// storage table, the channel topic and `Operation::entity`.
    pub fn new(
        name: impl Into<String>,
        config: StoreConfig,
        context: SyncContext,
        repository: Arc<dyn EntityRepository<T>>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(StoreInner {
                name: name.into(),
                config,
                context,
                repository,
                state: RwLock::new(StoreState::default()),
                events,
                channel: Mutex::new(None),
                persist_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// This client instance's `ref`.
    pub fn client_ref(&self) -> ClientRef {
        self.inner.context.client_ref
    }

    pub fn len(&self) -> usize {
        self.read().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entities.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().entities.contains_key(id)
    }

    /// All ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().entities.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.read().entities.get(id).map(|e| e.value().clone())
    }

    /// All values, ordered by id.
    pub fn values(&self) -> Vec<T> {
        let state = self.read();
        let mut entities: Vec<&Entity<T>> = state.entities.values().collect();
        entities.sort_by(|a, b| a.id().cmp(b.id()));
        entities.into_iter().map(|e| e.value().clone()).collect()
    }

    /// A handle for the draft/commit cycle of one entity.
    pub fn entity(&self, id: impl Into<String>) -> EntityHandle<'_, T> {
        EntityHandle::new(self, id)
    }

    pub(crate) fn entity_version(&self, id: &str) -> Option<u64> {
        self.read().entities.get(id).map(Entity::version)
    }

    /// Store-wide change counter, for UI invalidation.
    pub fn version(&self) -> u64 {
        self.read().version
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.read().lifecycle
    }

    /// The last bootstrap or refetch failure.
    pub fn error(&self) -> Option<String> {
        self.read().error.clone()
    }

    /// Last channel version this store has observed.
    pub fn channel_version(&self) -> u64 {
        self.read().channel_version
    }

    pub fn snapshot(&self, id: &str) -> Option<T> {
        self.read().snapshots.get(id).cloned()
    }

    pub fn has_snapshot(&self, id: &str) -> bool {
        self.read().snapshots.contains_key(id)
    }

    /// Receives every [`StoreEvent`] sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    // ── Local edits ──────────────────────────────────────────────

    /// Captures a deep copy of the entity as its pre-edit baseline.
    ///
    /// Idempotent: if a snapshot already exists it is kept. Returns `true`
    /// only when a new snapshot was taken.
    pub fn draft(&self, id: &str) -> bool {
        let mut state = self.write();
        if state.snapshots.contains_key(id) {
            return false;
        }
        let Some(value) = state.entities.get(id).map(|e| e.value().clone()) else {
            debug!("[{}] draft of unknown entity {}", self.inner.name, id);
            return false;
        };
        state.snapshots.insert(id.to_string(), value);
        true
    }

    /// Mutates an entity in place. Returns `None` if the id is unknown.
    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let result = {
            let mut state = self.write();
            let entity = state.entities.get_mut(id)?;
            f(entity.value_mut())
        };
        self.emit(StoreEvent::Changed {
            ids: vec![id.to_string()],
        });
        Some(result)
    }

    /// Diffs the entity against its snapshot and hands the resulting
    /// operation to the transaction queue.
    ///
    /// The snapshot is cleared and both versions bumped. Returns `Ok(None)`
    /// without queueing anything when there was no snapshot or the diff is
    /// empty.
    pub async fn commit(&self, id: &str, options: CommitOptions) -> SyncResult<Option<Operation>> {
        let tenant = self.tenant()?;
        let edits = {
            let mut state = self.write();
            let (Some(snapshot), Some(entity)) = (state.snapshots.get(id), state.entities.get(id))
            else {
                warn!("[{}] commit of {} without a draft, nothing to send", self.inner.name, id);
                return Ok(None);
            };
            let edits = diff(
                &serde_json::to_value(snapshot)?,
                &serde_json::to_value(entity.value())?,
            );
            state.snapshots.remove(id);
            if let Some(entity) = state.entities.get_mut(id) {
                entity.bump_version();
            }
            state.version += 1;
            edits
        };

        if edits.is_empty() {
            debug!("[{}] commit of {} produced no changes", self.inner.name, id);
            return Ok(None);
        }

        self.emit(StoreEvent::Changed {
            ids: vec![id.to_string()],
        });
        self.persist().await;

        let operation = Operation::new(
            self.inner.name.clone(),
            id,
            tenant,
            self.client_ref(),
            edits,
        );
        debug!(
            "[{}] committing {} edit(s) to {} as {}",
            self.inner.name,
            operation.diff.len(),
            id,
            operation.id
        );
        self.inner.context.queue.commit(operation.clone(), options).await?;
        Ok(Some(operation))
    }

    /// Inserts or replaces a batch of records.
    pub async fn load(&self, records: Vec<T>) {
        if records.is_empty() {
            return;
        }
        let ids = {
            let mut state = self.write();
            let ids = records
                .into_iter()
                .map(|record| upsert(&mut state, record))
                .collect::<Vec<_>>();
            state.version += 1;
            ids
        };
        self.emit(StoreEvent::Changed { ids });
        self.persist().await;
    }

    /// Removes entities locally. Returns how many were present.
    pub async fn drop_ids(&self, ids: &[String]) -> usize {
        let removed = self.remove_local(ids);
        if !removed.is_empty() {
            self.persist().await;
        }
        removed.len()
    }

    pub(crate) fn remove_local(&self, ids: &[String]) -> Vec<String> {
        let removed: Vec<String> = {
            let mut state = self.write();
            let removed: Vec<String> = ids
                .iter()
                .filter(|id| state.entities.remove(id.as_str()).is_some())
                .cloned()
                .collect();
            for id in ids {
                state.snapshots.remove(id);
            }
            if !removed.is_empty() {
                state.version += 1;
            }
            removed
        };
        if !removed.is_empty() {
            debug!("[{}] removed {} entit(ies)", self.inner.name, removed.len());
            self.emit(StoreEvent::Removed {
                ids: removed.clone(),
            });
        }
        removed
    }

    /// Moves the entity under `from` to `to` in one step, snapshot included.
    ///
    /// Returns `false` if `from` is unknown. An entity already under `to` is
    /// replaced.
    pub fn rename(&self, from: &str, to: &str) -> bool {
        {
            let mut state = self.write();
            let Some(entity) = state.entities.remove(from) else {
                return false;
            };
            let value = entity.value().clone().with_id(to);
            let mut entity = entity.rekey(to);
            entity.set_value(value);
            state.entities.insert(to.to_string(), entity);
            if let Some(snapshot) = state.snapshots.remove(from) {
                state.snapshots.insert(to.to_string(), snapshot.with_id(to));
            }
            state.version += 1;
        }
        debug!("[{}] renamed {} -> {}", self.inner.name, from, to);
        self.emit(StoreEvent::Renamed {
            from: from.to_string(),
            to: to.to_string(),
        });
        true
    }

    /// Creates a record optimistically.
    ///
    /// The record appears at once under a temporary id. Once the repository
    /// confirms it, the entry is renamed to the server id and an APPEND is
    /// pushed so other clients fetch it. On failure the temporary entry is
    /// removed and the error returned.
    pub async fn create(&self, record: T) -> SyncResult<T> {
        let temp_id = format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4());
        let record = record.with_id(&temp_id);
        {
            let mut state = self.write();
            state
                .entities
                .insert(temp_id.clone(), Entity::new(temp_id.clone(), record.clone()));
            state.version += 1;
        }
        self.emit(StoreEvent::Changed {
            ids: vec![temp_id.clone()],
        });

        let stored = match self.inner.repository.create(record).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("[{}] create failed: {}", self.inner.name, e);
                self.remove_local(std::slice::from_ref(&temp_id));
                return Err(e.into());
            }
        };

        let server_id = stored.id();
        self.rename(&temp_id, &server_id);
        {
            let mut state = self.write();
            let drafted = state.snapshots.contains_key(&server_id);
            if let Some(entity) = state.entities.get_mut(&server_id) {
                if !drafted {
                    entity.set_value(stored.clone());
                }
            }
        }
        self.persist().await;
        info!("[{}] created {}", self.inner.name, server_id);

        if let Err(e) = self
            .sync(GroupOperation::append(vec![server_id.clone()], self.client_ref()))
            .await
        {
            warn!("[{}] could not announce {}: {}", self.inner.name, server_id, e);
        }
        Ok(stored)
    }

    /// Removes entities locally and pushes a DELETE for them.
    pub async fn delete(&self, ids: &[String]) -> SyncResult<usize> {
        let removed = self.drop_ids(ids).await;
        self.sync(GroupOperation::delete(ids.to_vec(), self.client_ref()))
            .await?;
        Ok(removed)
    }

    /// Disconnects and empties the store, in memory only.
    pub fn reset(&self) {
        self.disconnect();
        {
            let mut state = self.write();
            let version = state.version;
            *state = StoreState::default();
            state.version = version + 1;
        }
        self.emit(StoreEvent::Reset);
    }

    // ── Internals ────────────────────────────────────────────────

    pub(crate) fn tenant(&self) -> SyncResult<TenantId> {
        self.inner.context.session.tenant().ok_or(SyncError::NoTenant)
    }

    pub(crate) fn emit(&self, event: StoreEvent) {
        // No receivers is not an error
        let _ = self.inner.events.send(event);
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, StoreState<T>> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, StoreState<T>> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn channel(&self) -> MutexGuard<'_, Option<channel::Connection>> {
        self.inner.channel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn from_inner(inner: Arc<StoreInner<T>>) -> Self {
        Self { inner }
    }
}

/// Inserts or replaces `record`, keeping the entity's version. Returns its id.
fn upsert<T: Record>(state: &mut StoreState<T>, record: T) -> String {
    let id = record.id();
    match state.entities.get_mut(&id) {
        Some(entity) => {
            entity.set_value(record);
            entity.bump_version();
        }
        None => {
            state.entities.insert(id.clone(), Entity::new(id.clone(), record));
        }
    }
    id
}

/// Ids present locally but absent from `keep`, excluding unconfirmed creates.
fn vanished<T>(state: &StoreState<T>, keep: &HashSet<String>) -> Vec<String> {
    state
        .entities
        .keys()
        .filter(|id| !id.starts_with(TEMP_ID_PREFIX) && !keep.contains(id.as_str()))
        .cloned()
        .collect()
}
