use crate::error::SyncResult;
use crate::queue::CommitOptions;
use crate::record::Record;
use crate::store::Store;
use replica_types::Operation;

/// One replicated record and its local version.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity<T> {
    id: String,
    value: T,
    version: u64,
}

impl<T> Entity<T> {
    pub fn new(id: impl Into<String>, value: T) -> Self {
        Self {
            id: id.into(),
            value,
            version: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// Local change counter; bumped on every commit and applied remote patch.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub(crate) fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }

    pub(crate) fn set_value(&mut self, value: T) {
        self.value = value;
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    pub(crate) fn rekey(self, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            value: self.value,
            version: self.version,
        }
    }
}

/// A handle on one entity of a [`Store`].
///
/// The edit cycle is `draft()`, then any number of `update()` calls, then
/// `commit()`:
///
/// ```ignore
/// let org = store.entity("1");
/// org.draft();
/// org.update(|v| v["name"] = "Acme Inc".into());
/// let op = org.commit(CommitOptions::default()).await?;
/// ```
pub struct EntityHandle<'a, T: Record> {
    store: &'a Store<T>,
    id: String,
}

impl<'a, T: Record> EntityHandle<'a, T> {
    pub(crate) fn new(store: &'a Store<T>, id: impl Into<String>) -> Self {
        Self {
            store,
            id: id.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current value, or `None` if the store no longer holds this id.
    pub fn value(&self) -> Option<T> {
        self.store.get(&self.id)
    }

    pub fn version(&self) -> Option<u64> {
        self.store.entity_version(&self.id)
    }

    /// Captures the pre-edit snapshot. A second call before `commit` keeps
    /// the first snapshot. Returns whether a snapshot was taken.
    pub fn draft(&self) -> bool {
        self.store.draft(&self.id)
    }

    pub fn is_drafted(&self) -> bool {
        self.store.has_snapshot(&self.id)
    }

    /// Mutates the value in place.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.store.update(&self.id, f)
    }

    /// Commits the changes made since `draft()`.
    pub async fn commit(&self, options: CommitOptions) -> SyncResult<Option<Operation>> {
        self.store.commit(&self.id, options).await
    }

    /// Refetches this entity from the repository.
    pub async fn invalidate(&self) -> SyncResult<()> {
        self.store.invalidate(&self.id).await
    }
}
