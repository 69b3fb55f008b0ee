//! Per-entity-type server access.
//!
//! A store bootstraps, refetches and creates records through an
//! [`EntityRepository`]. The network client behind it is not part of this
//! crate.

use crate::record::Record;
use async_trait::async_trait;
use thiserror::Error;

/// A window into the server collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

impl PageRequest {
    pub fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }
}

/// One page of records.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub records: Vec<T>,
    /// Offset of the next page, or `None` on the last page.
    pub next_offset: Option<usize>,
}

/// Errors reported by a repository.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("record not found: {0}")]
    NotFound(String),
}

/// Server-side access for one entity type.
#[async_trait]
pub trait EntityRepository<T: Record>: Send + Sync {
    /// Fetches one page of the collection.
    async fn fetch_page(&self, request: PageRequest) -> Result<Page<T>, RepositoryError>;

    /// Fetches the given ids. Ids unknown to the server are omitted.
    async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<T>, RepositoryError>;

    /// Creates a record and returns it as stored, under its server id.
    async fn create(&self, record: T) -> Result<T, RepositoryError>;
}

/// An in-memory repository standing in for the server.
pub mod memory {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    struct State<T> {
        records: BTreeMap<String, T>,
        next_id: u64,
        fetched: Vec<Vec<String>>,
        pages_served: usize,
        fail_next: Option<RepositoryError>,
    }

    /// Records live in an ordered map; pages follow key order.
    ///
    /// Every `fetch_by_ids` call is logged so tests can count refetches.
    pub struct MemoryRepository<T> {
        state: Arc<Mutex<State<T>>>,
    }

    impl<T> Clone for MemoryRepository<T> {
        fn clone(&self) -> Self {
            Self {
                state: self.state.clone(),
            }
        }
    }

    impl<T: Record> Default for MemoryRepository<T> {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<T: Record> MemoryRepository<T> {
        pub fn new() -> Self {
            Self {
                state: Arc::new(Mutex::new(State {
                    records: BTreeMap::new(),
                    next_id: 1,
                    fetched: Vec::new(),
                    pages_served: 0,
                    fail_next: None,
                })),
            }
        }

        /// Creates a repository seeded with `records`.
        pub fn with_records(records: impl IntoIterator<Item = T>) -> Self {
            let repo = Self::new();
            for record in records {
                repo.insert(record);
            }
            repo
        }

        /// Inserts or replaces a record server-side.
        pub fn insert(&self, record: T) {
            self.lock().records.insert(record.id(), record);
        }

        /// Removes a record server-side.
        pub fn remove(&self, id: &str) -> Option<T> {
            self.lock().records.remove(id)
        }

        pub fn get(&self, id: &str) -> Option<T> {
            self.lock().records.get(id).cloned()
        }

        pub fn len(&self) -> usize {
            self.lock().records.len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        /// The id lists of every `fetch_by_ids` call, in order.
        pub fn fetched(&self) -> Vec<Vec<String>> {
            self.lock().fetched.clone()
        }

        /// Number of pages served so far.
        pub fn pages_served(&self) -> usize {
            self.lock().pages_served
        }

        /// Makes the next request fail with `error`.
        pub fn fail_next(&self, error: RepositoryError) {
            self.lock().fail_next = Some(error);
        }

        fn lock(&self) -> MutexGuard<'_, State<T>> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        fn take_failure(state: &mut State<T>) -> Result<(), RepositoryError> {
            match state.fail_next.take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl<T: Record> EntityRepository<T> for MemoryRepository<T> {
        async fn fetch_page(&self, request: PageRequest) -> Result<Page<T>, RepositoryError> {
            let mut state = self.lock();
            Self::take_failure(&mut state)?;
            state.pages_served += 1;

            let total = state.records.len();
            let records: Vec<T> = state
                .records
                .values()
                .skip(request.offset)
                .take(request.limit)
                .cloned()
                .collect();
            let end = request.offset + records.len();
            let next_offset = (end < total && !records.is_empty()).then_some(end);
            Ok(Page {
                records,
                next_offset,
            })
        }

        async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<T>, RepositoryError> {
            let mut state = self.lock();
            Self::take_failure(&mut state)?;
            state.fetched.push(ids.to_vec());
            Ok(ids
                .iter()
                .filter_map(|id| state.records.get(id).cloned())
                .collect())
        }

        async fn create(&self, record: T) -> Result<T, RepositoryError> {
            let mut state = self.lock();
            Self::take_failure(&mut state)?;
            let id = format!("srv-{}", state.next_id);
            state.next_id += 1;
            let stored = record.with_id(&id);
            state.records.insert(id, stored.clone());
            Ok(stored)
        }
    }
}
