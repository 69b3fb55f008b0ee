//! Type-erased view of a store, for code that manages stores of different
//! record types together.

use crate::error::SyncResult;
use crate::record::Record;
use crate::store::{HydrateOptions, Lifecycle, Store};
use async_trait::async_trait;
use replica_types::{GroupOperation, InboundMessage, PushAck};
use serde_json::Value;

/// A replicated collection: load, hydrate, drop, sync and channel
/// subscription, independent of the record type.
#[async_trait]
pub trait ReplicatedCollection: Send + Sync {
    fn name(&self) -> &str;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn version(&self) -> u64;

    fn lifecycle(&self) -> Lifecycle;

    fn error(&self) -> Option<String>;

    async fn check_if_can_hydrate(&self) -> bool;

    async fn hydrate(&self, options: HydrateOptions);

    /// Inserts or replaces records given as JSON. Nothing is loaded if any
    /// record fails to decode. Returns how many were loaded.
    async fn load(&self, records: Vec<Value>) -> SyncResult<usize>;

    async fn bootstrap(&self) -> SyncResult<()>;

    async fn refetch(&self) -> SyncResult<()>;

    async fn invalidate(&self, ids: &[String]) -> SyncResult<()>;

    async fn drop_ids(&self, ids: &[String]) -> usize;

    async fn sync(&self, operation: GroupOperation) -> SyncResult<PushAck>;

    async fn handle_inbound(&self, message: InboundMessage);

    async fn connect(&self) -> SyncResult<()>;

    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn reset(&self);
}

#[async_trait]
impl<T: Record> ReplicatedCollection for Store<T> {
    fn name(&self) -> &str {
        Store::name(self)
    }

    fn len(&self) -> usize {
        Store::len(self)
    }

    fn version(&self) -> u64 {
        Store::version(self)
    }

    fn lifecycle(&self) -> Lifecycle {
        Store::lifecycle(self)
    }

    fn error(&self) -> Option<String> {
        Store::error(self)
    }

    async fn check_if_can_hydrate(&self) -> bool {
        Store::check_if_can_hydrate(self).await
    }

    async fn hydrate(&self, options: HydrateOptions) {
        Store::hydrate(self, options).await
    }

    async fn load(&self, records: Vec<Value>) -> SyncResult<usize> {
        let records = records
            .into_iter()
            .map(serde_json::from_value::<T>)
            .collect::<Result<Vec<_>, _>>()?;
        let count = records.len();
        Store::load(self, records).await;
        Ok(count)
    }

    async fn bootstrap(&self) -> SyncResult<()> {
        Store::bootstrap(self).await
    }

    async fn refetch(&self) -> SyncResult<()> {
        Store::refetch(self).await
    }

    async fn invalidate(&self, ids: &[String]) -> SyncResult<()> {
        self.invalidate_many(ids).await
    }

    async fn drop_ids(&self, ids: &[String]) -> usize {
        Store::drop_ids(self, ids).await
    }

    async fn sync(&self, operation: GroupOperation) -> SyncResult<PushAck> {
        Store::sync(self, operation).await
    }

    async fn handle_inbound(&self, message: InboundMessage) {
        Store::handle_inbound(self, message).await
    }

    async fn connect(&self) -> SyncResult<()> {
        Store::connect(self).await
    }

    fn disconnect(&self) {
        Store::disconnect(self)
    }

    fn is_connected(&self) -> bool {
        Store::is_connected(self)
    }

    fn reset(&self) {
        Store::reset(self)
    }
}
