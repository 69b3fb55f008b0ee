//! Replication channel: joining, pushing group operations and applying
//! inbound messages.

use super::{Store, StoreEvent, StoreInner};
use crate::entity::Entity;
use crate::error::{SyncError, SyncResult};
use crate::record::Record;
use crate::transport::{ChannelSink, JoinRequest};
use replica_diff::apply_with_policy;
use replica_types::{GroupAction, GroupOperation, InboundMessage, Operation, OutboundMessage, PushAck, TenantId};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub(crate) struct Connection {
    pub(super) tenant: TenantId,
    pub(super) sink: Arc<dyn ChannelSink>,
    pub(super) listener: JoinHandle<()>,
}

impl<T: Record> Store<T> {
    /// Joins this store's channel for the active tenant and starts the
    /// listener task.
    ///
    /// Already being connected to the active tenant is a no-op. A connection
    /// to another tenant is replaced.
    pub async fn connect(&self) -> SyncResult<()> {
        let tenant = self.tenant()?;
        {
            let channel = self.channel();
            if let Some(connection) = channel.as_ref() {
                if connection.tenant == tenant && !connection.listener.is_finished() {
                    return Ok(());
                }
            }
        }
        self.disconnect();

        let since_version = self.channel_version();
        let handle = self
            .inner
            .context
            .transport
            .join(JoinRequest {
                topic: self.inner.name.clone(),
                tenant: tenant.clone(),
                since_version,
                resume: since_version > 0,
            })
            .await?;

        let weak = Arc::downgrade(&self.inner);
        let mut inbound = handle.inbound;
        let listener = tokio::spawn(async move {
            while let Some(delivery) = inbound.recv().await {
                let Some(store) = upgrade(&weak) else {
                    break;
                };
                store.observe_channel_version(delivery.version);
                store.handle_inbound(delivery.message).await;
            }
        });

        info!("[{}] joined channel for tenant {}", self.inner.name, tenant);
        let previous = self.channel().replace(Connection {
            tenant,
            sink: handle.sink,
            listener,
        });
        if let Some(previous) = previous {
            previous.listener.abort();
        }
        Ok(())
    }

    /// Leaves the channel and stops the listener.
    pub fn disconnect(&self) {
        if let Some(connection) = self.channel().take() {
            connection.listener.abort();
            debug!("[{}] left channel for tenant {}", self.inner.name, connection.tenant);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.channel()
            .as_ref()
            .is_some_and(|c| !c.listener.is_finished())
    }

    /// Pushes a group operation to the channel, tagged with this client's
    /// `ref`, and returns the channel's acknowledgement.
    pub async fn sync(&self, operation: GroupOperation) -> SyncResult<PushAck> {
        let sink = self
            .channel()
            .as_ref()
            .map(|c| c.sink.clone())
            .ok_or_else(|| SyncError::NotConnected(self.inner.name.clone()))?;

        let operation = operation.tagged(self.client_ref());
        debug!(
            "[{}] pushing {} for {} id(s)",
            self.inner.name,
            operation.action,
            operation.ids.len()
        );
        let ack = sink
            .push(OutboundMessage::SyncGroupPacket { operation })
            .await?;
        self.observe_channel_version(ack.version);
        Ok(ack)
    }

    /// Applies one inbound channel message. Own echoes are dropped.
    pub async fn handle_inbound(&self, message: InboundMessage) {
        if message.client_ref() == self.client_ref() {
            debug!("[{}] dropping own {} echo", self.inner.name, message.event_name());
            return;
        }
        match message {
            InboundMessage::SyncPacket { operation } => self.apply_remote(operation).await,
            InboundMessage::SyncGroupPacket(group) => self.apply_group(group).await,
        }
    }

    async fn apply_remote(&self, operation: Operation) {
        if operation.entity != self.inner.name {
            debug!(
                "[{}] ignoring operation for entity type {}",
                self.inner.name, operation.entity
            );
            return;
        }
        if self.inner.context.session.tenant().as_ref() != Some(&operation.tenant) {
            debug!("[{}] ignoring operation for tenant {}", self.inner.name, operation.tenant);
            return;
        }

        let id = operation.entity_id.clone();
        let rejected = {
            let mut state = self.write();
            let Some(entity) = state.entities.get_mut(&id) else {
                debug!("[{}] operation for unknown entity {}", self.inner.name, id);
                return;
            };
            let mut value = match serde_json::to_value(entity.value()) {
                Ok(value) => value,
                Err(e) => {
                    warn!("[{}] could not encode {}: {}", self.inner.name, id, e);
                    return;
                }
            };
            let report = match apply_with_policy(&mut value, &operation.diff, self.inner.config.conflict_policy) {
                Ok(report) => report,
                Err(e) => {
                    warn!("[{}] dropping operation {} for {}: {}", self.inner.name, operation.id, id, e);
                    return;
                }
            };
            if report.applied > 0 {
                match serde_json::from_value::<T>(value) {
                    Ok(record) => entity.set_value(record),
                    Err(e) => {
                        warn!("[{}] patched {} no longer decodes: {}", self.inner.name, id, e);
                        return;
                    }
                }
                entity.bump_version();
                state.version += 1;
            }
            report.rejected
        };

        if rejected.len() < operation.diff.len() {
            self.emit(StoreEvent::Changed {
                ids: vec![id.clone()],
            });
        }
        if !rejected.is_empty() {
            let paths = rejected.iter().map(|edit| edit.path.to_string()).collect();
            warn!("[{}] {} stale edit(s) refused on {}", self.inner.name, rejected.len(), id);
            self.emit(StoreEvent::Conflict { id, paths });
        }
        self.persist().await;
    }

    async fn apply_group(&self, group: GroupOperation) {
        match group.action {
            GroupAction::Append => {
                let added: Vec<String> = {
                    let mut state = self.write();
                    let added: Vec<String> = group
                        .ids
                        .iter()
                        .filter(|id| !state.entities.contains_key(id.as_str()))
                        .cloned()
                        .collect();
                    for id in &added {
                        state
                            .entities
                            .insert(id.clone(), Entity::new(id.clone(), T::placeholder(id)));
                    }
                    if !added.is_empty() {
                        state.version += 1;
                    }
                    added
                };
                if added.is_empty() {
                    return;
                }
                debug!("[{}] APPEND of {:?}", self.inner.name, added);
                self.emit(StoreEvent::Changed { ids: added.clone() });
                for id in added {
                    self.schedule_refetch(id);
                }
            }
            GroupAction::Delete => {
                let removed = self.drop_ids(&group.ids).await;
                debug!("[{}] DELETE removed {} entit(ies)", self.inner.name, removed);
            }
            GroupAction::Invalidate => {
                if let Err(e) = self.invalidate_many(&group.ids).await {
                    warn!("[{}] INVALIDATE failed: {}", self.inner.name, e);
                }
            }
        }
    }

    /// Refetches an appended id once the configured grace period has passed.
    ///
    /// While the repository does not return the id yet, the placeholder is
    /// kept and the refetch retried with a doubling delay.
    fn schedule_refetch(&self, id: String) {
        let weak = Arc::downgrade(&self.inner);
        let mut delay = self.inner.config.append_refetch_delay;
        let retries = self.inner.config.append_refetch_retries;
        tokio::spawn(async move {
            for attempt in 0..=retries {
                tokio::time::sleep(delay).await;
                let Some(store) = upgrade(&weak) else {
                    return;
                };
                match store.refetch_appended(&id).await {
                    Ok(true) => return,
                    Ok(false) => debug!(
                        "[{}] appended {} not on the server yet (attempt {})",
                        store.inner.name,
                        id,
                        attempt + 1
                    ),
                    Err(e) => warn!("[{}] refetch of appended {} failed: {}", store.inner.name, id, e),
                }
                delay = delay.saturating_mul(2);
            }
            if let Some(store) = upgrade(&weak) {
                warn!(
                    "[{}] appended {} still missing after {} attempt(s), keeping placeholder",
                    store.inner.name,
                    id,
                    retries + 1
                );
            }
        });
    }

    fn observe_channel_version(&self, version: u64) {
        let mut state = self.write();
        state.channel_version = state.channel_version.max(version);
    }
}

fn upgrade<T: Record>(weak: &Weak<StoreInner<T>>) -> Option<Store<T>> {
    weak.upgrade().map(Store::from_inner)
}
