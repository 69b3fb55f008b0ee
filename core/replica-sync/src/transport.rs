//! Replication channel abstraction.
//!
//! A store joins one channel per tenant, named after the store. The
//! transport hands back a [`ChannelHandle`]: a sink for pushes and a stream
//! of inbound deliveries. Concrete network transports live outside this
//! crate; [`memory`] provides an in-process hub.

use crate::error::SyncResult;
use async_trait::async_trait;
use replica_types::{ClientRef, InboundMessage, OutboundMessage, PushAck, TenantId};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Parameters of a channel join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    /// Channel name; the store name.
    pub topic: String,
    /// Tenant whose channel to join.
    pub tenant: TenantId,
    /// Last channel version this client has seen.
    pub since_version: u64,
    /// Ask the transport to replay messages newer than `since_version`.
    pub resume: bool,
}

/// One inbound message with the channel version it was assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub version: u64,
    pub message: InboundMessage,
}

/// The sending half of a joined channel.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    /// Pushes a message and waits for the channel's acknowledgement.
    async fn push(&self, message: OutboundMessage) -> SyncResult<PushAck>;
}

/// A joined channel.
pub struct ChannelHandle {
    pub sink: Arc<dyn ChannelSink>,
    pub inbound: mpsc::UnboundedReceiver<Delivery>,
}

/// A transport that can join replication channels.
#[async_trait]
pub trait ReplicationTransport: Send + Sync {
    /// Stable identifier of this client instance, used for echo suppression.
    fn client_ref(&self) -> ClientRef;

    /// Joins the channel described by `request`.
    async fn join(&self, request: JoinRequest) -> SyncResult<ChannelHandle>;
}

/// An in-process transport hub.
///
/// Every push is assigned the next version of its channel, recorded in the
/// channel history, and delivered to all members, the sender included.
pub mod memory {
    use super::*;
    use crate::error::SyncError;
    use std::collections::HashMap;
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use tracing::debug;

    type TopicKey = (TenantId, String);

    #[derive(Default)]
    struct Topic {
        version: u64,
        history: Vec<Delivery>,
        members: Vec<mpsc::UnboundedSender<Delivery>>,
    }

    impl Topic {
        fn publish(&mut self, message: InboundMessage) -> u64 {
            self.version += 1;
            let delivery = Delivery {
                version: self.version,
                message,
            };
            self.members.retain(|member| member.send(delivery.clone()).is_ok());
            self.history.push(delivery);
            self.version
        }
    }

    #[derive(Default)]
    struct HubState {
        topics: HashMap<TopicKey, Topic>,
        offline: bool,
    }

    /// Shared message hub. Clones refer to the same hub.
    #[derive(Clone, Default)]
    pub struct MemoryHub {
        state: Arc<Mutex<HubState>>,
    }

    impl MemoryHub {
        /// Creates an empty hub.
        pub fn new() -> Self {
            Self::default()
        }

        /// Creates a transport for a new client instance.
        pub fn transport(&self) -> MemoryTransport {
            MemoryTransport {
                hub: self.clone(),
                client_ref: ClientRef::new(),
            }
        }

        /// Broadcasts a server-originated message to a channel.
        pub fn publish(&self, tenant: &TenantId, topic: &str, message: InboundMessage) -> u64 {
            self.lock()
                .topics
                .entry((tenant.clone(), topic.to_string()))
                .or_default()
                .publish(message)
        }

        /// Number of live members on a channel.
        pub fn member_count(&self, tenant: &TenantId, topic: &str) -> usize {
            self.lock()
                .topics
                .get_mut(&(tenant.clone(), topic.to_string()))
                .map(|t| {
                    t.members.retain(|m| !m.is_closed());
                    t.members.len()
                })
                .unwrap_or(0)
        }

        /// Every delivery a channel has carried, oldest first.
        pub fn history(&self, tenant: &TenantId, topic: &str) -> Vec<Delivery> {
            self.lock()
                .topics
                .get(&(tenant.clone(), topic.to_string()))
                .map(|t| t.history.clone())
                .unwrap_or_default()
        }

        /// Simulates a network outage: joins and pushes fail while offline.
        pub fn set_offline(&self, offline: bool) {
            self.lock().offline = offline;
        }

        fn lock(&self) -> MutexGuard<'_, HubState> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// One client's view of a [`MemoryHub`].
    #[derive(Clone)]
    pub struct MemoryTransport {
        hub: MemoryHub,
        client_ref: ClientRef,
    }

    impl MemoryTransport {
        /// The hub this transport is attached to.
        pub fn hub(&self) -> &MemoryHub {
            &self.hub
        }
    }

    #[async_trait]
    impl ReplicationTransport for MemoryTransport {
        fn client_ref(&self) -> ClientRef {
            self.client_ref
        }

        async fn join(&self, request: JoinRequest) -> SyncResult<ChannelHandle> {
            let (tx, rx) = mpsc::unbounded_channel();
            let key = (request.tenant.clone(), request.topic.clone());
            {
                let mut state = self.hub.lock();
                if state.offline {
                    return Err(SyncError::Network("hub offline".into()));
                }
                let topic = state.topics.entry(key.clone()).or_default();
                if request.resume {
                    for delivery in topic.history.iter().filter(|d| d.version > request.since_version) {
                        let _ = tx.send(delivery.clone());
                    }
                }
                topic.members.push(tx);
            }
            debug!(
                "Client {} joined {}/{} (since {})",
                self.client_ref, request.tenant, request.topic, request.since_version
            );
            Ok(ChannelHandle {
                sink: Arc::new(MemorySink {
                    hub: self.hub.clone(),
                    key,
                }),
                inbound: rx,
            })
        }
    }

    struct MemorySink {
        hub: MemoryHub,
        key: TopicKey,
    }

    #[async_trait]
    impl ChannelSink for MemorySink {
        async fn push(&self, message: OutboundMessage) -> SyncResult<PushAck> {
            let mut state = self.hub.lock();
            if state.offline {
                return Err(SyncError::Network("hub offline".into()));
            }
            let version = state
                .topics
                .entry(self.key.clone())
                .or_default()
                .publish(message.into());
            Ok(PushAck { version })
        }
    }
}
