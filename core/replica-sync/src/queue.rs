//! Outbound transaction queue.
//!
//! Stores never send field-level operations over the channel themselves.
//! `commit` hands each [`Operation`] to a [`TransactionQueue`]; delivery,
//! retry and backoff belong to whatever drains the queue.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use replica_types::Operation;
use tokio::sync::mpsc;

/// Options forwarded with a committed operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOptions {
    /// Deliver to other clients only; the server does not persist it.
    pub sync_only: bool,
}

/// Accepts committed operations for eventual delivery.
#[async_trait]
pub trait TransactionQueue: Send + Sync {
    async fn commit(&self, operation: Operation, options: CommitOptions) -> SyncResult<()>;
}

/// An operation waiting in a [`ChannelTransactionQueue`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedOperation {
    pub operation: Operation,
    pub options: CommitOptions,
}

/// Forwards committed operations into an unbounded mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelTransactionQueue {
    tx: mpsc::UnboundedSender<QueuedOperation>,
}

impl ChannelTransactionQueue {
    /// Creates the queue and the receiver its delivery worker drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<QueuedOperation>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TransactionQueue for ChannelTransactionQueue {
    async fn commit(&self, operation: Operation, options: CommitOptions) -> SyncResult<()> {
        self.tx
            .send(QueuedOperation { operation, options })
            .map_err(|_| SyncError::ChannelClosed)
    }
}

/// A queue that records every commit. Useful in tests.
pub mod recording {
    use super::*;
    use std::sync::{Arc, Mutex, PoisonError};

    #[derive(Debug, Clone, Default)]
    pub struct RecordingQueue {
        committed: Arc<Mutex<Vec<QueuedOperation>>>,
    }

    impl RecordingQueue {
        pub fn new() -> Self {
            Self::default()
        }

        /// Everything committed so far, in order.
        pub fn committed(&self) -> Vec<QueuedOperation> {
            self.committed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub fn len(&self) -> usize {
            self.committed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    #[async_trait]
    impl TransactionQueue for RecordingQueue {
        async fn commit(&self, operation: Operation, options: CommitOptions) -> SyncResult<()> {
            self.committed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(QueuedOperation { operation, options });
            Ok(())
        }
    }
}
