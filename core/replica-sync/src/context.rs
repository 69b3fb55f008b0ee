use crate::queue::TransactionQueue;
use crate::session::Session;
use crate::transport::ReplicationTransport;
use replica_storage::Persister;
use replica_types::ClientRef;
use std::sync::Arc;

/// The collaborators every store needs, passed explicitly.
///
/// One context is shared by all stores of a client instance. Cloning is
/// cheap.
#[derive(Clone)]
pub struct SyncContext {
    /// This client instance's `ref`, taken from the transport.
    pub client_ref: ClientRef,
    pub persister: Persister,
    pub transport: Arc<dyn ReplicationTransport>,
    pub queue: Arc<dyn TransactionQueue>,
    pub session: Session,
}

impl SyncContext {
    pub fn new(
        persister: Persister,
        transport: Arc<dyn ReplicationTransport>,
        queue: Arc<dyn TransactionQueue>,
        session: Session,
    ) -> Self {
        Self {
            client_ref: transport.client_ref(),
            persister,
            transport,
            queue,
            session,
        }
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("client_ref", &self.client_ref)
            .field("persister", &self.persister)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
