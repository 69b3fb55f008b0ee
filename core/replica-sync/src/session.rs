//! Shared authentication and tenant state.
//!
//! Lower layers never read a global; they hold a [`Session`] clone and wait
//! on it until a tenant is active.

use replica_types::TenantId;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Snapshot of the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub authenticated: bool,
    pub tenant: Option<TenantId>,
}

impl SessionState {
    /// The tenant, if the session is signed in.
    pub fn active_tenant(&self) -> Option<TenantId> {
        if self.authenticated {
            self.tenant.clone()
        } else {
            None
        }
    }
}

/// Observable session state shared by every store.
#[derive(Debug, Clone)]
pub struct Session {
    tx: Arc<watch::Sender<SessionState>>,
}

impl Session {
    /// Creates a signed-out session.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::default());
        Self { tx: Arc::new(tx) }
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    /// Returns the active tenant without waiting.
    pub fn tenant(&self) -> Option<TenantId> {
        self.tx.borrow().active_tenant()
    }

    /// Marks the session authenticated for `tenant`.
    pub fn sign_in(&self, tenant: TenantId) {
        info!("Session active for tenant {}", tenant);
        self.tx.send_modify(|state| {
            state.authenticated = true;
            state.tenant = Some(tenant);
        });
    }

    /// Clears authentication and tenant.
    pub fn sign_out(&self) {
        info!("Session signed out");
        self.tx.send_replace(SessionState::default());
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Resolves once the session is signed in, with the active tenant.
    pub async fn wait_for_tenant(&self) -> TenantId {
        let mut rx = self.tx.subscribe();
        loop {
            let active = rx.borrow_and_update().active_tenant();
            if let Some(tenant) = active {
                return tenant;
            }
            if rx.changed().await.is_err() {
                // Unreachable while `self` holds the sender
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
