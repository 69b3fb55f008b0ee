use pretty_assertions::assert_eq;
use replica_sync::transport::memory::MemoryHub;
use replica_sync::{
    ChannelSink, ChannelTransactionQueue, CommitOptions, GroupOperation, InboundMessage, JoinRequest,
    Operation, Record, ReplicationTransport, Session, SessionState, SyncError, TransactionQueue,
};
use replica_types::{ClientRef, OutboundMessage, TenantId};
use serde_json::json;
use std::time::Duration;

fn acme() -> TenantId {
    TenantId::new("acme").unwrap()
}

fn join(tenant: TenantId, since_version: u64, resume: bool) -> JoinRequest {
    JoinRequest {
        topic: "organizations".into(),
        tenant,
        since_version,
        resume,
    }
}

// ── Session ──────────────────────────────────────────────────────

#[tokio::test]
async fn session_starts_signed_out() {
    let session = Session::new();
    assert_eq!(session.state(), SessionState::default());
    assert_eq!(session.tenant(), None);
}

#[tokio::test]
async fn wait_for_tenant_resolves_on_sign_in() {
    let session = Session::new();
    let waiter = tokio::spawn({
        let session = session.clone();
        async move { session.wait_for_tenant().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    session.sign_in(acme());

    let tenant = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tenant, acme());
}

#[tokio::test]
async fn wait_for_tenant_returns_immediately_when_signed_in() {
    let session = Session::new();
    session.sign_in(acme());
    assert_eq!(session.wait_for_tenant().await, acme());
}

#[tokio::test]
async fn sign_out_clears_state() {
    let session = Session::new();
    let mut rx = session.subscribe();
    session.sign_in(acme());
    session.sign_out();

    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow(), SessionState::default());
}

// ── Transaction queue ────────────────────────────────────────────

#[tokio::test]
async fn channel_queue_forwards_in_order() {
    let (queue, mut rx) = ChannelTransactionQueue::new();
    let first = Operation::new("organizations", "1", acme(), ClientRef::new(), vec![]);
    let second = Operation::new("organizations", "2", acme(), ClientRef::new(), vec![]);

    queue.commit(first.clone(), CommitOptions::default()).await.unwrap();
    queue
        .commit(second.clone(), CommitOptions { sync_only: true })
        .await
        .unwrap();

    let a = rx.recv().await.unwrap();
    let b = rx.recv().await.unwrap();
    assert_eq!(a.operation, first);
    assert_eq!(b.operation, second);
    assert!(b.options.sync_only);
}

#[tokio::test]
async fn channel_queue_reports_closed_receiver() {
    let (queue, rx) = ChannelTransactionQueue::new();
    drop(rx);

    let op = Operation::new("organizations", "1", acme(), ClientRef::new(), vec![]);
    let result = queue.commit(op, CommitOptions::default()).await;

    assert!(matches!(result, Err(SyncError::ChannelClosed)));
}

// ── Memory hub ───────────────────────────────────────────────────

#[tokio::test]
async fn push_reaches_every_member_including_sender() {
    let hub = MemoryHub::new();
    let a = hub.transport();
    let b = hub.transport();
    assert_ne!(a.client_ref(), b.client_ref());

    let mut a_chan = a.join(join(acme(), 0, false)).await.unwrap();
    let mut b_chan = b.join(join(acme(), 0, false)).await.unwrap();

    let ack = a_chan
        .sink
        .push(OutboundMessage::SyncGroupPacket {
            operation: GroupOperation::append(vec!["7".into()], a.client_ref()),
        })
        .await
        .unwrap();

    assert_eq!(ack.version, 1);
    let expected = InboundMessage::SyncGroupPacket(GroupOperation::append(vec!["7".into()], a.client_ref()));
    assert_eq!(a_chan.inbound.recv().await.unwrap().message, expected);
    let delivery = b_chan.inbound.recv().await.unwrap();
    assert_eq!(delivery.version, 1);
    assert_eq!(delivery.message, expected);
}

#[tokio::test]
async fn tenants_have_separate_channels() {
    let hub = MemoryHub::new();
    let transport = hub.transport();
    let _acme = transport.join(join(acme(), 0, false)).await.unwrap();
    let mut globex = transport
        .join(join(TenantId::new("globex").unwrap(), 0, false))
        .await
        .unwrap();

    hub.publish(
        &acme(),
        "organizations",
        InboundMessage::SyncGroupPacket(GroupOperation::delete(vec!["1".into()], ClientRef::new())),
    );

    assert!(globex.inbound.try_recv().is_err());
    assert_eq!(hub.member_count(&acme(), "organizations"), 1);
}

#[tokio::test]
async fn resume_replays_history_after_version() {
    let hub = MemoryHub::new();
    for id in ["1", "2", "3"] {
        hub.publish(
            &acme(),
            "organizations",
            InboundMessage::SyncGroupPacket(GroupOperation::invalidate(vec![id.into()], ClientRef::new())),
        );
    }

    let mut chan = hub.transport().join(join(acme(), 1, true)).await.unwrap();

    let versions: Vec<u64> = [chan.inbound.recv().await.unwrap(), chan.inbound.recv().await.unwrap()]
        .iter()
        .map(|d| d.version)
        .collect();
    assert_eq!(versions, vec![2, 3]);
    assert!(chan.inbound.try_recv().is_err());
}

// ── Record ───────────────────────────────────────────────────────

#[test]
fn json_record_ids() {
    assert_eq!(json!({"id": "abc"}).id(), "abc");
    assert_eq!(json!({"id": 42}).id(), "42");
    assert_eq!(serde_json::Value::placeholder("7"), json!({"id": "7"}));
    assert_eq!(json!({"id": "tmp-1", "name": "X"}).with_id("9"), json!({"id": "9", "name": "X"}));
}

// ── Logging ──────────────────────────────────────────────────────

#[test]
fn init_logging_installs_once() {
    replica_sync::logging::init_logging("replica_sync=debug");
    assert!(!replica_sync::logging::init_logging("replica_sync=debug"));
}
