use pretty_assertions::assert_eq;
use replica_diff::{ConflictPolicy, DiffEdit, Path};
use replica_storage::Persister;
use replica_sync::queue::recording::RecordingQueue;
use replica_sync::repository::memory::MemoryRepository;
use replica_sync::transport::memory::MemoryHub;
use replica_sync::{
    GroupOperation, InboundMessage, Operation, Session, Store, StoreConfig, StoreEvent,
    SyncContext,
};
use replica_types::{ClientRef, TenantId};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn acme() -> TenantId {
    TenantId::new("acme").unwrap()
}

fn make_store(repo: &MemoryRepository<Value>, config: StoreConfig) -> Store<Value> {
    let session = Session::new();
    session.sign_in(acme());
    let context = SyncContext::new(
        Persister::in_memory(),
        Arc::new(MemoryHub::new().transport()),
        Arc::new(RecordingQueue::new()),
        session,
    );
    Store::new("organizations", config, context, Arc::new(repo.clone()))
}

fn no_persist() -> StoreConfig {
    StoreConfig {
        persist: false,
        ..Default::default()
    }
}

fn rename_op(client_ref: ClientRef, old: &str, new: &str) -> Operation {
    Operation::new(
        "organizations",
        "1",
        acme(),
        client_ref,
        vec![DiffEdit::update(
            ["name"].into_iter().collect::<Path>(),
            json!(old),
            json!(new),
        )],
    )
}

// ── sync_packet ──────────────────────────────────────────────────

#[tokio::test]
async fn remote_operation_patches_entity() {
    let repo = MemoryRepository::new();
    let store = make_store(&repo, StoreConfig::default());
    store.load(vec![json!({"id": "1", "name": "Acme"})]).await;
    let version = store.version();

    store
        .handle_inbound(InboundMessage::SyncPacket {
            operation: rename_op(ClientRef::new(), "Acme", "Acme Inc"),
        })
        .await;

    assert_eq!(store.get("1"), Some(json!({"id": "1", "name": "Acme Inc"})));
    assert_eq!(store.version(), version + 1);
    assert_eq!(store.entity("1").version(), Some(1));
}

#[tokio::test]
async fn own_operation_echo_is_ignored() {
    let repo = MemoryRepository::new();
    let store = make_store(&repo, no_persist());
    store.load(vec![json!({"id": "1", "name": "Acme"})]).await;
    let version = store.version();

    store
        .handle_inbound(InboundMessage::SyncPacket {
            operation: rename_op(store.client_ref(), "Acme", "Acme Inc"),
        })
        .await;

    assert_eq!(store.get("1"), Some(json!({"id": "1", "name": "Acme"})));
    assert_eq!(store.version(), version);
}

#[tokio::test]
async fn operations_for_other_types_or_tenants_are_ignored() {
    let repo = MemoryRepository::new();
    let store = make_store(&repo, no_persist());
    store.load(vec![json!({"id": "1", "name": "Acme"})]).await;

    let mut other_type = rename_op(ClientRef::new(), "Acme", "X");
    other_type.entity = "contacts".into();
    let mut other_tenant = rename_op(ClientRef::new(), "Acme", "Y");
    other_tenant.tenant = TenantId::new("globex").unwrap();

    for operation in [other_type, other_tenant] {
        store.handle_inbound(InboundMessage::SyncPacket { operation }).await;
    }

    assert_eq!(store.get("1"), Some(json!({"id": "1", "name": "Acme"})));
}

#[tokio::test]
async fn unappliable_operation_leaves_entity_untouched() {
    let repo = MemoryRepository::new();
    let store = make_store(&repo, no_persist());
    store.load(vec![json!({"id": "1", "tags": ["a"]})]).await;

    let operation = Operation::new(
        "organizations",
        "1",
        acme(),
        ClientRef::new(),
        vec![
            DiffEdit::add(["name"].into_iter().collect(), json!("ok")),
            DiffEdit::update(
                Path::root().child("tags").child(5usize),
                json!("z"),
                json!("y"),
            ),
        ],
    );
    store.handle_inbound(InboundMessage::SyncPacket { operation }).await;

    assert_eq!(store.get("1"), Some(json!({"id": "1", "tags": ["a"]})));
}

#[tokio::test]
async fn reject_stale_reports_conflict() {
    let repo = MemoryRepository::new();
    let store = make_store(
        &repo,
        StoreConfig {
            conflict_policy: ConflictPolicy::RejectStale,
            persist: false,
            ..Default::default()
        },
    );
    store.load(vec![json!({"id": "1", "name": "Acme Corp"})]).await;
    let mut events = store.subscribe();

    store
        .handle_inbound(InboundMessage::SyncPacket {
            operation: rename_op(ClientRef::new(), "Acme", "Acme Inc"),
        })
        .await;

    assert_eq!(store.get("1"), Some(json!({"id": "1", "name": "Acme Corp"})));
    assert_eq!(
        events.recv().await.unwrap(),
        StoreEvent::Conflict {
            id: "1".into(),
            paths: vec!["/name".into()]
        }
    );
}

// ── sync_group_packet ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn append_creates_placeholder_and_refetches_once() {
    let repo = MemoryRepository::new();
    repo.insert(json!({"id": "7", "name": "Initech"}));
    let store = make_store(&repo, no_persist());

    store
        .handle_inbound(InboundMessage::SyncGroupPacket(GroupOperation::append(
            vec!["7".into()],
            ClientRef::new(),
        )))
        .await;

    assert_eq!(store.get("7"), Some(json!({"id": "7"})));
    assert!(repo.fetched().is_empty());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(repo.fetched().is_empty());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(repo.fetched(), vec![vec!["7".to_string()]]);
    assert_eq!(store.get("7"), Some(json!({"id": "7", "name": "Initech"})));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(repo.fetched().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn append_keeps_placeholder_until_server_has_record() {
    let repo = MemoryRepository::new();
    let store = make_store(&repo, no_persist());

    store
        .handle_inbound(InboundMessage::SyncGroupPacket(GroupOperation::append(
            vec!["7".into()],
            ClientRef::new(),
        )))
        .await;
    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(repo.fetched(), vec![vec!["7".to_string()]]);
    assert_eq!(store.get("7"), Some(json!({"id": "7"})));

    repo.insert(json!({"id": "7", "name": "Initech"}));
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(store.get("7"), Some(json!({"id": "7", "name": "Initech"})));
    assert_eq!(repo.fetched().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn append_gives_up_but_keeps_placeholder() {
    let repo = MemoryRepository::new();
    let store = make_store(
        &repo,
        StoreConfig {
            append_refetch_retries: 2,
            persist: false,
            ..Default::default()
        },
    );

    store
        .handle_inbound(InboundMessage::SyncGroupPacket(GroupOperation::append(
            vec!["7".into()],
            ClientRef::new(),
        )))
        .await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    // 1s, then 2s, then 4s
    assert_eq!(repo.fetched().len(), 3);
    assert!(store.contains("7"));
}

#[tokio::test(start_paused = true)]
async fn delete_stops_pending_append_refetch() {
    let repo = MemoryRepository::new();
    let store = make_store(&repo, no_persist());

    for operation in [
        GroupOperation::append(vec!["7".into()], ClientRef::new()),
        GroupOperation::delete(vec!["7".into()], ClientRef::new()),
    ] {
        store
            .handle_inbound(InboundMessage::SyncGroupPacket(operation))
            .await;
    }
    repo.insert(json!({"id": "7", "name": "Initech"}));
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(!store.contains("7"));
    assert!(repo.fetched().is_empty());
}

#[tokio::test(start_paused = true)]
async fn append_skips_known_ids() {
    let repo = MemoryRepository::new();
    let store = make_store(&repo, no_persist());
    store.load(vec![json!({"id": "1", "name": "Acme"})]).await;

    store
        .handle_inbound(InboundMessage::SyncGroupPacket(GroupOperation::append(
            vec!["1".into()],
            ClientRef::new(),
        )))
        .await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(store.get("1"), Some(json!({"id": "1", "name": "Acme"})));
    assert!(repo.fetched().is_empty());
}

#[tokio::test(start_paused = true)]
async fn own_append_echo_is_ignored() {
    let repo = MemoryRepository::new();
    let store = make_store(&repo, no_persist());

    store
        .handle_inbound(InboundMessage::SyncGroupPacket(GroupOperation::append(
            vec!["7".into()],
            store.client_ref(),
        )))
        .await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(store.is_empty());
    assert!(repo.fetched().is_empty());
}

#[tokio::test]
async fn delete_removes_ids() {
    let repo = MemoryRepository::new();
    let store = make_store(&repo, StoreConfig::default());
    store
        .load(vec![json!({"id": "1"}), json!({"id": "2"}), json!({"id": "3"})])
        .await;

    store
        .handle_inbound(InboundMessage::SyncGroupPacket(GroupOperation::delete(
            vec!["1".into(), "2".into()],
            ClientRef::new(),
        )))
        .await;

    assert_eq!(store.len(), 1);
    assert_eq!(store.ids(), vec!["3"]);
}

#[tokio::test]
async fn invalidate_refetches_immediately() {
    let repo = MemoryRepository::new();
    repo.insert(json!({"id": "1", "name": "Acme Inc"}));
    repo.insert(json!({"id": "2", "name": "Globex LLC"}));
    let store = make_store(&repo, StoreConfig::default());
    store
        .load(vec![json!({"id": "1", "name": "Acme"}), json!({"id": "2", "name": "Globex"})])
        .await;

    store
        .handle_inbound(InboundMessage::SyncGroupPacket(GroupOperation::invalidate(
            vec!["1".into(), "2".into()],
            ClientRef::new(),
        )))
        .await;

    assert_eq!(repo.fetched(), vec![vec!["1".to_string(), "2".to_string()]]);
    assert_eq!(store.get("2"), Some(json!({"id": "2", "name": "Globex LLC"})));
}

#[tokio::test]
async fn invalidate_leaves_drafted_entity_alone() {
    let repo = MemoryRepository::new();
    repo.insert(json!({"id": "1", "name": "Acme Inc"}));
    let store = make_store(&repo, no_persist());
    store.load(vec![json!({"id": "1", "name": "Acme"})]).await;
    store.draft("1");
    store.update("1", |v| v["name"] = json!("X"));

    store
        .handle_inbound(InboundMessage::SyncGroupPacket(GroupOperation::invalidate(
            vec!["1".into()],
            ClientRef::new(),
        )))
        .await;

    assert_eq!(store.get("1"), Some(json!({"id": "1", "name": "X"})));
    assert_eq!(store.snapshot("1"), Some(json!({"id": "1", "name": "Acme"})));
}
