use pretty_assertions::assert_eq;
use replica_storage::{Backend, Persister, PersisterConfig, BOOTSTRAPPED_KEY, META_TABLE, SCHEMA_VERSION, VERSION_KEY};
use replica_sync::queue::recording::RecordingQueue;
use replica_sync::repository::memory::MemoryRepository;
use replica_sync::transport::memory::MemoryHub;
use replica_sync::{
    CoordinatorConfig, RepositoryError, RootCoordinator, Session, Store, StoreConfig, SyncContext,
    SyncError,
};
use replica_types::TenantId;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn tenant(id: &str) -> TenantId {
    TenantId::new(id).unwrap()
}

struct Setup {
    coordinator: RootCoordinator,
    organizations: Store<Value>,
    contacts: Store<Value>,
}

fn setup(persister: &Persister, orgs: &MemoryRepository<Value>, contacts: &MemoryRepository<Value>) -> Setup {
    let hub = MemoryHub::new();
    let context = SyncContext::new(
        persister.clone(),
        Arc::new(hub.transport()),
        Arc::new(RecordingQueue::new()),
        Session::new(),
    );
    let organizations = Store::new(
        "organizations",
        StoreConfig::default(),
        context.clone(),
        Arc::new(orgs.clone()),
    );
    let contact_store = Store::new(
        "contacts",
        StoreConfig::default(),
        context.clone(),
        Arc::new(contacts.clone()),
    );
    let mut coordinator = RootCoordinator::new(context, CoordinatorConfig::default());
    coordinator.register(organizations.clone());
    coordinator.register(contact_store.clone());
    Setup {
        coordinator,
        organizations,
        contacts: contact_store,
    }
}

fn file_persister(dir: &tempfile::TempDir) -> Persister {
    Persister::open(PersisterConfig {
        backend: Backend::Directory(dir.path().to_path_buf()),
        ..Default::default()
    })
    .unwrap()
}

// ── Start ────────────────────────────────────────────────────────

#[tokio::test]
async fn cold_start_bootstraps_every_store() {
    let persister = Persister::in_memory();
    let orgs = MemoryRepository::with_records(vec![json!({"id": "1", "name": "Acme"})]);
    let contacts = MemoryRepository::with_records(vec![json!({"id": "c1"}), json!({"id": "c2"})]);
    let s = setup(&persister, &orgs, &contacts);
    s.coordinator.sign_in(tenant("acme")).await.unwrap();

    let report = s.coordinator.start().await.unwrap();

    assert_eq!(report.tenant, tenant("acme"));
    assert_eq!(report.bootstrapped, vec!["organizations", "contacts"]);
    assert!(report.restored_from_cache.is_empty());
    assert!(report.purge.unwrap().purged);
    assert!(s.coordinator.is_ready());
    assert_eq!(s.organizations.len(), 1);
    assert_eq!(s.contacts.len(), 2);
    assert!(s.organizations.is_connected());
    assert_eq!(s.coordinator.store("contacts").unwrap().len(), 2);
}

#[tokio::test]
async fn start_waits_for_sign_in() {
    let persister = Persister::in_memory();
    let orgs = MemoryRepository::new();
    let contacts = MemoryRepository::new();
    let s = Arc::new(setup(&persister, &orgs, &contacts));

    let started = tokio::spawn({
        let s = s.clone();
        async move { s.coordinator.start().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!started.is_finished());

    s.coordinator.session().sign_in(tenant("acme"));
    let report = tokio::time::timeout(Duration::from_secs(2), started)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report.tenant, tenant("acme"));
}

#[tokio::test]
async fn warm_start_hydrates_then_refetches() {
    let dir = tempfile::tempdir().unwrap();
    let orgs = MemoryRepository::with_records(vec![json!({"id": "1", "name": "Acme"})]);
    let contacts = MemoryRepository::new();
    {
        let s = setup(&file_persister(&dir), &orgs, &contacts);
        s.coordinator.sign_in(tenant("acme")).await.unwrap();
        s.coordinator.start().await.unwrap();
    }

    orgs.insert(json!({"id": "1", "name": "Acme Inc"}));
    let persister = file_persister(&dir);
    let s = setup(&persister, &orgs, &contacts);
    assert_eq!(s.coordinator.restore_session().await.unwrap(), Some(tenant("acme")));

    let report = s.coordinator.start().await.unwrap();

    assert_eq!(report.restored_from_cache, vec!["organizations", "contacts"]);
    assert!(!report.purge.unwrap().purged);
    assert_eq!(s.organizations.get("1"), Some(json!({"id": "1", "name": "Acme Inc"})));
    assert!(s.coordinator.is_ready());
}

#[tokio::test]
async fn stale_schema_purges_before_hydrate() {
    let persister = Persister::in_memory();
    persister
        .shared(META_TABLE)
        .set_item(VERSION_KEY, &(SCHEMA_VERSION - 1))
        .unwrap();
    persister
        .instance(&tenant("acme"), "organizations")
        .set_item(BOOTSTRAPPED_KEY, &true)
        .unwrap();
    let orgs = MemoryRepository::with_records(vec![json!({"id": "1"})]);
    let s = setup(&persister, &orgs, &MemoryRepository::new());
    s.coordinator.sign_in(tenant("acme")).await.unwrap();

    let report = s.coordinator.start().await.unwrap();

    let purge = report.purge.unwrap();
    assert_eq!(purge.dropped, vec!["replica-tenant-acme"]);
    assert_eq!(report.bootstrapped, vec!["organizations", "contacts"]);
}

#[tokio::test]
async fn failing_store_does_not_stop_the_others() {
    let persister = Persister::in_memory();
    let orgs = MemoryRepository::new();
    orgs.fail_next(RepositoryError::Network("timeout".into()));
    let contacts = MemoryRepository::with_records(vec![json!({"id": "c1"})]);
    let s = setup(&persister, &orgs, &contacts);
    s.coordinator.sign_in(tenant("acme")).await.unwrap();

    let result = s.coordinator.start().await;

    assert!(matches!(result, Err(SyncError::Repository(RepositoryError::Network(_)))));
    assert_eq!(s.organizations.error().as_deref(), Some("network error: timeout"));
    assert_eq!(s.contacts.len(), 1);
    assert!(!s.coordinator.is_ready());
}

// ── Session ──────────────────────────────────────────────────────

#[tokio::test]
async fn switching_tenant_replaces_contents() {
    let persister = Persister::in_memory();
    let orgs = MemoryRepository::with_records(vec![json!({"id": "1"})]);
    let contacts = MemoryRepository::new();
    let s = setup(&persister, &orgs, &contacts);
    s.coordinator.sign_in(tenant("acme")).await.unwrap();
    s.coordinator.start().await.unwrap();

    orgs.remove("1");
    orgs.insert(json!({"id": "g1"}));
    let report = s.coordinator.switch_tenant(tenant("globex")).await.unwrap();

    assert_eq!(report.tenant, tenant("globex"));
    assert_eq!(s.organizations.ids(), vec!["g1"]);
    assert_eq!(
        persister.list_tenant_databases().unwrap(),
        vec!["replica-tenant-acme", "replica-tenant-globex"]
    );
    assert_eq!(s.coordinator.restore_session().await.unwrap(), Some(tenant("globex")));
}

#[tokio::test]
async fn sign_out_forgets_tenant() {
    let persister = Persister::in_memory();
    let orgs = MemoryRepository::with_records(vec![json!({"id": "1"})]);
    let s = setup(&persister, &orgs, &MemoryRepository::new());
    s.coordinator.sign_in(tenant("acme")).await.unwrap();
    s.coordinator.start().await.unwrap();

    s.coordinator.sign_out().await.unwrap();

    assert!(s.organizations.is_empty());
    assert!(!s.organizations.is_connected());
    assert_eq!(s.coordinator.session().tenant(), None);
    assert_eq!(s.coordinator.restore_session().await.unwrap(), None);
}
