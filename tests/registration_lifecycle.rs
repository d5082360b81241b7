// Registration lifecycle through the owner actor: exclusivity on
// re-registration, snapshot replication, and the persisted file contents.
use std::sync::Arc;

use postern::{
    RegistryOwner, RegistryStore,
    core::{OwnerCommand, Registry, RegistrySnapshot, ServiceRegistration},
};
use tokio::sync::{mpsc, oneshot, watch};

struct OwnerHarness {
    commands: mpsc::Sender<OwnerCommand>,
    snapshots: watch::Receiver<Arc<RegistrySnapshot>>,
    state_path: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

fn spawn_owner() -> OwnerHarness {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("registry.json");
    let store = RegistryStore::new(&state_path);
    let (command_tx, command_rx) = mpsc::channel(16);
    let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(RegistrySnapshot::default()));
    let (restart_tx, _restart_rx) = mpsc::channel(1);

    let owner = RegistryOwner::new(
        Registry::new(),
        store,
        command_rx,
        snapshot_tx,
        restart_tx,
        3,
    );
    tokio::spawn(owner.run());

    OwnerHarness {
        commands: command_tx,
        snapshots: snapshot_rx,
        state_path,
        _dir: dir,
    }
}

async fn register(harness: &OwnerHarness, name: &str, url: &str, routes: &[&str]) {
    let (ack_tx, ack_rx) = oneshot::channel();
    harness
        .commands
        .send(OwnerCommand::Register {
            registration: ServiceRegistration {
                name: name.to_string(),
                url: url.to_string(),
                routes: routes.iter().map(|r| r.to_string()).collect(),
            },
            ack: ack_tx,
        })
        .await
        .unwrap();
    ack_rx.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reregistration_moves_url_between_prefixes() {
    let mut harness = spawn_owner();

    register(&harness, "svc", "http://localhost:5001", &["/old"]).await;
    register(&harness, "svc", "http://localhost:5001", &["/new"]).await;

    harness.snapshots.changed().await.unwrap();
    let snapshot = harness.snapshots.borrow_and_update().clone();

    // /old was emptied by the move and must be gone.
    assert!(snapshot.find_route("/old/x").is_none());
    let entry = snapshot.find_route("/new/x").unwrap();
    assert_eq!(entry.targets, vec!["http://localhost:5001"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_multi_prefix_registration() {
    let mut harness = spawn_owner();

    register(
        &harness,
        "cms",
        "http://localhost:5001",
        &["/pages", "/assets"],
    )
    .await;

    harness.snapshots.changed().await.unwrap();
    let snapshot = harness.snapshots.borrow_and_update().clone();

    for path in ["/pages/home", "/assets/logo.png"] {
        let entry = snapshot.find_route(path).unwrap();
        assert_eq!(entry.service_name, "cms");
        assert_eq!(entry.targets, vec!["http://localhost:5001"]);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_registration_is_persisted_without_metrics() {
    let harness = spawn_owner();

    register(&harness, "svc", "http://localhost:5001", &["/svc"]).await;
    register(&harness, "svc", "http://localhost:5002", &["/svc"]).await;

    let raw = std::fs::read_to_string(&harness.state_path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();

    assert_eq!(parsed["/svc"]["name"], "svc");
    assert_eq!(
        parsed["/svc"]["targets"],
        serde_json::json!(["http://localhost:5001", "http://localhost:5002"])
    );
    // Metrics are re-derived after a restart and never written out.
    assert!(parsed["/svc"].get("metrics").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_persisted_state_survives_owner_restart() {
    let harness = spawn_owner();
    register(&harness, "svc", "http://localhost:5001", &["/svc"]).await;

    // Boot a fresh registry from the same file, the way `serve` does.
    let store = RegistryStore::new(&harness.state_path);
    let persisted = store.load().unwrap().unwrap();
    let registry = Registry::restore(
        persisted
            .into_iter()
            .map(|(prefix, service)| (prefix, service.name, service.targets)),
    );

    let snapshot = registry.snapshot();
    let entry = snapshot.find_route("/svc/ping").unwrap();
    assert_eq!(entry.targets, vec!["http://localhost:5001"]);
    // Fresh metrics: healthy, zero strikes.
    let metric = entry.metric("http://localhost:5001").unwrap();
    assert_eq!(metric.fail_count, 0);
    assert!(metric.last_error.is_none());
}
