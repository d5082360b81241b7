// End-to-end scenario from registration to failover, run against the real
// owner actor and worker handler with a stubbed upstream transport:
// register two instances of one service, watch round robin alternate between
// them, fail one instance three probes in a row, and watch all traffic move
// to the survivor.
use std::{
    collections::HashSet,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use axum::body::Body as AxumBody;
use http_body_util::BodyExt;
use hyper::{Method, Request, Response, StatusCode};
use postern::{
    GatewayHandler, HealthChecker, RegistryOwner, RegistryStore, SECRET_HEADER,
    config::{GatewayConfig, HealthConfig},
    core::{OwnerCommand, Registry, RegistrySnapshot},
    ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
};
use tokio::sync::{mpsc, watch};

/// Upstream stub: forwards answer with the authority they were sent to,
/// probes fail for any instance in the `down` set.
struct FakeUpstreams {
    hits: Mutex<Vec<String>>,
    down: Mutex<HashSet<String>>,
}

impl FakeUpstreams {
    fn new() -> Self {
        Self {
            hits: Mutex::new(Vec::new()),
            down: Mutex::new(HashSet::new()),
        }
    }

    fn take_down(&self, url: &str) {
        self.down.lock().unwrap().insert(url.to_string());
    }

    fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for FakeUpstreams {
    async fn forward(
        &self,
        req: Request<AxumBody>,
        _deadline: Duration,
    ) -> HttpClientResult<Response<AxumBody>> {
        let authority = req
            .uri()
            .authority()
            .map(|a| a.to_string())
            .unwrap_or_default();
        self.hits.lock().unwrap().push(authority.clone());
        Ok(Response::builder()
            .status(StatusCode::OK)
            .body(AxumBody::from(format!("pong from {authority}")))
            .unwrap())
    }

    async fn probe(&self, url: &str, _deadline: Duration) -> HttpClientResult<Duration> {
        let down = self.down.lock().unwrap();
        if down.iter().any(|d| url.starts_with(d.as_str())) {
            Err(HttpClientError::ConnectionError(
                "connection refused".to_string(),
            ))
        } else {
            Ok(Duration::from_millis(3))
        }
    }
}

struct Gateway {
    handler: GatewayHandler,
    commands: mpsc::Sender<OwnerCommand>,
    snapshots: watch::Receiver<Arc<RegistrySnapshot>>,
    upstreams: Arc<FakeUpstreams>,
    state_path: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

fn spawn_gateway() -> Gateway {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("registry.json");
    let (command_tx, command_rx) = mpsc::channel(16);
    let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(RegistrySnapshot::default()));
    let (restart_tx, _restart_rx) = mpsc::channel(1);

    let owner = RegistryOwner::new(
        Registry::new(),
        RegistryStore::new(&state_path),
        command_rx,
        snapshot_tx,
        restart_tx,
        3,
    );
    tokio::spawn(owner.run());

    let upstreams = Arc::new(FakeUpstreams::new());
    let config = Arc::new(
        GatewayConfig::builder()
            .listen_addr("127.0.0.1:0")
            .shared_secret("s3cret")
            .build()
            .unwrap(),
    );
    let handler = GatewayHandler::new(
        Arc::new(ArcSwap::from_pointee(RegistrySnapshot::default())),
        upstreams.clone(),
        command_tx.clone(),
        config,
    );

    Gateway {
        handler,
        commands: command_tx,
        snapshots: snapshot_rx,
        upstreams,
        state_path,
        _dir: dir,
    }
}

fn peer() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

impl Gateway {
    /// Replicate the owner's latest snapshot into the worker handler, the
    /// way a worker's replication arm does.
    fn sync_snapshot(&mut self) {
        let latest = self.snapshots.borrow_and_update().clone();
        self.handler.snapshot_handle().store(latest);
    }

    async fn register(&mut self, url: &str) {
        let body = format!(r#"{{"name":"svc-a","url":"{url}","routes":["/svc"]}}"#);
        let req = Request::builder()
            .method(Method::POST)
            .uri("/register")
            .header(SECRET_HEADER, "s3cret")
            .body(AxumBody::from(body))
            .unwrap();
        let response = self.handler.handle(req, peer()).await;
        assert_eq!(response.status(), StatusCode::OK);
        self.sync_snapshot();
    }

    async fn get(&self, path: &str) -> (StatusCode, String) {
        let req = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(AxumBody::empty())
            .unwrap();
        let response = self.handler.handle(req, peer()).await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    /// Run one probe cycle against the current snapshot and deliver the
    /// report to the owner, waiting for the rebroadcast.
    async fn run_probe_cycle(&mut self) {
        let (_unused_tx, unused_rx) = watch::channel(Arc::new(RegistrySnapshot::default()));
        let checker = HealthChecker::new(
            unused_rx,
            self.commands.clone(),
            self.upstreams.clone(),
            HealthConfig::default(),
        );

        let snapshot = self.snapshots.borrow().clone();
        let outcomes = checker.run_cycle(&snapshot).await;
        self.commands
            .send(OwnerCommand::ProbeReport { outcomes })
            .await
            .unwrap();
        self.snapshots.changed().await.unwrap();
        self.sync_snapshot();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_round_robin_then_failover() {
    let mut gateway = spawn_gateway();

    gateway.register("http://localhost:5001").await;
    gateway.register("http://localhost:5002").await;

    // Requests alternate across both instances.
    for _ in 0..4 {
        let (status, _body) = gateway.get("/svc/ping").await;
        assert_eq!(status, StatusCode::OK);
    }
    let hits = gateway.upstreams.hits();
    assert_eq!(
        hits,
        vec![
            "localhost:5001",
            "localhost:5002",
            "localhost:5001",
            "localhost:5002",
        ]
    );

    // Instance 5001 goes dark; three probe cycles evict it.
    gateway.upstreams.take_down("http://localhost:5001");
    for _ in 0..3 {
        gateway.run_probe_cycle().await;
    }

    // All subsequent traffic lands on the survivor.
    for _ in 0..4 {
        let (status, body) = gateway.get("/svc/ping").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "pong from localhost:5002");
    }

    // The eviction also reached the persisted state.
    let raw = std::fs::read_to_string(&gateway.state_path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(
        parsed["/svc"]["targets"],
        serde_json::json!(["http://localhost:5002"])
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_single_strike_degrades_without_evicting() {
    let mut gateway = spawn_gateway();

    gateway.register("http://localhost:5001").await;
    gateway.register("http://localhost:5002").await;

    gateway.upstreams.take_down("http://localhost:5001");
    gateway.run_probe_cycle().await;

    // One strike: 5001 stays registered but the breaker routes around it.
    let snapshot = gateway.snapshots.borrow().clone();
    let entry = snapshot.find_route("/svc/ping").unwrap();
    assert_eq!(entry.targets.len(), 2);

    for _ in 0..4 {
        let (_status, body) = gateway.get("/svc/ping").await;
        assert_eq!(body, "pong from localhost:5002");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_recovered_instance_rejoins_rotation() {
    let mut gateway = spawn_gateway();

    gateway.register("http://localhost:5001").await;
    gateway.register("http://localhost:5002").await;

    gateway.upstreams.take_down("http://localhost:5001");
    gateway.run_probe_cycle().await;
    gateway.run_probe_cycle().await;

    // Two strikes, then the instance comes back before the third.
    gateway.upstreams.down.lock().unwrap().clear();
    gateway.run_probe_cycle().await;

    let snapshot = gateway.snapshots.borrow().clone();
    let entry = snapshot.find_route("/svc/ping").unwrap();
    assert_eq!(entry.targets.len(), 2);
    let metric = entry.metric("http://localhost:5001").unwrap();
    assert_eq!(metric.fail_count, 0);

    // Both instances serve again.
    let mut seen = HashSet::new();
    for _ in 0..4 {
        let (_status, body) = gateway.get("/svc/ping").await;
        seen.insert(body);
    }
    assert_eq!(seen.len(), 2);
}
