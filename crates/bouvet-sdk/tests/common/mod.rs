//! In-process fake of the execution platform.
//!
//! Behaviour of `POST /api/v1/execute` is driven by the command string:
//!
//! - `sleep <secs>`: waits that long and reports it as the duration
//! - `status <code>`: answers with that HTTP status
//! - anything else: echoes the command on stdout
//!
//! Responses queued with [`PlatformState::script`] take precedence, one per
//! call. Cache keys seen before are answered with `cached: true`.

#![allow(dead_code)]

use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bouvet_sdk::{BouvetClient, ClientConfig};
use bytes::Bytes;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const API_KEY: &str = "test-key";

/// Shared state of the fake platform.
#[derive(Default)]
pub struct PlatformState {
    pub execute_calls: AtomicUsize,
    /// `sleep` commands that ran to completion.
    pub completed_sleeps: AtomicUsize,
    /// Bodies received on the execute endpoint, in arrival order.
    pub executions: Mutex<Vec<Value>>,
    script: Mutex<VecDeque<u16>>,
    cache: Mutex<HashSet<String>>,
    snapshot_counter: AtomicUsize,
    branch_counter: AtomicUsize,
    pub snapshots: Mutex<Vec<Value>>,
    pub branches: Mutex<Vec<Value>>,
    pub deleted: Mutex<Vec<String>>,
    /// Snapshot ids whose deletion fails with a 500.
    pub failing_deletes: Mutex<HashSet<String>>,
    pub merge_requests: Mutex<Vec<Value>>,
    pub prewarm_requests: Mutex<Vec<Value>>,
    instance_counter: AtomicUsize,
    /// Live instances; stopping or deleting removes them.
    pub instances: Mutex<Vec<Value>>,
    /// Bodies received on the instance exec endpoint.
    pub instance_execs: Mutex<Vec<Value>>,
    /// Value of the API key header on every call.
    pub seen_keys: Mutex<Vec<Option<String>>>,
}

impl PlatformState {
    /// Queue statuses for the next execute calls.
    pub fn script(&self, statuses: &[u16]) {
        self.script
            .lock()
            .expect("lock")
            .extend(statuses.iter().copied());
    }

    pub fn execute_calls(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }

    pub fn completed_sleeps(&self) -> usize {
        self.completed_sleeps.load(Ordering::SeqCst)
    }

    pub fn fail_delete(&self, snapshot_id: &str) {
        self.failing_deletes
            .lock()
            .expect("lock")
            .insert(snapshot_id.to_string());
    }

    fn next_snapshot(&self) -> String {
        format!("snap-{}", self.snapshot_counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

type Shared = Arc<PlatformState>;

/// Start the fake platform on an ephemeral port.
pub async fn spawn_platform() -> (String, Shared) {
    let state: Shared = Arc::new(PlatformState::default());

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/v1/execute", post(execute))
        .route("/api/v1/snapshots", post(create_snapshot).get(list_snapshots))
        .route(
            "/api/v1/snapshots/:id",
            get(get_snapshot).delete(delete_snapshot),
        )
        .route("/api/v1/snapshots/:id/restore", post(restore_snapshot))
        .route("/api/v1/branches", post(create_branch).get(list_branches))
        .route("/api/v1/branches/merge", post(merge_branches))
        .route("/api/v1/instances", post(create_instance).get(list_instances))
        .route(
            "/api/v1/instances/:id",
            get(get_instance).delete(remove_instance),
        )
        .route("/api/v1/instances/:id/exec", post(exec_instance))
        .route("/api/v1/instances/:id/stop", post(remove_instance))
        .route("/api/v1/prewarm", post(prewarm))
        .route("/api/v1/metrics", get(metrics))
        .route("/api/v1/logs/:id/stream", get(stream_logs))
        .layer(middleware::from_fn_with_state(state.clone(), auth))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake platform");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake platform crashed");
    });

    (format!("http://{addr}"), state)
}

/// Client with fast retries pointed at `base_url`.
pub fn client(base_url: &str) -> BouvetClient {
    client_with(base_url, |b| b)
}

/// Client with fast retries and extra configuration.
pub fn client_with(
    base_url: &str,
    configure: impl FnOnce(bouvet_sdk::ClientConfigBuilder) -> bouvet_sdk::ClientConfigBuilder,
) -> BouvetClient {
    let builder = ClientConfig::builder()
        .base_url(base_url)
        .api_key(API_KEY)
        .retry_base_delay(Duration::from_millis(5))
        .retry_max_delay(Duration::from_millis(20));
    let config = configure(builder).build().expect("test config");
    BouvetClient::new(config).expect("test client")
}

/// Install a log subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn status(code: u16, body: impl Into<String>) -> Response {
    let code = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (code, body.into()).into_response()
}

async fn auth(State(state): State<Shared>, request: Request, next: Next) -> Response {
    let key = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.seen_keys.lock().expect("lock").push(key.clone());
    if key.as_deref() != Some(API_KEY) {
        return status(401, "invalid api key");
    }
    next.run(request).await
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": "2024-01-15T10:00:00Z",
        "components": { "executor": "ok", "snapshot_store": "ok" }
    }))
}

async fn execute(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    state.execute_calls.fetch_add(1, Ordering::SeqCst);
    state.executions.lock().expect("lock").push(body.clone());

    let scripted = state.script.lock().expect("lock").pop_front();
    if let Some(code) = scripted {
        return status(code, format!("scripted failure {code}"));
    }

    let command = body["command"].as_str().unwrap_or_default().to_string();
    if let Some(code) = command.strip_prefix("status ") {
        return status(code.trim().parse().unwrap_or(500), format!("requested {code}"));
    }

    let mut duration_ms = 120;
    if let Some(secs) = command.strip_prefix("sleep ") {
        let secs: f64 = secs.trim().parse().unwrap_or(0.0);
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
        state.completed_sleeps.fetch_add(1, Ordering::SeqCst);
        duration_ms = (secs * 1000.0) as u64;
    }

    let cached = match body["cache_key"].as_str() {
        Some(key) => !state.cache.lock().expect("lock").insert(key.to_string()),
        None => false,
    };
    if cached {
        duration_ms = 2;
    }

    let snapshot = match body["mode"].as_str() {
        Some("cached" | "checkpointed" | "branched") => Some(state.next_snapshot()),
        _ => None,
    };

    Json(json!({
        "request_id": body["request_id"],
        "exit_code": 0,
        "stdout": command,
        "stderr": "",
        "duration_ms": duration_ms,
        "cached": cached,
        "snapshot": snapshot,
        "memory_usage": 1048576
    }))
    .into_response()
}

async fn create_snapshot(State(state): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let snapshot = json!({
        "snapshot_id": state.next_snapshot(),
        "name": body["name"],
        "parent_id": body["container_id"],
        "mode": "checkpointed",
        "created_at": 1705312800.0,
        "size_bytes": 4096,
        "checksum": "abc123"
    });
    state.snapshots.lock().expect("lock").push(snapshot.clone());
    Json(snapshot)
}

async fn list_snapshots(
    State(state): State<Shared>,
    Query(filter): Query<HashMap<String, String>>,
) -> Json<Value> {
    let snapshots: Vec<Value> = state
        .snapshots
        .lock()
        .expect("lock")
        .iter()
        .filter(|s| {
            filter
                .get("parent_id")
                .map_or(true, |p| s["parent_id"].as_str() == Some(p.as_str()))
        })
        .filter(|s| {
            filter
                .get("mode")
                .map_or(true, |m| s["mode"].as_str() == Some(m.as_str()))
        })
        .cloned()
        .collect();
    Json(json!({ "snapshots": snapshots }))
}

async fn get_snapshot(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let found = state
        .snapshots
        .lock()
        .expect("lock")
        .iter()
        .find(|s| s["snapshot_id"].as_str() == Some(id.as_str()))
        .cloned();
    match found {
        Some(snapshot) => Json(snapshot).into_response(),
        None => status(404, format!("snapshot {id} not found")),
    }
}

async fn delete_snapshot(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    state.deleted.lock().expect("lock").push(id.clone());
    if state.failing_deletes.lock().expect("lock").contains(&id) {
        return status(500, "storage backend unavailable");
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn restore_snapshot(Path(id): Path<String>) -> Response {
    if id == "missing" {
        return status(404, "no such snapshot");
    }
    Json(json!({ "container_id": format!("container-{id}") })).into_response()
}

async fn create_branch(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let parent = body["parent_snapshot_id"].as_str().unwrap_or_default();
    if parent == "missing" {
        return status(404, "parent snapshot not found");
    }
    let n = state.branch_counter.fetch_add(1, Ordering::SeqCst) + 1;
    let branch = json!({
        "id": format!("branch-{n}"),
        "snapshot_id": format!("snap-branch-{n}"),
        "name": body["branch_name"],
        "parent_branch": null,
        "created_at": 1705312800.0,
        "divergence_point": parent
    });
    state.branches.lock().expect("lock").push(branch.clone());
    Json(branch).into_response()
}

async fn list_branches(State(state): State<Shared>) -> Json<Value> {
    Json(Value::Array(state.branches.lock().expect("lock").clone()))
}

async fn merge_branches(State(state): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    state.merge_requests.lock().expect("lock").push(body.clone());
    Json(json!({
        "id": "snap-merged",
        "parent_id": body["branch_ids"][0],
        "mode": "branched",
        "created_at": "2024-01-15T10:00:00Z",
        "size": 2048,
        "checksum": "merged",
        "metadata": { "strategy": body["merge_strategy"] }
    }))
}

fn find_instance(state: &PlatformState, id: &str) -> Option<Value> {
    state
        .instances
        .lock()
        .expect("lock")
        .iter()
        .find(|i| i["instance_id"].as_str() == Some(id))
        .cloned()
}

async fn create_instance(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    if body["snapshot_id"] == "missing" {
        return status(404, "snapshot not found");
    }
    let n = state.instance_counter.fetch_add(1, Ordering::SeqCst) + 1;
    let instance = json!({
        "instance_id": format!("inst-{n}"),
        "name": body["name"],
        "image": body["image"],
        "status": "running",
        "created_at": "2024-01-15T10:00:00Z",
        "cpu_cores": body["cpu_cores"],
        "memory_mb": body["memory_mb"],
        "endpoints": { "ssh": format!("10.0.0.{n}:22") }
    });
    state.instances.lock().expect("lock").push(instance.clone());
    Json(instance).into_response()
}

async fn list_instances(State(state): State<Shared>) -> Json<Value> {
    Json(json!({ "instances": state.instances.lock().expect("lock").clone() }))
}

async fn get_instance(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    match find_instance(&state, &id) {
        Some(instance) => Json(instance).into_response(),
        None => status(404, format!("instance {id} not found")),
    }
}

async fn exec_instance(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    state.instance_execs.lock().expect("lock").push(body.clone());
    if find_instance(&state, &id).is_none() {
        return status(404, format!("instance {id} not found"));
    }
    Json(json!({
        "request_id": body["request_id"],
        "exit_code": 0,
        "stdout": format!("{id}: {}", body["command"].as_str().unwrap_or_default()),
        "stderr": "",
        "duration_ms": 30,
        "cached": false
    }))
    .into_response()
}

async fn remove_instance(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut instances = state.instances.lock().expect("lock");
    let before = instances.len();
    instances.retain(|i| i["instance_id"].as_str() != Some(id.as_str()));
    if instances.len() == before {
        return status(404, format!("instance {id} not found"));
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn prewarm(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    state.prewarm_requests.lock().expect("lock").push(body);
    (StatusCode::ACCEPTED, Json(json!({ "status": "warming" }))).into_response()
}

async fn metrics() -> Json<Value> {
    Json(json!({
        "total_executions": 42,
        "avg_execution_time_ms": 87.5,
        "cache_hit_rate": 0.25,
        "active_containers": 3,
        "active_instances": 1,
        "memory_usage_mb": 512,
        "cpu_usage_percent": 12.5,
        "error_rate": 0.01
    }))
}

async fn stream_logs(Path(id): Path<String>) -> Response {
    if id == "missing" {
        return status(404, "unknown execution");
    }
    let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
        Ok(Bytes::from(format!("[{id}] Starting"))),
        Ok(Bytes::from_static(b" execution...\n[out] Running\r\n")),
        Ok(Bytes::from_static(b"[out] Done")),
    ];
    Body::from_stream(futures::stream::iter(chunks)).into_response()
}
