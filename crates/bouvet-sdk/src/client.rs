//! The platform client.
//!
//! [`BouvetClient`] owns the transport session and the metrics counters and
//! exposes every platform operation. Fork coordination lives in
//! [`crate::fork`], snapshot chains in [`crate::chain`] and log streaming in
//! [`crate::logs`]; all of them are built on the primitives here.

use crate::config::ClientConfig;
use crate::error::{Result, SdkError};
use crate::metrics::ClientMetrics;
use crate::request::{build_request, ExecuteRequest, ExecutionIntent, ExecutionMode, Language};
use crate::retry::{retry_with_policy, RetryPolicy};
use crate::transport::Transport;
use crate::types::{
    Branch, CreateBranchRequest, ExecuteResponse, ExecutionResult, HealthStatus, ListResponse,
    MergeBranchesRequest, PlatformMetrics, PrewarmRequest, RestoreResponse, Snapshot,
    SnapshotFilter, SnapshotRequest,
};
use reqwest::Method;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(crate) const EXECUTE_PATH: &str = "/api/v1/execute";
const SNAPSHOTS_PATH: &str = "/api/v1/snapshots";
const BRANCHES_PATH: &str = "/api/v1/branches";
const MERGE_PATH: &str = "/api/v1/branches/merge";
const PREWARM_PATH: &str = "/api/v1/prewarm";
const METRICS_PATH: &str = "/api/v1/metrics";
const HEALTH_PATH: &str = "/health";

/// Deadline for health probes, independent of the request timeout.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Merge strategy used when the caller does not pick one.
pub const DEFAULT_MERGE_STRATEGY: &str = "latest";

/// Client for the execution platform.
///
/// Cheap to clone: clones share the connection pool and the metrics
/// counters, and may be used concurrently from any number of tasks.
///
/// # Example
///
/// ```no_run
/// use bouvet_sdk::{BouvetClient, ClientConfig, ExecutionIntent};
///
/// # async fn example() -> bouvet_sdk::Result<()> {
/// let config = ClientConfig::builder().api_key("secret").build()?;
/// let client = BouvetClient::new(config)?;
///
/// let result = client.execute(ExecutionIntent::new("echo hello")).await?;
/// println!("{}", result.stdout_text());
///
/// client.close();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct BouvetClient {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    transport: Transport,
    metrics: ClientMetrics,
    retry: RetryPolicy,
}

impl BouvetClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Configuration`] if the configuration is invalid.
    /// No network call is made.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let retry = RetryPolicy::from_config(&config);
        let transport = Transport::new(config)?;

        tracing::info!(
            base_url = %transport.config().base_url,
            runtime = %transport.config().runtime,
            cache_enabled = transport.config().cache_enabled,
            max_retries = retry.max_attempts,
            "Created platform client"
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                transport,
                metrics: ClientMetrics::new(),
                retry,
            }),
        })
    }

    /// Create a client configured from `BOUVET_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        self.inner.transport.config()
    }

    /// Get the client-side metrics.
    pub fn metrics(&self) -> &ClientMetrics {
        &self.inner.metrics
    }

    pub(crate) fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        self.inner.retry
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Run an execution intent.
    ///
    /// 5xx and transport failures are retried with backoff; any other error
    /// is returned immediately. Every call counts once in [`Self::metrics`],
    /// whatever the number of attempts.
    pub async fn execute(&self, intent: ExecutionIntent) -> Result<ExecutionResult> {
        let request = build_request(intent, self.config());
        self.dispatch("execute", EXECUTE_PATH, request, self.inner.retry)
            .await
    }

    /// Run a command in cached mode, keyed by `(command, default image)`.
    pub async fn execute_cached(&self, command: impl Into<String>) -> Result<ExecutionResult> {
        self.execute(ExecutionIntent::new(command).mode(ExecutionMode::Cached))
            .await
    }

    /// Run a command in checkpointed mode, optionally resuming a snapshot.
    pub async fn execute_checkpointed(
        &self,
        command: impl Into<String>,
        checkpoint: Option<&str>,
    ) -> Result<ExecutionResult> {
        let mut intent = ExecutionIntent::new(command).mode(ExecutionMode::Checkpointed);
        if let Some(snapshot) = checkpoint {
            intent = intent.checkpoint(snapshot);
        }
        self.execute(intent).await
    }

    /// Run a command in branched mode from a snapshot or prior execution.
    pub async fn execute_branched(
        &self,
        command: impl Into<String>,
        branch_from: &str,
    ) -> Result<ExecutionResult> {
        self.execute(
            ExecutionIntent::new(command)
                .mode(ExecutionMode::Branched)
                .branch_from(branch_from),
        )
        .await
    }

    /// Fork from `parent_reference` and run `command` on the child.
    ///
    /// A single attempt: failures are classified as usual but never retried.
    pub async fn fork_execution(
        &self,
        parent_reference: &str,
        command: impl Into<String>,
    ) -> Result<ExecutionResult> {
        let intent = ExecutionIntent::new(command)
            .mode(ExecutionMode::Branched)
            .branch_from(parent_reference);
        let request = build_request(intent, self.config());
        self.dispatch(
            "fork_execution",
            EXECUTE_PATH,
            request,
            RetryPolicy::single_attempt(),
        )
        .await
    }

    /// Run source code with the given interpreter in its default image.
    pub async fn run_as_interpreted_code(
        &self,
        language: Language,
        code: &str,
    ) -> Result<ExecutionResult> {
        let command = language.command_for(code)?;
        self.execute(ExecutionIntent::new(command).image(language.default_image()))
            .await
    }

    /// Run a shell script in the client's default image.
    pub async fn run_as_script(&self, script: &str) -> Result<ExecutionResult> {
        let command = Language::Shell.command_for(script)?;
        self.execute(ExecutionIntent::new(command)).await
    }

    /// Run Python source.
    pub async fn run_python(&self, code: &str) -> Result<ExecutionResult> {
        self.run_as_interpreted_code(Language::Python, code).await
    }

    /// Run JavaScript source.
    pub async fn run_javascript(&self, code: &str) -> Result<ExecutionResult> {
        self.run_as_interpreted_code(Language::JavaScript, code)
            .await
    }

    /// Run a command and return its standard output.
    pub async fn run(&self, command: impl Into<String>) -> Result<String> {
        let result = self.execute(ExecutionIntent::new(command)).await?;
        Ok(result.stdout_text().into_owned())
    }

    /// Send an execute body to `path`, retrying under `policy` and
    /// recording the outcome in the metrics.
    pub(crate) async fn dispatch(
        &self,
        operation: &'static str,
        path: &str,
        request: ExecuteRequest,
        policy: RetryPolicy,
    ) -> Result<ExecutionResult> {
        let transport = self.transport();
        let request = &request;
        let started = Instant::now();

        tracing::debug!(
            request_id = %request.request_id,
            mode = %request.mode,
            image = %request.image,
            cache_key = request.cache_key.as_deref().unwrap_or(""),
            "Dispatching execution"
        );

        let outcome = retry_with_policy(operation, policy, |attempt| async move {
            tracing::trace!(request_id = %request.request_id, attempt, "Execution attempt");
            let attempt_started = Instant::now();
            let response: ExecuteResponse = transport
                .send_json(transport.request(Method::POST, path).json(request))
                .await?;
            Ok((response, attempt_started.elapsed()))
        })
        .await;

        match outcome {
            Ok((response, latency)) => {
                let result = response.into_result(
                    &request.request_id.to_string(),
                    latency,
                    self.config().cache_hit_threshold,
                );
                self.inner.metrics.record_success(latency, result.cache_hit());
                tracing::debug!(
                    request_id = %result.request_id,
                    exit_code = result.exit_code,
                    latency_ms = latency.as_millis() as u64,
                    cache_hit = result.cache_hit(),
                    snapshot = result.snapshot.as_deref().unwrap_or(""),
                    "Execution completed"
                );
                Ok(result)
            }
            Err(e) => {
                self.inner.metrics.record_error(started.elapsed());
                tracing::warn!(
                    request_id = %request.request_id,
                    operation,
                    error = %e,
                    "Execution failed"
                );
                Err(e)
            }
        }
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Capture the state of an execution or container.
    pub async fn create_snapshot(&self, request: SnapshotRequest) -> Result<Snapshot> {
        let transport = self.transport();
        let request = &request;
        let snapshot: Snapshot = retry_with_policy("create_snapshot", self.inner.retry, |_| async move {
            transport
                .send_json(transport.request(Method::POST, SNAPSHOTS_PATH).json(request))
                .await
        })
        .await?;
        tracing::info!(snapshot_id = %snapshot.id, container_id = %request.container_id, "Snapshot created");
        Ok(snapshot)
    }

    /// Snapshot a finished execution with default naming.
    pub async fn checkpoint_execution(&self, execution_id: &str) -> Result<Snapshot> {
        self.create_snapshot(SnapshotRequest::new(execution_id)).await
    }

    /// List snapshots, optionally filtered by mode or parent.
    pub async fn list_snapshots(&self, filter: SnapshotFilter) -> Result<Vec<Snapshot>> {
        let transport = self.transport();
        let filter = &filter;
        let list: ListResponse<Snapshot> = retry_with_policy("list_snapshots", self.inner.retry, |_| async move {
            transport
                .send_json(transport.request(Method::GET, SNAPSHOTS_PATH).query(filter))
                .await
        })
        .await?;
        Ok(list.into_vec())
    }

    /// Fetch one snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Resource`] if the platform does not know the id.
    pub async fn get_snapshot(&self, snapshot_id: &str) -> Result<Snapshot> {
        let path = resource_path(SNAPSHOTS_PATH, snapshot_id, "")?;
        let transport = self.transport();
        let path = path.as_str();
        retry_with_policy("get_snapshot", self.inner.retry, |_| async move {
            transport
                .send_json(transport.request(Method::GET, path))
                .await
        })
        .await
        .map_err(|e| not_found_as_resource(e, "snapshot", snapshot_id))
    }

    /// Delete a snapshot.
    pub async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        let path = resource_path(SNAPSHOTS_PATH, snapshot_id, "")?;
        let transport = self.transport();
        let path = path.as_str();
        let timeout = self.config().request_timeout;
        retry_with_policy("delete_snapshot", self.inner.retry, |_| async move {
            transport
                .send(transport.request(Method::DELETE, path), timeout)
                .await
                .map(drop)
        })
        .await
        .map_err(|e| not_found_as_resource(e, "snapshot", snapshot_id))?;
        tracing::debug!(snapshot_id, "Snapshot deleted");
        Ok(())
    }

    /// Restore a snapshot into a fresh container or instance.
    ///
    /// Returns the id of the restored container or instance.
    pub async fn restore_snapshot(&self, snapshot_id: &str) -> Result<String> {
        let path = resource_path(SNAPSHOTS_PATH, snapshot_id, "/restore")?;
        let transport = self.transport();
        let path = path.as_str();
        let restored: RestoreResponse = retry_with_policy("restore_snapshot", self.inner.retry, |_| async move {
            transport
                .send_json(transport.request(Method::POST, path))
                .await
        })
        .await
        .map_err(|e| not_found_as_resource(e, "snapshot", snapshot_id))?;
        tracing::info!(snapshot_id, container_id = %restored.container_id, "Snapshot restored");
        Ok(restored.container_id)
    }

    // ========================================================================
    // Branches
    // ========================================================================

    /// Cut a branch from a snapshot.
    pub async fn create_branch(&self, snapshot_id: &str, name: Option<&str>) -> Result<Branch> {
        if snapshot_id.is_empty() {
            return Err(SdkError::Resource("cannot branch from an empty snapshot id".into()));
        }
        let transport = self.transport();
        let body = CreateBranchRequest {
            parent_snapshot_id: snapshot_id,
            branch_name: name,
        };
        let body = &body;
        let branch: Branch = retry_with_policy("create_branch", self.inner.retry, |_| async move {
            transport
                .send_json(transport.request(Method::POST, BRANCHES_PATH).json(body))
                .await
        })
        .await
        .map_err(|e| not_found_as_resource(e, "snapshot", snapshot_id))?;
        tracing::debug!(branch_id = %branch.id, snapshot_id = %branch.snapshot_id, parent = snapshot_id, "Branch created");
        Ok(branch)
    }

    /// List branches.
    pub async fn list_branches(&self) -> Result<Vec<Branch>> {
        let transport = self.transport();
        let list: ListResponse<Branch> = retry_with_policy("list_branches", self.inner.retry, |_| async move {
            transport
                .send_json(transport.request(Method::GET, BRANCHES_PATH))
                .await
        })
        .await?;
        Ok(list.into_vec())
    }

    /// Merge branches into a new snapshot.
    ///
    /// `strategy` is passed to the platform verbatim; `None` means
    /// [`DEFAULT_MERGE_STRATEGY`].
    pub async fn merge_branches(
        &self,
        branch_ids: &[String],
        strategy: Option<&str>,
    ) -> Result<Snapshot> {
        if branch_ids.is_empty() {
            return Err(SdkError::InvalidRequest("merge requires at least one branch".into()));
        }
        let transport = self.transport();
        let body = MergeBranchesRequest {
            branch_ids,
            merge_strategy: strategy.unwrap_or(DEFAULT_MERGE_STRATEGY),
        };
        let body = &body;
        let merged: Snapshot = retry_with_policy("merge_branches", self.inner.retry, |_| async move {
            transport
                .send_json(transport.request(Method::POST, MERGE_PATH).json(body))
                .await
        })
        .await
        .map_err(|e| not_found_as_resource(e, "branch", &branch_ids.join(",")))?;
        tracing::info!(
            snapshot_id = %merged.id,
            branches = branch_ids.len(),
            strategy = body.merge_strategy,
            "Branches merged"
        );
        Ok(merged)
    }

    // ========================================================================
    // Platform management
    // ========================================================================

    /// Ask the platform to warm `count` sandboxes for `image`.
    ///
    /// The platform may accept asynchronously (202).
    pub async fn prewarm(&self, image: &str, count: u32) -> Result<()> {
        let transport = self.transport();
        let body = PrewarmRequest {
            image,
            count,
            runtime: self.config().runtime,
        };
        let body = &body;
        let timeout = self.config().request_timeout;
        let response = retry_with_policy("prewarm", self.inner.retry, |_| async move {
            transport
                .send(transport.request(Method::POST, PREWARM_PATH).json(body), timeout)
                .await
        })
        .await?;
        tracing::info!(image, count, status = response.status().as_u16(), "Prewarm requested");
        Ok(())
    }

    /// Fetch platform-wide metrics.
    pub async fn platform_metrics(&self) -> Result<PlatformMetrics> {
        let transport = self.transport();
        retry_with_policy("platform_metrics", self.inner.retry, |_| async move {
            transport
                .send_json(transport.request(Method::GET, METRICS_PATH))
                .await
        })
        .await
    }

    /// Probe platform health with a fixed 5 second deadline.
    pub async fn health_check(&self) -> Result<HealthStatus> {
        let transport = self.transport();
        retry_with_policy("health_check", self.inner.retry, |_| async move {
            let response = transport
                .send(
                    transport.request_with_timeout(Method::GET, HEALTH_PATH, HEALTH_TIMEOUT),
                    HEALTH_TIMEOUT,
                )
                .await?;
            crate::transport::decode_json(response, HEALTH_TIMEOUT).await
        })
        .await
    }

    /// Shut the client down, logging a final metrics summary.
    ///
    /// The connection pool is released once every clone is dropped.
    pub fn close(self) {
        let report = self.inner.metrics.snapshot();
        tracing::info!(
            total_requests = report.total_requests,
            cache_hits = report.cache_hits,
            errors = report.errors,
            cache_hit_rate = report.cache_hit_rate,
            error_rate = report.error_rate,
            average_latency_ms = report.average_latency_ms,
            "Closing platform client"
        );
    }
}

/// Build `{base}/{id}{suffix}`, rejecting ids that would escape the segment.
pub(crate) fn resource_path(base: &str, id: &str, suffix: &str) -> Result<String> {
    if id.is_empty() {
        return Err(SdkError::Resource("empty resource id".into()));
    }
    if id.contains(['/', '?', '#']) || id.chars().any(char::is_control) {
        return Err(SdkError::InvalidRequest(format!("invalid resource id {id:?}")));
    }
    Ok(format!("{base}/{id}{suffix}"))
}

pub(crate) fn not_found_as_resource(err: SdkError, kind: &str, id: &str) -> SdkError {
    match err {
        SdkError::Client { status: 404, body } => {
            SdkError::Resource(format!("{kind} {id} not found: {body}"))
        }
        other => other,
    }
}
