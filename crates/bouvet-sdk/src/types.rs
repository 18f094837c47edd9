//! Result and resource types returned by the platform.
//!
//! Wire structs are lenient: the platform's SDKs have shipped several
//! spellings of the same fields (`duration` in seconds vs `duration_ms`,
//! `snapshot` vs `snapshot_id`, stdout as text or as a byte array), and all
//! of them decode into the same public types here.

use crate::request::ExecutionMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Duration;

// ============================================================================
// Execution
// ============================================================================

/// Outcome of one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// Request id echoed by the platform (falls back to the client id).
    pub request_id: String,
    /// Process exit status.
    pub exit_code: i32,
    /// Raw standard output.
    pub stdout: Vec<u8>,
    /// Raw standard error.
    pub stderr: Vec<u8>,
    /// Duration reported by the platform, or the measured latency if it
    /// reported none.
    pub duration: Duration,
    /// Round-trip latency measured by the client.
    pub latency: Duration,
    /// Cache flag asserted by the platform, if it sent one.
    pub platform_cached: Option<bool>,
    /// Cache hit inferred from latency under the configured threshold.
    ///
    /// A heuristic: false positives and negatives near the threshold are
    /// expected.
    pub inferred_cache_hit: bool,
    /// Snapshot produced by the execution.
    pub snapshot: Option<String>,
    /// Peak memory usage in bytes, if reported.
    pub memory_usage: Option<u64>,
    /// Platform-side error message, if any.
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Whether the result should be treated as served from cache.
    ///
    /// The platform's flag wins when present; otherwise the latency
    /// heuristic decides.
    pub fn cache_hit(&self) -> bool {
        self.platform_cached.unwrap_or(self.inferred_cache_hit)
    }

    /// Standard output decoded as UTF-8 (lossy).
    pub fn stdout_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// Standard error decoded as UTF-8 (lossy).
    pub fn stderr_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

/// Output stream as sent on the wire: text or a byte array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireOutput {
    Text(String),
    Bytes(Vec<u8>),
}

impl WireOutput {
    fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(s) => s.into_bytes(),
            Self::Bytes(b) => b,
        }
    }
}

/// Response body of `POST /api/v1/execute`.
#[derive(Debug, Deserialize)]
pub(crate) struct ExecuteResponse {
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    exit_code: Option<i32>,
    #[serde(default)]
    stdout: Option<WireOutput>,
    #[serde(default)]
    stderr: Option<WireOutput>,
    #[serde(default)]
    duration_ms: Option<u64>,
    /// Seconds.
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    cached: Option<bool>,
    #[serde(default, alias = "snapshot_id")]
    snapshot: Option<String>,
    #[serde(default, alias = "memory_usage_bytes")]
    memory_usage: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

impl ExecuteResponse {
    /// Map the wire response into a result.
    ///
    /// `fallback_id` is the client-generated id, used when the platform
    /// does not echo one.
    pub(crate) fn into_result(
        self,
        fallback_id: &str,
        latency: Duration,
        cache_hit_threshold: Duration,
    ) -> ExecutionResult {
        let duration = match (self.duration_ms, self.duration) {
            (Some(ms), _) => Duration::from_millis(ms),
            (None, Some(secs)) => Duration::try_from_secs_f64(secs).unwrap_or(latency),
            _ => latency,
        };
        let exit_code = self
            .exit_code
            .unwrap_or(if self.error.is_some() { 1 } else { 0 });

        ExecutionResult {
            request_id: self
                .request_id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| fallback_id.to_string()),
            exit_code,
            stdout: self.stdout.map(WireOutput::into_bytes).unwrap_or_default(),
            stderr: self.stderr.map(WireOutput::into_bytes).unwrap_or_default(),
            duration,
            latency,
            platform_cached: self.cached,
            inferred_cache_hit: latency < cache_hit_threshold,
            snapshot: self.snapshot.filter(|s| !s.is_empty()),
            memory_usage: self.memory_usage,
            error: self.error,
        }
    }
}

// ============================================================================
// Snapshots and branches
// ============================================================================

/// Immutable capture of execution state held by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot identifier.
    #[serde(alias = "snapshot_id")]
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,
    /// Parent snapshot; `None` for roots.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Mode of the execution that produced it.
    #[serde(default)]
    pub mode: Option<ExecutionMode>,
    /// Creation time.
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub created_at: Option<DateTime<Utc>>,
    /// Size in bytes.
    #[serde(default, alias = "size_bytes")]
    pub size: u64,
    /// Content checksum.
    #[serde(default)]
    pub checksum: String,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Line of execution diverging from a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    /// Branch identifier.
    #[serde(alias = "branch_id")]
    pub id: String,
    /// Snapshot the branch is rooted at.
    pub snapshot_id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,
    /// Parent branch; `None` for branches cut directly from a snapshot.
    #[serde(default)]
    pub parent_branch: Option<String>,
    /// Snapshot or branch this one forked from.
    #[serde(default)]
    pub divergence_point: Option<String>,
    /// Creation time.
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub created_at: Option<DateTime<Utc>>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Parameters for creating a snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SnapshotRequest {
    /// Execution or container to capture.
    pub container_id: String,
    /// Snapshot name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SnapshotRequest {
    /// Snapshot an execution or container.
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            ..Default::default()
        }
    }

    /// Set the snapshot name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Query filter for listing snapshots.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SnapshotFilter {
    /// Only snapshots produced in this mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ExecutionMode>,
    /// Only direct children of this snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

// ============================================================================
// Persistent instances
// ============================================================================

/// Long-lived sandbox backing `persistent` executions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Instance identifier.
    #[serde(alias = "instance_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    /// Lifecycle state as reported by the platform (`starting`, `running`, ...).
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cpu_cores: Option<u32>,
    #[serde(default)]
    pub memory_mb: Option<u32>,
    /// Named endpoints exposed by the instance, e.g. `ssh`.
    #[serde(default)]
    pub endpoints: HashMap<String, String>,
}

impl Instance {
    /// Whether the platform reports the instance as running.
    pub fn is_running(&self) -> bool {
        self.status.eq_ignore_ascii_case("running")
    }
}

/// Parameters for starting a persistent instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceRequest {
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Snapshot to boot from instead of a clean image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u32>,
    pub persistent: bool,
}

impl InstanceRequest {
    /// Start an instance of `image`.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            name: None,
            snapshot_id: None,
            cpu_cores: None,
            memory_mb: None,
            persistent: true,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Boot from a snapshot.
    pub fn from_snapshot(mut self, snapshot_id: impl Into<String>) -> Self {
        self.snapshot_id = Some(snapshot_id.into());
        self
    }

    pub fn cpu_cores(mut self, cores: u32) -> Self {
        self.cpu_cores = Some(cores);
        self
    }

    pub fn memory_mb(mut self, mb: u32) -> Self {
        self.memory_mb = Some(mb);
        self
    }
}

/// Listing bodies come bare or wrapped in an object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ListResponse<T> {
    Bare(Vec<T>),
    Wrapped {
        #[serde(alias = "snapshots", alias = "branches", alias = "instances")]
        items: Vec<T>,
    },
}

impl<T> ListResponse<T> {
    pub(crate) fn into_vec(self) -> Vec<T> {
        match self {
            Self::Bare(items) | Self::Wrapped { items } => items,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateBranchRequest<'a> {
    pub parent_snapshot_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub(crate) struct MergeBranchesRequest<'a> {
    pub branch_ids: &'a [String],
    pub merge_strategy: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RestoreResponse {
    #[serde(alias = "instance_id")]
    pub container_id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct PrewarmRequest<'a> {
    pub image: &'a str,
    pub count: u32,
    pub runtime: crate::request::Runtime,
}

// ============================================================================
// Platform observability
// ============================================================================

/// Aggregate metrics reported by `GET /api/v1/metrics`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlatformMetrics {
    pub total_executions: u64,
    pub avg_execution_time_ms: f64,
    pub cache_hit_rate: f64,
    pub active_containers: u32,
    pub active_instances: u32,
    pub memory_usage_mb: u64,
    pub cpu_usage_percent: f64,
    pub error_rate: f64,
    /// Fields this client does not model.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Health report from `GET /health`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HealthStatus {
    /// Overall status string (`healthy`, `degraded`, ...).
    pub status: String,
    /// Platform timestamp, verbatim.
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Per-component status.
    #[serde(default)]
    pub components: HashMap<String, String>,
}

impl HealthStatus {
    /// Whether the platform reports itself healthy.
    pub fn is_healthy(&self) -> bool {
        matches!(self.status.to_lowercase().as_str(), "healthy" | "ok")
    }
}

/// Timestamps arrive either as epoch seconds or as RFC 3339 strings.
mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(f64),
        Text(String),
    }

    pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Secs(secs)) => {
                let whole = secs.floor();
                let nanos = ((secs - whole) * 1e9) as u32;
                DateTime::from_timestamp(whole as i64, nanos)
                    .map(Some)
                    .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {secs}")))
            }
            Some(Raw::Text(text)) => DateTime::parse_from_rfc3339(&text)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(D::Error::custom),
        }
    }
}
