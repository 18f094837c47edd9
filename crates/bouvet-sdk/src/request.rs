//! Execution intents and their wire encoding.
//!
//! An [`ExecutionIntent`] is what the caller wants to run. [`build_request`]
//! turns it into the [`ExecuteRequest`] body sent to the platform, filling in
//! client defaults and deriving a cache key when caching is enabled.

use crate::config::ClientConfig;
use crate::error::SdkError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Number of digest bytes kept in a derived cache key (32 hex chars).
const CACHE_KEY_BYTES: usize = 16;

/// Client-generated identifier for one logical execution.
///
/// Generated before the first network call, so every retry of the same
/// attempt carries the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Create a new random request ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Sandbox runtime selector understood by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Runtime {
    /// Container engine.
    #[serde(rename = "docker")]
    Container,
    /// Micro-VM hypervisor.
    #[serde(rename = "firecracker")]
    MicroVm,
    /// Let the platform choose.
    #[default]
    #[serde(rename = "auto")]
    Auto,
}

impl Runtime {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "docker" | "container" => Some(Self::Container),
            "firecracker" | "microvm" | "micro-vm" | "vm" => Some(Self::MicroVm),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }

    /// Wire name of the runtime.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Container => "docker",
            Self::MicroVm => "firecracker",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the platform should treat the execution's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// No persistence.
    #[default]
    Ephemeral,
    /// Memoized by cache key.
    Cached,
    /// Produces a resumable snapshot.
    Checkpointed,
    /// Forks from a prior snapshot or execution.
    Branched,
    /// Long-lived backing process.
    Persistent,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ephemeral => "ephemeral",
            Self::Cached => "cached",
            Self::Checkpointed => "checkpointed",
            Self::Branched => "branched",
            Self::Persistent => "persistent",
        };
        f.write_str(s)
    }
}

/// Logical description of something to run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionIntent {
    /// Command or code string.
    pub command: String,
    /// Image/environment; the client default is used when unset.
    pub image: Option<String>,
    /// Runtime; the client default is used when unset.
    pub runtime: Option<Runtime>,
    /// Execution mode (default: ephemeral).
    pub mode: ExecutionMode,
    /// Environment variables, in insertion order.
    pub env_vars: Vec<(String, String)>,
    /// Working directory inside the sandbox.
    pub working_dir: Option<String>,
    /// Execution timeout enforced by the platform.
    pub timeout: Option<Duration>,
    /// Explicit cache key; overrides derivation.
    pub cache_key: Option<String>,
    /// Snapshot to resume from.
    pub checkpoint: Option<String>,
    /// Snapshot or execution to fork from.
    pub branch_from: Option<String>,
    /// Memory limit in MiB.
    pub memory_mb: Option<u32>,
    /// CPU core limit.
    pub cpu_cores: Option<u8>,
}

impl ExecutionIntent {
    /// Create an ephemeral intent for a command.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Set the image/environment.
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Set the runtime.
    pub fn runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Set the execution mode.
    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the platform-side execution timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set an explicit cache key.
    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Resume from a snapshot.
    pub fn checkpoint(mut self, snapshot_id: impl Into<String>) -> Self {
        self.checkpoint = Some(snapshot_id.into());
        self
    }

    /// Fork from a snapshot or prior execution.
    pub fn branch_from(mut self, reference: impl Into<String>) -> Self {
        self.branch_from = Some(reference.into());
        self
    }

    /// Set the memory limit.
    pub fn memory_mb(mut self, mb: u32) -> Self {
        self.memory_mb = Some(mb);
        self
    }

    /// Set the CPU limit.
    pub fn cpu_cores(mut self, cores: u8) -> Self {
        self.cpu_cores = Some(cores);
        self
    }
}

/// Body of `POST /api/v1/execute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub request_id: RequestId,
    pub command: String,
    pub image: String,
    pub runtime: Runtime,
    pub mode: ExecutionMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_vars: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<u8>,
}

/// Turn an intent into a wire request.
///
/// Pure function of the intent and client configuration apart from the
/// freshly generated request id.
pub fn build_request(intent: ExecutionIntent, config: &ClientConfig) -> ExecuteRequest {
    let image = intent
        .image
        .unwrap_or_else(|| config.default_image.clone());

    let cache_key = match intent.cache_key {
        Some(key) => Some(key),
        None if config.cache_enabled => Some(derive_cache_key(&intent.command, &image)),
        None => None,
    };

    ExecuteRequest {
        request_id: RequestId::new(),
        command: intent.command,
        image,
        runtime: intent.runtime.unwrap_or(config.runtime),
        mode: intent.mode,
        env_vars: intent.env_vars,
        working_dir: intent.working_dir,
        timeout_ms: intent
            .timeout
            .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
        cache_key,
        checkpoint_id: intent.checkpoint,
        branch_from: intent.branch_from,
        memory_mb: intent.memory_mb,
        cpu_cores: intent.cpu_cores,
    }
}

/// Derive a deterministic cache key for a `(command, environment)` pair.
///
/// SHA-256 over a length-prefixed encoding of both fields, truncated to
/// 32 lowercase hex characters. Length prefixes keep `("a:b", "c")` and
/// `("a", "b:c")` apart.
pub fn derive_cache_key(command: &str, environment: &str) -> String {
    let mut hasher = Sha256::new();
    for field in [command.trim(), environment.trim()] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..CACHE_KEY_BYTES])
}

/// Interpreters the language wrappers know how to invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    /// `python3 -c`
    Python,
    /// `node -e`
    JavaScript,
    /// `sh -c`
    Shell,
}

impl Language {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "python" | "python3" | "py" => Some(Self::Python),
            "javascript" | "js" | "node" => Some(Self::JavaScript),
            "shell" | "sh" | "bash" => Some(Self::Shell),
            _ => None,
        }
    }

    /// Image the wrapper runs in unless the caller overrides it.
    pub fn default_image(&self) -> &'static str {
        match self {
            Self::Python => "python:3.11-slim",
            Self::JavaScript => "node:20-slim",
            Self::Shell => "alpine:latest",
        }
    }

    /// Build the shell command that runs `code` with this interpreter.
    pub fn command_for(&self, code: &str) -> Result<String, SdkError> {
        let quoted = shell_quote(code)?;
        Ok(match self {
            Self::Python => format!("python3 -c {quoted}"),
            Self::JavaScript => format!("node -e {quoted}"),
            Self::Shell => format!("sh -c {quoted}"),
        })
    }
}

/// Quote a string as a single POSIX shell word.
///
/// Everything inside single quotes is literal, so only `'` needs care: it is
/// closed, emitted escaped, and reopened (`'\''`). NUL cannot travel through
/// an argv and is rejected.
pub fn shell_quote(s: &str) -> Result<String, SdkError> {
    if s.contains('\0') {
        return Err(SdkError::InvalidRequest(
            "payload contains a NUL byte".into(),
        ));
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    Ok(out)
}
