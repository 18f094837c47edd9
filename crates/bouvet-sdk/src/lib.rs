//! # bouvet-sdk
//!
//! Client-side execution orchestration for the Bouvet execution platform.
//!
//! The platform runs code in isolated containers and micro-VMs and keeps
//! snapshots of their state. This crate shapes execution intents into
//! platform requests and handles everything around the call: retries,
//! cache keys, fork coordination, snapshot chains, metrics and log streams.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      bouvet-sdk (client)                     │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌──────────────┐   ┌──────────────┐   ┌────────────────┐    │
//! │  │ fork()       │   │ chain()      │   │ stream_logs()  │    │
//! │  │ parallel_map │   │ ExecChain    │   │ LogStream      │    │
//! │  │ race()       │   └──────┬───────┘   └───────┬────────┘    │
//! │  └──────┬───────┘          │                   │             │
//! │         └──────────┬───────┘                   │             │
//! │                    ▼                           │             │
//! │  ┌──────────────────────────────┐              │             │
//! │  │ BouvetClient::execute()      │──▶ ClientMetrics           │
//! │  │  build_request + cache key   │              │             │
//! │  └──────────────┬───────────────┘              │             │
//! │                 ▼                              │             │
//! │  ┌──────────────────────────────┐              │             │
//! │  │ retry_with_policy (backoff)  │◀─────────────┘             │
//! │  └──────────────┬───────────────┘                            │
//! │                 ▼                                            │
//! │  ┌──────────────────────────────┐                            │
//! │  │ Transport (pooled reqwest)   │                            │
//! │  └──────────────┬───────────────┘                            │
//! └─────────────────┼────────────────────────────────────────────┘
//!                   │ HTTPS + x-api-key
//!                   ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │              execution platform (/api/v1/...)                │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use bouvet_sdk::{BouvetClient, ClientConfig, ForkBranch, ForkRequest, ForkStrategy};
//!
//! # async fn example() -> bouvet_sdk::Result<()> {
//! let client = BouvetClient::new(
//!     ClientConfig::builder().api_key("secret").build()?,
//! )?;
//!
//! // Cached by (command, image)
//! let out = client.run("echo hello").await?;
//! println!("{out}");
//!
//! // Embed source safely in a shell command
//! let result = client.run_python("print('hi')").await?;
//! assert!(result.success());
//!
//! // Compare two approaches, keep the faster
//! let fork = client
//!     .fork(
//!         ForkRequest::new(ForkStrategy::Fastest)
//!             .branch(ForkBranch::new("a", "sort -n data.txt"))
//!             .branch(ForkBranch::new("b", "sort -g data.txt")),
//!     )
//!     .await?;
//! println!("winner: {:?}", fork.winner);
//!
//! // Build on snapshots step by step
//! let state = client
//!     .chain()
//!     .from_environment("python:3.11-slim")
//!     .exec("pip install numpy")
//!     .branch()
//!     .run()
//!     .await?;
//! println!("ended at {:?}", state.current_snapshot);
//!
//! client.close();
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Retries**: 5xx and transport failures retried with exponential backoff
//! - **Caching**: deterministic SHA-256 cache keys per `(command, image)`
//! - **Forks**: concurrent branches with fastest/weighted selection
//! - **Chains**: sequential snapshot lineage with branching
//! - **Instances**: persistent sandboxes for long-running sessions
//! - **Metrics**: lock-free client counters with derived rates

mod chain;
mod client;
mod config;
mod error;
mod fork;
mod instance;
mod logs;
mod metrics;
mod request;
mod retry;
mod transport;
mod types;

pub use chain::{ChainState, ChainStep, ExecutionChain};
pub use client::{BouvetClient, DEFAULT_MERGE_STRATEGY};
pub use config::{ClientConfig, ClientConfigBuilder, DEFAULT_BASE_URL, DEFAULT_IMAGE};
pub use error::{Result, SdkError};
pub use fork::{
    select_winner, BranchReport, ForkBranch, ForkRequest, ForkResult, ForkStrategy,
    ALL_BRANCHES_COMPLETED,
};
pub use logs::LogStream;
pub use metrics::{ClientMetrics, MetricsReport};
pub use request::{
    build_request, derive_cache_key, shell_quote, ExecuteRequest, ExecutionIntent, ExecutionMode,
    Language, RequestId, Runtime,
};
pub use retry::{retry_with_policy, RetryPolicy};
pub use transport::API_KEY_HEADER;
pub use types::{
    Branch, ExecutionResult, HealthStatus, Instance, InstanceRequest, PlatformMetrics, Snapshot,
    SnapshotFilter, SnapshotRequest,
};
