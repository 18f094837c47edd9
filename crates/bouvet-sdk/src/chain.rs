//! Snapshot chains.
//!
//! An [`ExecutionChain`] queues steps and runs them strictly in order when
//! [`ExecutionChain::run`] is awaited. Each step receives the [`ChainState`]
//! produced by the previous one and returns the next, so the current
//! snapshot is threaded through a fold rather than held in shared state.

use crate::client::BouvetClient;
use crate::error::{Result, SdkError};
use crate::request::{ExecutionIntent, ExecutionMode};
use crate::types::{Branch, ExecutionResult};
use futures::stream::{self, TryStreamExt};

/// Command used to establish a baseline snapshot.
const BASELINE_COMMAND: &str = "true";

/// One queued step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStep {
    /// Run a no-op in the given environment to establish a baseline.
    FromEnvironment(String),
    /// Run code checkpointed against the current snapshot.
    Exec(String),
    /// Cut a branch from the current snapshot.
    Branch,
}

/// Accumulator threaded through the chain.
#[derive(Debug, Clone, Default)]
pub struct ChainState {
    /// Snapshot the next step builds on.
    pub current_snapshot: Option<String>,
    /// Environment set by the last `FromEnvironment` step.
    pub environment: Option<String>,
    /// Results of executed steps, in order.
    pub results: Vec<ExecutionResult>,
    /// Branches created, in order.
    pub branches: Vec<Branch>,
}

/// Fluent builder for a sequence of dependent executions.
///
/// ```no_run
/// # async fn example(client: bouvet_sdk::BouvetClient) -> bouvet_sdk::Result<()> {
/// let state = client
///     .chain()
///     .from_environment("python:3.11-slim")
///     .exec("pip install numpy")
///     .branch()
///     .run()
///     .await?;
/// println!("ended at {:?}", state.current_snapshot);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ExecutionChain<'a> {
    client: &'a BouvetClient,
    start: Option<String>,
    steps: Vec<ChainStep>,
}

impl<'a> ExecutionChain<'a> {
    pub(crate) fn new(client: &'a BouvetClient) -> Self {
        Self {
            client,
            start: None,
            steps: Vec::new(),
        }
    }

    /// Seed the chain with an existing snapshot.
    pub fn starting_at(mut self, snapshot_id: impl Into<String>) -> Self {
        self.start = Some(snapshot_id.into());
        self
    }

    /// Queue a baseline step in `environment`.
    pub fn from_environment(mut self, environment: impl Into<String>) -> Self {
        self.steps.push(ChainStep::FromEnvironment(environment.into()));
        self
    }

    /// Queue a checkpointed execution.
    pub fn exec(mut self, code: impl Into<String>) -> Self {
        self.steps.push(ChainStep::Exec(code.into()));
        self
    }

    /// Queue a branch from the current snapshot.
    pub fn branch(mut self) -> Self {
        self.steps.push(ChainStep::Branch);
        self
    }

    /// Queued steps.
    pub fn steps(&self) -> &[ChainStep] {
        &self.steps
    }

    /// Run every step in order.
    ///
    /// Each call starts from scratch; nothing is remembered from earlier
    /// runs. Stops at the first failing step.
    pub async fn run(&self) -> Result<ChainState> {
        let initial = ChainState {
            current_snapshot: self.start.clone(),
            ..ChainState::default()
        };
        let state = stream::iter(self.steps.iter().map(Ok::<_, SdkError>))
            .try_fold(initial, |state, step| self.apply(state, step))
            .await?;

        tracing::debug!(
            steps = self.steps.len(),
            snapshot = state.current_snapshot.as_deref().unwrap_or("-"),
            "Chain completed"
        );
        Ok(state)
    }

    async fn apply(&self, mut state: ChainState, step: &ChainStep) -> Result<ChainState> {
        tracing::trace!(?step, snapshot = ?state.current_snapshot, "Chain step");
        match step {
            ChainStep::FromEnvironment(environment) => {
                let intent = ExecutionIntent::new(BASELINE_COMMAND)
                    .image(environment.clone())
                    .mode(ExecutionMode::Cached);
                let result = self.client.execute(intent).await?;
                if let Some(snapshot) = &result.snapshot {
                    state.current_snapshot = Some(snapshot.clone());
                }
                state.environment = Some(environment.clone());
                state.results.push(result);
            }
            ChainStep::Exec(code) => {
                let mut intent =
                    ExecutionIntent::new(code.clone()).mode(ExecutionMode::Checkpointed);
                if let Some(environment) = &state.environment {
                    intent = intent.image(environment.clone());
                }
                if let Some(snapshot) = &state.current_snapshot {
                    intent = intent.checkpoint(snapshot.clone());
                }
                let result = self.client.execute(intent).await?;
                if let Some(snapshot) = &result.snapshot {
                    state.current_snapshot = Some(snapshot.clone());
                }
                state.results.push(result);
            }
            ChainStep::Branch => {
                let Some(snapshot) = state.current_snapshot.as_deref() else {
                    return Err(SdkError::Resource(
                        "no current snapshot to branch from".into(),
                    ));
                };
                let branch = self.client.create_branch(snapshot, None).await?;
                state.current_snapshot = Some(branch.snapshot_id.clone());
                state.branches.push(branch);
            }
        }
        Ok(state)
    }
}

impl BouvetClient {
    /// Start a snapshot chain.
    pub fn chain(&self) -> ExecutionChain<'_> {
        ExecutionChain::new(self)
    }
}
