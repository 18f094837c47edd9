//! Fork coordination: run several branches and pick a winner.
//!
//! ```text
//!                  ┌── branch "a" ──► result / error ──┐
//!   ForkRequest ───┼── branch "b" ──► result / error ──┼──► select ──► ForkResult
//!                  └── branch "c" ──► result / error ──┘
//! ```
//!
//! A failing branch becomes an error entry in the report; the fork as a
//! whole fails only when every branch fails. The same module hosts the
//! `parallel_map` and `race` building blocks.

use crate::client::BouvetClient;
use crate::error::{Result, SdkError};
use crate::request::{ExecutionIntent, ExecutionMode};
use crate::types::{Branch, ExecutionResult};
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::time::{Duration, Instant};

/// Selection reason reported when no single winner is chosen.
pub const ALL_BRANCHES_COMPLETED: &str = "all branches completed";

/// How branches are dispatched and how the winner is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForkStrategy {
    /// Run all concurrently; pick by declared weight, if any.
    #[default]
    Parallel,
    /// Run all concurrently; pick the minimum duration.
    Fastest,
    /// Run one after another in declaration order; pick like `Parallel`.
    Sequential,
}

/// One branch of a fork.
#[derive(Debug, Clone, PartialEq)]
pub struct ForkBranch {
    /// Caller-chosen branch name.
    pub id: String,
    /// Command to run.
    pub command: String,
    /// Selection weight for `Parallel`/`Sequential`.
    pub weight: Option<f64>,
    /// Snapshot or execution to fork from; the branch runs in branched mode
    /// when set.
    pub parent: Option<String>,
    /// Extra environment variables for this branch.
    pub env_vars: Vec<(String, String)>,
}

impl ForkBranch {
    /// Create a branch.
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            weight: None,
            parent: None,
            env_vars: Vec::new(),
        }
    }

    /// Set the selection weight.
    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Root the branch at a snapshot or execution.
    pub fn parent(mut self, reference: impl Into<String>) -> Self {
        self.parent = Some(reference.into());
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }
}

/// A set of branches sharing one target environment.
#[derive(Debug, Clone, Default)]
pub struct ForkRequest {
    pub branches: Vec<ForkBranch>,
    pub strategy: ForkStrategy,
    /// Image shared by every branch; the client default when unset.
    pub image: Option<String>,
    /// Platform-side timeout applied to every branch.
    pub timeout: Option<Duration>,
}

impl ForkRequest {
    /// Create an empty fork with the given strategy.
    pub fn new(strategy: ForkStrategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    /// Add a branch.
    pub fn branch(mut self, branch: ForkBranch) -> Self {
        self.branches.push(branch);
        self
    }

    /// Set the shared image.
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Set the per-branch timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn intent_for(&self, branch: &ForkBranch) -> ExecutionIntent {
        let mut intent = ExecutionIntent::new(branch.command.clone());
        if let Some(image) = &self.image {
            intent = intent.image(image.clone());
        }
        if let Some(timeout) = self.timeout {
            intent = intent.timeout(timeout);
        }
        if let Some(parent) = &branch.parent {
            intent = intent
                .mode(ExecutionMode::Branched)
                .branch_from(parent.clone());
        }
        for (key, value) in &branch.env_vars {
            intent = intent.env(key.clone(), value.clone());
        }
        intent
    }
}

/// Outcome of one branch.
#[derive(Debug)]
pub struct BranchReport {
    pub id: String,
    pub weight: Option<f64>,
    pub outcome: Result<ExecutionResult>,
}

impl BranchReport {
    /// Duration of a successful branch.
    pub fn duration(&self) -> Option<Duration> {
        self.outcome.as_ref().ok().map(|r| r.duration)
    }
}

/// Every branch's outcome plus the selection.
#[derive(Debug)]
pub struct ForkResult {
    pub strategy: ForkStrategy,
    /// Reports in declaration order.
    pub branches: Vec<BranchReport>,
    /// Id of the selected branch, if one was selected.
    pub winner: Option<String>,
    pub selection_reason: String,
    /// Wall-clock time for the whole fork.
    pub elapsed: Duration,
}

impl ForkResult {
    /// Result of the selected branch.
    pub fn winner_result(&self) -> Option<&ExecutionResult> {
        let winner = self.winner.as_deref()?;
        self.branches
            .iter()
            .find(|b| b.id == winner)
            .and_then(|b| b.outcome.as_ref().ok())
    }

    /// Number of branches that failed.
    pub fn failures(&self) -> usize {
        self.branches.iter().filter(|b| b.outcome.is_err()).count()
    }
}

/// Pick a winner among the successful branches.
///
/// Returns `(winner, reason)`. Ties go to the earliest declared branch.
pub fn select_winner(strategy: ForkStrategy, reports: &[BranchReport]) -> (Option<String>, String) {
    match strategy {
        ForkStrategy::Fastest => {
            let mut best: Option<(&BranchReport, Duration)> = None;
            for report in reports {
                if let Some(duration) = report.duration() {
                    if best.map_or(true, |(_, d)| duration < d) {
                        best = Some((report, duration));
                    }
                }
            }
            match best {
                Some((report, duration)) => (
                    Some(report.id.clone()),
                    format!("fastest branch ({}ms)", duration.as_millis()),
                ),
                None => (None, ALL_BRANCHES_COMPLETED.to_string()),
            }
        }
        ForkStrategy::Parallel | ForkStrategy::Sequential => {
            let mut best: Option<(&BranchReport, f64)> = None;
            for report in reports.iter().filter(|r| r.outcome.is_ok()) {
                if let Some(weight) = report.weight {
                    if best.map_or(true, |(_, w)| weight > w) {
                        best = Some((report, weight));
                    }
                }
            }
            match best {
                Some((report, weight)) => (
                    Some(report.id.clone()),
                    format!("highest weight ({weight})"),
                ),
                None => (None, ALL_BRANCHES_COMPLETED.to_string()),
            }
        }
    }
}

impl BouvetClient {
    /// Run every branch of `request` and select a winner.
    ///
    /// # Errors
    ///
    /// [`SdkError::InvalidRequest`] for an empty fork and
    /// [`SdkError::AllBranchesFailed`] when no branch succeeds. Individual
    /// failures are reported per branch.
    pub async fn fork(&self, request: ForkRequest) -> Result<ForkResult> {
        if request.branches.is_empty() {
            return Err(SdkError::InvalidRequest("fork requires at least one branch".into()));
        }

        let started = Instant::now();
        tracing::info!(
            branches = request.branches.len(),
            strategy = ?request.strategy,
            "Starting fork"
        );

        let outcomes = match request.strategy {
            ForkStrategy::Parallel | ForkStrategy::Fastest => {
                join_all(
                    request
                        .branches
                        .iter()
                        .map(|branch| self.execute(request.intent_for(branch))),
                )
                .await
            }
            ForkStrategy::Sequential => {
                let mut outcomes = Vec::with_capacity(request.branches.len());
                for branch in &request.branches {
                    outcomes.push(self.execute(request.intent_for(branch)).await);
                }
                outcomes
            }
        };

        let reports: Vec<BranchReport> = request
            .branches
            .iter()
            .zip(outcomes)
            .map(|(branch, outcome)| {
                if let Err(e) = &outcome {
                    tracing::warn!(branch = %branch.id, error = %e, "Fork branch failed");
                }
                BranchReport {
                    id: branch.id.clone(),
                    weight: branch.weight,
                    outcome,
                }
            })
            .collect();

        if reports.iter().all(|r| r.outcome.is_err()) {
            let last_error = reports
                .iter()
                .rev()
                .find_map(|r| r.outcome.as_ref().err())
                .map(ToString::to_string)
                .unwrap_or_default();
            return Err(SdkError::AllBranchesFailed {
                branches: reports.len(),
                last_error,
            });
        }

        let (winner, selection_reason) = select_winner(request.strategy, &reports);
        let elapsed = started.elapsed();
        tracing::info!(
            winner = winner.as_deref().unwrap_or("-"),
            reason = %selection_reason,
            failures = reports.iter().filter(|r| r.outcome.is_err()).count(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Fork decided"
        );

        Ok(ForkResult {
            strategy: request.strategy,
            branches: reports,
            winner,
            selection_reason,
            elapsed,
        })
    }

    /// Map `worker` over `items`, one platform branch per item.
    ///
    /// Each item gets its own branch cut from `base_snapshot`; workers run
    /// concurrently. Afterwards every created branch snapshot is deleted,
    /// whether its worker succeeded or not. Cleanup failures are logged and
    /// never replace a worker's result. Results come back in item order.
    pub async fn parallel_map<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        base_snapshot: &str,
        worker: F,
    ) -> Vec<Result<R>>
    where
        F: Fn(T, Branch) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let worker = &worker;
        let jobs = items.into_iter().enumerate().map(move |(index, item)| async move {
            let name = format!("map-{index}");
            let branch = self.create_branch(base_snapshot, Some(&name)).await?;
            let cleanup_id = branch.snapshot_id.clone();
            let outcome = worker(item, branch).await;
            self.cleanup_snapshot(&cleanup_id, base_snapshot).await;
            outcome
        });
        join_all(jobs).await
    }

    async fn cleanup_snapshot(&self, snapshot_id: &str, base_snapshot: &str) {
        // Never delete the caller's base.
        if snapshot_id == base_snapshot {
            tracing::debug!(snapshot_id, "Branch shares the base snapshot, skipping cleanup");
            return;
        }
        if let Err(e) = self.delete_snapshot(snapshot_id).await {
            tracing::warn!(snapshot_id, error = %e, "Failed to clean up branch snapshot");
        }
    }

    /// Run all intents concurrently and return the first to finish.
    ///
    /// The first completion wins whether it succeeded or failed. Losing
    /// futures are dropped, which stops waiting on them locally; requests
    /// already sent keep running on the platform.
    pub async fn race(&self, intents: Vec<ExecutionIntent>) -> Result<ExecutionResult> {
        if intents.is_empty() {
            return Err(SdkError::InvalidRequest("race requires at least one request".into()));
        }
        let contenders = intents.len();
        let mut in_flight: FuturesUnordered<_> = intents
            .into_iter()
            .map(|intent| self.execute(intent))
            .collect();

        let first = in_flight
            .next()
            .await
            .ok_or_else(|| SdkError::InvalidRequest("race requires at least one request".into()))?;
        tracing::debug!(
            contenders,
            cancelled = in_flight.len(),
            "Race decided"
        );
        first
    }
}
