//! Quantum branch orchestration.
//!
//! A quantum branch runs several approaches to the same goal concurrently,
//! one task per approach, and selects the best one by score. Results flow
//! back over a bounded channel sized to the number of approaches, so no
//! approach task ever blocks on send.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

use super::executor::{ApproachContext, ApproachError, ApproachExecutor, ProgressHandle};
use super::scorer::{clamp_score, Scorer, WeightedScorer, MAX_SCORE};
use super::types::{
    Analysis, Approach, ApproachConfig, ApproachId, ApproachResult, ApproachStatus,
    OptimalApproachSelection, QualityMetrics, QuantumBranch, QuantumBranchId,
    QuantumExecutionResult, QuantumStatus, RankedApproach,
};
use crate::collaborators::storage::persist;
use crate::collaborators::{collections, notify_detached, GitOperations, Notification, Notifier, Storage};
use crate::error::{OrchestrationError, ResourceKind, Result, ValidationError};
use crate::infrastructure::config::OrchestrationSettings;
use crate::session::registry::slug;

/// Number of runners-up reported with a selection.
pub const MAX_ALTERNATIVES: usize = 3;

/// Owns every quantum branch and drives approach execution.
pub struct QuantumOrchestrator {
    settings: OrchestrationSettings,
    git: Arc<dyn GitOperations>,
    storage: Arc<dyn Storage>,
    notifier: Arc<dyn Notifier>,
    executor: Arc<dyn ApproachExecutor>,
    scorer: Arc<dyn Scorer>,
    branches: RwLock<HashMap<QuantumBranchId, QuantumBranch>>,
    progress: RwLock<HashMap<ApproachId, ProgressHandle>>,
    executing: Mutex<HashSet<QuantumBranchId>>,
}

impl std::fmt::Debug for QuantumOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuantumOrchestrator")
            .field("branch_count", &self.branches.read().len())
            .field("executing", &self.executing.lock().len())
            .finish_non_exhaustive()
    }
}

/// Removes a branch from the executing set when execution ends or is dropped.
struct ExecutionGuard<'a> {
    executing: &'a Mutex<HashSet<QuantumBranchId>>,
    id: QuantumBranchId,
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        self.executing.lock().remove(&self.id);
    }
}

impl QuantumOrchestrator {
    /// Creates an orchestrator using the [`WeightedScorer`].
    #[must_use]
    pub fn new(
        settings: OrchestrationSettings,
        git: Arc<dyn GitOperations>,
        storage: Arc<dyn Storage>,
        notifier: Arc<dyn Notifier>,
        executor: Arc<dyn ApproachExecutor>,
    ) -> Self {
        Self {
            settings,
            git,
            storage,
            notifier,
            executor,
            scorer: Arc::new(WeightedScorer::default()),
            branches: RwLock::new(HashMap::new()),
            progress: RwLock::new(HashMap::new()),
            executing: Mutex::new(HashSet::new()),
        }
    }

    /// Replaces the scorer.
    #[must_use]
    pub fn with_scorer(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.scorer = scorer;
        self
    }

    fn validate(&self, name: &str, configs: &[ApproachConfig]) -> Result<(), ValidationError> {
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyQuantumName);
        }
        if configs.is_empty() {
            return Err(ValidationError::NoApproaches);
        }
        let max = self.settings.max_parallel_approaches;
        if configs.len() > max {
            return Err(ValidationError::TooManyApproaches {
                requested: configs.len(),
                max,
            });
        }

        let mut seen = HashSet::with_capacity(configs.len());
        for (index, config) in configs.iter().enumerate() {
            let approach_name = config.name.trim();
            if approach_name.is_empty() {
                return Err(ValidationError::MissingApproachName { index });
            }
            if config.strategy.trim().is_empty() {
                return Err(ValidationError::MissingApproachStrategy {
                    name: approach_name.to_string(),
                });
            }
            if !seen.insert(approach_name) {
                return Err(ValidationError::DuplicateApproachName(approach_name.to_string()));
            }
        }
        Ok(())
    }

    /// Creates a quantum branch with one dedicated Git branch per approach.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty name, no approaches, more
    /// approaches than `max_parallel_approaches`, duplicate names or missing
    /// name/strategy, and a Git error if a branch cannot be created.
    #[instrument(skip(self, goal, configs), fields(approaches = configs.len()))]
    pub async fn create_quantum_branch(
        &self,
        name: &str,
        goal: &str,
        configs: Vec<ApproachConfig>,
    ) -> Result<QuantumBranch> {
        self.validate(name, &configs)?;

        let id = QuantumBranchId::new();
        let prefix = format!("quantum/{}-{}", slug(name.trim()), id.short());
        let mut approaches = Vec::with_capacity(configs.len());
        for config in configs {
            let approach_name = config.name.trim().to_string();
            let approach_id = ApproachId::new();
            // Names that differ only in case or punctuation share a slug.
            let branch = self
                .git
                .create_branch(
                    &format!("{prefix}/{}-{}", slug(&approach_name), approach_id.short()),
                    &self.settings.base_branch,
                )
                .await?;
            approaches.push(Approach {
                id: approach_id,
                name: approach_name,
                strategy: config.strategy.trim().to_string(),
                branch_id: branch.branch_id,
                status: ApproachStatus::Pending,
                score: 0.0,
                confidence: 0.0,
                parameters: config.parameters,
            });
        }

        let branch = QuantumBranch {
            id,
            name: name.trim().to_string(),
            goal: goal.to_string(),
            status: QuantumStatus::Active,
            approaches,
            optimal_approach_id: None,
            created_at: Utc::now(),
        };

        {
            let mut progress = self.progress.write();
            for approach in &branch.approaches {
                progress.insert(approach.id, ProgressHandle::new());
            }
        }
        self.branches.write().insert(id, branch.clone());

        persist(
            self.storage.as_ref(),
            collections::QUANTUM_BRANCHES,
            &id.to_string(),
            &branch,
        )
        .await;
        notify_detached(
            &self.notifier,
            Notification::QuantumBranchCreated {
                quantum_branch_id: id.to_string(),
                approaches: branch.approaches.len(),
            },
        );

        info!(quantum_branch_id = %id, "Quantum branch created");
        Ok(branch)
    }

    /// Runs every approach of an active quantum branch concurrently and
    /// collects exactly one result per approach.
    ///
    /// Each approach is bounded by `approach_timeout` and isolated from
    /// panics; a failing approach becomes a failed result. The branch moves
    /// to `Executed` even if some approaches failed.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError::NotFound`] for an unknown id, a
    /// validation error if the branch is not `Active` or already executing,
    /// and [`OrchestrationError::Cancelled`] if `cancel` fires first. A
    /// cancelled execution leaves the branch `Active` with its approaches
    /// reset to `Pending`.
    #[instrument(skip(self, cancel))]
    pub async fn execute_approaches(
        &self,
        id: QuantumBranchId,
        cancel: &CancellationToken,
    ) -> Result<QuantumExecutionResult> {
        if !self.executing.lock().insert(id) {
            return Err(invalid_state(id, QuantumStatus::Active, "executing"));
        }
        let _guard = ExecutionGuard {
            executing: &self.executing,
            id,
        };

        let branch = self.get(id)?;
        if branch.status != QuantumStatus::Active {
            return Err(invalid_state(id, QuantumStatus::Active, branch.status));
        }

        let total = branch.approaches.len();
        let child = cancel.child_token();
        let timeout = self.settings.approach_timeout();
        let (tx, mut rx) = mpsc::channel::<ApproachResult>(total.max(1));
        let mut tasks = JoinSet::new();

        for (ordinal, approach) in branch.approaches.iter().enumerate() {
            let ctx = ApproachContext {
                quantum_branch_id: id,
                goal: branch.goal.clone(),
                approach_id: approach.id,
                name: approach.name.clone(),
                strategy: approach.strategy.clone(),
                branch_id: approach.branch_id.clone(),
                parameters: approach.parameters.clone(),
                progress: self.progress_handle(approach.id),
                cancel: child.clone(),
            };
            let executor = Arc::clone(&self.executor);
            let tx = tx.clone();
            let span = info_span!("approach", approach_id = %approach.id, name = %approach.name);
            tasks.spawn(
                async move {
                    let approach_id = ctx.approach_id;
                    let approach_name = ctx.name.clone();
                    let started = Instant::now();
                    let run = AssertUnwindSafe(executor.execute(ctx)).catch_unwind();
                    let outcome = match tokio::time::timeout(timeout, run).await {
                        Ok(Ok(outcome)) => outcome,
                        Ok(Err(_)) => Err(ApproachError::Panicked),
                        Err(_) => Err(ApproachError::TimedOut(timeout)),
                    };
                    let execution_time = started.elapsed();

                    let result = match outcome {
                        Ok(outcome) => {
                            debug!(summary = %outcome.summary, ?execution_time, "Approach succeeded");
                            ApproachResult {
                                approach_id,
                                approach_name,
                                ordinal,
                                success: true,
                                error: None,
                                execution_time,
                                metrics: outcome.metrics,
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, ?execution_time, "Approach failed");
                            ApproachResult {
                                approach_id,
                                approach_name,
                                ordinal,
                                success: false,
                                error: Some(e.to_string()),
                                execution_time,
                                metrics: QualityMetrics::default(),
                            }
                        }
                    };
                    if tx.send(result).await.is_err() {
                        debug!("Result receiver dropped");
                    }
                }
                .instrument(span),
            );
        }
        drop(tx);

        let mut results: Vec<ApproachResult> = Vec::with_capacity(total);
        while results.len() < total {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    child.cancel();
                    tasks.abort_all();
                    self.reset_after_cancel(&branch);
                    warn!(quantum_branch_id = %id, received = results.len(), total, "Quantum execution cancelled");
                    return Err(OrchestrationError::Cancelled);
                }
                received = rx.recv() => match received {
                    Some(result) => results.push(result),
                    None => break,
                },
            }
        }

        // Every task sends before finishing, so a short count means a task
        // was lost without reaching its send.
        for (ordinal, approach) in branch.approaches.iter().enumerate() {
            if !results.iter().any(|r| r.approach_id == approach.id) {
                results.push(ApproachResult {
                    approach_id: approach.id,
                    approach_name: approach.name.clone(),
                    ordinal,
                    success: false,
                    error: Some("approach task exited without a result".to_string()),
                    execution_time: std::time::Duration::ZERO,
                    metrics: QualityMetrics::default(),
                });
            }
        }
        results.sort_by_key(|r| r.ordinal);

        let analysis = Analysis::from_results(&results);
        let updated = {
            let mut branches = self.branches.write();
            let stored = branches
                .get_mut(&id)
                .ok_or_else(|| OrchestrationError::not_found(ResourceKind::QuantumBranch, id))?;
            stored.status = QuantumStatus::Executed;
            for result in &results {
                if let Some(approach) = stored.approaches.iter_mut().find(|a| a.id == result.approach_id) {
                    approach.status = if result.success {
                        ApproachStatus::Completed
                    } else {
                        ApproachStatus::Failed
                    };
                }
            }
            stored.clone()
        };
        for result in results.iter().filter(|r| r.success) {
            self.progress_handle(result.approach_id).set(100);
        }

        persist(
            self.storage.as_ref(),
            collections::QUANTUM_BRANCHES,
            &id.to_string(),
            &updated,
        )
        .await;
        notify_detached(
            &self.notifier,
            Notification::QuantumBranchExecuted {
                quantum_branch_id: id.to_string(),
                succeeded: analysis.succeeded,
                failed: analysis.failed,
            },
        );

        info!(
            quantum_branch_id = %id,
            succeeded = analysis.succeeded,
            failed = analysis.failed,
            "Quantum branch executed"
        );
        Ok(QuantumExecutionResult {
            quantum_branch_id: id,
            partial_failure: analysis.failed > 0,
            results,
            analysis,
        })
    }

    fn reset_after_cancel(&self, branch: &QuantumBranch) {
        {
            let progress = self.progress.read();
            for approach in &branch.approaches {
                if let Some(handle) = progress.get(&approach.id) {
                    handle.set(0);
                }
            }
        }
        if let Some(stored) = self.branches.write().get_mut(&branch.id) {
            for approach in &mut stored.approaches {
                approach.status = ApproachStatus::Pending;
            }
        }
    }

    /// Scores the successful results of an execution and records the winner.
    ///
    /// Scores come from the configured [`Scorer`] clamped to `[0, 100]`. The
    /// highest score wins; equal scores go to the approach declared first.
    /// Confidence is `(top - second) / top`, or 1.0 for a single candidate.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::NoSuccessfulResults`] if nothing succeeded,
    /// [`OrchestrationError::NotFound`] for an unknown branch and a
    /// validation error if the branch has not been executed or a ranked
    /// result names an approach the branch does not own.
    #[instrument(skip(self, execution), fields(quantum_branch_id = %execution.quantum_branch_id))]
    pub async fn select_optimal_approach(
        &self,
        execution: &QuantumExecutionResult,
    ) -> Result<OptimalApproachSelection> {
        let id = execution.quantum_branch_id;
        let scored: Vec<(&ApproachResult, f64)> = execution
            .results
            .iter()
            .filter(|r| r.success)
            .map(|r| (r, clamp_score(self.scorer.score(r))))
            .collect();
        let selection = rank(id, scored)?;

        let updated = {
            let mut branches = self.branches.write();
            let stored = branches
                .get_mut(&id)
                .ok_or_else(|| OrchestrationError::not_found(ResourceKind::QuantumBranch, id))?;
            if stored.status == QuantumStatus::Active {
                return Err(invalid_state(id, QuantumStatus::Executed, stored.status));
            }
            if let Some(foreign) = std::iter::once(selection.optimal_approach_id)
                .chain(selection.alternatives.iter().map(|alt| alt.approach_id))
                .find(|approach_id| stored.approach(*approach_id).is_none())
            {
                return Err(ValidationError::UnknownApproach {
                    quantum_branch_id: id.to_string(),
                    approach_id: foreign.to_string(),
                }
                .into());
            }
            stored.status = QuantumStatus::Optimized;
            stored.optimal_approach_id = Some(selection.optimal_approach_id);
            let scores = std::iter::once((selection.optimal_approach_id, selection.score)).chain(
                selection
                    .alternatives
                    .iter()
                    .map(|alt| (alt.approach_id, alt.score)),
            );
            for (approach_id, score) in scores {
                if let Some(approach) = stored.approaches.iter_mut().find(|a| a.id == approach_id) {
                    approach.score = score;
                    approach.confidence = score / MAX_SCORE;
                }
            }
            stored.clone()
        };

        persist(
            self.storage.as_ref(),
            collections::QUANTUM_BRANCHES,
            &id.to_string(),
            &updated,
        )
        .await;
        notify_detached(
            &self.notifier,
            Notification::OptimalApproachSelected {
                quantum_branch_id: id.to_string(),
                approach_id: selection.optimal_approach_id.to_string(),
                confidence: selection.confidence,
            },
        );

        info!(
            approach_id = %selection.optimal_approach_id,
            score = selection.score,
            confidence = selection.confidence,
            "Optimal approach selected"
        );
        Ok(selection)
    }

    /// Advances approach statuses from their reported progress.
    ///
    /// `Pending` becomes `InProgress` once progress is above zero, and
    /// `InProgress` becomes `Completed` at 100%. Failed approaches and
    /// branches that are no longer `Active` are left alone. Returns the
    /// number of approaches whose status changed.
    pub fn refresh_progress(&self) -> usize {
        let progress: HashMap<ApproachId, u8> = self
            .progress
            .read()
            .iter()
            .map(|(id, handle)| (*id, handle.get()))
            .collect();

        let mut changed = 0;
        let mut branches = self.branches.write();
        for branch in branches
            .values_mut()
            .filter(|b| b.status == QuantumStatus::Active)
        {
            for approach in &mut branch.approaches {
                let percent = progress.get(&approach.id).copied().unwrap_or(0);
                let next = match approach.status {
                    ApproachStatus::Pending | ApproachStatus::InProgress if percent >= 100 => {
                        ApproachStatus::Completed
                    }
                    ApproachStatus::Pending if percent > 0 => ApproachStatus::InProgress,
                    status => status,
                };
                if next != approach.status {
                    approach.status = next;
                    changed += 1;
                }
            }
        }
        changed
    }

    fn progress_handle(&self, approach_id: ApproachId) -> ProgressHandle {
        if let Some(handle) = self.progress.read().get(&approach_id) {
            return handle.clone();
        }
        self.progress.write().entry(approach_id).or_default().clone()
    }

    /// Returns a quantum branch.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError::NotFound`] for an unknown id.
    pub fn get(&self, id: QuantumBranchId) -> Result<QuantumBranch> {
        self.branches
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| OrchestrationError::not_found(ResourceKind::QuantumBranch, id))
    }

    /// All quantum branches, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<QuantumBranch> {
        let mut branches: Vec<QuantumBranch> = self.branches.read().values().cloned().collect();
        branches.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        branches
    }

    /// Git branches of approaches that are currently in progress.
    #[must_use]
    pub fn active_branch_ids(&self) -> Vec<String> {
        self.branches
            .read()
            .values()
            .flat_map(|b| b.approaches.iter())
            .filter(|a| a.status == ApproachStatus::InProgress)
            .map(|a| a.branch_id.clone())
            .collect()
    }

    /// Whether any quantum branch is still `Active`.
    #[must_use]
    pub fn has_active(&self) -> bool {
        self.branches
            .read()
            .values()
            .any(|b| b.status == QuantumStatus::Active)
    }
}

fn invalid_state(
    id: QuantumBranchId,
    expected: QuantumStatus,
    actual: impl std::fmt::Display,
) -> OrchestrationError {
    ValidationError::InvalidState {
        resource: ResourceKind::QuantumBranch,
        id: id.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
    .into()
}

/// Picks the best of `scored` (score descending, declaration order on ties).
fn rank(
    quantum_branch_id: QuantumBranchId,
    mut scored: Vec<(&ApproachResult, f64)>,
) -> Result<OptimalApproachSelection> {
    scored.sort_by(|(a, sa), (b, sb)| {
        sb.total_cmp(sa).then_with(|| a.ordinal.cmp(&b.ordinal))
    });

    let mut ranked = scored.into_iter();
    let (best, top) = ranked.next().ok_or(ValidationError::NoSuccessfulResults)?;
    let alternatives: Vec<RankedApproach> = ranked
        .take(MAX_ALTERNATIVES)
        .map(|(r, score)| RankedApproach {
            approach_id: r.approach_id,
            approach_name: r.approach_name.clone(),
            score,
        })
        .collect();

    let confidence = match alternatives.first() {
        None => 1.0,
        Some(_) if top <= 0.0 => 0.0,
        Some(second) => ((top - second.score) / top).clamp(0.0, 1.0),
    };

    Ok(OptimalApproachSelection {
        quantum_branch_id,
        optimal_approach_id: best.approach_id,
        score: top,
        confidence,
        alternatives,
    })
}
