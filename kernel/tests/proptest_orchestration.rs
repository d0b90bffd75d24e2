//! Property-based tests for the orchestration core.
//!
//! Uses proptest to generate workloads and checks the bounds the components
//! promise regardless of input: snapshot retention, queue capacity, approach
//! selection and session identity.

#![allow(missing_docs)]

mod common;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use common::{Harness, Script, ScriptedExecutor};
use proptest::prelude::*;
use ramify_kernel::collaborators::{GitOperations, InMemoryGit, InMemoryStorage};
use ramify_kernel::events::{BranchingEvent, EventBus, EventType};
use ramify_kernel::infrastructure::config::OrchestrationSettings;
use ramify_kernel::quantum::ApproachConfig;
use ramify_kernel::snapshot::{SnapshotStore, TimeRange};
use ramify_kernel::OrchestrationError;
use tokio_util::sync::CancellationToken;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Strategy for approach performance metrics.
fn performance_strategy() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.0f64..100.0, 1..6)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: a branch never holds more than the bound, and the snapshots
    /// kept are the most recent ones in capture order.
    #[test]
    fn snapshot_history_keeps_the_most_recent(taken in 1usize..20, bound in 1usize..8) {
        runtime().block_on(async {
            let git = Arc::new(InMemoryGit::new());
            git.create_branch("feature/x", "main").await.unwrap();
            let store = SnapshotStore::new(bound, git.clone(), Arc::new(InMemoryStorage::new()));

            for i in 0..taken {
                git.record_change("feature/x", format!("c{i}")).unwrap();
                store.create_snapshot("feature/x").await.unwrap();
            }

            let kept: Vec<String> = store
                .query("feature/x", TimeRange::all())
                .into_iter()
                .map(|s| s.changes_summary)
                .collect();
            let expected: Vec<String> = (taken.saturating_sub(bound)..taken)
                .map(|i| format!("c{i}"))
                .collect();
            prop_assert_eq!(store.count("feature/x"), taken.min(bound));
            prop_assert_eq!(kept, expected);
            Ok(())
        })?;
    }

    /// Property: a bounded queue accepts exactly as many events as it has room for.
    #[test]
    fn queue_accepts_up_to_capacity(submitted in 0usize..40, capacity in 1usize..16) {
        let bus = EventBus::new(capacity, false);
        let mut accepted = 0usize;
        for i in 0..submitted {
            match bus.submit(BranchingEvent::new(EventType::CommitPushed, format!("s{i}"))) {
                Ok(()) => accepted += 1,
                Err(OrchestrationError::Capacity { capacity: reported }) => {
                    prop_assert_eq!(reported, capacity);
                }
                Err(other) => prop_assert!(false, "unexpected error: {other}"),
            }
        }
        prop_assert_eq!(accepted, submitted.min(capacity));
        prop_assert_eq!(bus.pending(), accepted);
        prop_assert_eq!(bus.stats().rejected, (submitted - accepted) as u64);
    }

    /// Property: the selected approach has the highest score, the first one
    /// declared wins a tie, and confidence stays within `[0, 1]`.
    #[test]
    fn selection_picks_the_best_scoring_approach(performances in performance_strategy()) {
        runtime().block_on(async {
            let executor = performances.iter().enumerate().fold(
                ScriptedExecutor::default(),
                |executor, (i, performance)| {
                    executor.with(
                        &format!("a{i}"),
                        Script::Succeed {
                            delay: Duration::ZERO,
                            performance: *performance,
                        },
                    )
                },
            );
            let harness = Harness::build(
                OrchestrationSettings::default(),
                Arc::new(InMemoryStorage::new()),
                Arc::new(executor),
            );
            let configs = (0..performances.len())
                .map(|i| ApproachConfig::new(format!("a{i}"), "s"))
                .collect();
            let branch = harness
                .quantum
                .create_quantum_branch("prop", "goal", configs)
                .await
                .unwrap();
            let execution = harness
                .quantum
                .execute_approaches(branch.id, &CancellationToken::new())
                .await
                .unwrap();
            let selection = harness
                .quantum
                .select_optimal_approach(&execution)
                .await
                .unwrap();

            let best = performances.iter().copied().fold(f64::MIN, f64::max);
            let winner = performances.iter().position(|p| *p == best).unwrap();
            prop_assert_eq!(selection.optimal_approach_id, branch.approaches[winner].id);
            prop_assert!((0.0..=1.0).contains(&selection.confidence));
            prop_assert_eq!(selection.alternatives.len(), (performances.len() - 1).min(3));
            prop_assert!(selection
                .alternatives
                .windows(2)
                .all(|pair| pair[0].score >= pair[1].score));
            Ok(())
        })?;
    }

    /// Property: every session gets its own id and its own branch.
    #[test]
    fn sessions_never_share_ids_or_branches(scopes in prop::collection::vec("[a-z]{1,8}", 1..12)) {
        runtime().block_on(async {
            let harness = Harness::new(OrchestrationSettings::default());
            let mut ids = HashSet::new();
            let mut branches = HashSet::new();
            for scope in &scopes {
                let session = harness
                    .sessions
                    .create_session(scope, Duration::ZERO, HashMap::new())
                    .await
                    .unwrap();
                prop_assert!(ids.insert(session.id));
                prop_assert!(branches.insert(session.branch_id));
            }
            prop_assert_eq!(harness.sessions.active_count(), scopes.len());
            Ok(())
        })?;
    }
}
