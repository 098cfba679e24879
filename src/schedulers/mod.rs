//! Ready-set computation and concurrent node fan-out.
//!
//! The scheduler decides which frontier nodes are eligible to fire in a step
//! and runs the eligible set concurrently under a bounded join barrier.
//!
//! A node `N` is ready at a step iff:
//!
//! 1. no static predecessor of `N` is still in flight (scheduled on the
//!    current frontier but not yet committed), and
//! 2. at least one channel `C` in `N`'s trigger set has
//!    `version(C) > versions_seen[N][C]` (missing entries read as 0), and
//! 3. `N` is not the virtual `End` sink.
//!
//! Rule 1 makes fan-in wait for every scheduled predecessor without
//! deadlocking on predecessors a conditional branch never selected. Rule 2,
//! recorded after each commit by [`Scheduler::record_seen`], is what makes
//! a diamond fan-in node fire exactly once per effective update: parallel
//! predecessors bump a channel once at their shared barrier, so the fan-in
//! node observes a single version increment.

use std::sync::Arc;
use std::time::Instant;

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

use crate::event_bus::{EventEmitter, RunEvent};
use crate::graphs::Graph;
use crate::node::{NodeContext, NodeError, NodePartial};
use crate::state::StateSnapshot;
use crate::types::NodeKind;
use crate::value::ChannelValue;

/// Per-run scheduling state persisted inside every checkpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchedulerState {
    /// node id → channel → last version the node acted on.
    pub versions_seen: FxHashMap<String, FxHashMap<String, u64>>,
}

/// How a node finished within a step.
#[derive(Debug)]
pub enum NodeOutcome {
    /// The node returned normally with staged writes.
    Completed {
        partial: NodePartial,
        duration_ms: u64,
    },
    /// The node raised the interrupt signal; its staged writes are dropped.
    Interrupted { payload: ChannelValue },
}

/// Errors raised by the fan-out machinery.
#[derive(Debug, Error, Diagnostic)]
pub enum SchedulerError {
    /// A node returned a genuine failure (interrupts are not errors).
    #[error("node {kind} failed at step {step}: {source}")]
    #[diagnostic(code(flowgraph::scheduler::node_run))]
    NodeRun {
        kind: NodeKind,
        step: i64,
        #[source]
        source: NodeError,
    },

    /// A frontier node has no registered implementation.
    #[error("no implementation registered for node {kind}")]
    #[diagnostic(
        code(flowgraph::scheduler::unknown_node),
        help("Register {kind} with GraphBuilder::add_node.")
    )]
    UnknownNode { kind: NodeKind },

    /// A spawned node task panicked or was cancelled.
    #[error("node task join error: {0}")]
    #[diagnostic(code(flowgraph::scheduler::join))]
    Join(#[from] JoinError),
}

/// Bounded concurrent executor for one step's ready set.
#[derive(Clone, Debug)]
pub struct Scheduler {
    /// Maximum number of nodes running concurrently within a step.
    pub concurrency_limit: usize,
}

impl Scheduler {
    /// Create a scheduler with the given intra-step concurrency limit.
    #[must_use]
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            concurrency_limit: concurrency_limit.max(1),
        }
    }

    /// Version-gate check for a single node against a snapshot.
    ///
    /// Returns `true` when at least one trigger channel has advanced past
    /// the version the node last acted on.
    #[must_use]
    pub fn should_run(
        &self,
        state: &SchedulerState,
        graph: &Graph,
        node: &NodeKind,
        snapshot: &StateSnapshot,
    ) -> bool {
        let node_id = node.task_id();
        let seen = state.versions_seen.get(&node_id);
        graph.trigger_set(node).iter().any(|channel| {
            let last = seen
                .and_then(|m| m.get(channel))
                .copied()
                .unwrap_or(0);
            snapshot.version(channel) > last
        })
    }

    /// Record, post-commit, the versions a node has now acted on.
    ///
    /// For every channel in the node's trigger set the current version is
    /// stored.
    pub fn record_seen(
        &self,
        state: &mut SchedulerState,
        graph: &Graph,
        node: &NodeKind,
        snapshot: &StateSnapshot,
    ) {
        let seen = state.versions_seen.entry(node.task_id()).or_default();
        for channel in graph.trigger_set(node) {
            seen.insert(channel.clone(), snapshot.version(channel));
        }
    }

    /// Split the frontier into the ready set and the skipped set.
    ///
    /// Frontier order is preserved and duplicates are collapsed. `End`
    /// markers and gated nodes land in the skipped set; gated nodes stay on
    /// the frontier for later steps. A node whose static predecessor is
    /// itself still on the frontier waits, which is the barrier that holds
    /// a fan-in node back until every scheduled predecessor has committed.
    #[must_use]
    pub fn ready_set(
        &self,
        state: &SchedulerState,
        graph: &Graph,
        frontier: &[NodeKind],
        snapshot: &StateSnapshot,
    ) -> (Vec<NodeKind>, Vec<NodeKind>) {
        let in_flight: FxHashSet<&NodeKind> = frontier
            .iter()
            .filter(|n| !n.is_end() && !n.is_start())
            .collect();
        let mut ready = Vec::new();
        let mut skipped = Vec::new();
        let mut visited: FxHashSet<NodeKind> = FxHashSet::default();

        for node in frontier {
            if !visited.insert(node.clone()) {
                continue;
            }
            if node.is_end() || node.is_start() {
                skipped.push(node.clone());
                continue;
            }
            let pred_pending = graph
                .static_predecessors(node)
                .iter()
                .any(|p| p != node && in_flight.contains(p));
            if !pred_pending && self.should_run(state, graph, node, snapshot) {
                ready.push(node.clone());
            } else {
                skipped.push(node.clone());
            }
        }
        (ready, skipped)
    }

    /// Execute `ready` concurrently against a shared snapshot.
    ///
    /// Every node receives a clone of the committed snapshot and its own
    /// [`NodeContext`]; staged writes travel back in the returned outcomes.
    /// When `resume` names one of the ready nodes, that node's context
    /// carries the resume value for its interrupt primitive.
    ///
    /// The first genuine node failure aborts the step; an interrupt is not a
    /// failure and is surfaced as [`NodeOutcome::Interrupted`].
    pub async fn fan_out(
        &self,
        graph: &Graph,
        ready: &[NodeKind],
        snapshot: &StateSnapshot,
        step: i64,
        emitter: Arc<dyn EventEmitter>,
        resume: Option<&(String, ChannelValue)>,
    ) -> Result<Vec<(NodeKind, NodeOutcome)>, SchedulerError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));
        let mut join_set: JoinSet<Result<(NodeKind, NodeOutcome), SchedulerError>> =
            JoinSet::new();

        for kind in ready {
            let node = graph
                .nodes()
                .get(kind)
                .cloned()
                .ok_or_else(|| SchedulerError::UnknownNode { kind: kind.clone() })?;
            let kind = kind.clone();
            let snapshot = snapshot.clone();
            let emitter = Arc::clone(&emitter);
            let semaphore = Arc::clone(&semaphore);
            let resume_value = resume
                .filter(|(task_id, _)| *task_id == kind.task_id())
                .map(|(_, value)| value.clone());

            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore closed while stepping");
                let _ = emitter.emit(RunEvent::NodeStart {
                    node_id: kind.task_id(),
                    step,
                });
                let ctx = NodeContext::new(kind.task_id(), step, emitter, resume_value);
                let started = Instant::now();
                match node.run(snapshot, ctx).await {
                    Ok(partial) => Ok((
                        kind,
                        NodeOutcome::Completed {
                            partial,
                            duration_ms: started.elapsed().as_millis() as u64,
                        },
                    )),
                    Err(NodeError::Interrupted { payload }) => {
                        Ok((kind, NodeOutcome::Interrupted { payload }))
                    }
                    Err(source) => Err(SchedulerError::NodeRun { kind, step, source }),
                }
            });
        }

        let mut outcomes = Vec::with_capacity(ready.len());
        while let Some(joined) = join_set.join_next().await {
            outcomes.push(joined??);
        }
        Ok(outcomes)
    }
}
