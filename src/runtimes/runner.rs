//! The graph runner: load phase, step loop, commit barrier, interrupt
//! capture, and resume delivery.
//!
//! One [`GraphRunner::run`] invocation drives a lineage forward:
//!
//! 1. **Load** - fetch the addressed checkpoint (or initialize a fresh run
//!    and persist the `Input` checkpoint at step -1).
//! 2. **Step loop** - compute the ready set, fan out eligible nodes
//!    concurrently, apply all staged writes atomically at the commit
//!    barrier, bump channel versions, record `versions_seen`, resolve
//!    conditional edges, persist a `Loop` checkpoint, emit events.
//! 3. **Interrupt** - when a node raises the interrupt signal its staged
//!    writes are discarded, peer writes commit, an `Interrupt` checkpoint
//!    is persisted, and the run returns with an interrupted marker.
//! 4. **Terminate** - when the ready set is empty or every successor
//!    resolves to `End`, a terminal checkpoint is persisted and `Done` is
//!    emitted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::watch;
use tracing::instrument;
use uuid::Uuid;

use crate::channels::{ChannelError, ChannelRegistry};
use crate::event_bus::{EventBus, EventStream, RunEvent};
use crate::graphs::Graph;
use crate::node::{NodePartial, RouteOverride};
use crate::runtimes::checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointStore, InMemoryCheckpointStore,
    InterruptState, StoreError,
};
use crate::runtimes::manager::CheckpointManager;
use crate::runtimes::runtime_config::{RuntimeConfig, StoreType};
use crate::schedulers::{NodeOutcome, Scheduler, SchedulerError, SchedulerState};
use crate::state::{PendingWrite, StateContainer, StateError};
use crate::types::{CheckpointSource, NodeKind};
use crate::value::ChannelValue;

/// Task id used for writes staged from the run's initial payload.
const INPUT_TASK_ID: &str = "__input__";

/// Resume command delivered with a run request.
///
/// The executor keys the value by the task id stored in the loaded interrupt
/// checkpoint, so callers can pass a bare [`Value`](ResumeCommand::Value)
/// without knowing internal identifiers. [`Keyed`](ResumeCommand::Keyed)
/// addresses a specific outstanding task id explicitly.
#[derive(Clone, Debug)]
pub enum ResumeCommand {
    /// Resume the currently suspended task with this value.
    Value(ChannelValue),
    /// Resume values keyed by task id.
    Keyed(FxHashMap<String, ChannelValue>),
}

/// Inputs to one run of a graph.
#[derive(Clone, Debug)]
pub struct RunRequest {
    /// Human-identified thread of execution owning the checkpoint DAG.
    pub lineage: String,
    /// Partition within the lineage for parallel exploration.
    pub namespace: String,
    /// Resume from this checkpoint; `None` means latest in
    /// `(lineage, namespace)`, falling back to a fresh run.
    pub checkpoint_id: Option<Uuid>,
    /// Initial channel writes committed with the first step of a fresh run.
    pub input: Option<FxHashMap<String, ChannelValue>>,
    /// Resume command for a suspended run.
    pub resume: Option<ResumeCommand>,
    /// Cooperative cancellation signal; flipping it to `true` aborts the
    /// run between and within steps.
    pub cancel: Option<watch::Receiver<bool>>,
}

impl RunRequest {
    /// A run request in the default namespace `main`.
    pub fn new(lineage: impl Into<String>) -> Self {
        Self {
            lineage: lineage.into(),
            namespace: "main".to_string(),
            checkpoint_id: None,
            input: None,
            resume: None,
            cancel: None,
        }
    }

    /// A run request under a freshly generated lineage id, for callers that
    /// do not care about addressing the thread later.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self::new(crate::utils::id_generator::IdGenerator::new().generate_lineage_id())
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn with_checkpoint_id(mut self, id: Uuid) -> Self {
        self.checkpoint_id = Some(id);
        self
    }

    /// Seed the run with initial channel writes.
    #[must_use]
    pub fn with_input(mut self, input: FxHashMap<String, ChannelValue>) -> Self {
        self.input = Some(input);
        self
    }

    /// Resume the suspended task with a single value.
    #[must_use]
    pub fn with_resume(mut self, value: ChannelValue) -> Self {
        self.resume = Some(ResumeCommand::Value(value));
        self
    }

    /// Resume with values keyed by task id.
    #[must_use]
    pub fn with_resume_map(mut self, map: FxHashMap<String, ChannelValue>) -> Self {
        self.resume = Some(ResumeCommand::Keyed(map));
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Result of executing one step.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub step: i64,
    /// Nodes that ran, in scheduling order.
    pub ran_nodes: Vec<NodeKind>,
    /// Frontier nodes skipped (End markers or gated).
    pub skipped_nodes: Vec<NodeKind>,
    /// Channels updated by the commit barrier, sorted by name.
    pub updated_channels: Vec<String>,
    /// The frontier scheduled for the next step.
    pub next_frontier: Vec<NodeKind>,
    /// Whether the run reached a terminal frontier after this step.
    pub completed: bool,
}

/// Terminal status of a run invocation.
#[derive(Debug, Clone)]
pub enum RunStatus {
    /// The run reached `End` (or an empty ready set).
    Completed { final_node: Option<String> },
    /// A node suspended; resume with the given task id to continue.
    Interrupted {
        node_id: String,
        task_id: String,
        payload: ChannelValue,
    },
}

impl RunStatus {
    /// Returns `true` when the run finished rather than suspended.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, RunStatus::Completed { .. })
    }
}

/// Summary of a completed or suspended run invocation.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub lineage: String,
    pub namespace: String,
    /// Id of the last checkpoint persisted by this invocation, if any.
    pub checkpoint_id: Option<Uuid>,
    pub status: RunStatus,
    /// Channel values after the last commit.
    pub final_values: FxHashMap<String, ChannelValue>,
    /// Channel versions after the last commit.
    pub final_versions: FxHashMap<String, u64>,
    /// Per-step execution reports, in order.
    pub step_reports: Vec<StepReport>,
}

/// Errors surfaced by a run.
#[derive(Debug, Error, Diagnostic)]
pub enum RunnerError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Channel(#[from] ChannelError),

    #[error("conditional edge from {from} produced unmatched branch label `{label}`")]
    #[diagnostic(
        code(flowgraph::runner::unknown_branch),
        help("Every label the predicate can return must appear in the branch map.")
    )]
    UnknownBranch { from: NodeKind, label: String },

    #[error("run cancelled at step {step}")]
    #[diagnostic(code(flowgraph::runner::cancelled))]
    Cancelled { step: i64 },
}

/// Runtime execution engine for a compiled [`Graph`].
///
/// The runner owns the event bus and a [`CheckpointManager`] over the
/// configured store. One compiled graph can back many runners; one runner
/// can drive many lineages. Two concurrent runs on the same
/// `(lineage, namespace)` are not supported; callers should use distinct
/// namespaces to explore in parallel.
pub struct GraphRunner {
    graph: Arc<Graph>,
    manager: CheckpointManager,
    scheduler: Scheduler,
    event_bus: EventBus,
    event_stream_taken: AtomicBool,
}

impl GraphRunner {
    /// Build a runner over an explicit store with a default event bus.
    pub fn new(graph: Graph, store: Arc<dyn CheckpointStore>) -> Self {
        let config = RuntimeConfig::default();
        Self::with_store_and_bus(graph, store, &config)
    }

    /// Build a runner from a [`RuntimeConfig`], constructing the configured
    /// store.
    pub async fn with_config(graph: Graph, config: RuntimeConfig) -> Result<Self, RunnerError> {
        let store: Arc<dyn CheckpointStore> = match config.store.clone().unwrap_or(StoreType::InMemory)
        {
            StoreType::InMemory => match config.max_checkpoints_per_lineage {
                Some(max) => Arc::new(InMemoryCheckpointStore::with_retention(max)),
                None => Arc::new(InMemoryCheckpointStore::new()),
            },
            #[cfg(feature = "sqlite")]
            StoreType::Sqlite => {
                let db_name = config
                    .sqlite_db_name
                    .clone()
                    .unwrap_or_else(|| "flowgraph.db".to_string());
                let url = format!("sqlite://{db_name}");
                Arc::new(
                    crate::runtimes::checkpoint_sqlite::SqliteCheckpointStore::connect(&url)
                        .await?,
                )
            }
        };
        Ok(Self::with_store_and_bus(graph, store, &config))
    }

    fn with_store_and_bus(
        graph: Graph,
        store: Arc<dyn CheckpointStore>,
        config: &RuntimeConfig,
    ) -> Self {
        let event_bus = config.event_bus.build_event_bus();
        event_bus.listen_for_events();
        let concurrency = config.concurrency_limit.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        Self {
            graph: Arc::new(graph),
            manager: CheckpointManager::new(store),
            scheduler: Scheduler::new(concurrency),
            event_bus,
            event_stream_taken: AtomicBool::new(false),
        }
    }

    /// The checkpoint manager backing this runner.
    #[must_use]
    pub fn manager(&self) -> &CheckpointManager {
        &self.manager
    }

    /// The compiled graph this runner executes.
    #[must_use]
    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// Subscribe to the run event stream.
    ///
    /// The stream yields events as they are emitted and closes after the
    /// terminal `Done` event of the next run.
    pub fn event_stream(&self) -> EventStream {
        self.event_stream_taken.store(true, Ordering::SeqCst);
        self.event_bus.subscribe()
    }

    /// Attach an additional sink to this runner's event bus.
    pub fn add_event_sink<T: crate::event_bus::EventSink + 'static>(&self, sink: T) {
        self.event_bus.add_sink(sink);
    }

    /// Start a run in the background, returning its event stream and the
    /// handle resolving to the final [`RunReport`].
    ///
    /// The stream closes after the run's terminal `Done` event.
    pub fn run_stream(
        self: &Arc<Self>,
        request: RunRequest,
    ) -> (
        EventStream,
        tokio::task::JoinHandle<Result<RunReport, RunnerError>>,
    ) {
        let stream = self.event_stream();
        let runner = Arc::clone(self);
        let handle = tokio::spawn(async move { runner.run(request).await });
        (stream, handle)
    }

    /// Fork a new branch from the addressed checkpoint. Returns the config
    /// of the new `Fork` checkpoint.
    pub async fn fork(&self, config: &CheckpointConfig) -> Result<CheckpointConfig, RunnerError> {
        Ok(self.manager.fork(config).await?)
    }

    /// Delete a lineage and every checkpoint it owns.
    pub async fn delete(&self, lineage: &str) -> Result<(), RunnerError> {
        Ok(self.manager.delete_lineage(lineage).await?)
    }

    /// Drive a run to completion or suspension, emitting events along the
    /// way. See the module docs for the step-loop contract.
    #[instrument(skip(self, request), fields(lineage = %request.lineage, namespace = %request.namespace), err)]
    pub async fn run(&self, request: RunRequest) -> Result<RunReport, RunnerError> {
        match self.drive(request).await {
            Ok(report) => {
                let final_node = match &report.status {
                    RunStatus::Completed { final_node } => final_node.clone(),
                    RunStatus::Interrupted { .. } => None,
                };
                self.finalize(final_node);
                Ok(report)
            }
            Err(err) => {
                let _ = self.event_bus.get_emitter().emit(RunEvent::Error {
                    message: err.to_string(),
                });
                self.finalize(None);
                Err(err)
            }
        }
    }

    fn finalize(&self, final_node: Option<String>) {
        let _ = self
            .event_bus
            .get_emitter()
            .emit(RunEvent::Done { final_node });
        if self.event_stream_taken.swap(false, Ordering::SeqCst) {
            self.event_bus.close_channel();
        }
    }

    async fn drive(&self, request: RunRequest) -> Result<RunReport, RunnerError> {
        let emitter = self.event_bus.get_emitter();
        let mut cancel = request.cancel.clone();

        let mut loaded = self.load(&request).await?;
        let mut step_reports: Vec<StepReport> = Vec::new();
        let mut last_node: Option<String> = None;
        let mut steps_run = 0usize;
        let mut consumed_any = false;

        loop {
            if let Some(rx) = cancel.as_ref() {
                if *rx.borrow() {
                    return Err(RunnerError::Cancelled { step: loaded.step });
                }
            }

            // Writes accepted but not yet folded (initial payload, or writes
            // staged under the loaded checkpoint) commit before the step's
            // snapshot so the nodes about to run observe them.
            let mut consumed_pending = false;
            let mut pre_updates: Vec<String> = Vec::new();
            if !loaded.pending_writes.is_empty() {
                let pending = std::mem::take(&mut loaded.pending_writes);
                consumed_pending = true;
                consumed_any = true;
                pre_updates = loaded.state.commit(&mut loaded.registry, pending)?;
            }

            let snapshot = loaded.state.snapshot(&loaded.registry);
            let (ready, skipped) = match loaded.force_ready.take() {
                Some(forced) => {
                    let rest: Vec<NodeKind> = loaded
                        .frontier
                        .iter()
                        .filter(|n| !forced.contains(*n))
                        .cloned()
                        .collect();
                    (forced, rest)
                }
                None => self.scheduler.ready_set(
                    &loaded.scheduler_state,
                    &self.graph,
                    &loaded.frontier,
                    &snapshot,
                ),
            };

            if ready.is_empty() {
                break;
            }
            steps_run += 1;
            let step = loaded.step;
            tracing::debug!(step, ?ready, "entering step");

            let resume = loaded.resume.take();
            let fan_out = self.scheduler.fan_out(
                &self.graph,
                &ready,
                &snapshot,
                step,
                Arc::clone(&emitter),
                resume.as_ref(),
            );
            let outcomes = match cancel.as_mut() {
                Some(rx) => {
                    tokio::select! {
                        biased;
                        _ = cancelled(rx) => {
                            // In-flight tasks are aborted when the fan-out
                            // future drops; nothing from this step commits.
                            return Err(RunnerError::Cancelled { step });
                        }
                        res = fan_out => res?,
                    }
                }
                None => fan_out.await?,
            };

            // Reorder arrival-ordered outcomes into scheduling order.
            let mut by_kind: FxHashMap<NodeKind, NodeOutcome> = FxHashMap::default();
            for (kind, outcome) in outcomes {
                by_kind.insert(kind, outcome);
            }

            let mut completed_nodes: Vec<(NodeKind, NodePartial, u64)> = Vec::new();
            let mut interrupted: Option<(NodeKind, ChannelValue)> = None;
            for kind in &ready {
                match by_kind.remove(kind) {
                    Some(NodeOutcome::Completed {
                        partial,
                        duration_ms,
                    }) => completed_nodes.push((kind.clone(), partial, duration_ms)),
                    Some(NodeOutcome::Interrupted { payload }) => {
                        // First interrupt in scheduling order wins; any
                        // staged writes of the interrupting node are gone
                        // with its partial.
                        if interrupted.is_none() {
                            interrupted = Some((kind.clone(), payload));
                        }
                    }
                    None => {}
                }
            }

            // Stage each completed node's batch with per-task sequence
            // numbers.
            let mut writes: Vec<PendingWrite> = Vec::new();
            for (kind, partial, _) in &completed_nodes {
                let task_id = kind.task_id();
                let mut channels: Vec<&String> = partial.writes.keys().collect();
                channels.sort();
                for (seq, channel) in channels.into_iter().enumerate() {
                    writes.push(PendingWrite::new(
                        channel.clone(),
                        partial.writes[channel].clone(),
                        task_id.clone(),
                        seq as u64,
                    ));
                }
            }

            let mut updated = loaded.state.commit(&mut loaded.registry, writes)?;
            for channel in pre_updates {
                if !updated.contains(&channel) {
                    updated.push(channel);
                }
            }
            updated.sort();
            let post_snapshot = loaded.state.snapshot(&loaded.registry);
            for (kind, _, _) in &completed_nodes {
                self.scheduler.record_seen(
                    &mut loaded.scheduler_state,
                    &self.graph,
                    kind,
                    &post_snapshot,
                );
            }

            for (kind, _, duration_ms) in &completed_nodes {
                let _ = emitter.emit(RunEvent::NodeComplete {
                    node_id: kind.task_id(),
                    step,
                    duration_ms: *duration_ms,
                });
                last_node = Some(kind.task_id());
            }
            if !updated.is_empty() {
                let updates = updated
                    .iter()
                    .filter_map(|c| {
                        loaded
                            .state
                            .get(c)
                            .map(|v| (c.clone(), v.clone()))
                    })
                    .collect();
                let _ = emitter.emit(RunEvent::StateDelta { step, updates });
            }

            if let Some((kind, payload)) = interrupted {
                return self
                    .suspend(
                        &request,
                        loaded,
                        step,
                        kind,
                        payload,
                        skipped,
                        completed_nodes,
                        updated,
                        step_reports,
                        consumed_pending,
                    )
                    .await;
            }

            // Resolve successors against the just-committed state.
            let next_frontier =
                self.next_frontier(&completed_nodes, &skipped, &post_snapshot)?;
            let completed =
                next_frontier.is_empty() || next_frontier.iter().all(NodeKind::is_end);

            let checkpoint = self.build_checkpoint(
                &request,
                CheckpointSource::Loop,
                step,
                loaded.parent_id,
                &loaded,
                next_frontier.clone(),
                None,
            );
            loaded.parent_id = Some(checkpoint.id);
            loaded.last_checkpoint_id = Some(checkpoint.id);
            self.persist(&request, checkpoint, consumed_pending).await?;

            step_reports.push(StepReport {
                step,
                ran_nodes: ready,
                skipped_nodes: skipped,
                updated_channels: updated,
                next_frontier: next_frontier.clone(),
                completed,
            });

            loaded.frontier = next_frontier;
            loaded.step = step + 1;

            if completed {
                break;
            }
        }

        // Terminal checkpoint: persisted only when this invocation actually
        // advanced the run, so repeated resumes of a finished lineage stay
        // idempotent.
        if steps_run > 0 || consumed_any {
            let terminal = self.build_checkpoint(
                &request,
                CheckpointSource::Loop,
                loaded.step,
                loaded.parent_id,
                &loaded,
                Vec::new(),
                None,
            );
            loaded.last_checkpoint_id = Some(terminal.id);
            self.persist(&request, terminal, false).await?;
        }

        Ok(RunReport {
            lineage: request.lineage,
            namespace: request.namespace,
            checkpoint_id: loaded.last_checkpoint_id,
            status: RunStatus::Completed {
                final_node: last_node,
            },
            final_values: loaded.state.values().clone(),
            final_versions: loaded.registry.versions(),
            step_reports,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn suspend(
        &self,
        request: &RunRequest,
        mut loaded: LoadedRun,
        step: i64,
        kind: NodeKind,
        payload: ChannelValue,
        skipped: Vec<NodeKind>,
        completed_nodes: Vec<(NodeKind, NodePartial, u64)>,
        updated_channels: Vec<String>,
        mut step_reports: Vec<StepReport>,
        consumed_pending: bool,
    ) -> Result<RunReport, RunnerError> {
        let task_id = kind.task_id();
        let interrupt = InterruptState {
            node_id: kind.task_id(),
            task_id: task_id.clone(),
            value: payload.clone(),
        };

        // The suspended node re-runs first on resume; peer successors and
        // gated frontier nodes stay queued behind it.
        let post_snapshot = loaded.state.snapshot(&loaded.registry);
        let mut next_nodes = vec![kind.clone()];
        for node in self.next_frontier(&completed_nodes, &skipped, &post_snapshot)? {
            if !next_nodes.contains(&node) {
                next_nodes.push(node);
            }
        }

        let checkpoint = self.build_checkpoint(
            request,
            CheckpointSource::Interrupt,
            step,
            loaded.parent_id,
            &loaded,
            next_nodes.clone(),
            Some(interrupt),
        );
        loaded.last_checkpoint_id = Some(checkpoint.id);
        self.persist(request, checkpoint, consumed_pending).await?;

        let _ = self.event_bus.get_emitter().emit(RunEvent::Interrupted {
            node_id: kind.task_id(),
            payload: payload.clone(),
        });

        step_reports.push(StepReport {
            step,
            ran_nodes: completed_nodes.iter().map(|(k, _, _)| k.clone()).collect(),
            skipped_nodes: skipped,
            updated_channels,
            next_frontier: next_nodes,
            completed: false,
        });

        Ok(RunReport {
            lineage: request.lineage.clone(),
            namespace: request.namespace.clone(),
            checkpoint_id: loaded.last_checkpoint_id,
            status: RunStatus::Interrupted {
                node_id: kind.task_id(),
                task_id,
                payload,
            },
            final_values: loaded.state.values().clone(),
            final_versions: loaded.registry.versions(),
            step_reports,
        })
    }

    /// Compute the next frontier from ran nodes' routes plus gated leftovers.
    fn next_frontier(
        &self,
        completed_nodes: &[(NodeKind, NodePartial, u64)],
        skipped: &[NodeKind],
        snapshot: &crate::state::StateSnapshot,
    ) -> Result<Vec<NodeKind>, RunnerError> {
        let mut next: Vec<NodeKind> = Vec::new();
        let push = |kind: NodeKind, next: &mut Vec<NodeKind>| {
            if !kind.is_start() && !next.contains(&kind) {
                next.push(kind);
            }
        };

        // Gated frontier nodes stay queued for later steps.
        for node in skipped {
            if !node.is_end() {
                push(node.clone(), &mut next);
            }
        }

        for (kind, partial, _) in completed_nodes {
            match &partial.route {
                RouteOverride::Divert(targets) => {
                    for target in targets {
                        push(target.clone(), &mut next);
                    }
                    // Diverting skips static and conditional edges entirely.
                    continue;
                }
                RouteOverride::Extend(targets) => {
                    for target in targets {
                        push(target.clone(), &mut next);
                    }
                }
                RouteOverride::Follow => {}
            }

            if let Some(dests) = self.graph.edges().get(kind) {
                for dest in dests {
                    push(dest.clone(), &mut next);
                }
            }
            for ce in self
                .graph
                .conditional_edges()
                .iter()
                .filter(|ce| ce.from() == kind)
            {
                let target = ce
                    .resolve(snapshot)
                    .map_err(|label| RunnerError::UnknownBranch {
                        from: kind.clone(),
                        label,
                    })?;
                push(target, &mut next);
            }
        }
        Ok(next)
    }

    fn build_checkpoint(
        &self,
        request: &RunRequest,
        source: CheckpointSource,
        step: i64,
        parent_id: Option<Uuid>,
        loaded: &LoadedRun,
        next_nodes: Vec<NodeKind>,
        interrupt: Option<InterruptState>,
    ) -> Checkpoint {
        Checkpoint {
            id: Uuid::new_v4(),
            lineage: request.lineage.clone(),
            namespace: request.namespace.clone(),
            parent_id,
            step,
            created_at: chrono::Utc::now(),
            source,
            channel_values: loaded.state.values().clone(),
            channel_versions: loaded.registry.versions(),
            versions_seen: loaded.scheduler_state.versions_seen.clone(),
            next_nodes,
            interrupt,
        }
    }

    /// Persist a checkpoint; a failure here is fatal to the step.
    async fn persist(
        &self,
        request: &RunRequest,
        checkpoint: Checkpoint,
        clear_pending: bool,
    ) -> Result<(), RunnerError> {
        let config = CheckpointConfig::latest(&request.lineage, &request.namespace);
        let metadata = CheckpointMetadata::for_checkpoint(&checkpoint);
        let versions = checkpoint.channel_versions.clone();
        if clear_pending {
            self.manager
                .store()
                .put_full(&config, checkpoint, metadata, &versions, Vec::new())
                .await?;
        } else {
            self.manager
                .store()
                .put(&config, checkpoint, metadata, &versions)
                .await?;
        }
        Ok(())
    }

    async fn load(&self, request: &RunRequest) -> Result<LoadedRun, RunnerError> {
        let config = CheckpointConfig {
            lineage: request.lineage.clone(),
            namespace: request.namespace.clone(),
            checkpoint_id: request.checkpoint_id,
        };
        let tuple = self.manager.store().get_tuple(&config).await?;

        let Some(tuple) = tuple else {
            // Missing checkpoint: fall back to a fresh initial run under the
            // same lineage.
            return self.initialize(request).await;
        };

        let cp = tuple.checkpoint;
        let schema = self.graph.schema();
        let registry = ChannelRegistry::restore(Arc::clone(schema), &cp.channel_versions);
        let state = StateContainer::restore(schema, &cp.channel_values);
        let scheduler_state = SchedulerState {
            versions_seen: cp.versions_seen.clone(),
        };

        let (frontier, force_ready, resume) = match (&cp.interrupt, cp.source) {
            (Some(interrupt), _) => {
                let node = NodeKind::Custom(interrupt.node_id.clone());
                let resume = resolve_resume(request, &interrupt.task_id);
                (cp.next_nodes.clone(), Some(vec![node]), resume)
            }
            (None, CheckpointSource::Input | CheckpointSource::Fork) => {
                let entry = self.graph.entry().clone();
                (vec![entry.clone()], Some(vec![entry]), None)
            }
            (None, _) => (cp.next_nodes.clone(), None, None),
        };

        Ok(LoadedRun {
            state,
            registry,
            scheduler_state,
            frontier,
            force_ready,
            resume,
            pending_writes: tuple.pending_writes,
            step: cp.step + 1,
            parent_id: Some(cp.id),
            last_checkpoint_id: None,
        })
    }

    /// Fresh initialization: seed defaults, stage any initial payload as
    /// pending writes of the `Input` checkpoint, and persist it at step -1.
    async fn initialize(&self, request: &RunRequest) -> Result<LoadedRun, RunnerError> {
        let schema = self.graph.schema();
        let registry = ChannelRegistry::new(Arc::clone(schema));
        let state = StateContainer::seeded(schema);
        let entry = self.graph.entry().clone();

        let pending_writes: Vec<PendingWrite> = match &request.input {
            Some(input) => {
                let mut channels: Vec<&String> = input.keys().collect();
                channels.sort();
                channels
                    .into_iter()
                    .enumerate()
                    .map(|(seq, channel)| {
                        PendingWrite::new(
                            channel.clone(),
                            input[channel].clone(),
                            INPUT_TASK_ID,
                            seq as u64,
                        )
                    })
                    .collect()
            }
            None => Vec::new(),
        };

        let mut loaded = LoadedRun {
            state,
            registry,
            scheduler_state: SchedulerState::default(),
            frontier: vec![entry.clone()],
            force_ready: Some(vec![entry.clone()]),
            resume: None,
            pending_writes,
            step: 0,
            parent_id: None,
            last_checkpoint_id: None,
        };

        let checkpoint = self.build_checkpoint(
            request,
            CheckpointSource::Input,
            -1,
            None,
            &loaded,
            vec![entry],
            None,
        );
        loaded.parent_id = Some(checkpoint.id);
        loaded.last_checkpoint_id = Some(checkpoint.id);

        let config = CheckpointConfig::latest(&request.lineage, &request.namespace);
        let metadata = CheckpointMetadata::for_checkpoint(&checkpoint);
        let versions = checkpoint.channel_versions.clone();
        self.manager
            .store()
            .put_full(
                &config,
                checkpoint,
                metadata,
                &versions,
                loaded.pending_writes.clone(),
            )
            .await?;
        Ok(loaded)
    }
}

/// Resolve the resume value for the suspended task from the request.
fn resolve_resume(request: &RunRequest, task_id: &str) -> Option<(String, ChannelValue)> {
    match &request.resume {
        Some(ResumeCommand::Value(value)) => Some((task_id.to_string(), value.clone())),
        Some(ResumeCommand::Keyed(map)) => map
            .get(task_id)
            .map(|value| (task_id.to_string(), value.clone())),
        None => None,
    }
}

/// Future that resolves only when the cancellation signal flips to `true`.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender dropped without cancelling; never resolve.
            std::future::pending::<()>().await;
        }
    }
}

/// In-memory run state between the load phase and the step loop.
struct LoadedRun {
    state: StateContainer,
    registry: ChannelRegistry,
    scheduler_state: SchedulerState,
    frontier: Vec<NodeKind>,
    /// Bootstrap override: scheduled verbatim on the first loop iteration
    /// (entry node for fresh/fork runs, suspended node for interrupt
    /// resumes).
    force_ready: Option<Vec<NodeKind>>,
    resume: Option<(String, ChannelValue)>,
    /// Writes accepted but not yet folded (initial payload, or writes
    /// staged under the loaded checkpoint); consumed by the next commit.
    pending_writes: Vec<PendingWrite>,
    /// Next step number to execute.
    step: i64,
    /// Id of the checkpoint the next persisted checkpoint descends from.
    parent_id: Option<Uuid>,
    /// Last checkpoint persisted by this invocation.
    last_checkpoint_id: Option<Uuid>,
}
