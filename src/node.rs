//! Node execution primitives: the [`Node`] trait, execution context,
//! partial state updates, and node-level errors.
//!
//! A node is a pure unit of computation: it receives a read-only
//! [`StateSnapshot`](crate::state::StateSnapshot) plus a [`NodeContext`] and
//! returns a [`NodePartial`] describing the channel writes it wants to make.
//! Nodes never mutate shared state directly; the executor stages their
//! writes and applies them at the commit barrier.

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::event_bus::{EventEmitter, RunEvent};
use crate::state::StateSnapshot;
use crate::types::NodeKind;
use crate::value::ChannelValue;

/// Core trait for executable workflow nodes.
///
/// # Design Principles
///
/// - **Stateless**: a node's output should depend only on the snapshot and
///   its own configuration
/// - **Idempotent**: the engine provides at-least-once execution across
///   resumes; external side effects are the node's responsibility
/// - **Observable**: use the context to emit diagnostics
///
/// # Interrupts
///
/// A node suspends by calling [`NodeContext::interrupt`] and propagating the
/// returned error with `?`. The scheduler catches the dedicated
/// [`NodeError::Interrupted`] variant and converts it into an interrupt
/// checkpoint; it never surfaces as a run failure.
///
/// # Examples
///
/// ```rust,no_run
/// use flowgraph::node::{Node, NodeContext, NodeError, NodePartial};
/// use flowgraph::state::StateSnapshot;
/// use flowgraph::value::ChannelValue;
/// use async_trait::async_trait;
///
/// struct Increment;
///
/// #[async_trait]
/// impl Node for Increment {
///     async fn run(
///         &self,
///         snapshot: StateSnapshot,
///         _ctx: NodeContext,
///     ) -> Result<NodePartial, NodeError> {
///         let count = snapshot
///             .get("counter")
///             .and_then(ChannelValue::as_int)
///             .ok_or(NodeError::MissingInput { what: "counter" })?;
///         Ok(NodePartial::new().with_write("counter", ChannelValue::Int(count + 1)))
///     }
/// }
/// ```
#[async_trait]
pub trait Node: Send + Sync {
    /// Execute this node against a committed state snapshot.
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodePartial, NodeError>;
}

/// Execution context handed to a node for one invocation.
///
/// Carries the node's identity, the current step, the event emitter, and,
/// when this invocation resumes a previously interrupted run, the resume
/// value keyed by this node's task id.
#[derive(Clone, Debug)]
pub struct NodeContext {
    /// Task id of this invocation; by convention the node's own id.
    pub node_id: String,
    /// Current step number of the surrounding run.
    pub step: i64,
    /// Channel for emitting events to the run's event stream.
    pub event_emitter: Arc<dyn EventEmitter>,
    resume: Option<ChannelValue>,
}

impl NodeContext {
    pub(crate) fn new(
        node_id: String,
        step: i64,
        event_emitter: Arc<dyn EventEmitter>,
        resume: Option<ChannelValue>,
    ) -> Self {
        Self {
            node_id,
            step,
            event_emitter,
            resume,
        }
    }

    /// Suspend the run, publishing `payload` to the outside world.
    ///
    /// If the run was invoked with a resume command keyed by this node's
    /// task id, the corresponding value is returned immediately and the node
    /// continues. Otherwise the dedicated interrupt signal is raised; node
    /// bodies propagate it with `?` and the scheduler converts it into an
    /// interrupt checkpoint.
    ///
    /// Exactly one resume value is consumed per resume call; a second
    /// `interrupt` after a resume has been consumed suspends again under a
    /// fresh task id.
    pub fn interrupt(&self, payload: ChannelValue) -> Result<ChannelValue, NodeError> {
        match &self.resume {
            Some(value) => Ok(value.clone()),
            None => Err(NodeError::Interrupted { payload }),
        }
    }

    /// The resume value delivered to this invocation, if any.
    #[must_use]
    pub fn resume_value(&self) -> Option<&ChannelValue> {
        self.resume.as_ref()
    }

    /// Emit a node-scoped diagnostic enriched with this context's metadata.
    pub fn emit(
        &self,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), NodeContextError> {
        self.event_emitter
            .emit(RunEvent::diagnostic_for(
                self.node_id.clone(),
                self.step,
                scope,
                message,
            ))
            .map_err(|_| NodeContextError::EventBusUnavailable)
    }
}

/// How a node's successors are chosen at the barrier.
///
/// Most nodes leave this at [`Follow`](RouteOverride::Follow) and let the
/// compiled edges route. A node can widen its fan-out with
/// [`Extend`](RouteOverride::Extend) or take over routing entirely with
/// [`Divert`](RouteOverride::Divert); diverting to an empty target list is
/// how a node cuts its successors off for the step while its writes still
/// commit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RouteOverride {
    /// Route along the compiled static and conditional edges.
    #[default]
    Follow,
    /// Schedule these targets in addition to the compiled edges.
    Extend(Vec<NodeKind>),
    /// Ignore the compiled edges this step and schedule only these targets.
    Divert(Vec<NodeKind>),
}

/// Partial state update returned by a node.
///
/// A mapping of channel name → write, plus the node's routing choice.
/// The executor stages each write as a [`PendingWrite`](crate::state::PendingWrite)
/// and applies the batch at the commit barrier.
///
/// # Examples
///
/// ```rust
/// use flowgraph::node::NodePartial;
/// use flowgraph::value::ChannelValue;
///
/// let partial = NodePartial::new()
///     .with_write("counter", ChannelValue::Int(1))
///     .with_write("results", ChannelValue::text("done"));
/// assert_eq!(partial.writes.len(), 2);
/// ```
#[derive(Clone, Debug, Default)]
pub struct NodePartial {
    /// Channel writes staged for the barrier. One write per channel per node.
    pub writes: FxHashMap<String, ChannelValue>,
    /// Routing choice applied when computing the next frontier.
    pub route: RouteOverride,
}

impl NodePartial {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a write to `channel`.
    #[must_use]
    pub fn with_write(mut self, channel: impl Into<String>, value: ChannelValue) -> Self {
        self.writes.insert(channel.into(), value);
        self
    }

    /// Stage a batch of writes.
    #[must_use]
    pub fn with_writes(mut self, writes: FxHashMap<String, ChannelValue>) -> Self {
        self.writes.extend(writes);
        self
    }

    /// Schedule extra targets on top of the compiled edges.
    #[must_use]
    pub fn with_extra_routes<I>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = NodeKind>,
    {
        self.route = RouteOverride::Extend(targets.into_iter().collect());
        self
    }

    /// Take over routing for this step, ignoring the compiled edges.
    #[must_use]
    pub fn with_divert<I>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = NodeKind>,
    {
        self.route = RouteOverride::Divert(targets.into_iter().collect());
        self
    }

    /// Commit this node's writes but schedule none of its successors.
    #[must_use]
    pub fn halt_successors(mut self) -> Self {
        self.route = RouteOverride::Divert(Vec::new());
        self
    }
}

/// Errors that can occur when using NodeContext methods.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeContextError {
    /// Event could not be sent due to event bus disconnection.
    #[error("failed to emit event: event bus unavailable")]
    #[diagnostic(
        code(flowgraph::node::event_bus_unavailable),
        help("The event bus may be closed. Check that the run is still active.")
    )]
    EventBusUnavailable,
}

/// Errors raised during node execution.
///
/// [`NodeError::Interrupted`] is not a failure: it is the dedicated signal
/// the scheduler converts into an interrupt checkpoint. Every other variant
/// aborts the run under the default fail-fast policy.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// The interrupt signal raised by [`NodeContext::interrupt`].
    #[error("node suspended awaiting resume")]
    #[diagnostic(code(flowgraph::node::interrupted))]
    Interrupted { payload: ChannelValue },

    /// Expected input data is missing from the state snapshot.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(flowgraph::node::missing_input),
        help("Check that an upstream node wrote the required channel: {what}.")
    )]
    MissingInput { what: &'static str },

    /// External provider or service error.
    #[error("provider error ({provider}): {message}")]
    #[diagnostic(code(flowgraph::node::provider))]
    Provider {
        provider: &'static str,
        message: String,
    },

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    #[diagnostic(code(flowgraph::node::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Input validation failed.
    #[error("validation failed: {0}")]
    #[diagnostic(
        code(flowgraph::node::validation),
        help("Check input data format and required fields.")
    )]
    ValidationFailed(String),

    /// Event bus communication error.
    #[error("event bus error: {0}")]
    #[diagnostic(code(flowgraph::node::event_bus))]
    EventBus(#[from] NodeContextError),
}

impl NodeError {
    /// Returns `true` when this is the interrupt signal rather than a
    /// genuine failure.
    #[must_use]
    pub fn is_interrupt(&self) -> bool {
        matches!(self, NodeError::Interrupted { .. })
    }
}
