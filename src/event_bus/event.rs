//! Event kinds emitted by a run.
//!
//! Ordering guarantees: for a single node, `NodeStart` precedes its
//! `NodeComplete`; events for nodes within one step may arrive in any
//! order; events from different steps are strictly ordered by step number.
//! `Done` is always the final event of a run, after which the stream closes.

use std::fmt;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::value::ChannelValue;

/// A single event on a run's ordered event stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// A node began executing.
    NodeStart { node_id: String, step: i64 },

    /// A node returned normally.
    NodeComplete {
        node_id: String,
        step: i64,
        duration_ms: u64,
    },

    /// Channels updated by a step's commit barrier.
    StateDelta {
        step: i64,
        updates: FxHashMap<String, ChannelValue>,
    },

    /// A node suspended via the interrupt primitive; the run is paused.
    Interrupted {
        node_id: String,
        payload: ChannelValue,
    },

    /// The run failed. Followed by `Done`.
    Error { message: String },

    /// Terminal marker. Always the last event; the stream closes after it.
    Done { final_node: Option<String> },

    /// Free-form diagnostic emitted by a node via its context.
    Diagnostic {
        node_id: Option<String>,
        step: Option<i64>,
        scope: String,
        message: String,
    },
}

impl RunEvent {
    /// Diagnostic event attributed to a node at a step.
    pub fn diagnostic_for(
        node_id: impl Into<String>,
        step: i64,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        RunEvent::Diagnostic {
            node_id: Some(node_id.into()),
            step: Some(step),
            scope: scope.into(),
            message: message.into(),
        }
    }

    /// Unattributed diagnostic event.
    pub fn diagnostic(scope: impl Into<String>, message: impl Into<String>) -> Self {
        RunEvent::Diagnostic {
            node_id: None,
            step: None,
            scope: scope.into(),
            message: message.into(),
        }
    }

    /// Returns `true` for the terminal [`Done`](Self::Done) marker.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, RunEvent::Done { .. })
    }

    /// The node this event is attributed to, if any.
    #[must_use]
    pub fn node_id(&self) -> Option<&str> {
        match self {
            RunEvent::NodeStart { node_id, .. }
            | RunEvent::NodeComplete { node_id, .. }
            | RunEvent::Interrupted { node_id, .. } => Some(node_id),
            RunEvent::Diagnostic { node_id, .. } => node_id.as_deref(),
            _ => None,
        }
    }

    /// Compact JSON form, one object per event.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for RunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunEvent::NodeStart { node_id, step } => {
                write!(f, "[{node_id}@{step}] start")
            }
            RunEvent::NodeComplete {
                node_id,
                step,
                duration_ms,
            } => write!(f, "[{node_id}@{step}] complete ({duration_ms}ms)"),
            RunEvent::StateDelta { step, updates } => {
                let mut channels: Vec<&str> = updates.keys().map(String::as_str).collect();
                channels.sort_unstable();
                write!(f, "[step {step}] updated {}", channels.join(", "))
            }
            RunEvent::Interrupted { node_id, payload } => {
                write!(f, "[{node_id}] interrupted: {payload}")
            }
            RunEvent::Error { message } => write!(f, "error: {message}"),
            RunEvent::Done { final_node } => match final_node {
                Some(node) => write!(f, "done (last node: {node})"),
                None => write!(f, "done"),
            },
            RunEvent::Diagnostic {
                node_id,
                step,
                scope,
                message,
            } => match (node_id, step) {
                (Some(id), Some(s)) => write!(f, "[{id}@{s}] {scope}: {message}"),
                (Some(id), None) => write!(f, "[{id}] {scope}: {message}"),
                _ => write!(f, "{scope}: {message}"),
            },
        }
    }
}
