//! Core identifier types for the flowgraph engine.
//!
//! This module defines the fundamental types used to identify nodes in a
//! workflow graph and to classify persisted checkpoints. Runtime execution
//! types (configs, reports) live in [`crate::runtimes`].
//!
//! # Key Types
//!
//! - [`NodeKind`]: Identifies nodes in a workflow graph, including the
//!   virtual `Start` and `End` endpoints
//! - [`CheckpointSource`]: Classifies why a checkpoint was written
//!
//! # Examples
//!
//! ```rust
//! use flowgraph::types::NodeKind;
//!
//! let custom = NodeKind::Custom("aggregator".to_string());
//! assert_eq!(custom.task_id(), "aggregator");
//!
//! // Persisted through serde; the derived form is self-describing.
//! let json = serde_json::to_string(&custom).unwrap();
//! let back: NodeKind = serde_json::from_str(&json).unwrap();
//! assert_eq!(back, custom);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a node within a workflow graph.
///
/// `NodeKind` serves as the unique identifier for nodes in the execution
/// graph. The virtual `Start` and `End` variants mark graph entry and exit;
/// they are never executed and must not be registered as nodes.
///
/// # Persistence and ordering
///
/// Checkpoint payloads store node kinds through the serde derive, whose
/// output distinguishes the virtual endpoints from user names without a
/// hand-rolled string codec. The `Ord` impl (virtual `Start` first, `End`
/// next, user nodes by name) is what the compiler and scheduler lean on for
/// deterministic iteration; it is not a persisted property.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Virtual entry point. Has no incoming edges; the edge leaving `Start`
    /// designates the entry node of the graph.
    Start,

    /// Virtual sink. Accepting a transition to `End` means the path is
    /// terminally finished.
    End,

    /// Application node identified by a user-defined string. The string
    /// doubles as the task id for interrupt/resume keying.
    Custom(String),
}

impl NodeKind {
    /// Returns `true` if this is the virtual [`Start`](Self::Start) endpoint.
    #[must_use]
    pub fn is_start(&self) -> bool {
        matches!(self, Self::Start)
    }

    /// Returns `true` if this is the virtual [`End`](Self::End) endpoint.
    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }

    /// The task id used when keying interrupt resume values for this node.
    ///
    /// By convention the task id is the node's own identifier string; the
    /// virtual endpoints fall back to their display names, though they never
    /// execute and so never own a task.
    #[must_use]
    pub fn task_id(&self) -> String {
        match self {
            NodeKind::Custom(name) => name.clone(),
            NodeKind::Start => "Start".to_string(),
            NodeKind::End => "End".to_string(),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::End => write!(f, "End"),
            Self::Custom(name) => write!(f, "{}", name),
        }
    }
}

// Lets graph-building code write plain string literals; the endpoint names
// are reserved and map back to the virtual variants.
impl From<&str> for NodeKind {
    fn from(s: &str) -> Self {
        match s {
            "Start" => NodeKind::Start,
            "End" => NodeKind::End,
            other => NodeKind::Custom(other.to_string()),
        }
    }
}

/// Classifies why a checkpoint was written.
///
/// Every persisted checkpoint records the event that produced it:
///
/// - `Input`: the initial checkpoint of a fresh run (step -1)
/// - `Loop`: the commit barrier at the end of a step
/// - `Interrupt`: a node suspended via the interrupt primitive
/// - `Fork`: an explicit branch copied from a parent checkpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSource {
    Input,
    Loop,
    Interrupt,
    Fork,
}

impl CheckpointSource {
    /// Persisted string form, stable across releases.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointSource::Input => "input",
            CheckpointSource::Loop => "loop",
            CheckpointSource::Interrupt => "interrupt",
            CheckpointSource::Fork => "fork",
        }
    }

    /// Parse the persisted string form.
    ///
    /// Returns `None` for unrecognised strings so callers can surface a
    /// deserialization error with context.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "input" => Some(CheckpointSource::Input),
            "loop" => Some(CheckpointSource::Loop),
            "interrupt" => Some(CheckpointSource::Interrupt),
            "fork" => Some(CheckpointSource::Fork),
            _ => None,
        }
    }
}

impl fmt::Display for CheckpointSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_kind_serde_roundtrip() {
        for kind in [
            NodeKind::Start,
            NodeKind::End,
            NodeKind::Custom("splitter".into()),
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            let back: NodeKind = serde_json::from_str(&json).unwrap();
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn virtual_endpoints_sort_before_user_nodes() {
        let mut kinds = vec![
            NodeKind::Custom("b".into()),
            NodeKind::End,
            NodeKind::Custom("a".into()),
            NodeKind::Start,
        ];
        kinds.sort();
        assert_eq!(
            kinds,
            vec![
                NodeKind::Start,
                NodeKind::End,
                NodeKind::Custom("a".into()),
                NodeKind::Custom("b".into()),
            ]
        );
    }

    #[test]
    fn task_id_matches_custom_name() {
        assert_eq!(NodeKind::Custom("approve".into()).task_id(), "approve");
        assert_eq!(NodeKind::Start.task_id(), "Start");
    }

    #[test]
    fn string_literals_map_reserved_endpoint_names() {
        assert_eq!(NodeKind::from("Start"), NodeKind::Start);
        assert_eq!(NodeKind::from("End"), NodeKind::End);
        assert_eq!(NodeKind::from("worker"), NodeKind::Custom("worker".into()));
    }

    #[test]
    fn checkpoint_source_string_roundtrip() {
        for source in [
            CheckpointSource::Input,
            CheckpointSource::Loop,
            CheckpointSource::Interrupt,
            CheckpointSource::Fork,
        ] {
            assert_eq!(CheckpointSource::parse(source.as_str()), Some(source));
        }
        assert_eq!(CheckpointSource::parse("bogus"), None);
    }
}
