//! Edge types and routing predicates for conditional graph flow.

use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

use crate::state::StateSnapshot;
use crate::types::NodeKind;

/// Predicate for conditional routing.
///
/// Evaluated at the commit barrier against the just-committed
/// [`StateSnapshot`]; returns a branch label which the edge's branch map
/// translates into the chosen target node (or `End`).
///
/// # Examples
///
/// ```
/// use flowgraph::graphs::EdgePredicate;
/// use flowgraph::value::ChannelValue;
/// use std::sync::Arc;
///
/// let route_by_approval: EdgePredicate = Arc::new(|snapshot| {
///     match snapshot.get("approved").and_then(ChannelValue::as_bool) {
///         Some(true) => "approved".to_string(),
///         _ => "rejected".to_string(),
///     }
/// });
/// ```
pub type EdgePredicate = Arc<dyn Fn(&StateSnapshot) -> String + Send + Sync + 'static>;

/// A conditional edge: a source node, a predicate over state, and a branch
/// map from predicate labels to targets.
///
/// Exactly one successor is selected per evaluation; routing a branch to
/// [`NodeKind::End`] terminates that path.
#[derive(Clone)]
pub struct ConditionalEdge {
    from: NodeKind,
    predicate: EdgePredicate,
    branches: FxHashMap<String, NodeKind>,
}

impl ConditionalEdge {
    /// Build a conditional edge from `from` with the given branch map.
    pub fn new(
        from: NodeKind,
        predicate: EdgePredicate,
        branches: FxHashMap<String, NodeKind>,
    ) -> Self {
        Self {
            from,
            predicate,
            branches,
        }
    }

    /// The source node of this edge.
    #[must_use]
    pub fn from(&self) -> &NodeKind {
        &self.from
    }

    /// The branch map (label → target).
    #[must_use]
    pub fn branches(&self) -> &FxHashMap<String, NodeKind> {
        &self.branches
    }

    /// Evaluate the predicate against `snapshot` and select the target.
    ///
    /// # Errors
    ///
    /// Returns the unmatched label when the predicate produces a label the
    /// branch map does not contain.
    pub fn resolve(&self, snapshot: &StateSnapshot) -> Result<NodeKind, String> {
        let label = (self.predicate)(snapshot);
        self.branches.get(&label).cloned().ok_or(label)
    }
}

impl fmt::Debug for ConditionalEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalEdge")
            .field("from", &self.from)
            .field("branches", &self.branches)
            .finish_non_exhaustive()
    }
}
