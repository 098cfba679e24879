//! GraphBuilder: fluent construction of workflow graphs.

use rustc_hash::FxHashMap;
use std::sync::Arc;

use super::edges::{ConditionalEdge, EdgePredicate};
use crate::channels::{ChannelDef, ChannelError, ChannelSchema};
use crate::node::Node;
use crate::types::NodeKind;

/// Builder for constructing workflow graphs with a fluent API.
///
/// A graph needs:
/// - executable nodes registered via [`add_node`](Self::add_node)
/// - channels declared via [`add_channel`](Self::add_channel)
/// - an entry point ([`set_entry_point`](Self::set_entry_point)) and a
///   finish point ([`set_finish_point`](Self::set_finish_point))
/// - edges (static or conditional) connecting the nodes
///
/// `NodeKind::Start` and `NodeKind::End` are virtual endpoints: they are
/// never registered with `add_node` and never executed.
///
/// # Examples
///
/// ```
/// use flowgraph::channels::ChannelDef;
/// use flowgraph::graphs::GraphBuilder;
/// use flowgraph::types::NodeKind;
/// use flowgraph::value::ChannelValue;
///
/// # struct MyNode;
/// # #[async_trait::async_trait]
/// # impl flowgraph::node::Node for MyNode {
/// #     async fn run(&self, _: flowgraph::state::StateSnapshot, _: flowgraph::node::NodeContext) -> Result<flowgraph::node::NodePartial, flowgraph::node::NodeError> {
/// #         Ok(flowgraph::node::NodePartial::default())
/// #     }
/// # }
///
/// // Linear workflow: Start -> worker -> End
/// let graph = GraphBuilder::new()
///     .add_channel(ChannelDef::last_value("counter", ChannelValue::Int(0)))
///     .add_node(NodeKind::Custom("worker".into()), MyNode)
///     .set_entry_point(NodeKind::Custom("worker".into()))
///     .set_finish_point(NodeKind::Custom("worker".into()))
///     .compile()
///     .unwrap();
/// ```
pub struct GraphBuilder {
    /// Registry of all nodes in the graph, keyed by their identifier.
    pub(super) nodes: FxHashMap<NodeKind, Arc<dyn Node>>,
    /// Unconditional edges defining static graph topology.
    pub(super) edges: FxHashMap<NodeKind, Vec<NodeKind>>,
    /// Conditional edges for dynamic routing based on state.
    pub(super) conditional_edges: Vec<ConditionalEdge>,
    /// Declared channels (value schema for this graph).
    pub(super) schema: ChannelSchema,
    /// Channels each node declares it writes (used to derive trigger sets).
    pub(super) node_outputs: FxHashMap<NodeKind, Vec<String>>,
    /// Designated entry node.
    pub(super) entry: Option<NodeKind>,
    /// Designated finish node.
    pub(super) finish: Option<NodeKind>,
    /// Schema registration errors, deferred so the fluent API stays clean.
    pub(super) schema_errors: Vec<ChannelError>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    /// Creates a new, empty graph builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: FxHashMap::default(),
            edges: FxHashMap::default(),
            conditional_edges: Vec::new(),
            schema: ChannelSchema::new(),
            node_outputs: FxHashMap::default(),
            entry: None,
            finish: None,
            schema_errors: Vec::new(),
        }
    }

    /// Declare a channel in this graph's schema.
    ///
    /// Duplicate declarations are reported at [`compile`](Self::compile).
    #[must_use]
    pub fn add_channel(mut self, def: ChannelDef) -> Self {
        if let Err(err) = self.schema.register(def) {
            self.schema_errors.push(err);
        }
        self
    }

    /// Adds a node to the graph.
    ///
    /// `NodeKind::Start` and `NodeKind::End` are virtual structural
    /// endpoints; attempts to register them are ignored with a warning.
    #[must_use]
    pub fn add_node(mut self, id: NodeKind, node: impl Node + 'static) -> Self {
        match id {
            NodeKind::Start | NodeKind::End => {
                tracing::warn!(
                    ?id,
                    "ignoring registration of virtual node kind (Start/End are virtual)"
                );
            }
            _ => {
                self.nodes.insert(id, Arc::new(node));
            }
        }
        self
    }

    /// Adds a node together with the channels it declares it writes.
    ///
    /// Declared outputs feed static analysis: downstream nodes trigger on
    /// the union of their predecessors' declared outputs. A node without a
    /// declaration widens its successors' trigger sets to all channels.
    #[must_use]
    pub fn add_node_with_outputs<I, S>(
        mut self,
        id: NodeKind,
        node: impl Node + 'static,
        outputs: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let declared: Vec<String> = outputs.into_iter().map(Into::into).collect();
        self.node_outputs.insert(id.clone(), declared);
        self.add_node(id, node)
    }

    /// Adds an unconditional edge between two nodes.
    ///
    /// Multiple edges from the same node create fan-out; multiple edges to
    /// the same node create fan-in, with the barrier guaranteeing the fan-in
    /// node fires once per effective update.
    #[must_use]
    pub fn add_edge(mut self, from: NodeKind, to: NodeKind) -> Self {
        self.edges.entry(from).or_default().push(to);
        self
    }

    /// Adds a conditional edge from `from`.
    ///
    /// The predicate is evaluated at the commit barrier of the step in which
    /// `from` ran; its label selects exactly one successor from `branches`
    /// (targets may include `NodeKind::End`).
    #[must_use]
    pub fn add_conditional_edges(
        mut self,
        from: NodeKind,
        predicate: EdgePredicate,
        branches: FxHashMap<String, NodeKind>,
    ) -> Self {
        self.conditional_edges
            .push(ConditionalEdge::new(from, predicate, branches));
        self
    }

    /// Designates the entry node and records the `Start -> entry` edge.
    #[must_use]
    pub fn set_entry_point(mut self, entry: NodeKind) -> Self {
        self.edges
            .entry(NodeKind::Start)
            .or_default()
            .push(entry.clone());
        self.entry = Some(entry);
        self
    }

    /// Designates the finish node and records the `finish -> End` edge.
    #[must_use]
    pub fn set_finish_point(mut self, finish: NodeKind) -> Self {
        self.edges
            .entry(finish.clone())
            .or_default()
            .push(NodeKind::End);
        self.finish = Some(finish);
        self
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Iterate over registered node ids (virtual endpoints excluded).
    pub fn nodes(&self) -> impl Iterator<Item = &NodeKind> {
        self.nodes.keys()
    }

    /// Iterate over static edges as `(from, to)` pairs.
    pub fn edges(&self) -> impl Iterator<Item = (&NodeKind, &NodeKind)> {
        self.edges
            .iter()
            .flat_map(|(from, tos)| tos.iter().map(move |to| (from, to)))
    }

    /// Number of registered nodes (virtual endpoints excluded).
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of static edges, including those touching virtual endpoints.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    /// Deterministic topological ordering of the static graph.
    ///
    /// `Start` sorts first and `End` last; nodes at the same depth are
    /// ordered lexicographically. Nodes on static cycles are excluded (the
    /// compile step rejects such graphs).
    #[must_use]
    pub fn topological_sort(&self) -> Vec<NodeKind> {
        super::iteration::topological_sort(&self.edges)
    }
}
