//! Graph compilation: validation and conversion into an executable [`Graph`].

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

use super::builder::GraphBuilder;
use super::edges::ConditionalEdge;
use super::iteration::find_static_cycle;
use crate::channels::{ChannelError, ChannelSchema};
use crate::node::Node;
use crate::types::NodeKind;

/// Errors raised while compiling a graph.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphCompileError {
    #[error("no entry point set")]
    #[diagnostic(
        code(flowgraph::graphs::missing_entry),
        help("Call GraphBuilder::set_entry_point with a registered node.")
    )]
    MissingEntry,

    #[error("no finish point set")]
    #[diagnostic(
        code(flowgraph::graphs::missing_finish),
        help("Call GraphBuilder::set_finish_point with a registered node.")
    )]
    MissingFinish,

    #[error("edge references unregistered node: {node}")]
    #[diagnostic(
        code(flowgraph::graphs::dangling_edge),
        help("Register `{node}` with add_node before wiring edges to it.")
    )]
    DanglingEdge { node: NodeKind },

    #[error("conditional branch `{label}` routes to unregistered node: {node}")]
    #[diagnostic(
        code(flowgraph::graphs::dangling_branch),
        help("Conditional branch targets must be registered nodes or End.")
    )]
    DanglingBranch { label: String, node: NodeKind },

    #[error("finish node {finish} is not reachable from entry node {entry}")]
    #[diagnostic(
        code(flowgraph::graphs::unreachable_finish),
        help("Add edges connecting the entry to the finish node.")
    )]
    UnreachableFinish { entry: NodeKind, finish: NodeKind },

    #[error("static cycle involving node {node}")]
    #[diagnostic(
        code(flowgraph::graphs::static_cycle),
        help("Cycles must include a conditional edge so the runtime can terminate via branch selection.")
    )]
    StaticCycle { node: NodeKind },

    #[error("node {node} declares undeclared output channel: {channel}")]
    #[diagnostic(
        code(flowgraph::graphs::undeclared_output),
        help("Declare `{channel}` with add_channel or fix the node's output declaration.")
    )]
    UndeclaredOutput { node: NodeKind, channel: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Channel(#[from] ChannelError),
}

/// An immutable, validated, executable workflow graph.
///
/// Produced by [`GraphBuilder::compile`]; holds the node registry, topology,
/// channel schema, and the derived metadata the scheduler needs (static
/// predecessors and per-node trigger sets).
#[derive(Clone)]
pub struct Graph {
    nodes: FxHashMap<NodeKind, Arc<dyn Node>>,
    edges: FxHashMap<NodeKind, Vec<NodeKind>>,
    conditional_edges: Vec<ConditionalEdge>,
    schema: Arc<ChannelSchema>,
    entry: NodeKind,
    finish: NodeKind,
    predecessors: FxHashMap<NodeKind, Vec<NodeKind>>,
    trigger_sets: FxHashMap<NodeKind, Vec<String>>,
}

impl Graph {
    /// Registered node implementations, keyed by id.
    #[must_use]
    pub fn nodes(&self) -> &FxHashMap<NodeKind, Arc<dyn Node>> {
        &self.nodes
    }

    /// Static edges (from → targets).
    #[must_use]
    pub fn edges(&self) -> &FxHashMap<NodeKind, Vec<NodeKind>> {
        &self.edges
    }

    /// Conditional edges in registration order.
    #[must_use]
    pub fn conditional_edges(&self) -> &[ConditionalEdge] {
        &self.conditional_edges
    }

    /// The channel schema fixed at compile time.
    #[must_use]
    pub fn schema(&self) -> &Arc<ChannelSchema> {
        &self.schema
    }

    /// The designated entry node.
    #[must_use]
    pub fn entry(&self) -> &NodeKind {
        &self.entry
    }

    /// The designated finish node.
    #[must_use]
    pub fn finish(&self) -> &NodeKind {
        &self.finish
    }

    /// Static predecessors of `node` (virtual `Start` excluded).
    #[must_use]
    pub fn static_predecessors(&self, node: &NodeKind) -> &[NodeKind] {
        self.predecessors
            .get(node)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The channels whose version changes make `node` eligible to fire,
    /// sorted by name.
    #[must_use]
    pub fn trigger_set(&self, node: &NodeKind) -> &[String] {
        self.trigger_sets
            .get(node)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("entry", &self.entry)
            .field("finish", &self.finish)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl GraphBuilder {
    /// Validate the builder and produce an executable [`Graph`].
    ///
    /// Validations performed:
    /// - entry and finish points are set and registered
    /// - no edge or conditional branch references an unregistered node
    /// - the finish node is reachable from the entry
    /// - no cycle exists over static edges alone (cycles must include a
    ///   conditional edge so branch selection can terminate them)
    /// - declared node outputs refer to declared channels
    pub fn compile(self) -> Result<Graph, GraphCompileError> {
        let GraphBuilder {
            nodes,
            edges,
            conditional_edges,
            schema,
            node_outputs,
            entry,
            finish,
            mut schema_errors,
        } = self;

        if let Some(err) = schema_errors.pop() {
            return Err(GraphCompileError::Channel(err));
        }

        let entry = entry.ok_or(GraphCompileError::MissingEntry)?;
        let finish = finish.ok_or(GraphCompileError::MissingFinish)?;

        let is_known = |kind: &NodeKind| match kind {
            NodeKind::Start | NodeKind::End => true,
            custom => nodes.contains_key(custom),
        };

        if !nodes.contains_key(&entry) {
            return Err(GraphCompileError::DanglingEdge { node: entry });
        }
        if !nodes.contains_key(&finish) {
            return Err(GraphCompileError::DanglingEdge { node: finish });
        }

        for (from, tos) in &edges {
            if !is_known(from) {
                return Err(GraphCompileError::DanglingEdge { node: from.clone() });
            }
            for to in tos {
                if !is_known(to) {
                    return Err(GraphCompileError::DanglingEdge { node: to.clone() });
                }
            }
        }

        for ce in &conditional_edges {
            if !is_known(ce.from()) {
                return Err(GraphCompileError::DanglingEdge {
                    node: ce.from().clone(),
                });
            }
            for (label, target) in ce.branches() {
                if !is_known(target) {
                    return Err(GraphCompileError::DanglingBranch {
                        label: label.clone(),
                        node: target.clone(),
                    });
                }
            }
        }

        for (node, outputs) in &node_outputs {
            for channel in outputs {
                if !schema.contains(channel) {
                    return Err(GraphCompileError::UndeclaredOutput {
                        node: node.clone(),
                        channel: channel.clone(),
                    });
                }
            }
        }

        if let Some(node) = find_static_cycle(&edges) {
            return Err(GraphCompileError::StaticCycle { node });
        }

        if !reachable(&edges, &conditional_edges, &entry, &finish) {
            return Err(GraphCompileError::UnreachableFinish { entry, finish });
        }

        let predecessors = static_predecessors(&edges);
        let trigger_sets = trigger_sets(&schema, &edges, &conditional_edges, &node_outputs, &nodes);

        Ok(Graph {
            nodes,
            edges,
            conditional_edges,
            schema: Arc::new(schema),
            entry,
            finish,
            predecessors,
            trigger_sets,
        })
    }
}

fn reachable(
    edges: &FxHashMap<NodeKind, Vec<NodeKind>>,
    conditional_edges: &[ConditionalEdge],
    entry: &NodeKind,
    finish: &NodeKind,
) -> bool {
    let mut seen: FxHashSet<NodeKind> = FxHashSet::default();
    let mut queue = vec![entry.clone()];
    while let Some(current) = queue.pop() {
        if current == *finish {
            return true;
        }
        if !seen.insert(current.clone()) {
            continue;
        }
        if let Some(tos) = edges.get(&current) {
            queue.extend(tos.iter().cloned());
        }
        for ce in conditional_edges.iter().filter(|ce| ce.from() == &current) {
            queue.extend(ce.branches().values().cloned());
        }
    }
    false
}

fn static_predecessors(
    edges: &FxHashMap<NodeKind, Vec<NodeKind>>,
) -> FxHashMap<NodeKind, Vec<NodeKind>> {
    let mut preds: FxHashMap<NodeKind, Vec<NodeKind>> = FxHashMap::default();
    for (from, tos) in edges {
        if from.is_start() {
            continue;
        }
        for to in tos {
            let entry = preds.entry(to.clone()).or_default();
            if !entry.contains(from) {
                entry.push(from.clone());
            }
        }
    }
    // Deterministic ordering for stable reporting.
    for list in preds.values_mut() {
        list.sort();
    }
    preds
}

/// Derive each node's trigger set: the union of the declared outputs of its
/// predecessors (static and conditional). When a predecessor declares no
/// outputs, or the node has no predecessors at all, the trigger set widens
/// to every declared channel.
fn trigger_sets(
    schema: &ChannelSchema,
    edges: &FxHashMap<NodeKind, Vec<NodeKind>>,
    conditional_edges: &[ConditionalEdge],
    node_outputs: &FxHashMap<NodeKind, Vec<String>>,
    nodes: &FxHashMap<NodeKind, Arc<dyn Node>>,
) -> FxHashMap<NodeKind, Vec<String>> {
    let mut preds_any: FxHashMap<NodeKind, Vec<NodeKind>> = FxHashMap::default();
    for (from, tos) in edges {
        if from.is_start() {
            continue;
        }
        for to in tos {
            preds_any.entry(to.clone()).or_default().push(from.clone());
        }
    }
    for ce in conditional_edges {
        for target in ce.branches().values() {
            preds_any
                .entry(target.clone())
                .or_default()
                .push(ce.from().clone());
        }
    }

    let all_channels: Vec<String> = schema.names().map(str::to_string).collect();
    let mut sets = FxHashMap::default();
    for node in nodes.keys() {
        let preds = preds_any.get(node);
        let triggers = match preds {
            None => all_channels.clone(),
            Some(preds) => {
                let mut union: BTreeSet<String> = BTreeSet::new();
                let mut widened = false;
                for pred in preds {
                    match node_outputs.get(pred) {
                        Some(outputs) => union.extend(outputs.iter().cloned()),
                        None => {
                            widened = true;
                            break;
                        }
                    }
                }
                if widened {
                    all_channels.clone()
                } else {
                    union.into_iter().collect()
                }
            }
        };
        sets.insert(node.clone(), triggers);
    }
    sets
}
