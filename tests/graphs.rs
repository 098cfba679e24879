mod common;

use std::sync::Arc;

use rustc_hash::FxHashMap;

use common::*;
use flowgraph::channels::ChannelDef;
use flowgraph::graphs::{EdgePredicate, GraphBuilder, GraphCompileError};
use flowgraph::types::NodeKind;
use flowgraph::value::ChannelValue;

fn any_predicate() -> EdgePredicate {
    Arc::new(|_| "go".to_string())
}

#[test]
fn compile_rejects_missing_entry() {
    let err = GraphBuilder::new()
        .add_node(node("a"), NoopNode)
        .set_finish_point(node("a"))
        .compile()
        .unwrap_err();
    assert!(matches!(err, GraphCompileError::MissingEntry));
}

#[test]
fn compile_rejects_missing_finish() {
    let err = GraphBuilder::new()
        .add_node(node("a"), NoopNode)
        .set_entry_point(node("a"))
        .compile()
        .unwrap_err();
    assert!(matches!(err, GraphCompileError::MissingFinish));
}

#[test]
fn compile_rejects_dangling_edge() {
    let err = GraphBuilder::new()
        .add_node(node("a"), NoopNode)
        .add_edge(node("a"), node("ghost"))
        .set_entry_point(node("a"))
        .set_finish_point(node("a"))
        .compile()
        .unwrap_err();
    assert!(matches!(
        err,
        GraphCompileError::DanglingEdge { node: NodeKind::Custom(name) } if name == "ghost"
    ));
}

#[test]
fn compile_rejects_dangling_conditional_branch() {
    let mut branches = FxHashMap::default();
    branches.insert("go".to_string(), node("ghost"));
    let err = GraphBuilder::new()
        .add_node(node("a"), NoopNode)
        .add_conditional_edges(node("a"), any_predicate(), branches)
        .set_entry_point(node("a"))
        .set_finish_point(node("a"))
        .compile()
        .unwrap_err();
    assert!(matches!(err, GraphCompileError::DanglingBranch { .. }));
}

#[test]
fn compile_rejects_unreachable_finish() {
    let err = GraphBuilder::new()
        .add_node(node("a"), NoopNode)
        .add_node(node("b"), NoopNode)
        .set_entry_point(node("a"))
        .set_finish_point(node("b"))
        .compile()
        .unwrap_err();
    assert!(matches!(err, GraphCompileError::UnreachableFinish { .. }));
}

#[test]
fn compile_rejects_static_cycle() {
    let err = GraphBuilder::new()
        .add_node(node("a"), NoopNode)
        .add_node(node("b"), NoopNode)
        .add_edge(node("a"), node("b"))
        .add_edge(node("b"), node("a"))
        .set_entry_point(node("a"))
        .set_finish_point(node("b"))
        .compile()
        .unwrap_err();
    assert!(matches!(err, GraphCompileError::StaticCycle { .. }));
}

#[test]
fn compile_allows_cycle_through_conditional_edge() {
    // a -> b statically; b loops back to a (or exits) via a conditional
    // edge, so the runtime can terminate by branch selection.
    let mut branches = FxHashMap::default();
    branches.insert("again".to_string(), node("a"));
    branches.insert("stop".to_string(), NodeKind::End);
    let graph = GraphBuilder::new()
        .add_node(node("a"), NoopNode)
        .add_node(node("b"), NoopNode)
        .add_edge(node("a"), node("b"))
        .add_conditional_edges(node("b"), any_predicate(), branches)
        .set_entry_point(node("a"))
        .set_finish_point(node("b"))
        .compile();
    assert!(graph.is_ok());
}

#[test]
fn compile_rejects_duplicate_channel() {
    let err = GraphBuilder::new()
        .add_channel(ChannelDef::append_slice("log"))
        .add_channel(ChannelDef::append_slice("log"))
        .add_node(node("a"), NoopNode)
        .set_entry_point(node("a"))
        .set_finish_point(node("a"))
        .compile()
        .unwrap_err();
    assert!(matches!(err, GraphCompileError::Channel(_)));
}

#[test]
fn compile_rejects_undeclared_output() {
    let err = GraphBuilder::new()
        .add_channel(ChannelDef::last_value("counter", ChannelValue::Int(0)))
        .add_node_with_outputs(node("a"), NoopNode, ["ghost_channel"])
        .set_entry_point(node("a"))
        .set_finish_point(node("a"))
        .compile()
        .unwrap_err();
    assert!(matches!(err, GraphCompileError::UndeclaredOutput { .. }));
}

#[test]
fn trigger_sets_follow_declared_outputs() {
    let graph = GraphBuilder::new()
        .add_channel(ChannelDef::last_value("a_out", ChannelValue::Null))
        .add_channel(ChannelDef::last_value("b_out", ChannelValue::Null))
        .add_node_with_outputs(node("a"), NoopNode, ["a_out"])
        .add_node_with_outputs(node("b"), NoopNode, ["b_out"])
        .add_edge(node("a"), node("b"))
        .set_entry_point(node("a"))
        .set_finish_point(node("b"))
        .compile()
        .unwrap();

    // b triggers only on a's declared output.
    assert_eq!(graph.trigger_set(&node("b")).to_vec(), vec!["a_out".to_string()]);
    // a has no predecessors, so it triggers on everything.
    assert_eq!(
        graph.trigger_set(&node("a")).to_vec(),
        vec!["a_out".to_string(), "b_out".to_string()]
    );
}

#[test]
fn trigger_sets_widen_when_outputs_undeclared() {
    let graph = GraphBuilder::new()
        .add_channel(ChannelDef::last_value("x", ChannelValue::Null))
        .add_channel(ChannelDef::last_value("y", ChannelValue::Null))
        .add_node(node("a"), NoopNode)
        .add_node(node("b"), NoopNode)
        .add_edge(node("a"), node("b"))
        .set_entry_point(node("a"))
        .set_finish_point(node("b"))
        .compile()
        .unwrap();
    assert_eq!(
        graph.trigger_set(&node("b")).to_vec(),
        vec!["x".to_string(), "y".to_string()]
    );
}

#[test]
fn static_predecessors_are_derived() {
    let graph = diamond_graph(0, 0);
    let mut preds: Vec<String> = graph
        .static_predecessors(&node("aggregator"))
        .iter()
        .map(|k| k.to_string())
        .collect();
    preds.sort();
    assert_eq!(preds, vec!["analyzer1".to_string(), "analyzer2".to_string()]);
    assert!(graph.static_predecessors(&node("splitter")).is_empty());
}

#[test]
fn toposort_is_deterministic() {
    let builder = GraphBuilder::new()
        .add_node(node("a"), NoopNode)
        .add_node(node("b"), NoopNode)
        .add_node(node("c"), NoopNode)
        .add_edge(node("a"), node("b"))
        .add_edge(node("a"), node("c"))
        .set_entry_point(node("a"))
        .set_finish_point(node("b"));
    let first = builder.topological_sort();
    assert_eq!(first.first(), Some(&NodeKind::Start));
    assert_eq!(first.last(), Some(&NodeKind::End));
    let a = first.iter().position(|n| n == &node("a")).unwrap();
    let b = first.iter().position(|n| n == &node("b")).unwrap();
    let c = first.iter().position(|n| n == &node("c")).unwrap();
    assert!(a < b && a < c);
}
