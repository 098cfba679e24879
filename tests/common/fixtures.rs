#![allow(dead_code)]

use std::sync::Arc;

use rustc_hash::FxHashMap;

use flowgraph::channels::ChannelDef;
use flowgraph::graphs::{EdgePredicate, Graph, GraphBuilder};
use flowgraph::runtimes::{GraphRunner, InMemoryCheckpointStore};
use flowgraph::types::NodeKind;
use flowgraph::value::ChannelValue;

use super::nodes::*;

pub fn node(name: &str) -> NodeKind {
    NodeKind::Custom(name.to_string())
}

/// Entry → N1 → N2 → N3 → Finish, each node incrementing `counter` and
/// `steps` by one.
pub fn linear_graph() -> Graph {
    GraphBuilder::new()
        .add_channel(ChannelDef::last_value("counter", ChannelValue::Int(0)))
        .add_channel(ChannelDef::last_value("steps", ChannelValue::Int(0)))
        .add_node(node("N1"), IncrementNode)
        .add_node(node("N2"), IncrementNode)
        .add_node(node("N3"), IncrementNode)
        .add_edge(node("N1"), node("N2"))
        .add_edge(node("N2"), node("N3"))
        .set_entry_point(node("N1"))
        .set_finish_point(node("N3"))
        .compile()
        .expect("linear graph compiles")
}

/// splitter → {analyzer1, analyzer2} → aggregator → final, with `results`
/// using the append-slice reducer. Delays let tests flip completion order.
pub fn diamond_graph(delay_a1_ms: u64, delay_a2_ms: u64) -> Graph {
    GraphBuilder::new()
        .add_channel(ChannelDef::last_value("input", ChannelValue::Null))
        .add_channel(ChannelDef::last_value("prepared", ChannelValue::Null))
        .add_channel(ChannelDef::append_slice("results"))
        .add_channel(ChannelDef::last_value("summary", ChannelValue::Null))
        .add_channel(ChannelDef::append_slice("log"))
        .add_node(node("splitter"), SplitterNode)
        .add_node(
            node("analyzer1"),
            AnalyzerNode::new(1, "A1").with_delay(delay_a1_ms),
        )
        .add_node(
            node("analyzer2"),
            AnalyzerNode::new(2, "A2").with_delay(delay_a2_ms),
        )
        .add_node(node("aggregator"), AggregatorNode)
        .add_node(node("final"), LogNode::new("done"))
        .add_edge(node("splitter"), node("analyzer1"))
        .add_edge(node("splitter"), node("analyzer2"))
        .add_edge(node("analyzer1"), node("aggregator"))
        .add_edge(node("analyzer2"), node("aggregator"))
        .add_edge(node("aggregator"), node("final"))
        .set_entry_point(node("splitter"))
        .set_finish_point(node("final"))
        .compile()
        .expect("diamond graph compiles")
}

/// increment → requestApproval (interrupts) → processApproval → finalize.
pub fn approval_graph() -> Graph {
    GraphBuilder::new()
        .add_channel(ChannelDef::last_value("counter", ChannelValue::Int(0)))
        .add_channel(ChannelDef::last_value("steps", ChannelValue::Int(0)))
        .add_channel(ChannelDef::last_value("approval", ChannelValue::Null))
        .add_channel(ChannelDef::append_slice("log"))
        .add_node(node("increment"), IncrementNode)
        .add_node(
            node("requestApproval"),
            ApprovalNode::new("approval", "Please approve"),
        )
        .add_node(node("processApproval"), LogNode::new("processed"))
        .add_node(node("finalize"), LogNode::new("finalized"))
        .add_edge(node("increment"), node("requestApproval"))
        .add_edge(node("requestApproval"), node("processApproval"))
        .add_edge(node("processApproval"), node("finalize"))
        .set_entry_point(node("increment"))
        .set_finish_point(node("finalize"))
        .compile()
        .expect("approval graph compiles")
}

/// Like [`approval_graph`] but a conditional edge after `processApproval`
/// routes to a second interrupt when the first approval was "yes", and
/// straight to `finalize` (recording the rejection) otherwise.
pub fn two_approval_graph() -> Graph {
    let route_on_approval: EdgePredicate = Arc::new(|snapshot| {
        match snapshot.get("approval").and_then(ChannelValue::as_str) {
            Some("yes") => "approved".to_string(),
            _ => "rejected".to_string(),
        }
    });
    let mut branches = FxHashMap::default();
    branches.insert("approved".to_string(), node("secondApproval"));
    branches.insert("rejected".to_string(), node("finalize"));

    GraphBuilder::new()
        .add_channel(ChannelDef::last_value("counter", ChannelValue::Int(0)))
        .add_channel(ChannelDef::last_value("steps", ChannelValue::Int(0)))
        .add_channel(ChannelDef::last_value("approval", ChannelValue::Null))
        .add_channel(ChannelDef::last_value("second_approval", ChannelValue::Null))
        .add_channel(ChannelDef::append_slice("log"))
        .add_node(node("increment"), IncrementNode)
        .add_node(
            node("requestApproval"),
            ApprovalNode::new("approval", "Please approve"),
        )
        .add_node(node("processApproval"), LogNode::new("processed"))
        .add_node(
            node("secondApproval"),
            ApprovalNode::new("second_approval", "Second approval required"),
        )
        .add_node(node("finalize"), LogNode::new("finalized"))
        .add_edge(node("increment"), node("requestApproval"))
        .add_edge(node("requestApproval"), node("processApproval"))
        .add_conditional_edges(node("processApproval"), route_on_approval, branches)
        .add_edge(node("secondApproval"), node("finalize"))
        .set_entry_point(node("increment"))
        .set_finish_point(node("finalize"))
        .compile()
        .expect("two-approval graph compiles")
}

/// Runner over a fresh in-memory store.
pub fn in_memory_runner(graph: Graph) -> GraphRunner {
    GraphRunner::new(graph, Arc::new(InMemoryCheckpointStore::new()))
}

/// Single-entry input map.
pub fn input(channel: &str, value: impl Into<ChannelValue>) -> FxHashMap<String, ChannelValue> {
    flowgraph::utils::collections::value_map([(channel, value.into())])
}
