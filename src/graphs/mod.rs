//! Graph definition and compilation for workflow execution.
//!
//! The main entry point is [`GraphBuilder`], which uses a builder pattern to
//! declare channels, nodes, and edges, then compiles into an executable
//! [`Graph`] after validation.
//!
//! # Core Concepts
//!
//! - **Nodes**: executable units implementing [`Node`](crate::node::Node)
//! - **Channels**: named, versioned state slots declared via
//!   [`ChannelDef`](crate::channels::ChannelDef)
//! - **Edges**: static connections; conditional edges route dynamically via
//!   a predicate over state
//! - **Virtual endpoints**: `NodeKind::Start` and `NodeKind::End` for
//!   structural definition; never executed
//!
//! # Quick Start
//!
//! ```
//! use flowgraph::channels::ChannelDef;
//! use flowgraph::graphs::GraphBuilder;
//! use flowgraph::node::{Node, NodeContext, NodeError, NodePartial};
//! use flowgraph::state::StateSnapshot;
//! use flowgraph::types::NodeKind;
//! use flowgraph::value::ChannelValue;
//! use async_trait::async_trait;
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl Node for Greeter {
//!     async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodePartial, NodeError> {
//!         Ok(NodePartial::new().with_write("greeting", ChannelValue::text("hello")))
//!     }
//! }
//!
//! let graph = GraphBuilder::new()
//!     .add_channel(ChannelDef::last_value("greeting", ChannelValue::Null))
//!     .add_node(NodeKind::Custom("greeter".into()), Greeter)
//!     .set_entry_point(NodeKind::Custom("greeter".into()))
//!     .set_finish_point(NodeKind::Custom("greeter".into()))
//!     .compile()
//!     .unwrap();
//! assert_eq!(graph.entry(), &NodeKind::Custom("greeter".into()));
//! ```

mod builder;
mod compilation;
mod edges;
mod iteration;

pub use builder::GraphBuilder;
pub use compilation::{Graph, GraphCompileError};
pub use edges::{ConditionalEdge, EdgePredicate};
pub use iteration::topological_sort;
