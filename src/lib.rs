//! # Flowgraph: durable, resumable graph execution for agent workflows
//!
//! Flowgraph drives a user-defined directed graph of compute nodes to
//! completion with deterministic step-wise scheduling, versioned channel
//! state, durable checkpointing after every step, user-controlled
//! interruption with resume values, and branching of execution lineages
//! from any saved point.
//!
//! ## Core Concepts
//!
//! - **Channels**: named, versioned slots in the state; each declares a
//!   reducer that folds writes and a default value
//! - **Nodes**: async units of work that read a snapshot and return writes
//! - **Steps**: all eligible nodes run concurrently between two commit
//!   barriers; the barrier applies writes atomically and bumps versions
//! - **versions_seen**: per-node record of acted-on channel versions, the
//!   mechanism that fires a fan-in node exactly once per effective update
//! - **Checkpoints**: durable snapshots forming a DAG per lineage; forks
//!   branch the DAG, interrupts suspend and resume it
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use flowgraph::channels::ChannelDef;
//! use flowgraph::graphs::GraphBuilder;
//! use flowgraph::node::{Node, NodeContext, NodeError, NodePartial};
//! use flowgraph::runtimes::{GraphRunner, InMemoryCheckpointStore, RunRequest};
//! use flowgraph::state::StateSnapshot;
//! use flowgraph::types::NodeKind;
//! use flowgraph::value::ChannelValue;
//!
//! struct Increment;
//!
//! #[async_trait]
//! impl Node for Increment {
//!     async fn run(&self, snap: StateSnapshot, _: NodeContext) -> Result<NodePartial, NodeError> {
//!         let n = snap.get("counter").and_then(ChannelValue::as_int).unwrap_or(0);
//!         Ok(NodePartial::new().with_write("counter", ChannelValue::Int(n + 1)))
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let graph = GraphBuilder::new()
//!     .add_channel(ChannelDef::last_value("counter", ChannelValue::Int(0)))
//!     .add_node(NodeKind::Custom("increment".into()), Increment)
//!     .set_entry_point(NodeKind::Custom("increment".into()))
//!     .set_finish_point(NodeKind::Custom("increment".into()))
//!     .compile()?;
//!
//! let runner = GraphRunner::new(graph, Arc::new(InMemoryCheckpointStore::new()));
//! let report = runner.run(RunRequest::new("w1")).await?;
//! assert_eq!(report.final_values["counter"], ChannelValue::Int(1));
//! # Ok(())
//! # }
//! ```
//!
//! ## Interrupt / Resume
//!
//! Inside a node, `ctx.interrupt(payload)` either returns the resume value
//! delivered for this task or suspends the run behind an `Interrupt`
//! checkpoint. Resume by running the same lineage again with
//! [`RunRequest::with_resume`](crate::runtimes::RunRequest::with_resume);
//! the executor keys the value by the task id stored in the checkpoint.
//!
//! ## Module Guide
//!
//! - [`value`] - tagged channel values with width-preserving serialization
//! - [`channels`] - channel declarations and the per-run version registry
//! - [`reducers`] - merge strategies applied at the commit barrier
//! - [`state`] - the state container, snapshots, and the commit fold
//! - [`node`] - the `Node` trait, context, and the interrupt primitive
//! - [`graphs`] - graph building and compile-time validation
//! - [`schedulers`] - ready-set computation and concurrent fan-out
//! - [`runtimes`] - runner, checkpoint stores, lineage manager
//! - [`event_bus`] - ordered run event streaming
//! - [`telemetry`] - tracing bootstrap for embedding applications

pub mod channels;
pub mod event_bus;
pub mod graphs;
pub mod node;
pub mod reducers;
pub mod runtimes;
pub mod schedulers;
pub mod state;
pub mod telemetry;
pub mod types;
pub mod utils;
pub mod value;
