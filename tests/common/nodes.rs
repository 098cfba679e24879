#![allow(dead_code)]

use async_trait::async_trait;
use std::time::Duration;

use flowgraph::node::{Node, NodeContext, NodeError, NodePartial};
use flowgraph::state::StateSnapshot;
use flowgraph::value::ChannelValue;

/// Increments the `counter` and `steps` channels by one.
#[derive(Debug, Clone)]
pub struct IncrementNode;

#[async_trait]
impl Node for IncrementNode {
    async fn run(
        &self,
        snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        let counter = snapshot
            .get("counter")
            .and_then(ChannelValue::as_int)
            .unwrap_or(0);
        let steps = snapshot
            .get("steps")
            .and_then(ChannelValue::as_int)
            .unwrap_or(0);
        Ok(NodePartial::new()
            .with_write("counter", ChannelValue::Int(counter + 1))
            .with_write("steps", ChannelValue::Int(steps + 1)))
    }
}

/// Copies the `input` channel into `prepared`.
#[derive(Debug, Clone)]
pub struct SplitterNode;

#[async_trait]
impl Node for SplitterNode {
    async fn run(
        &self,
        snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        let input = snapshot
            .get("input")
            .and_then(ChannelValue::as_str)
            .ok_or(NodeError::MissingInput { what: "input" })?
            .to_string();
        Ok(NodePartial::new().with_write("prepared", ChannelValue::Text(input)))
    }
}

/// Appends `Result{index}[{name}-{prepared}]` to the `results` channel,
/// optionally after a delay so tests can vary which analyzer finishes first.
#[derive(Debug, Clone)]
pub struct AnalyzerNode {
    pub index: usize,
    pub name: &'static str,
    pub delay_ms: u64,
}

impl AnalyzerNode {
    pub fn new(index: usize, name: &'static str) -> Self {
        Self {
            index,
            name,
            delay_ms: 0,
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

#[async_trait]
impl Node for AnalyzerNode {
    async fn run(
        &self,
        snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        let prepared = snapshot
            .get("prepared")
            .and_then(ChannelValue::as_str)
            .ok_or(NodeError::MissingInput { what: "prepared" })?;
        let result = format!("Result{}[{}-{}]", self.index, self.name, prepared);
        Ok(NodePartial::new().with_write("results", ChannelValue::Text(result)))
    }
}

/// Joins the `results` list into a `summary` string.
#[derive(Debug, Clone)]
pub struct AggregatorNode;

#[async_trait]
impl Node for AggregatorNode {
    async fn run(
        &self,
        snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        let results = snapshot
            .get("results")
            .and_then(ChannelValue::as_list)
            .ok_or(NodeError::MissingInput { what: "results" })?;
        let joined: Vec<&str> = results.iter().filter_map(ChannelValue::as_str).collect();
        Ok(NodePartial::new().with_write("summary", ChannelValue::Text(joined.join("|"))))
    }
}

/// Suspends the run with an approval prompt; once resumed, records the
/// resume value on `channel`.
#[derive(Debug, Clone)]
pub struct ApprovalNode {
    pub channel: &'static str,
    pub message: &'static str,
}

impl ApprovalNode {
    pub fn new(channel: &'static str, message: &'static str) -> Self {
        Self { channel, message }
    }
}

#[async_trait]
impl Node for ApprovalNode {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        let payload = ChannelValue::map([("message", self.message)]);
        let decision = ctx.interrupt(payload)?;
        Ok(NodePartial::new().with_write(self.channel, decision))
    }
}

/// Appends a fixed entry to the `log` channel.
#[derive(Debug, Clone)]
pub struct LogNode {
    pub entry: &'static str,
}

impl LogNode {
    pub fn new(entry: &'static str) -> Self {
        Self { entry }
    }
}

#[async_trait]
impl Node for LogNode {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        Ok(NodePartial::new().with_write("log", ChannelValue::text(self.entry)))
    }
}

/// Logs an entry, then cuts its successors off for the step.
#[derive(Debug, Clone)]
pub struct HaltingNode;

#[async_trait]
impl Node for HaltingNode {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        Ok(NodePartial::new()
            .with_write("log", ChannelValue::text("halted"))
            .halt_successors())
    }
}

/// Logs an entry and schedules an extra target on top of its edges.
#[derive(Debug, Clone)]
pub struct DetourNode {
    pub target: &'static str,
}

#[async_trait]
impl Node for DetourNode {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        Ok(NodePartial::new()
            .with_write("log", ChannelValue::text("detoured"))
            .with_extra_routes([flowgraph::types::NodeKind::Custom(self.target.to_string())]))
    }
}

/// Writes nothing.
#[derive(Debug, Clone)]
pub struct NoopNode;

#[async_trait]
impl Node for NoopNode {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        Ok(NodePartial::default())
    }
}

/// Always fails with a `MissingInput` error.
#[derive(Debug, Clone, Default)]
pub struct FailingNode;

#[async_trait]
impl Node for FailingNode {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        Err(NodeError::MissingInput { what: "test_key" })
    }
}

/// Sleeps long enough for cancellation tests to interrupt it.
#[derive(Debug, Clone)]
pub struct SlowNode {
    pub delay_ms: u64,
}

#[async_trait]
impl Node for SlowNode {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        Ok(NodePartial::new().with_write("counter", ChannelValue::Int(99)))
    }
}
