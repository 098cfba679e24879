mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::watch;

use common::*;
use flowgraph::channels::ChannelDef;
use flowgraph::event_bus::RunEvent;
use flowgraph::graphs::{EdgePredicate, GraphBuilder};
use flowgraph::runtimes::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointStore, CheckpointTuple,
    GraphRunner, ListFilter, RunRequest, RunnerError, StoreError,
};
use flowgraph::state::PendingWrite;
use flowgraph::value::ChannelValue;

fn failing_graph() -> flowgraph::graphs::Graph {
    GraphBuilder::new()
        .add_channel(ChannelDef::last_value("counter", ChannelValue::Int(0)))
        .add_channel(ChannelDef::last_value("steps", ChannelValue::Int(0)))
        .add_node(node("N1"), IncrementNode)
        .add_node(node("FAIL"), FailingNode)
        .add_edge(node("N1"), node("FAIL"))
        .set_entry_point(node("N1"))
        .set_finish_point(node("FAIL"))
        .compile()
        .unwrap()
}

#[tokio::test]
async fn node_failure_stops_the_run_with_error_and_done() {
    let runner = in_memory_runner(failing_graph());
    let stream = runner.event_stream();
    let err = runner.run(RunRequest::new("f1")).await.unwrap_err();
    assert!(matches!(err, RunnerError::Scheduler(_)));

    let events = stream.collect().await;
    let error_pos = events
        .iter()
        .position(|e| matches!(e, RunEvent::Error { .. }))
        .expect("error event emitted");
    assert!(events.last().unwrap().is_done());
    assert!(error_pos < events.len() - 1);
}

#[tokio::test]
async fn node_failure_preserves_last_committed_checkpoint() {
    let runner = in_memory_runner(failing_graph());
    let _ = runner.run(RunRequest::new("f1")).await;

    // The step 0 commit (N1) survived; nothing from the failed step did.
    let latest = runner.manager().latest("f1", "main").await.unwrap().unwrap();
    assert_eq!(latest.checkpoint.step, 0);
    assert_eq!(
        latest.checkpoint.channel_values["counter"],
        ChannelValue::Int(1)
    );
}

#[tokio::test]
async fn unknown_branch_label_is_a_run_error() {
    let predicate: EdgePredicate = Arc::new(|_| "off-the-map".to_string());
    let mut branches = FxHashMap::default();
    branches.insert("known".to_string(), node("N1"));
    let graph = GraphBuilder::new()
        .add_channel(ChannelDef::last_value("counter", ChannelValue::Int(0)))
        .add_channel(ChannelDef::last_value("steps", ChannelValue::Int(0)))
        .add_node(node("N1"), IncrementNode)
        .add_conditional_edges(node("N1"), predicate, branches)
        .set_entry_point(node("N1"))
        .set_finish_point(node("N1"))
        .compile()
        .unwrap();

    let runner = in_memory_runner(graph);
    let err = runner.run(RunRequest::new("b1")).await.unwrap_err();
    assert!(matches!(err, RunnerError::UnknownBranch { label, .. } if label == "off-the-map"));
}

#[tokio::test]
async fn cancellation_aborts_in_flight_step() {
    let graph = GraphBuilder::new()
        .add_channel(ChannelDef::last_value("counter", ChannelValue::Int(0)))
        .add_node(node("slow"), SlowNode { delay_ms: 5_000 })
        .set_entry_point(node("slow"))
        .set_finish_point(node("slow"))
        .compile()
        .unwrap();
    let runner = in_memory_runner(graph);

    let (tx, rx) = watch::channel(false);
    let handle = {
        let request = RunRequest::new("c1").with_cancellation(rx);
        let runner = Arc::new(runner);
        let runner_for_task = Arc::clone(&runner);
        tokio::spawn(async move { runner_for_task.run(request).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(true).unwrap();

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(RunnerError::Cancelled { .. })));
}

/// Store that accepts the initial checkpoint, then fails every write.
struct FlakyStore {
    inner: flowgraph::runtimes::InMemoryCheckpointStore,
    fail_after: std::sync::atomic::AtomicUsize,
}

impl FlakyStore {
    fn failing_after(puts: usize) -> Self {
        Self {
            inner: flowgraph::runtimes::InMemoryCheckpointStore::new(),
            fail_after: std::sync::atomic::AtomicUsize::new(puts),
        }
    }

    fn tick(&self, config: &CheckpointConfig) -> Result<(), StoreError> {
        let remaining = self
            .fail_after
            .fetch_update(
                std::sync::atomic::Ordering::SeqCst,
                std::sync::atomic::Ordering::SeqCst,
                |n| Some(n.saturating_sub(1)),
            )
            .unwrap_or(0);
        if remaining == 0 {
            return Err(StoreError::Backend {
                op: "put",
                lineage: config.lineage.clone(),
                namespace: config.namespace.clone(),
                message: "disk full".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FlakyStore {
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        new_versions: &FxHashMap<String, u64>,
    ) -> Result<CheckpointConfig, StoreError> {
        self.tick(config)?;
        self.inner.put(config, checkpoint, metadata, new_versions).await
    }

    async fn put_full(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        new_versions: &FxHashMap<String, u64>,
        pending_writes: Vec<PendingWrite>,
    ) -> Result<CheckpointConfig, StoreError> {
        self.tick(config)?;
        self.inner
            .put_full(config, checkpoint, metadata, new_versions, pending_writes)
            .await
    }

    async fn put_writes(
        &self,
        config: &CheckpointConfig,
        writes: Vec<PendingWrite>,
        task_id: &str,
    ) -> Result<(), StoreError> {
        self.inner.put_writes(config, writes, task_id).await
    }

    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>, StoreError> {
        self.inner.get(config).await
    }

    async fn get_tuple(
        &self,
        config: &CheckpointConfig,
    ) -> Result<Option<CheckpointTuple>, StoreError> {
        self.inner.get_tuple(config).await
    }

    async fn list(
        &self,
        config: &CheckpointConfig,
        filter: &ListFilter,
    ) -> Result<Vec<CheckpointTuple>, StoreError> {
        self.inner.list(config, filter).await
    }

    async fn list_lineage(&self, lineage: &str) -> Result<Vec<CheckpointTuple>, StoreError> {
        self.inner.list_lineage(lineage).await
    }

    async fn delete_lineage(&self, lineage: &str) -> Result<(), StoreError> {
        self.inner.delete_lineage(lineage).await
    }
}

#[tokio::test]
async fn store_failure_is_fatal_to_the_step() {
    // First put (the Input checkpoint) succeeds, the step 0 put fails.
    let store = Arc::new(FlakyStore::failing_after(1));
    let runner = GraphRunner::new(linear_graph(), store);
    let err = runner.run(RunRequest::new("s1")).await.unwrap_err();
    assert!(matches!(err, RunnerError::Store(StoreError::Backend { .. })));
}
