//! Runtime infrastructure: checkpointing, lineage management, and the
//! graph runner.
//!
//! # Architecture
//!
//! - [`GraphRunner`] - drives the step loop for a compiled graph
//! - [`CheckpointStore`] - pluggable persistence seam
//! - [`CheckpointManager`] - lineage-level operations (latest, list, tree,
//!   fork, delete)
//! - Persistence models - serde-friendly shapes for durable backends
//!
//! # Persistence Backends
//!
//! - [`InMemoryCheckpointStore`] - volatile storage for tests and ephemeral
//!   runs
//! - `SqliteCheckpointStore` - durable SQLite-backed persistence (feature
//!   `sqlite`)
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flowgraph::runtimes::{GraphRunner, InMemoryCheckpointStore, RunRequest};
//! # use flowgraph::graphs::Graph;
//! # async fn example(graph: Graph) -> Result<(), Box<dyn std::error::Error>> {
//! let runner = GraphRunner::new(graph, Arc::new(InMemoryCheckpointStore::new()));
//! let report = runner.run(RunRequest::new("w1")).await?;
//! assert!(report.status.is_completed());
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
#[cfg(feature = "sqlite")]
pub mod checkpoint_sqlite;
pub mod manager;
pub mod persistence;
pub mod runner;
pub mod runtime_config;

pub use checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointStore, CheckpointTuple,
    InMemoryCheckpointStore, InterruptState, ListFilter, StoreError,
};
#[cfg(feature = "sqlite")]
pub use checkpoint_sqlite::SqliteCheckpointStore;
pub use manager::{CheckpointManager, CheckpointNode};
pub use persistence::{PersistedCheckpoint, PersistedInterrupt, PersistedMetadata, PersistenceError};
pub use runner::{
    GraphRunner, ResumeCommand, RunReport, RunRequest, RunStatus, RunnerError, StepReport,
};
pub use runtime_config::{EventBusConfig, RuntimeConfig, SinkConfig, StoreType};
