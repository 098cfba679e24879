//! Checkpoint records and the pluggable checkpoint store.
//!
//! A [`Checkpoint`] is an immutable snapshot of run state at a step
//! boundary: channel values, channel versions, per-node `versions_seen`,
//! pending writes not yet consumed, interrupt state, and a next-nodes hint.
//! Checkpoints form a DAG per lineage: each records its parent's id, and
//! forks start sibling branches.
//!
//! The [`CheckpointStore`] trait is the persistence seam. Two reference
//! backends ship with the crate: [`InMemoryCheckpointStore`] here and the
//! SQLite-backed store in
//! [`checkpoint_sqlite`](crate::runtimes::checkpoint_sqlite) (feature
//! `sqlite`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::state::PendingWrite;
use crate::types::{CheckpointSource, NodeKind};
use crate::value::ChannelValue;

/// Addressing key for checkpoints: `(lineage, namespace, id?)`.
///
/// When `checkpoint_id` is `None`, operations address the latest checkpoint
/// in `(lineage, namespace)`, ordered by step then timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckpointConfig {
    pub lineage: String,
    pub namespace: String,
    pub checkpoint_id: Option<Uuid>,
}

impl CheckpointConfig {
    /// Address the latest checkpoint in `(lineage, namespace)`.
    pub fn latest(lineage: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            lineage: lineage.into(),
            namespace: namespace.into(),
            checkpoint_id: None,
        }
    }

    /// Address a specific checkpoint id.
    #[must_use]
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.checkpoint_id = Some(id);
        self
    }
}

/// State of a suspended node captured by an interrupt checkpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct InterruptState {
    /// Id of the suspended node.
    pub node_id: String,
    /// Resume key; by convention equal to the node id.
    pub task_id: String,
    /// Opaque payload published to the outside world.
    pub value: ChannelValue,
}

/// Immutable snapshot of run state at a step boundary.
///
/// Invariants:
/// - `source == Interrupt` implies `interrupt.is_some()`
/// - a child's step equals or is one greater than its parent's
/// - a fork copies its parent's values and versions verbatim under a new id
#[derive(Clone, Debug, PartialEq)]
pub struct Checkpoint {
    pub id: Uuid,
    pub lineage: String,
    pub namespace: String,
    pub parent_id: Option<Uuid>,
    /// -1 for the initial checkpoint, then 0, 1, …
    pub step: i64,
    pub created_at: DateTime<Utc>,
    pub source: CheckpointSource,
    pub channel_values: FxHashMap<String, ChannelValue>,
    pub channel_versions: FxHashMap<String, u64>,
    /// node id → channel → last version the node acted on.
    pub versions_seen: FxHashMap<String, FxHashMap<String, u64>>,
    /// Nodes scheduled but not yet completed when this checkpoint was saved.
    pub next_nodes: Vec<NodeKind>,
    pub interrupt: Option<InterruptState>,
}

impl Checkpoint {
    /// Derive a fork child: same lineage/namespace/step, values and versions
    /// copied verbatim, fresh id, `source = Fork`, parent set to `parent`.
    #[must_use]
    pub fn fork_from(parent: &Checkpoint) -> Checkpoint {
        Checkpoint {
            id: Uuid::new_v4(),
            lineage: parent.lineage.clone(),
            namespace: parent.namespace.clone(),
            parent_id: Some(parent.id),
            step: parent.step,
            created_at: Utc::now(),
            source: CheckpointSource::Fork,
            channel_values: parent.channel_values.clone(),
            channel_versions: parent.channel_versions.clone(),
            versions_seen: parent.versions_seen.clone(),
            next_nodes: parent.next_nodes.clone(),
            interrupt: None,
        }
    }

    /// The config addressing this checkpoint.
    #[must_use]
    pub fn config(&self) -> CheckpointConfig {
        CheckpointConfig {
            lineage: self.lineage.clone(),
            namespace: self.namespace.clone(),
            checkpoint_id: Some(self.id),
        }
    }
}

/// Caller-visible metadata stored alongside a checkpoint.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CheckpointMetadata {
    pub source: Option<CheckpointSource>,
    pub step: i64,
    /// Free-form metadata usable in list filters.
    pub extra: FxHashMap<String, serde_json::Value>,
}

impl CheckpointMetadata {
    /// Metadata mirroring a checkpoint's source and step.
    #[must_use]
    pub fn for_checkpoint(checkpoint: &Checkpoint) -> Self {
        Self {
            source: Some(checkpoint.source),
            step: checkpoint.step,
            extra: FxHashMap::default(),
        }
    }
}

/// Full record returned by [`CheckpointStore::get_tuple`] and
/// [`CheckpointStore::list`].
#[derive(Clone, Debug)]
pub struct CheckpointTuple {
    pub config: CheckpointConfig,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
    pub pending_writes: Vec<PendingWrite>,
    pub parent_config: Option<CheckpointConfig>,
}

/// Filters for [`CheckpointStore::list`].
#[derive(Clone, Debug, Default)]
pub struct ListFilter {
    /// Maximum number of tuples to return.
    pub limit: Option<usize>,
    /// Only return checkpoints created strictly before this id.
    pub before: Option<Uuid>,
    /// Metadata equality filters over [`CheckpointMetadata::extra`].
    pub metadata: FxHashMap<String, serde_json::Value>,
}

/// Errors from checkpoint store operations.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum StoreError {
    /// The addressed checkpoint or lineage does not exist.
    #[error("checkpoint not found: lineage={lineage} namespace={namespace} id={id:?}")]
    #[diagnostic(
        code(flowgraph::store::not_found),
        help("Check the lineage, namespace, and checkpoint id.")
    )]
    NotFound {
        lineage: String,
        namespace: String,
        id: Option<Uuid>,
    },

    /// Backend storage error (database, filesystem, etc.), wrapped with the
    /// operation and addressing context.
    #[error("store {op} failed for lineage={lineage} namespace={namespace}: {message}")]
    #[diagnostic(code(flowgraph::store::backend))]
    Backend {
        op: &'static str,
        lineage: String,
        namespace: String,
        message: String,
    },

    /// Serialization failure while encoding or decoding a checkpoint body.
    #[error("checkpoint serialization failed: {message}")]
    #[diagnostic(code(flowgraph::store::serde))]
    Serde { message: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Pluggable persistence for checkpoints.
///
/// Required properties:
/// - `put`/`put_full` are atomic with respect to a single checkpoint id
/// - readers may run concurrently; writers are serialized per
///   `(lineage, namespace)`
/// - all values round-trip through a deterministic serialization
/// - an implementation MAY enforce a max-per-lineage retention by evicting
///   oldest checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint with its metadata. Returns the config updated
    /// with the newly assigned checkpoint id.
    ///
    /// `new_versions` carries the channel versions assigned at the commit
    /// that produced this checkpoint; stores may index it or ignore it.
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        new_versions: &FxHashMap<String, u64>,
    ) -> Result<CheckpointConfig>;

    /// Atomic variant of [`put`](Self::put) that also replaces the
    /// checkpoint's pending writes in the same operation.
    async fn put_full(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        new_versions: &FxHashMap<String, u64>,
        pending_writes: Vec<PendingWrite>,
    ) -> Result<CheckpointConfig>;

    /// Append pending writes under an existing checkpoint id.
    async fn put_writes(
        &self,
        config: &CheckpointConfig,
        writes: Vec<PendingWrite>,
        task_id: &str,
    ) -> Result<()>;

    /// Fetch a checkpoint. With no id in `config`, the latest in
    /// `(lineage, namespace)` is returned; `None` when nothing exists.
    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>>;

    /// Fetch the full tuple (checkpoint, metadata, pending writes, parent).
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>>;

    /// List checkpoints newest-first with optional filters.
    async fn list(
        &self,
        config: &CheckpointConfig,
        filter: &ListFilter,
    ) -> Result<Vec<CheckpointTuple>>;

    /// List every checkpoint of a lineage across all namespaces, newest
    /// first. Backs lineage-tree reconstruction.
    async fn list_lineage(&self, lineage: &str) -> Result<Vec<CheckpointTuple>>;

    /// Delete a lineage, cascading to all namespaces, checkpoints, and
    /// pending writes.
    async fn delete_lineage(&self, lineage: &str) -> Result<()>;
}

#[derive(Clone, Debug)]
struct StoredEntry {
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
    pending_writes: Vec<PendingWrite>,
}

/// Volatile process-local store. Fast, non-durable; suitable for tests and
/// ephemeral runs. Keeps full history per `(lineage, namespace)` up to the
/// optional retention limit.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    inner: RwLock<FxHashMap<(String, String), Vec<StoredEntry>>>,
    max_per_lineage: Option<usize>,
}

impl InMemoryCheckpointStore {
    /// Create an unbounded in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that keeps at most `max` checkpoints per lineage,
    /// evicting oldest (by step, then timestamp) first.
    #[must_use]
    pub fn with_retention(max: usize) -> Self {
        Self {
            inner: RwLock::new(FxHashMap::default()),
            max_per_lineage: Some(max.max(1)),
        }
    }

    fn insert(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        pending_writes: Vec<PendingWrite>,
    ) -> CheckpointConfig {
        let updated = CheckpointConfig {
            lineage: checkpoint.lineage.clone(),
            namespace: checkpoint.namespace.clone(),
            checkpoint_id: Some(checkpoint.id),
        };
        let key = (config.lineage.clone(), config.namespace.clone());
        let mut inner = self.inner.write();
        inner.entry(key).or_default().push(StoredEntry {
            checkpoint,
            metadata,
            pending_writes,
        });

        if let Some(max) = self.max_per_lineage {
            let lineage = &config.lineage;
            let total: usize = inner
                .iter()
                .filter(|((l, _), _)| l == lineage)
                .map(|(_, v)| v.len())
                .sum();
            let mut excess = total.saturating_sub(max);
            while excess > 0 {
                // Evict the globally oldest entry for this lineage.
                let oldest = inner
                    .iter()
                    .filter(|((l, _), v)| l == lineage && !v.is_empty())
                    .min_by_key(|(_, v)| (v[0].checkpoint.step, v[0].checkpoint.created_at))
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(key) => {
                        if let Some(entries) = inner.get_mut(&key) {
                            entries.remove(0);
                        }
                        excess -= 1;
                    }
                    None => break,
                }
            }
        }
        updated
    }

    fn find_entry(&self, config: &CheckpointConfig) -> Option<StoredEntry> {
        let inner = self.inner.read();
        let entries = inner.get(&(config.lineage.clone(), config.namespace.clone()))?;
        match config.checkpoint_id {
            Some(id) => entries.iter().find(|e| e.checkpoint.id == id).cloned(),
            None => entries
                .iter()
                .max_by_key(|e| (e.checkpoint.step, e.checkpoint.created_at))
                .cloned(),
        }
    }

    fn tuple_for(&self, entry: StoredEntry) -> CheckpointTuple {
        let parent_config = entry.checkpoint.parent_id.map(|parent_id| CheckpointConfig {
            lineage: entry.checkpoint.lineage.clone(),
            namespace: entry.checkpoint.namespace.clone(),
            checkpoint_id: Some(parent_id),
        });
        CheckpointTuple {
            config: entry.checkpoint.config(),
            parent_config,
            metadata: entry.metadata,
            pending_writes: entry.pending_writes,
            checkpoint: entry.checkpoint,
        }
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        _new_versions: &FxHashMap<String, u64>,
    ) -> Result<CheckpointConfig> {
        Ok(self.insert(config, checkpoint, metadata, Vec::new()))
    }

    async fn put_full(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        _new_versions: &FxHashMap<String, u64>,
        pending_writes: Vec<PendingWrite>,
    ) -> Result<CheckpointConfig> {
        Ok(self.insert(config, checkpoint, metadata, pending_writes))
    }

    async fn put_writes(
        &self,
        config: &CheckpointConfig,
        writes: Vec<PendingWrite>,
        _task_id: &str,
    ) -> Result<()> {
        let id = config.checkpoint_id.ok_or_else(|| StoreError::NotFound {
            lineage: config.lineage.clone(),
            namespace: config.namespace.clone(),
            id: None,
        })?;
        let mut inner = self.inner.write();
        let entries = inner
            .get_mut(&(config.lineage.clone(), config.namespace.clone()))
            .ok_or_else(|| StoreError::NotFound {
                lineage: config.lineage.clone(),
                namespace: config.namespace.clone(),
                id: Some(id),
            })?;
        let entry = entries
            .iter_mut()
            .find(|e| e.checkpoint.id == id)
            .ok_or_else(|| StoreError::NotFound {
                lineage: config.lineage.clone(),
                namespace: config.namespace.clone(),
                id: Some(id),
            })?;
        entry.pending_writes.extend(writes);
        Ok(())
    }

    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>> {
        Ok(self.find_entry(config).map(|e| e.checkpoint))
    }

    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        Ok(self.find_entry(config).map(|e| self.tuple_for(e)))
    }

    async fn list(
        &self,
        config: &CheckpointConfig,
        filter: &ListFilter,
    ) -> Result<Vec<CheckpointTuple>> {
        let entries: Vec<StoredEntry> = {
            let inner = self.inner.read();
            inner
                .get(&(config.lineage.clone(), config.namespace.clone()))
                .cloned()
                .unwrap_or_default()
        };

        let mut sorted = entries;
        sorted.sort_by(|a, b| {
            (b.checkpoint.step, b.checkpoint.created_at)
                .cmp(&(a.checkpoint.step, a.checkpoint.created_at))
        });

        if let Some(before) = filter.before {
            if let Some(pos) = sorted.iter().position(|e| e.checkpoint.id == before) {
                sorted = sorted.split_off(pos + 1);
            }
        }

        let mut tuples: Vec<CheckpointTuple> = sorted
            .into_iter()
            .filter(|e| {
                filter
                    .metadata
                    .iter()
                    .all(|(k, v)| e.metadata.extra.get(k) == Some(v))
            })
            .map(|e| self.tuple_for(e))
            .collect();

        if let Some(limit) = filter.limit {
            tuples.truncate(limit);
        }
        Ok(tuples)
    }

    async fn list_lineage(&self, lineage: &str) -> Result<Vec<CheckpointTuple>> {
        let entries: Vec<StoredEntry> = {
            let inner = self.inner.read();
            inner
                .iter()
                .filter(|((l, _), _)| l == lineage)
                .flat_map(|(_, v)| v.iter().cloned())
                .collect()
        };
        let mut tuples: Vec<CheckpointTuple> =
            entries.into_iter().map(|e| self.tuple_for(e)).collect();
        tuples.sort_by(|a, b| {
            (b.checkpoint.step, b.checkpoint.created_at)
                .cmp(&(a.checkpoint.step, a.checkpoint.created_at))
        });
        Ok(tuples)
    }

    async fn delete_lineage(&self, lineage: &str) -> Result<()> {
        let mut inner = self.inner.write();
        inner.retain(|(l, _), _| l != lineage);
        Ok(())
    }
}
