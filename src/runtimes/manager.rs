//! Checkpoint manager: lineage-level operations above the store.
//!
//! A thin façade over a [`CheckpointStore`] providing "latest" lookups,
//! filtered listing, lineage tree reconstruction, forking, and cascade
//! deletion. Parentage is represented by id only; the tree is reconstructed
//! by grouping on parent id when requested.

use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::runtimes::checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointStore, CheckpointTuple,
    ListFilter, Result, StoreError,
};

/// A node in a lineage's checkpoint forest.
#[derive(Clone, Debug)]
pub struct CheckpointNode {
    pub checkpoint: Checkpoint,
    pub children: Vec<CheckpointNode>,
}

impl CheckpointNode {
    /// Returns `true` when this node is a branch point (more than one child).
    #[must_use]
    pub fn is_branch_point(&self) -> bool {
        self.children.len() > 1
    }
}

/// Lineage-scoped façade over a checkpoint store.
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
}

impl CheckpointManager {
    /// Wrap a store.
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Latest checkpoint tuple in `(lineage, namespace)`, if any.
    #[instrument(skip(self), err)]
    pub async fn latest(&self, lineage: &str, namespace: &str) -> Result<Option<CheckpointTuple>> {
        self.store
            .get_tuple(&CheckpointConfig::latest(lineage, namespace))
            .await
    }

    /// List checkpoints newest-first with the given filter.
    pub async fn list_checkpoints(
        &self,
        config: &CheckpointConfig,
        filter: &ListFilter,
    ) -> Result<Vec<CheckpointTuple>> {
        self.store.list(config, filter).await
    }

    /// Reconstruct the checkpoint forest of a lineage.
    ///
    /// Roots are checkpoints with a null parent (or whose parent is no
    /// longer stored, after retention eviction); children are grouped by
    /// parent id and ordered by `(step asc, timestamp asc)`. A branch point
    /// is any node with more than one child.
    #[instrument(skip(self), err)]
    pub async fn checkpoint_tree(&self, lineage: &str) -> Result<Vec<CheckpointNode>> {
        let mut checkpoints: Vec<Checkpoint> = self
            .store
            .list_lineage(lineage)
            .await?
            .into_iter()
            .map(|t| t.checkpoint)
            .collect();
        checkpoints.sort_by(|a, b| (a.step, a.created_at).cmp(&(b.step, b.created_at)));

        let known: std::collections::HashSet<Uuid> = checkpoints.iter().map(|c| c.id).collect();
        let mut by_parent: rustc_hash::FxHashMap<Option<Uuid>, Vec<Checkpoint>> =
            rustc_hash::FxHashMap::default();
        for cp in checkpoints {
            let parent = match cp.parent_id {
                Some(p) if known.contains(&p) => Some(p),
                _ => None,
            };
            by_parent.entry(parent).or_default().push(cp);
        }

        fn build(
            parent: Option<Uuid>,
            by_parent: &mut rustc_hash::FxHashMap<Option<Uuid>, Vec<Checkpoint>>,
        ) -> Vec<CheckpointNode> {
            by_parent
                .remove(&parent)
                .unwrap_or_default()
                .into_iter()
                .map(|cp| {
                    let id = cp.id;
                    CheckpointNode {
                        checkpoint: cp,
                        children: build(Some(id), by_parent),
                    }
                })
                .collect()
        }

        Ok(build(None, &mut by_parent))
    }

    /// Fork a new branch from the checkpoint addressed by `config`.
    ///
    /// The fork copies the parent's channel values and versions verbatim,
    /// retains the lineage and namespace, gets a fresh id with
    /// `source = Fork`, and is persisted immediately. Returns the config
    /// addressing the new checkpoint.
    #[instrument(skip(self), err)]
    pub async fn fork(&self, config: &CheckpointConfig) -> Result<CheckpointConfig> {
        let parent = self
            .store
            .get(config)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                lineage: config.lineage.clone(),
                namespace: config.namespace.clone(),
                id: config.checkpoint_id,
            })?;
        let fork = Checkpoint::fork_from(&parent);
        let metadata = CheckpointMetadata::for_checkpoint(&fork);
        let versions = fork.channel_versions.clone();
        self.store.put(config, fork, metadata, &versions).await
    }

    /// Delete a lineage, cascading to all namespaces and checkpoints.
    #[instrument(skip(self), err)]
    pub async fn delete_lineage(&self, lineage: &str) -> Result<()> {
        self.store.delete_lineage(lineage).await
    }
}
