//! The channel-value state container and its commit fold.
//!
//! A [`StateContainer`] holds the current value of every declared channel.
//! Between steps it is logically immutable: nodes read from a
//! [`StateSnapshot`] and return writes, which the executor stages as
//! [`PendingWrite`]s and applies atomically at the commit barrier.
//!
//! The commit fold is deterministic: writes are grouped per channel, ordered
//! by `(task id, sequence)` within the group, and channels are folded and
//! version-bumped in channel-name order. Two runs that stage the same writes
//! commit to identical values and identical version sequences, regardless of
//! which node happened to finish first.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::channels::{ChannelError, ChannelRegistry, ChannelSchema};
use crate::reducers::ReducerError;
use crate::value::ChannelValue;

/// A staged write awaiting the commit barrier.
///
/// Writes carry the id of the task (node) that produced them and a
/// monotonically increasing sequence number within that task, which together
/// define the deterministic fold order inside a commit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    /// Target channel name.
    pub channel: String,
    /// The value handed to the channel's reducer.
    pub value: ChannelValue,
    /// Id of the node that staged the write.
    pub task_id: String,
    /// Position of the write within its task's batch.
    pub seq: u64,
}

impl PendingWrite {
    /// Convenience constructor.
    pub fn new(
        channel: impl Into<String>,
        value: ChannelValue,
        task_id: impl Into<String>,
        seq: u64,
    ) -> Self {
        Self {
            channel: channel.into(),
            value,
            task_id: task_id.into(),
            seq,
        }
    }
}

/// Read-only view of committed state handed to nodes.
///
/// Snapshots clone the channel values and versions at the instant they are
/// taken, so concurrently executing nodes never observe each other's
/// in-progress writes.
#[derive(Clone, Debug, Default)]
pub struct StateSnapshot {
    values: FxHashMap<String, ChannelValue>,
    versions: FxHashMap<String, u64>,
}

impl StateSnapshot {
    pub(crate) fn new(
        values: FxHashMap<String, ChannelValue>,
        versions: FxHashMap<String, u64>,
    ) -> Self {
        Self { values, versions }
    }

    /// The committed value of `channel`, if declared.
    #[must_use]
    pub fn get(&self, channel: &str) -> Option<&ChannelValue> {
        self.values.get(channel)
    }

    /// The committed version of `channel`; 0 when never written or unknown.
    #[must_use]
    pub fn version(&self, channel: &str) -> u64 {
        self.versions.get(channel).copied().unwrap_or(0)
    }

    /// All channel values.
    #[must_use]
    pub fn values(&self) -> &FxHashMap<String, ChannelValue> {
        &self.values
    }

    /// All channel versions.
    #[must_use]
    pub fn versions(&self) -> &FxHashMap<String, u64> {
        &self.versions
    }
}

/// Errors surfaced by the commit barrier.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum StateError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Reducer(#[from] ReducerError),
}

/// Holds the current value of every declared channel.
///
/// Created once per run, seeded either from channel defaults (fresh run) or
/// from a loaded checkpoint. Mutated only through [`commit`](Self::commit).
#[derive(Clone, Debug)]
pub struct StateContainer {
    values: FxHashMap<String, ChannelValue>,
}

impl StateContainer {
    /// Seed every declared channel from its default producer.
    #[must_use]
    pub fn seeded(schema: &ChannelSchema) -> Self {
        let values = schema
            .iter()
            .map(|def| (def.name().to_string(), def.default_value()))
            .collect();
        Self { values }
    }

    /// Restore from persisted channel values.
    ///
    /// Declared channels missing from `values` (schema grew since the
    /// checkpoint was written) fall back to their defaults.
    #[must_use]
    pub fn restore(schema: &ChannelSchema, values: &FxHashMap<String, ChannelValue>) -> Self {
        let values = schema
            .iter()
            .map(|def| {
                let v = values
                    .get(def.name())
                    .cloned()
                    .unwrap_or_else(|| def.default_value());
                (def.name().to_string(), v)
            })
            .collect();
        Self { values }
    }

    /// The current value of `channel`.
    #[must_use]
    pub fn get(&self, channel: &str) -> Option<&ChannelValue> {
        self.values.get(channel)
    }

    /// All current channel values.
    #[must_use]
    pub fn values(&self) -> &FxHashMap<String, ChannelValue> {
        &self.values
    }

    /// Take a read-only snapshot pairing values with the registry's versions.
    #[must_use]
    pub fn snapshot(&self, registry: &ChannelRegistry) -> StateSnapshot {
        StateSnapshot::new(self.values.clone(), registry.versions())
    }

    /// Apply a batch of staged writes atomically.
    ///
    /// Writes are grouped per channel and folded through that channel's
    /// reducer in `(task id, seq)` order; the registry version of every
    /// channel that received at least one write is bumped, in channel-name
    /// order. Returns the names of updated channels, sorted.
    ///
    /// On error nothing is applied: the fold runs against scratch copies and
    /// values are swapped in only after every channel reduces cleanly.
    pub fn commit(
        &mut self,
        registry: &mut ChannelRegistry,
        mut writes: Vec<PendingWrite>,
    ) -> Result<Vec<String>, StateError> {
        if writes.is_empty() {
            return Ok(Vec::new());
        }

        writes.sort_by(|a, b| {
            a.channel
                .cmp(&b.channel)
                .then_with(|| a.task_id.cmp(&b.task_id))
                .then_with(|| a.seq.cmp(&b.seq))
        });

        // Group per channel; the sort above guarantees channel-name order
        // across groups and (task_id, seq) order within each group.
        let mut grouped: Vec<(String, Vec<ChannelValue>)> = Vec::new();
        for write in writes {
            match grouped.last_mut() {
                Some((channel, batch)) if *channel == write.channel => batch.push(write.value),
                _ => grouped.push((write.channel, vec![write.value])),
            }
        }

        let mut folded: Vec<(String, ChannelValue)> = Vec::with_capacity(grouped.len());
        for (channel, batch) in grouped {
            let reducer = registry.reducer(&channel)?;
            let current = self
                .values
                .get(&channel)
                .cloned()
                .unwrap_or(ChannelValue::Null);
            let next = reducer.apply(&channel, current, batch)?;
            folded.push((channel, next));
        }

        let mut updated = Vec::with_capacity(folded.len());
        for (channel, value) in folded {
            self.values.insert(channel.clone(), value);
            registry.bump(&channel)?;
            updated.push(channel);
        }
        Ok(updated)
    }
}
