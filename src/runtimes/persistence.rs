/*!
Persistence primitives for serializing/deserializing checkpoints (used by
the SQLite store and any future durable backends).

Design goals:
- Explicit serde-friendly structs decoupled from the in-memory
  representations; conversion logic localized in From / TryFrom impls so
  store code stays lean and declarative.
- Deterministic output: persisted maps are `BTreeMap`s, so serializing the
  same checkpoint always yields the same bytes.
- Node kinds and channel values are stored through their own serde derives,
  which keep the persisted forms self-describing.

This module performs no I/O.
*/

use chrono::Utc;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::runtimes::checkpoint::{Checkpoint, CheckpointMetadata, InterruptState};
use crate::types::{CheckpointSource, NodeKind};
use crate::value::ChannelValue;

use miette::Diagnostic;
use thiserror::Error;

/// Bidirectional conversion and serialization errors for persistence models.
#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    #[error("invalid persisted field {field}: {message}")]
    #[diagnostic(
        code(flowgraph::persistence::invalid_field),
        help("The stored row is corrupt or was written by an incompatible version.")
    )]
    InvalidField {
        field: &'static str,
        message: String,
    },

    #[error("JSON serialization/deserialization failed: {source}")]
    #[diagnostic(
        code(flowgraph::persistence::serde),
        help("Ensure the JSON structure matches the Persisted* types.")
    )]
    Serde {
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Serialize any persisted model to a compact JSON string.
pub fn to_json_string<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| PersistenceError::Serde { source: e })
}

/// Deserialize a persisted model from its JSON string form.
pub fn from_json_str<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T> {
    serde_json::from_str(s).map_err(|e| PersistenceError::Serde { source: e })
}

/// Persisted shape of [`InterruptState`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedInterrupt {
    pub node_id: String,
    pub task_id: String,
    pub value: ChannelValue,
}

/// Full persisted checkpoint body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedCheckpoint {
    pub id: String,
    pub lineage: String,
    pub namespace: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub step: i64,
    /// RFC3339 string form (keeps chrono types out of the serialized shape).
    pub created_at: String,
    pub source: String,
    #[serde(default)]
    pub channel_values: BTreeMap<String, ChannelValue>,
    #[serde(default)]
    pub channel_versions: BTreeMap<String, u64>,
    /// node id → channel → version, stored with sorted keys.
    #[serde(default)]
    pub versions_seen: BTreeMap<String, BTreeMap<String, u64>>,
    /// Nodes scheduled but not yet completed when the checkpoint was saved.
    #[serde(default)]
    pub next_nodes: Vec<NodeKind>,
    #[serde(default)]
    pub interrupt: Option<PersistedInterrupt>,
}

/// Persisted shape of [`CheckpointMetadata`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersistedMetadata {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub step: i64,
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/* ---------- InterruptState <-> PersistedInterrupt ---------- */

impl From<&InterruptState> for PersistedInterrupt {
    fn from(i: &InterruptState) -> Self {
        PersistedInterrupt {
            node_id: i.node_id.clone(),
            task_id: i.task_id.clone(),
            value: i.value.clone(),
        }
    }
}

impl From<PersistedInterrupt> for InterruptState {
    fn from(p: PersistedInterrupt) -> Self {
        InterruptState {
            node_id: p.node_id,
            task_id: p.task_id,
            value: p.value,
        }
    }
}

/* ---------- Checkpoint <-> PersistedCheckpoint ---------- */

impl From<&Checkpoint> for PersistedCheckpoint {
    fn from(cp: &Checkpoint) -> Self {
        PersistedCheckpoint {
            id: cp.id.to_string(),
            lineage: cp.lineage.clone(),
            namespace: cp.namespace.clone(),
            parent_id: cp.parent_id.map(|id| id.to_string()),
            step: cp.step,
            created_at: cp.created_at.to_rfc3339(),
            source: cp.source.as_str().to_string(),
            channel_values: cp
                .channel_values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            channel_versions: cp
                .channel_versions
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            versions_seen: cp
                .versions_seen
                .iter()
                .map(|(node, seen)| {
                    (
                        node.clone(),
                        seen.iter().map(|(k, v)| (k.clone(), *v)).collect(),
                    )
                })
                .collect(),
            next_nodes: cp.next_nodes.clone(),
            interrupt: cp.interrupt.as_ref().map(PersistedInterrupt::from),
        }
    }
}

impl TryFrom<PersistedCheckpoint> for Checkpoint {
    type Error = PersistenceError;

    fn try_from(p: PersistedCheckpoint) -> Result<Self> {
        let id = Uuid::parse_str(&p.id).map_err(|e| PersistenceError::InvalidField {
            field: "id",
            message: e.to_string(),
        })?;
        let parent_id = match p.parent_id {
            Some(raw) => Some(Uuid::parse_str(&raw).map_err(|e| {
                PersistenceError::InvalidField {
                    field: "parent_id",
                    message: e.to_string(),
                }
            })?),
            None => None,
        };
        let source =
            CheckpointSource::parse(&p.source).ok_or_else(|| PersistenceError::InvalidField {
                field: "source",
                message: format!("unrecognised source `{}`", p.source),
            })?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&p.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        let channel_values: FxHashMap<String, ChannelValue> =
            p.channel_values.into_iter().collect();
        let channel_versions: FxHashMap<String, u64> = p.channel_versions.into_iter().collect();
        let versions_seen: FxHashMap<String, FxHashMap<String, u64>> = p
            .versions_seen
            .into_iter()
            .map(|(node, seen)| (node, seen.into_iter().collect()))
            .collect();

        Ok(Checkpoint {
            id,
            lineage: p.lineage,
            namespace: p.namespace,
            parent_id,
            step: p.step,
            created_at,
            source,
            channel_values,
            channel_versions,
            versions_seen,
            next_nodes: p.next_nodes,
            interrupt: p.interrupt.map(InterruptState::from),
        })
    }
}

/* ---------- CheckpointMetadata <-> PersistedMetadata ---------- */

impl From<&CheckpointMetadata> for PersistedMetadata {
    fn from(m: &CheckpointMetadata) -> Self {
        PersistedMetadata {
            source: m.source.map(|s| s.as_str().to_string()),
            step: m.step,
            extra: m
                .extra
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

impl TryFrom<PersistedMetadata> for CheckpointMetadata {
    type Error = PersistenceError;

    fn try_from(p: PersistedMetadata) -> Result<Self> {
        let source = match p.source {
            Some(raw) => Some(CheckpointSource::parse(&raw).ok_or_else(|| {
                PersistenceError::InvalidField {
                    field: "metadata.source",
                    message: format!("unrecognised source `{raw}`"),
                }
            })?),
            None => None,
        };
        Ok(CheckpointMetadata {
            source,
            step: p.step,
            extra: p.extra.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_checkpoint() -> Checkpoint {
        let mut channel_values = FxHashMap::default();
        channel_values.insert("counter".to_string(), ChannelValue::Int(3));
        channel_values.insert(
            "results".to_string(),
            ChannelValue::list(["a", "b"]),
        );
        let mut channel_versions = FxHashMap::default();
        channel_versions.insert("counter".to_string(), 3u64);
        channel_versions.insert("results".to_string(), 1u64);
        let mut seen_inner = FxHashMap::default();
        seen_inner.insert("counter".to_string(), 2u64);
        let mut versions_seen = FxHashMap::default();
        versions_seen.insert("n1".to_string(), seen_inner);

        Checkpoint {
            id: Uuid::new_v4(),
            lineage: "w1".to_string(),
            namespace: "main".to_string(),
            parent_id: Some(Uuid::new_v4()),
            step: 2,
            created_at: Utc::now(),
            source: CheckpointSource::Loop,
            channel_values,
            channel_versions,
            versions_seen,
            next_nodes: vec![NodeKind::Custom("n3".into()), NodeKind::End],
            interrupt: None,
        }
    }

    #[test]
    fn checkpoint_roundtrip_preserves_values_and_versions() {
        let original = sample_checkpoint();
        let persisted = PersistedCheckpoint::from(&original);
        let json = to_json_string(&persisted).unwrap();
        let reparsed: PersistedCheckpoint = from_json_str(&json).unwrap();
        let restored = Checkpoint::try_from(reparsed).unwrap();

        assert_eq!(restored.id, original.id);
        assert_eq!(restored.channel_values, original.channel_values);
        assert_eq!(restored.channel_versions, original.channel_versions);
        assert_eq!(restored.versions_seen, original.versions_seen);
        assert_eq!(restored.next_nodes, original.next_nodes);
        assert_eq!(restored.source, original.source);
        assert_eq!(restored.step, original.step);
    }

    #[test]
    fn interrupt_state_roundtrip() {
        let mut original = sample_checkpoint();
        original.source = CheckpointSource::Interrupt;
        original.interrupt = Some(InterruptState {
            node_id: "approve".to_string(),
            task_id: "approve".to_string(),
            value: ChannelValue::map([("message", "Please approve")]),
        });

        let json = to_json_string(&PersistedCheckpoint::from(&original)).unwrap();
        let restored =
            Checkpoint::try_from(from_json_str::<PersistedCheckpoint>(&json).unwrap()).unwrap();
        assert_eq!(restored.interrupt, original.interrupt);
    }

    #[test]
    fn integer_channel_values_do_not_widen() {
        let original = sample_checkpoint();
        let json = to_json_string(&PersistedCheckpoint::from(&original)).unwrap();
        let restored =
            Checkpoint::try_from(from_json_str::<PersistedCheckpoint>(&json).unwrap()).unwrap();
        assert_eq!(
            restored.channel_values.get("counter"),
            Some(&ChannelValue::Int(3))
        );
    }

    #[test]
    fn bad_source_is_rejected() {
        let mut persisted = PersistedCheckpoint::from(&sample_checkpoint());
        persisted.source = "mystery".to_string();
        assert!(Checkpoint::try_from(persisted).is_err());
    }

    #[test]
    fn serialization_is_deterministic() {
        let original = sample_checkpoint();
        let a = to_json_string(&PersistedCheckpoint::from(&original)).unwrap();
        let b = to_json_string(&PersistedCheckpoint::from(&original)).unwrap();
        assert_eq!(a, b);
    }
}
