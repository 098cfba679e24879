//! State merge strategies applied at the commit barrier.
//!
//! Every channel declares a [`Reducer`] that folds a batch of staged writes
//! into the channel's prior value. Reducers never touch versions; version
//! bumps happen in the channel registry after a reducer reports success.
//!
//! Built-in policies:
//!
//! - [`LastValue`]: overwrite, last writer in batch order wins
//! - [`AppendSlice`]: list concatenation in batch order
//! - [`MapMerge`]: key union with last-writer-wins per key
//!
//! Custom policies plug in as `Arc<dyn Reducer>` via
//! [`GraphBuilder::add_channel`](crate::graphs::GraphBuilder::add_channel).

use miette::Diagnostic;
use thiserror::Error;

use crate::value::ChannelValue;

/// Folds a batch of writes into a channel's current value.
///
/// The batch is pre-ordered by the barrier: writes are sorted by
/// `(task id, sequence)` so the fold is deterministic regardless of which
/// node finished first. Reducers must be associative over batches from
/// concurrently scheduled nodes.
pub trait Reducer: Send + Sync {
    /// Apply `writes` on top of `current`, returning the new channel value.
    fn apply(
        &self,
        channel: &str,
        current: ChannelValue,
        writes: Vec<ChannelValue>,
    ) -> Result<ChannelValue, ReducerError>;
}

/// Errors raised while folding writes into a channel.
#[derive(Debug, Error, Diagnostic)]
pub enum ReducerError {
    /// A staged write does not match the shape the channel's reducer expects.
    #[error("channel `{channel}` rejected write: expected {expected}, got {got}")]
    #[diagnostic(
        code(flowgraph::reducers::wrong_shape),
        help("Check the value shape the node writes to `{channel}` against the channel's reducer policy.")
    )]
    WrongShape {
        channel: String,
        expected: &'static str,
        got: &'static str,
    },
}

fn shape_name(value: &ChannelValue) -> &'static str {
    match value {
        ChannelValue::Null => "null",
        ChannelValue::Bool(_) => "bool",
        ChannelValue::Int(_) => "int",
        ChannelValue::Float(_) => "float",
        ChannelValue::Text(_) => "text",
        ChannelValue::List(_) => "list",
        ChannelValue::Map(_) => "map",
    }
}

/// Overwrite policy: the last write in batch order replaces the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LastValue;

impl Reducer for LastValue {
    fn apply(
        &self,
        _channel: &str,
        current: ChannelValue,
        writes: Vec<ChannelValue>,
    ) -> Result<ChannelValue, ReducerError> {
        Ok(writes.into_iter().next_back().unwrap_or(current))
    }
}

/// Append policy: the channel holds a list; each write is appended in batch
/// order. A write that is itself a list is spliced in element-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AppendSlice;

impl Reducer for AppendSlice {
    fn apply(
        &self,
        channel: &str,
        current: ChannelValue,
        writes: Vec<ChannelValue>,
    ) -> Result<ChannelValue, ReducerError> {
        let mut items = match current {
            ChannelValue::List(items) => items,
            ChannelValue::Null => Vec::new(),
            other => {
                return Err(ReducerError::WrongShape {
                    channel: channel.to_string(),
                    expected: "list",
                    got: shape_name(&other),
                });
            }
        };
        for write in writes {
            match write {
                ChannelValue::List(mut batch) => items.append(&mut batch),
                single => items.push(single),
            }
        }
        Ok(ChannelValue::List(items))
    }
}

/// Map-union policy: each write must be a map; keys are unioned into the
/// current map with last-writer-wins per key in batch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MapMerge;

impl Reducer for MapMerge {
    fn apply(
        &self,
        channel: &str,
        current: ChannelValue,
        writes: Vec<ChannelValue>,
    ) -> Result<ChannelValue, ReducerError> {
        let mut merged = match current {
            ChannelValue::Map(m) => m,
            ChannelValue::Null => Default::default(),
            other => {
                return Err(ReducerError::WrongShape {
                    channel: channel.to_string(),
                    expected: "map",
                    got: shape_name(&other),
                });
            }
        };
        for write in writes {
            match write {
                ChannelValue::Map(update) => {
                    for (k, v) in update {
                        merged.insert(k, v);
                    }
                }
                other => {
                    return Err(ReducerError::WrongShape {
                        channel: channel.to_string(),
                        expected: "map",
                        got: shape_name(&other),
                    });
                }
            }
        }
        Ok(ChannelValue::Map(merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_value_takes_final_write() {
        let out = LastValue
            .apply(
                "counter",
                ChannelValue::Int(0),
                vec![ChannelValue::Int(1), ChannelValue::Int(2)],
            )
            .unwrap();
        assert_eq!(out, ChannelValue::Int(2));
    }

    #[test]
    fn last_value_keeps_current_when_batch_empty() {
        let out = LastValue
            .apply("counter", ChannelValue::Int(5), vec![])
            .unwrap();
        assert_eq!(out, ChannelValue::Int(5));
    }

    #[test]
    fn append_slice_concatenates_in_order() {
        let out = AppendSlice
            .apply(
                "results",
                ChannelValue::list(["a"]),
                vec![ChannelValue::text("b"), ChannelValue::list(["c", "d"])],
            )
            .unwrap();
        assert_eq!(out, ChannelValue::list(["a", "b", "c", "d"]));
    }

    #[test]
    fn append_slice_starts_from_null() {
        let out = AppendSlice
            .apply("results", ChannelValue::Null, vec![ChannelValue::text("x")])
            .unwrap();
        assert_eq!(out, ChannelValue::list(["x"]));
    }

    #[test]
    fn append_slice_rejects_scalar_channel() {
        let err = AppendSlice
            .apply("results", ChannelValue::Int(1), vec![ChannelValue::text("x")])
            .unwrap_err();
        assert!(matches!(err, ReducerError::WrongShape { .. }));
    }

    #[test]
    fn map_merge_last_writer_wins() {
        let out = MapMerge
            .apply(
                "meta",
                ChannelValue::map([("a", 1i64)]),
                vec![
                    ChannelValue::map([("a", 2i64), ("b", 3i64)]),
                    ChannelValue::map([("b", 4i64)]),
                ],
            )
            .unwrap();
        assert_eq!(out, ChannelValue::map([("a", 2i64), ("b", 4i64)]));
    }

    #[test]
    fn map_merge_rejects_non_map_write() {
        let err = MapMerge
            .apply("meta", ChannelValue::Null, vec![ChannelValue::Int(1)])
            .unwrap_err();
        assert!(matches!(err, ReducerError::WrongShape { .. }));
    }
}
