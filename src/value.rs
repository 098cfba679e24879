//! Self-describing channel values with width-preserving serialization.
//!
//! Checkpoint payloads must survive a serialize/deserialize round trip
//! without altering the shape of the data they carry. Plain JSON documents
//! lose the distinction between integers and floating point numbers on
//! reload, which silently corrupts counters restored from a checkpoint.
//! [`ChannelValue`] avoids that by tagging every value with its variant, so
//! `Int(3)` comes back as `Int(3)` and never as `Float(3.0)`.
//!
//! # Examples
//!
//! ```rust
//! use flowgraph::value::ChannelValue;
//!
//! let v = ChannelValue::Int(42);
//! let json = serde_json::to_string(&v).unwrap();
//! let back: ChannelValue = serde_json::from_str(&json).unwrap();
//! assert_eq!(back, ChannelValue::Int(42));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single value held by a channel.
///
/// The enum is adjacently tagged (`{"type": ..., "value": ...}`) so the
/// persisted form is self-describing and numeric widths are preserved across
/// store round trips. Maps use `BTreeMap` so serialization order, and
/// therefore persisted byte output, is deterministic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ChannelValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<ChannelValue>),
    Map(BTreeMap<String, ChannelValue>),
}

impl Default for ChannelValue {
    fn default() -> Self {
        ChannelValue::Null
    }
}

impl ChannelValue {
    /// Construct a text value.
    pub fn text(s: impl Into<String>) -> Self {
        ChannelValue::Text(s.into())
    }

    /// Construct a list from any iterable of values.
    pub fn list<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<ChannelValue>,
    {
        ChannelValue::List(items.into_iter().map(Into::into).collect())
    }

    /// Construct a map from key/value pairs.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<ChannelValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        ChannelValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Returns `true` for [`ChannelValue::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, ChannelValue::Null)
    }

    /// Integer payload, if this is an `Int`.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ChannelValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Float payload, if this is a `Float`.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ChannelValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Boolean payload, if this is a `Bool`.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ChannelValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// String slice, if this is a `Text`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ChannelValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the elements, if this is a `List`.
    #[must_use]
    pub fn as_list(&self) -> Option<&[ChannelValue]> {
        match self {
            ChannelValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow the entries, if this is a `Map`.
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, ChannelValue>> {
        match self {
            ChannelValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Convert into an untagged `serde_json::Value` for interop with
    /// JSON-speaking callers (event payloads, metadata filters).
    ///
    /// This direction is lossless in content but drops the variant tags;
    /// converting back with [`from_json`](Self::from_json) maps JSON numbers
    /// to `Int` whenever they are losslessly integral.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ChannelValue::Null => serde_json::Value::Null,
            ChannelValue::Bool(b) => serde_json::Value::Bool(*b),
            ChannelValue::Int(i) => serde_json::Value::from(*i),
            ChannelValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ChannelValue::Text(s) => serde_json::Value::String(s.clone()),
            ChannelValue::List(items) => {
                serde_json::Value::Array(items.iter().map(ChannelValue::to_json).collect())
            }
            ChannelValue::Map(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Build a `ChannelValue` from an untagged JSON document.
    ///
    /// JSON numbers become `Int` when they are exactly representable as
    /// `i64`, otherwise `Float`.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ChannelValue::Null,
            serde_json::Value::Bool(b) => ChannelValue::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ChannelValue::Int(i)
                } else {
                    ChannelValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => ChannelValue::Text(s.clone()),
            serde_json::Value::Array(items) => {
                ChannelValue::List(items.iter().map(ChannelValue::from_json).collect())
            }
            serde_json::Value::Object(m) => ChannelValue::Map(
                m.iter()
                    .map(|(k, v)| (k.clone(), ChannelValue::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for ChannelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelValue::Null => f.write_str("null"),
            ChannelValue::Bool(b) => write!(f, "{b}"),
            ChannelValue::Int(i) => write!(f, "{i}"),
            ChannelValue::Float(x) => write!(f, "{x}"),
            ChannelValue::Text(s) => write!(f, "{s}"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<bool> for ChannelValue {
    fn from(b: bool) -> Self {
        ChannelValue::Bool(b)
    }
}

impl From<i64> for ChannelValue {
    fn from(i: i64) -> Self {
        ChannelValue::Int(i)
    }
}

impl From<i32> for ChannelValue {
    fn from(i: i32) -> Self {
        ChannelValue::Int(i64::from(i))
    }
}

impl From<f64> for ChannelValue {
    fn from(f: f64) -> Self {
        ChannelValue::Float(f)
    }
}

impl From<&str> for ChannelValue {
    fn from(s: &str) -> Self {
        ChannelValue::Text(s.to_string())
    }
}

impl From<String> for ChannelValue {
    fn from(s: String) -> Self {
        ChannelValue::Text(s)
    }
}

impl From<Vec<ChannelValue>> for ChannelValue {
    fn from(items: Vec<ChannelValue>) -> Self {
        ChannelValue::List(items)
    }
}
