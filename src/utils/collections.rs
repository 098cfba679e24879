//! Constructors for the crate's hash-map aliases.
//!
//! `FxHashMap` has no `with_capacity`-free literal constructor syntax, so
//! these helpers keep call sites terse and consistent.

use rustc_hash::FxHashMap;

use crate::value::ChannelValue;

/// Empty channel-name → value map.
#[must_use]
pub fn new_value_map() -> FxHashMap<String, ChannelValue> {
    FxHashMap::default()
}

/// Empty channel-name → version map.
#[must_use]
pub fn new_version_map() -> FxHashMap<String, u64> {
    FxHashMap::default()
}

/// Build a value map from key/value pairs.
pub fn value_map<K, V, I>(entries: I) -> FxHashMap<String, ChannelValue>
where
    K: Into<String>,
    V: Into<ChannelValue>,
    I: IntoIterator<Item = (K, V)>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
