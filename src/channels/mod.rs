//! Channel definitions and the per-run version registry.
//!
//! A *channel* is a named, versioned slot in the workflow state. The schema
//! of channels is fixed at graph compile time: each channel declares the
//! [`Reducer`](crate::reducers::Reducer) that folds writes into it and a
//! default-value producer used to seed fresh runs.
//!
//! At run time a [`ChannelRegistry`] owns the authoritative version counter
//! for every channel. Versions start at 0 and are bumped exactly once per
//! channel per commit, by the executor's barrier, never by node code. The
//! barrier bumps in channel-name order so replays produce identical version
//! sequences.

pub mod errors;

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::reducers::{AppendSlice, LastValue, MapMerge, Reducer};
use crate::value::ChannelValue;

pub use errors::ChannelError;

/// Produces the initial value for a channel that has never been written.
pub type DefaultProducer = Arc<dyn Fn() -> ChannelValue + Send + Sync>;

/// Compile-time declaration of a single channel.
///
/// # Examples
///
/// ```rust
/// use flowgraph::channels::ChannelDef;
/// use flowgraph::value::ChannelValue;
///
/// let counter = ChannelDef::last_value("counter", ChannelValue::Int(0));
/// let results = ChannelDef::append_slice("results");
/// assert_eq!(counter.default_value(), ChannelValue::Int(0));
/// assert_eq!(results.default_value(), ChannelValue::List(vec![]));
/// ```
#[derive(Clone)]
pub struct ChannelDef {
    name: String,
    reducer: Arc<dyn Reducer>,
    default: DefaultProducer,
}

impl ChannelDef {
    /// Declare a channel with an explicit reducer and default producer.
    pub fn new(
        name: impl Into<String>,
        reducer: Arc<dyn Reducer>,
        default: DefaultProducer,
    ) -> Self {
        Self {
            name: name.into(),
            reducer,
            default,
        }
    }

    /// Overwrite channel seeded with a fixed default value.
    pub fn last_value(name: impl Into<String>, default: ChannelValue) -> Self {
        Self::new(
            name,
            Arc::new(LastValue),
            Arc::new(move || default.clone()),
        )
    }

    /// Append-slice channel seeded with an empty list.
    pub fn append_slice(name: impl Into<String>) -> Self {
        Self::new(
            name,
            Arc::new(AppendSlice),
            Arc::new(|| ChannelValue::List(Vec::new())),
        )
    }

    /// Map-merge channel seeded with an empty map.
    pub fn map_merge(name: impl Into<String>) -> Self {
        Self::new(
            name,
            Arc::new(MapMerge),
            Arc::new(|| ChannelValue::Map(BTreeMap::new())),
        )
    }

    /// The channel's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The reducer folding writes into this channel.
    #[must_use]
    pub fn reducer(&self) -> &Arc<dyn Reducer> {
        &self.reducer
    }

    /// Produce the channel's default value.
    #[must_use]
    pub fn default_value(&self) -> ChannelValue {
        (self.default)()
    }
}

impl fmt::Debug for ChannelDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelDef")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Immutable set of channel declarations, fixed at graph compile time.
///
/// Channels are kept in a `BTreeMap` so iteration order, and therefore the
/// barrier's bump order, is the channel-name sort order.
#[derive(Clone, Default)]
pub struct ChannelSchema {
    defs: BTreeMap<String, ChannelDef>,
}

impl ChannelSchema {
    /// Create an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel declaration.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Duplicate`] when the name is already taken.
    pub fn register(&mut self, def: ChannelDef) -> Result<(), ChannelError> {
        let name = def.name().to_string();
        if self.defs.contains_key(&name) {
            return Err(ChannelError::Duplicate { name });
        }
        self.defs.insert(name, def);
        Ok(())
    }

    /// Look up a declaration by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ChannelDef> {
        self.defs.get(name)
    }

    /// Returns `true` when `name` is a declared channel.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    /// Channel names in deterministic (sorted) order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.defs.keys().map(String::as_str)
    }

    /// Iterate declarations in deterministic (sorted) order.
    pub fn iter(&self) -> impl Iterator<Item = &ChannelDef> {
        self.defs.values()
    }

    /// Number of declared channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// Returns `true` when no channels are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

impl fmt::Debug for ChannelSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSchema")
            .field("channels", &self.defs.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Authoritative per-run version counters for every declared channel.
///
/// Invariant: a channel's version increases strictly each time a commit
/// accepts at least one write to it, and versions are never reused. Only the
/// commit barrier calls [`bump`](Self::bump).
#[derive(Clone)]
pub struct ChannelRegistry {
    schema: Arc<ChannelSchema>,
    versions: FxHashMap<String, u64>,
}

impl ChannelRegistry {
    /// Fresh registry with every declared channel at version 0.
    #[must_use]
    pub fn new(schema: Arc<ChannelSchema>) -> Self {
        let versions = schema.names().map(|n| (n.to_string(), 0)).collect();
        Self { schema, versions }
    }

    /// Restore a registry from persisted versions.
    ///
    /// Channels missing from `versions` (added after the checkpoint was
    /// written) start at 0.
    #[must_use]
    pub fn restore(schema: Arc<ChannelSchema>, versions: &FxHashMap<String, u64>) -> Self {
        let versions = schema
            .names()
            .map(|n| (n.to_string(), versions.get(n).copied().unwrap_or(0)))
            .collect();
        Self { schema, versions }
    }

    /// The schema backing this registry.
    #[must_use]
    pub fn schema(&self) -> &Arc<ChannelSchema> {
        &self.schema
    }

    /// Current version of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Unknown`] for undeclared channels.
    pub fn version(&self, name: &str) -> Result<u64, ChannelError> {
        self.versions
            .get(name)
            .copied()
            .ok_or_else(|| ChannelError::Unknown {
                name: name.to_string(),
            })
    }

    /// Snapshot of all versions, keyed by channel name.
    #[must_use]
    pub fn versions(&self) -> FxHashMap<String, u64> {
        self.versions.clone()
    }

    /// The reducer registered for `name`.
    pub fn reducer(&self, name: &str) -> Result<Arc<dyn Reducer>, ChannelError> {
        self.schema
            .get(name)
            .map(|def| Arc::clone(def.reducer()))
            .ok_or_else(|| ChannelError::Unknown {
                name: name.to_string(),
            })
    }

    /// Advance the version of `name` by one, returning the new version.
    ///
    /// Contract: invoked only by the executor's commit barrier, once per
    /// channel per commit, in channel-name order.
    pub fn bump(&mut self, name: &str) -> Result<u64, ChannelError> {
        match self.versions.get_mut(name) {
            Some(v) => {
                *v += 1;
                Ok(*v)
            }
            None => Err(ChannelError::Unknown {
                name: name.to_string(),
            }),
        }
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("versions", &self.versions)
            .finish()
    }
}
