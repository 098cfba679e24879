//! Runtime configuration: store selection, retention, and event bus wiring.
//!
//! The engine core reads no environment; this configuration layer is the
//! seam where wrappers inject durable-backend paths and retention limits.
//! The SQLite database name is resolved from `FLOWGRAPH_SQLITE_DB` (via
//! dotenv) only when a caller has not supplied one explicitly.

use crate::event_bus::{EventBus, EventSink, MemorySink, WriterSink};

/// Selects the backing implementation of the checkpoint store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreType {
    /// Volatile process-local storage. Fast, non-durable; suitable for
    /// tests and ephemeral runs.
    InMemory,
    #[cfg(feature = "sqlite")]
    /// SQLite-backed durable storage keyed by (lineage, namespace, id).
    Sqlite,
}

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Which checkpoint store the runner constructs. `None` means InMemory.
    pub store: Option<StoreType>,
    /// SQLite database file name (ignored by the in-memory store).
    pub sqlite_db_name: Option<String>,
    /// Optional max checkpoints retained per lineage (in-memory store).
    pub max_checkpoints_per_lineage: Option<usize>,
    /// Intra-step node concurrency; defaults to available parallelism.
    pub concurrency_limit: Option<usize>,
    /// Event bus buffer/sink configuration.
    pub event_bus: EventBusConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            store: Some(StoreType::InMemory),
            sqlite_db_name: Self::resolve_sqlite_db_name(None),
            max_checkpoints_per_lineage: None,
            concurrency_limit: None,
            event_bus: EventBusConfig::default(),
        }
    }
}

impl RuntimeConfig {
    fn resolve_sqlite_db_name(provided: Option<String>) -> Option<String> {
        if let Some(name) = provided {
            return Some(name);
        }
        dotenvy::dotenv().ok();
        Some(std::env::var("FLOWGRAPH_SQLITE_DB").unwrap_or_else(|_| "flowgraph.db".to_string()))
    }

    pub fn new(store: Option<StoreType>, sqlite_db_name: Option<String>) -> Self {
        Self {
            store,
            sqlite_db_name: Self::resolve_sqlite_db_name(sqlite_db_name),
            max_checkpoints_per_lineage: None,
            concurrency_limit: None,
            event_bus: EventBusConfig::default(),
        }
    }

    #[must_use]
    pub fn with_event_bus(mut self, event_bus: EventBusConfig) -> Self {
        self.event_bus = event_bus;
        self
    }

    #[must_use]
    pub fn with_retention(mut self, max_checkpoints_per_lineage: usize) -> Self {
        self.max_checkpoints_per_lineage = Some(max_checkpoints_per_lineage);
        self
    }

    #[must_use]
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }
}

/// Which built-in sinks the runner attaches to its event bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkConfig {
    StdOut,
    Memory,
}

#[derive(Clone, Debug)]
pub struct EventBusConfig {
    pub buffer_capacity: usize,
    pub sinks: Vec<SinkConfig>,
}

impl EventBusConfig {
    pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

    #[must_use]
    pub fn new(buffer_capacity: usize, sinks: Vec<SinkConfig>) -> Self {
        Self {
            buffer_capacity: if buffer_capacity == 0 {
                Self::DEFAULT_BUFFER_CAPACITY
            } else {
                buffer_capacity
            },
            sinks,
        }
    }

    /// No sinks; events reach subscribers only.
    #[must_use]
    pub fn subscribers_only() -> Self {
        Self::new(Self::DEFAULT_BUFFER_CAPACITY, vec![])
    }

    #[must_use]
    pub fn with_stdout_only() -> Self {
        Self::new(Self::DEFAULT_BUFFER_CAPACITY, vec![SinkConfig::StdOut])
    }

    #[must_use]
    pub fn with_memory_sink() -> Self {
        Self::new(
            Self::DEFAULT_BUFFER_CAPACITY,
            vec![SinkConfig::StdOut, SinkConfig::Memory],
        )
    }

    #[must_use]
    pub fn add_sink(mut self, sink: SinkConfig) -> Self {
        if !self.sinks.contains(&sink) {
            self.sinks.push(sink);
        }
        self
    }

    /// Build an [`EventBus`] from this configuration.
    #[must_use]
    pub fn build_event_bus(&self) -> EventBus {
        let sinks: Vec<Box<dyn EventSink>> = self
            .sinks
            .iter()
            .map(|sink| -> Box<dyn EventSink> {
                match sink {
                    SinkConfig::StdOut => Box::new(WriterSink::stdout()),
                    SinkConfig::Memory => Box::new(MemorySink::new()),
                }
            })
            .collect();
        EventBus::with_capacity(sinks, self.buffer_capacity)
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self::subscribers_only()
    }
}
