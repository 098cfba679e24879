//! Run event streaming: emitters, subscriber feeds, and sinks.
//!
//! [`EventBus`] fans every emitted [`RunEvent`] out to bounded subscriber
//! feeds (consumed as [`EventStream`]s) and to per-sink drain tasks. Event
//! kinds and their ordering guarantees are documented on [`RunEvent`].

pub mod bus;
pub mod event;
pub mod sink;
pub mod stream;

pub use bus::{EmitterError, EventBus, EventEmitter};
pub use event::RunEvent;
pub use sink::{ChannelSink, EventSink, MemorySink, SinkFormat, WriterSink};
pub use stream::EventStream;
