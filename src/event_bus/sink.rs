//! Output targets for run events.
//!
//! A sink consumes every event a bus delivers to it, on its own drain task.
//! [`WriterSink`] covers file/stdout output in either a human-readable or
//! JSON Lines rendering; [`MemorySink`] captures events for tests;
//! [`ChannelSink`] bridges events into async consumers.

use std::any::type_name;
use std::fs::File;
use std::io::{self, Result as IoResult, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex as ParkingMutex;

use super::event::RunEvent;

/// Abstraction over an output target that consumes full [`RunEvent`]s.
pub trait EventSink: Sync + Send {
    /// Handle a structured event. The sink decides how to format it.
    ///
    /// Implementations are allowed to perform blocking I/O; each sink runs
    /// on its own drain task and cannot stall the step loop.
    fn handle(&mut self, event: &RunEvent) -> IoResult<()>;

    /// A stable, human-friendly identifier for this sink instance.
    fn name(&self) -> String {
        type_name::<Self>().to_string()
    }
}

/// Rendering used by a [`WriterSink`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkFormat {
    /// The event's display form, one event per line.
    Text,
    /// JSON Lines: one JSON object per line, for log aggregation and
    /// automated assertions over run transcripts.
    JsonLines,
}

/// Writes events to any `Write` target in the chosen format.
///
/// One type covers the stdout and file cases:
///
/// ```rust,no_run
/// use flowgraph::event_bus::{EventBus, WriterSink};
///
/// // Human-readable server log on stdout.
/// let bus = EventBus::with_sink(WriterSink::stdout());
///
/// // Machine-readable transcript on disk.
/// let sink = WriterSink::json_file("events.jsonl").unwrap();
/// ```
pub struct WriterSink {
    target: Box<dyn Write + Send + Sync>,
    format: SinkFormat,
}

impl WriterSink {
    /// Write to a custom target in the given format.
    pub fn new(target: Box<dyn Write + Send + Sync>, format: SinkFormat) -> Self {
        Self { target, format }
    }

    /// Human-readable lines on stdout.
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()), SinkFormat::Text)
    }

    /// JSON Lines on stdout.
    pub fn json_stdout() -> Self {
        Self::new(Box::new(io::stdout()), SinkFormat::JsonLines)
    }

    /// JSON Lines appended to a file (created or truncated).
    pub fn json_file(path: impl AsRef<Path>) -> IoResult<Self> {
        let file = File::create(path)?;
        Ok(Self::new(Box::new(file), SinkFormat::JsonLines))
    }
}

impl Default for WriterSink {
    fn default() -> Self {
        Self::stdout()
    }
}

impl EventSink for WriterSink {
    fn handle(&mut self, event: &RunEvent) -> IoResult<()> {
        match self.format {
            SinkFormat::Text => writeln!(self.target, "{event}")?,
            SinkFormat::JsonLines => {
                let json = event
                    .to_json_string()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                writeln!(self.target, "{json}")?;
            }
        }
        self.target.flush()
    }

    fn name(&self) -> String {
        format!("WriterSink({:?})", self.format)
    }
}

/// In-memory sink for testing and snapshots.
#[derive(Clone, Default)]
pub struct MemorySink {
    entries: Arc<ParkingMutex<Vec<RunEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a snapshot of all captured events. Clones the internal buffer so
    /// callers can inspect state without holding the mutex.
    pub fn snapshot(&self) -> Vec<RunEvent> {
        self.entries.lock().clone()
    }

    /// Clear all captured events.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn handle(&mut self, event: &RunEvent) -> IoResult<()> {
        self.entries.lock().push(event.clone());
        Ok(())
    }
}

/// Forwards events into a flume channel for async consumers.
///
/// This is the bridge wrappers use for SSE, WebSocket, dashboards, or
/// centralized logging: hand the receiver to the consumer and register the
/// sink on the runner's bus.
///
/// If the receiver is dropped, `handle()` returns an error which the event
/// bus logs without affecting delivery to other sinks.
pub struct ChannelSink {
    tx: flume::Sender<RunEvent>,
}

impl ChannelSink {
    /// Create a sink forwarding events to the given channel.
    pub fn new(tx: flume::Sender<RunEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn handle(&mut self, event: &RunEvent) -> IoResult<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel receiver dropped"))
    }
}
