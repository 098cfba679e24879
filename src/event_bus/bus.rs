//! The event bus: emitter handles, subscriber feeds, and sink drains.
//!
//! The bus keeps a registry of outbound feeds and pushes each emitted event
//! into all of them:
//!
//! - **Subscriber feeds** are bounded queues backing [`EventStream`]s. A
//!   full queue means the subscriber has fallen behind; the event is
//!   counted as dropped for that feed rather than blocking the runner.
//! - **Sink feeds** are unbounded queues, each drained by a dedicated task
//!   that owns its [`EventSink`]. Slow sinks therefore delay their own
//!   output but never lose events and never stall execution.
//!
//! The bus is a runtime concern owned by the
//! [`GraphRunner`](crate::runtimes::GraphRunner), not by the compiled
//! graph, so one graph can be shared across runners with different event
//! wiring (e.g. one bus per HTTP client connection).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;

use super::event::RunEvent;
use super::sink::{EventSink, WriterSink};
use super::stream::EventStream;

const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1024;

/// Handle for pushing events onto a bus. Cloned freely into node contexts
/// and scheduler tasks.
pub trait EventEmitter: Send + Sync + fmt::Debug {
    /// Deliver an event to every feed. Never blocks.
    fn emit(&self, event: RunEvent) -> Result<(), EmitterError>;
}

/// The bus has shut down; the event was not delivered.
#[derive(Debug, thiserror::Error)]
#[error("event bus shut down")]
pub struct EmitterError;

/// Fan-out state shared between the bus, its emitter handles, and sink
/// drain tasks.
struct FeedRegistry {
    /// Bounded queues backing live [`EventStream`]s. Feeds whose receiver
    /// is gone are pruned on the next emit.
    subscribers: RwLock<Vec<flume::Sender<RunEvent>>>,
    /// Unbounded queues feeding sink drain tasks.
    sink_feeds: RwLock<Vec<flume::Sender<RunEvent>>>,
    subscriber_capacity: usize,
    /// Events discarded because a subscriber feed was full.
    dropped: AtomicUsize,
    /// Cleared by [`EventBus::shut_down`]; emits fail afterwards.
    open: AtomicBool,
}

impl FeedRegistry {
    fn deliver(&self, event: &RunEvent) -> Result<(), EmitterError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(EmitterError);
        }

        {
            let mut subscribers = self.subscribers.write();
            subscribers.retain(|feed| match feed.try_send(event.clone()) {
                Ok(()) => true,
                Err(flume::TrySendError::Full(_)) => {
                    // The subscriber is lagging; charge the drop to it and
                    // keep the feed alive so it can catch up.
                    let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(
                        target: "flowgraph::event_bus",
                        total_dropped = total,
                        "subscriber feed full; event dropped"
                    );
                    true
                }
                Err(flume::TrySendError::Disconnected(_)) => false,
            });
        }

        for feed in self.sink_feeds.read().iter() {
            let _ = feed.send(event.clone());
        }
        Ok(())
    }
}

/// Cloneable emitter handle backed by the bus's feed registry.
#[derive(Clone)]
struct BusEmitter {
    registry: Arc<FeedRegistry>,
}

impl fmt::Debug for BusEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusEmitter").finish()
    }
}

impl EventEmitter for BusEmitter {
    fn emit(&self, event: RunEvent) -> Result<(), EmitterError> {
        self.registry.deliver(&event)
    }
}

/// Central event fan-out for run events.
///
/// ```text
/// Runner / Nodes
///     │ emit()
///     ▼
/// FeedRegistry ──► subscriber queues ──► EventStream consumers
///     │
///     └──► sink queues ──► drain tasks ──► StdOut / Memory / Channel / ...
/// ```
pub struct EventBus {
    registry: Arc<FeedRegistry>,
    /// Sinks registered before the drain tasks were started.
    parked_sinks: Mutex<Vec<Box<dyn EventSink>>>,
    drains: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_sink(WriterSink::stdout())
    }
}

impl EventBus {
    pub fn with_sink<T>(sink: T) -> Self
    where
        T: EventSink + 'static,
    {
        Self::with_sinks(vec![Box::new(sink)])
    }

    pub fn with_sinks(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self::with_capacity(sinks, DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub(crate) fn with_capacity(sinks: Vec<Box<dyn EventSink>>, subscriber_capacity: usize) -> Self {
        Self {
            registry: Arc::new(FeedRegistry {
                subscribers: RwLock::new(Vec::new()),
                sink_feeds: RwLock::new(Vec::new()),
                subscriber_capacity: subscriber_capacity.max(1),
                dropped: AtomicUsize::new(0),
                open: AtomicBool::new(true),
            }),
            parked_sinks: Mutex::new(sinks),
            drains: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Cloneable emitter handle for the runner and node contexts.
    pub fn get_emitter(&self) -> Arc<dyn EventEmitter> {
        Arc::new(BusEmitter {
            registry: Arc::clone(&self.registry),
        })
    }

    /// Open a new subscriber feed.
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = flume::bounded(self.registry.subscriber_capacity);
        self.registry.subscribers.write().push(tx);
        EventStream::new(rx)
    }

    /// Register an additional sink. If the drains are already running, the
    /// sink starts consuming immediately; otherwise it is parked until
    /// [`listen_for_events`](Self::listen_for_events).
    pub fn add_sink<T: EventSink + 'static>(&self, sink: T) {
        self.add_boxed_sink(Box::new(sink));
    }

    pub fn add_boxed_sink(&self, sink: Box<dyn EventSink>) {
        if self.started.load(Ordering::SeqCst) {
            self.spawn_drain(sink);
        } else {
            self.parked_sinks.lock().push(sink);
        }
    }

    /// Start one drain task per registered sink.
    pub fn listen_for_events(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let parked: Vec<Box<dyn EventSink>> = self.parked_sinks.lock().drain(..).collect();
        for sink in parked {
            self.spawn_drain(sink);
        }
    }

    fn spawn_drain(&self, mut sink: Box<dyn EventSink>) {
        let (tx, rx) = flume::unbounded();
        self.registry.sink_feeds.write().push(tx);
        let name = sink.name();
        let handle = tokio::spawn(async move {
            while let Ok(event) = rx.recv_async().await {
                if let Err(err) = sink.handle(&event) {
                    tracing::warn!(sink = %name, error = %err, "event sink error");
                }
            }
        });
        self.drains.lock().push(handle);
    }

    /// End all current subscriber feeds; their streams drain and close.
    /// Sinks keep running and the bus stays usable for later runs.
    pub fn close_channel(&self) {
        self.registry.subscribers.write().clear();
    }

    /// Total events dropped from lagging subscriber feeds.
    pub fn dropped(&self) -> usize {
        self.registry.dropped.load(Ordering::Relaxed)
    }

    /// Stop the bus entirely: further emits fail, subscriber feeds close,
    /// and sink drains finish their backlogs before returning.
    pub async fn shut_down(&self) {
        self.registry.open.store(false, Ordering::SeqCst);
        self.registry.subscribers.write().clear();
        self.registry.sink_feeds.write().clear();
        let drains: Vec<JoinHandle<()>> = self.drains.lock().drain(..).collect();
        for drain in drains {
            let _ = drain.await;
        }
        self.started.store(false, Ordering::SeqCst);
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        // Dropping the registry's senders ends the drain loops; aborting
        // covers a backlog still being flushed at teardown.
        self.registry.sink_feeds.write().clear();
        for drain in self.drains.lock().iter() {
            drain.abort();
        }
    }
}
