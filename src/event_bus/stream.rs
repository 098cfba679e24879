//! Consumer half of a run's event feed.

use std::time::Duration;

use futures_util::stream::{BoxStream, StreamExt};

use super::event::RunEvent;

/// An ordered feed of [`RunEvent`]s from one bus subscription.
///
/// Each subscriber owns a private bounded queue; the bus pushes every event
/// into it at emit time, so a stream sees events in emission order. The
/// feed ends (all `recv` variants return `None`) once the bus closes its
/// subscriber side and the queue drains, which happens right after the
/// terminal `Done` event of a run.
#[derive(Debug)]
pub struct EventStream {
    feed: flume::Receiver<RunEvent>,
}

impl EventStream {
    pub(crate) fn new(feed: flume::Receiver<RunEvent>) -> Self {
        Self { feed }
    }

    /// Await the next event; `None` once the feed has closed and drained.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        self.feed.recv_async().await.ok()
    }

    /// Non-blocking poll for an already-queued event.
    pub fn try_recv(&mut self) -> Option<RunEvent> {
        self.feed.try_recv().ok()
    }

    /// Await the next event with a deadline. `None` on close or timeout.
    pub async fn next_timeout(&mut self, duration: Duration) -> Option<RunEvent> {
        tokio::time::timeout(duration, self.feed.recv_async())
            .await
            .ok()
            .and_then(Result::ok)
    }

    /// Drain the feed until it closes, collecting every event.
    ///
    /// Intended for tests and simple callers; long-running consumers should
    /// prefer [`recv`](Self::recv) or
    /// [`into_async_stream`](Self::into_async_stream).
    pub async fn collect(self) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.feed.recv_async().await {
            events.push(event);
        }
        events
    }

    /// Convert into a boxed async stream for combinator pipelines.
    pub fn into_async_stream(self) -> BoxStream<'static, RunEvent> {
        self.feed.into_stream().boxed()
    }
}
