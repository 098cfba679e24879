//! Tracing bootstrap for binaries embedding the engine.
//!
//! The engine itself only emits `tracing` events and spans; wiring a
//! subscriber is the embedding application's job. [`init_tracing`] installs
//! a sensible default: env-filtered fmt output plus span-trace capture so
//! errors carry their async context.

use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the default global subscriber.
///
/// Filtering follows `RUST_LOG`, defaulting to `info`. Calling this more
/// than once is harmless; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(ErrorLayer::default())
        .try_init();
}
