//! Tracing setup with a runtime-adjustable level.
//!
//! The daemon's verbosity comes from its configuration file rather than the
//! environment, and a reload may change it while the process runs. The
//! level therefore lives behind a [`reload`] layer and the daemon keeps a
//! [`LevelHandle`] to swap it in place.

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, Registry};

/// Handle for adjusting the active log level after startup
pub type LevelHandle = reload::Handle<LevelFilter, Registry>;

/// Install the global subscriber with `level` as the initial verbosity.
///
/// Returns the handle used to change the level later.
///
/// # Panics
///
/// Panics if a global subscriber is already installed. The daemon calls
/// this exactly once, before anything logs.
pub fn init(level: LevelFilter) -> LevelHandle {
    let (filter, handle) = reload::Layer::new(level);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
    handle
}

/// Swap the active log level through a reload handle.
///
/// Fails only when the subscriber the handle points at is gone.
pub fn apply(handle: &LevelHandle, level: LevelFilter) -> Result<(), reload::Error> {
    handle.modify(|filter| *filter = level)
}
