//! seqlog daemon implementation

pub mod daemon;
pub mod registry;
pub mod sink;

pub use daemon::{ControlHandle, LogDaemon, StopSignal};
pub use registry::{ClientId, ClientRegistry};
pub use sink::LogSink;
