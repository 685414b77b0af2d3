//! Lightweight event bus for run-scoped progress reporting.
//!
//! Nodes emit [`Event`]s through their context; the [`EventBus`] fans them
//! out to configured [`EventSink`]s on a listener scoped to one run
//! ([`RunListener`]), which drains queued events when the run closes it.
//! The bus is deliberately decoupled from `tracing`: tracing carries
//! operational telemetry, while bus events are the workflow-level
//! narrative a caller may want to surface to end users.

pub mod bus;
pub mod event;
pub mod sink;

pub use bus::{EventBus, RunListener};
pub use event::{DiagnosticEvent, Event, NodeEvent};
pub use sink::{ChannelSink, EventSink, MemorySink, StdOutSink};
