//! `hertz-runtime` – The reconciliation engine
//!
//! Turns a declared peripheral tree into correctly ordered hardware
//! operations and keeps observed values flowing back to the declaration.
//!
//! # Modules
//!
//! - [`signal`] – [`Signal`][signal::Signal]: the per-node single-slot
//!   completion that chains every operation on a node after the previous one.
//! - [`registry`] – [`NodeRegistry`][registry::NodeRegistry]: the declared
//!   topology plus the flat live-instance list, shared by the orchestrator and
//!   the poller.
//! - [`orchestrator`] – [`Orchestrator`][orchestrator::Orchestrator]:
//!   schedules init, update, command and removal per node, enforcing
//!   parent-before-child init and ordered teardown.
//! - [`poller`] – [`Poller`][poller::Poller]: the round-robin change-detection
//!   loop that queries one `Ready` instance per tick.
//! - [`bus`] – [`EventBus`][bus::EventBus]: broadcasts lifecycle outcomes to
//!   any number of subscribers.
//! - [`source`] – [`DeclarationSource`][source::DeclarationSource]: the
//!   abstract producer of tree-diff operations.
//! - [`reconciler`] – [`Reconciler`][reconciler::Reconciler]: wires the above
//!   together and drives a source until shutdown.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with an optional OTLP span exporter.

pub mod bus;
pub mod orchestrator;
pub mod poller;
pub mod reconciler;
pub mod registry;
pub mod signal;
pub mod source;
pub mod telemetry;

pub use bus::{EventBus, NodeSubscriber};
pub use orchestrator::Orchestrator;
pub use poller::Poller;
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use registry::{AttachPoint, NodeRegistry, SharedRegistry};
pub use signal::{Completion, Signal};
pub use source::DeclarationSource;
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
