//! ---
//! cairn_section: "03-persistence-logging"
//! cairn_subsection: "module"
//! cairn_type: "source"
//! cairn_scope: "code"
//! cairn_description: "Structured logging adapters and sinks."
//! cairn_version: "v0.1.0"
//! cairn_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Memento-aware log context and macros shared by Cairn crates.
//!
//! Every event carries the same four fields (`category`, `memento`, `node`,
//! `operation`) so that a store's log can be filtered down to one file or one
//! controller regardless of which crate emitted it.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

#[doc(hidden)]
pub use tracing as __tracing;

/// Stderr subscriber for tools that run without a logging configuration.
///
/// Stdout stays reserved for command output.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Fields attached to every event emitted through the `cairn_*` macros.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LogContext<'a> {
    /// Store subdirectory (`entities`, `locations`, `policies`).
    pub category: Option<&'a str>,
    /// Memento id, which is also the file name.
    pub memento: Option<&'a str>,
    /// Configured name of the controller that owns the store.
    pub node: Option<&'a str>,
    /// `write`, `delete`, `load`, `stop`, ...
    pub operation: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context naming one memento file.
    pub fn memento(category: &'a str, id: &'a str) -> Self {
        Self::new().with_category(category).with_memento(id)
    }

    /// Set the store subdirectory.
    pub fn with_category(mut self, category: &'a str) -> Self {
        self.category = Some(category);
        self
    }

    /// Set the memento id.
    pub fn with_memento(mut self, memento: &'a str) -> Self {
        self.memento = Some(memento);
        self
    }

    /// Set the controller node; `None` leaves the field empty.
    pub fn with_node(mut self, node: impl Into<Option<&'a str>>) -> Self {
        self.node = node.into();
        self
    }

    /// Set the operation name.
    pub fn with_operation(mut self, operation: &'a str) -> Self {
        self.operation = Some(operation);
        self
    }
}

/// Outcome recorded on lifecycle events such as `persister.open` and `persister.stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// Logged at INFO.
    Success,
    /// Logged at ERROR.
    Fault,
}

impl SystemEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a lifecycle event named `event` (for example `persister.stop`).
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let ctx = context.copied().unwrap_or_default();
    match outcome {
        SystemEventOutcome::Success => crate::__cairn_event!(
            Level::INFO,
            ctx,
            event,
            outcome = outcome.as_str(),
            message = %message
        ),
        SystemEventOutcome::Fault => crate::__cairn_event!(
            Level::ERROR,
            ctx,
            event,
            outcome = outcome.as_str(),
            message = %message
        ),
    }
}
