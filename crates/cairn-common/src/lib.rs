//! ---
//! cairn_section: "01-core-functionality"
//! cairn_subsection: "module"
//! cairn_type: "source"
//! cairn_scope: "code"
//! cairn_description: "Shared configuration and tracing primitives."
//! cairn_version: "v0.1.0"
//! cairn_owner: "tbd"
//! ---
//! Shared primitives for the Cairn workspace.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by the persistence engine and the control CLI.

pub mod config;
pub mod logging;

pub use config::{AppConfig, LoadedAppConfig, LoggingConfig, PersistenceConfig};
pub use logging::{init_tracing, LogFormat};
