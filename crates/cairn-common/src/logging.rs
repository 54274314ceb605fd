//! ---
//! cairn_section: "01-core-functionality"
//! cairn_subsection: "module"
//! cairn_type: "source"
//! cairn_scope: "code"
//! cairn_description: "Shared configuration and tracing primitives."
//! cairn_version: "v0.1.0"
//! cairn_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "CAIRN_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

/// Flush guards for the non-blocking writers; dropping them loses buffered lines.
static GUARDS: OnceCell<[WorkerGuard; 2]> = OnceCell::new();

/// Console output format. The rolling file is always JSON.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

impl LoggingConfig {
    /// File name handed to the daily appender, which appends the date.
    pub fn log_file_name(&self, service_name: &str) -> String {
        let prefix = self.file_prefix.as_deref().unwrap_or(service_name);
        format!("{prefix}.log")
    }
}

/// Pick the filter directive: `CAIRN_LOG`, then `RUST_LOG`, then `info`.
///
/// An unparsable `CAIRN_LOG` is reported on stderr and ignored.
fn filter_from(cairn_log: Option<String>, rust_log: Option<String>) -> EnvFilter {
    if let Some(directive) = cairn_log.filter(|d| !d.trim().is_empty()) {
        match EnvFilter::try_new(&directive) {
            Ok(filter) => return filter,
            Err(err) => eprintln!("ignoring invalid {LOG_ENV}={directive:?}: {err}"),
        }
    }
    rust_log
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Install the process-wide subscriber for a Cairn service.
///
/// Events go to stderr in `config.format` and to a daily JSON file under
/// `config.directory`. A second call keeps the first subscriber.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;
    let file_appender = daily(&config.directory, config.log_file_name(service_name));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (console_writer, console_guard) = tracing_appender::non_blocking(std::io::stderr());
    let _ = GUARDS.set([file_guard, console_guard]);

    let console_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .json()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(console_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(console_writer)
            .boxed(),
    };
    let file_layer = fmt::layer()
        .json()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(file_writer)
        .boxed();

    let filter = filter_from(std::env::var(LOG_ENV).ok(), std::env::var("RUST_LOG").ok());
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    info!(
        service = %service_name,
        log_dir = %config.directory.display(),
        format = ?config.format,
        "tracing initialised"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn init_creates_log_directory() {
        let dir = tempdir().unwrap();
        let config = LoggingConfig {
            directory: dir.path().join("logs"),
            format: LogFormat::Pretty,
            file_prefix: Some("cairn-test".to_owned()),
        };
        init_tracing("cairn-test", &config).unwrap();
        assert!(config.directory.is_dir());
    }

    #[test]
    fn file_prefix_defaults_to_service_name() {
        let mut config = LoggingConfig::default();
        assert_eq!(config.log_file_name("cairnctl"), "cairnctl.log");
        config.file_prefix = Some("controller".to_owned());
        assert_eq!(config.log_file_name("cairnctl"), "controller.log");
    }

    #[test]
    fn cairn_log_takes_precedence_over_rust_log() {
        let filter = filter_from(Some("cairn_persistence=trace".into()), Some("warn".into()));
        assert_eq!(filter.to_string(), "cairn_persistence=trace");

        let filter = filter_from(None, Some("warn".into()));
        assert_eq!(filter.to_string(), "warn");

        let filter = filter_from(Some("cairn=loud".into()), None);
        assert_eq!(filter.to_string(), DEFAULT_DIRECTIVE);

        let filter = filter_from(Some("  ".into()), None);
        assert_eq!(filter.to_string(), DEFAULT_DIRECTIVE);
    }
}
