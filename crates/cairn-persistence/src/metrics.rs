//! ---
//! cairn_section: "03-persistence-logging"
//! cairn_subsection: "module"
//! cairn_type: "source"
//! cairn_scope: "code"
//! cairn_description: "Memento persistence abstractions and storage bindings."
//! cairn_version: "v0.1.0"
//! cairn_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{self, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

use crate::memento::Category;
use crate::Result;

/// Metrics published by the memento persister.
#[derive(Clone)]
pub struct PersistenceMetrics {
    writes: IntCounterVec,
    deletes: IntCounterVec,
    failures: IntCounterVec,
    decode_failures: IntCounterVec,
    load_duration: HistogramVec,
    registry: Arc<Registry>,
}

impl PersistenceMetrics {
    /// Register all persistence metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let writes = IntCounterVec::new(
            Opts::new(
                "cairn_memento_writes_total",
                "Memento files durably replaced",
            ),
            &["category"],
        )?;
        registry.register(Box::new(writes.clone()))?;

        let deletes = IntCounterVec::new(
            Opts::new(
                "cairn_memento_deletes_total",
                "Memento files removed",
            ),
            &["category"],
        )?;
        registry.register(Box::new(deletes.clone()))?;

        let failures = IntCounterVec::new(
            Opts::new(
                "cairn_memento_write_failures_total",
                "Write or delete operations that failed and were skipped",
            ),
            &["category", "operation"],
        )?;
        registry.register(Box::new(failures.clone()))?;

        let decode_failures = IntCounterVec::new(
            Opts::new(
                "cairn_memento_decode_failures_total",
                "Memento files that could not be read or decoded during load",
            ),
            &["category"],
        )?;
        registry.register(Box::new(decode_failures.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "cairn_memento_load_duration_seconds",
            "Time spent scanning the memento store",
        )
        .buckets(prometheus::exponential_buckets(0.001, 2.0, 12)?);
        let load_duration = HistogramVec::new(histogram_opts, &["mode"])?;
        registry.register(Box::new(load_duration.clone()))?;

        Ok(Self {
            writes,
            deletes,
            failures,
            decode_failures,
            load_duration,
            registry,
        })
    }

    /// Metrics bound to a private registry, for callers that do not export them.
    pub fn unregistered() -> Result<Self> {
        Self::new(Arc::new(Registry::new()))
    }

    /// Registry the metrics are attached to.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Record a completed write.
    pub fn record_write(&self, category: Category) {
        self.writes.with_label_values(&[category.dir_name()]).inc();
    }

    /// Record a completed delete.
    pub fn record_delete(&self, category: Category) {
        self.deletes.with_label_values(&[category.dir_name()]).inc();
    }

    /// Record a write-path failure; `operation` is `write` or `delete`.
    pub fn record_failure(&self, category: Category, operation: &str) {
        self.failures
            .with_label_values(&[category.dir_name(), operation])
            .inc();
    }

    /// Record a file skipped by a load.
    pub fn record_decode_failure(&self, category: Category) {
        self.decode_failures
            .with_label_values(&[category.dir_name()])
            .inc();
    }

    /// Observe how long a load took; `mode` is `manifest` or `full`.
    pub fn observe_load_duration(&self, mode: &str, seconds: f64) {
        self.load_duration.with_label_values(&[mode]).observe(seconds);
    }
}

impl std::fmt::Debug for PersistenceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceMetrics").finish_non_exhaustive()
    }
}
