//! ---
//! cairn_section: "03-persistence-logging"
//! cairn_subsection: "module"
//! cairn_type: "source"
//! cairn_scope: "code"
//! cairn_description: "Memento persistence abstractions and storage bindings."
//! cairn_version: "v0.1.0"
//! cairn_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cairn_common::PersistenceConfig;
use cairn_logging::{
    cairn_debug, cairn_error, cairn_warn, log_system_event, LogContext, SystemEventOutcome,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::loader::{LookupContext, MementoLoader};
use crate::memento::{Category, Delta, Memento, MementoGraph, MementoManifest};
use crate::metrics::PersistenceMetrics;
use crate::serializer::{JsonMementoCodec, MementoCodec, RetryingCodec};
use crate::store::MementoStore;
use crate::writer::{MementoFileWriter, WriterPool};
use crate::{PersistenceError, Result};

/// Lifecycle of a [`MementoPersister`]; the only transition is `Running → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersisterState {
    /// Accepting writes and loads.
    Running,
    /// Writes are ignored and loads fail.
    Stopped,
}

/// Facade over a memento store: checkpoint, delta, load, drain and stop.
pub struct MementoPersister {
    store: MementoStore,
    codec: Arc<dyn MementoCodec>,
    loader: MementoLoader,
    metrics: Arc<PersistenceMetrics>,
    writers: DashMap<(Category, String), Arc<MementoFileWriter>>,
    pool: WriterPool,
    state: RwLock<PersisterState>,
    shutdown_timeout: Duration,
    node: Option<Arc<str>>,
}

impl MementoPersister {
    /// Open a persister over `dir` with default settings.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::from_config(&PersistenceConfig::for_directory(dir), None)
    }

    /// Open a persister from configuration, publishing to `metrics` when given.
    pub fn from_config(
        config: &PersistenceConfig,
        metrics: Option<Arc<PersistenceMetrics>>,
    ) -> Result<Self> {
        let codec = RetryingCodec::new(JsonMementoCodec, config.max_serialization_attempts);
        Self::with_codec(config, Arc::new(codec), metrics)
    }

    /// Like [`MementoPersister::from_config`] with a caller-supplied codec.
    ///
    /// `max_serialization_attempts` is ignored; wrap `codec` in a
    /// [`RetryingCodec`] to retry.
    pub fn with_codec(
        config: &PersistenceConfig,
        codec: Arc<dyn MementoCodec>,
        metrics: Option<Arc<PersistenceMetrics>>,
    ) -> Result<Self> {
        let store = MementoStore::open(&config.directory)?;
        if config.sweep_temp_files {
            store.sweep_temp_files()?;
        }
        let metrics = match metrics {
            Some(metrics) => metrics,
            None => Arc::new(PersistenceMetrics::unregistered()?),
        };
        let node: Option<Arc<str>> = config.node.as_deref().map(Arc::from);
        let pool = WriterPool::new(config.worker_threads.filter(|threads| *threads > 0))?;
        let loader = MementoLoader::new(store.clone(), codec.clone(), metrics.clone())
            .with_node(node.clone());

        log_system_event(
            Some(&LogContext::new().with_node(node.as_deref()).with_operation("open")),
            "persister.open",
            &format!("memento persister opened at {}", store.root().display()),
            SystemEventOutcome::Success,
        );
        Ok(Self {
            store,
            codec,
            loader,
            metrics,
            writers: DashMap::new(),
            pool,
            state: RwLock::new(PersisterState::Running),
            shutdown_timeout: config.shutdown_timeout,
            node,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PersisterState {
        *self.state.read()
    }

    /// Whether the persister still accepts work.
    pub fn is_running(&self) -> bool {
        self.state() == PersisterState::Running
    }

    /// Store root directory.
    pub fn dir(&self) -> &Path {
        self.store.root()
    }

    /// Underlying store layout.
    pub fn store(&self) -> &MementoStore {
        &self.store
    }

    /// Number of per-object writers created so far.
    pub fn writer_count(&self) -> usize {
        self.writers.len()
    }

    /// Sum of failed operations across all writers.
    pub fn failed_operations(&self) -> u64 {
        self.writers
            .iter()
            .map(|entry| entry.value().failure_count())
            .sum()
    }

    /// Write every memento in `graph`. Objects missing from the graph are left alone.
    pub fn checkpoint(&self, graph: &MementoGraph) {
        // Held while submitting so `stop` cannot shut the pool down mid-batch.
        let state = self.state.read();
        if *state != PersisterState::Running {
            cairn_debug!(
                context = self.context("checkpoint"),
                "ignoring checkpoint of {} mementos; persister stopped",
                graph.len()
            );
            return;
        }
        for memento in graph.mementos() {
            self.persist(memento);
        }
    }

    /// Persist the upserts of `delta`, then delete its removals.
    pub fn delta(&self, delta: &Delta) {
        let state = self.state.read();
        if *state != PersisterState::Running {
            cairn_debug!(
                context = self.context("delta"),
                "ignoring delta of {} upserts and {} removals; persister stopped",
                delta.upsert_count(),
                delta.removal_count()
            );
            return;
        }
        for memento in delta.upserts() {
            self.persist(memento);
        }
        for category in Category::MEMENTOS {
            for id in delta.removed_ids(category) {
                self.remove(category, id);
            }
        }
    }

    /// Id → type inventory of the store.
    pub fn load_memento_manifest(&self) -> Result<MementoManifest> {
        self.ensure_running("load memento manifest")?;
        self.loader.load_manifest()
    }

    /// Full memento graph, resolving leftover references through `lookup`.
    pub fn load_memento(&self, lookup: &dyn LookupContext) -> Result<MementoGraph> {
        self.ensure_running("load mementos")?;
        self.loader.load_full(lookup)
    }

    /// Block until every writer has drained, or `timeout` elapses across all of them.
    pub fn wait_for_writes_completed(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now().checked_add(timeout);
        let writers: Vec<Arc<MementoFileWriter>> = self
            .writers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for writer in writers {
            writer.wait_until(deadline, timeout)?;
        }
        Ok(())
    }

    /// Stop accepting work and shut the writer pool down once outstanding writes finish.
    ///
    /// Waits at most the configured shutdown timeout. Writes still queued
    /// after that keep running in the background; none are cancelled.
    /// Calling `stop` again is a no-op.
    pub fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state == PersisterState::Stopped {
                return Ok(());
            }
            *state = PersisterState::Stopped;
            self.close_writers();
        }
        let ctx = self.context("stop");
        match self.pool.shutdown(self.shutdown_timeout) {
            Ok(drained) => {
                if !drained {
                    cairn_warn!(
                        context = ctx,
                        "writes still pending after {:?}; finishing them in the background",
                        self.shutdown_timeout
                    );
                }
                log_system_event(
                    Some(&ctx),
                    "persister.stop",
                    "memento persister stopped",
                    SystemEventOutcome::Success,
                );
                Ok(())
            }
            Err(err) => {
                log_system_event(
                    Some(&ctx),
                    "persister.stop",
                    &format!("memento persister stop interrupted: {err}"),
                    SystemEventOutcome::Fault,
                );
                Err(err)
            }
        }
    }

    fn close_writers(&self) {
        for entry in self.writers.iter() {
            entry.value().close();
        }
    }

    fn context(&self, operation: &'static str) -> LogContext<'_> {
        LogContext::new()
            .with_node(self.node.as_deref())
            .with_operation(operation)
    }

    fn ensure_running(&self, operation: &'static str) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(PersistenceError::NotRunning(operation))
        }
    }

    fn writer_for(&self, category: Category, id: &str) -> Result<Arc<MementoFileWriter>> {
        match self.writers.entry((category, id.to_owned())) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let writer = Arc::new(MementoFileWriter::spawn(
                    &self.pool,
                    &self.store,
                    category,
                    id,
                    self.codec.clone(),
                    self.metrics.clone(),
                    self.node.clone(),
                )?);
                entry.insert(writer.clone());
                Ok(writer)
            }
        }
    }

    fn persist(&self, memento: Memento) {
        let category = memento.category();
        let id = memento.id().to_owned();
        if let Err(err) = self
            .writer_for(category, &id)
            .and_then(|writer| writer.write(memento))
        {
            self.report(category, &id, "write", &err);
        }
    }

    fn remove(&self, category: Category, id: &str) {
        if let Err(err) = self
            .writer_for(category, id)
            .and_then(|writer| writer.delete())
        {
            self.report(category, id, "delete", &err);
        }
    }

    fn report(&self, category: Category, id: &str, operation: &'static str, err: &PersistenceError) {
        self.metrics.record_failure(category, operation);
        cairn_error!(
            context = LogContext::memento(category.dir_name(), id)
                .with_node(self.node.as_deref())
                .with_operation(operation),
            "unable to submit memento {}: {}",
            operation,
            err
        );
    }
}

impl Drop for MementoPersister {
    fn drop(&mut self) {
        // The pool, dropped after this, drains the closed writers on a detached thread.
        if *self.state.get_mut() == PersisterState::Running {
            *self.state.get_mut() = PersisterState::Stopped;
            self.close_writers();
            cairn_debug!(
                context = self.context("drop"),
                "persister dropped while running; finishing {} writers in the background",
                self.writers.len()
            );
        }
    }
}

impl std::fmt::Debug for MementoPersister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MementoPersister")
            .field("root", &self.store.root())
            .field("state", &self.state())
            .field("writers", &self.writers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::NoLookup;
    use crate::memento::{EntityMemento, LocationMemento};
    use tempfile::tempdir;

    const DRAIN: Duration = Duration::from_secs(5);

    #[test]
    fn stop_is_one_way_and_idempotent() {
        let dir = tempdir().unwrap();
        let persister = MementoPersister::open(dir.path()).unwrap();
        assert_eq!(persister.state(), PersisterState::Running);
        assert_eq!(persister.dir(), dir.path());

        persister.stop().unwrap();
        assert_eq!(persister.state(), PersisterState::Stopped);
        persister.stop().unwrap();
        assert!(!persister.is_running());
    }

    #[test]
    fn loads_fail_after_stop() {
        let dir = tempdir().unwrap();
        let persister = MementoPersister::open(dir.path()).unwrap();
        persister.stop().unwrap();

        assert!(matches!(
            persister.load_memento_manifest(),
            Err(PersistenceError::NotRunning(_))
        ));
        assert!(matches!(
            persister.load_memento(&NoLookup),
            Err(PersistenceError::NotRunning(_))
        ));
    }

    #[test]
    fn writers_are_reused_per_object() {
        let dir = tempdir().unwrap();
        let persister = MementoPersister::open(dir.path()).unwrap();
        let graph = MementoGraph::new()
            .with(EntityMemento::new("e1", "AppServer"))
            .with(LocationMemento::new("e1", "Localhost"));
        persister.checkpoint(&graph);
        persister.checkpoint(&graph);
        persister.wait_for_writes_completed(DRAIN).unwrap();

        assert_eq!(persister.writer_count(), 2);
        assert_eq!(persister.load_memento_manifest().unwrap().len(), 2);
        persister.stop().unwrap();
    }

    #[test]
    fn invalid_ids_are_skipped() {
        let dir = tempdir().unwrap();
        let persister = MementoPersister::open(dir.path()).unwrap();
        let graph = MementoGraph::new()
            .with(EntityMemento::new("../escape", "AppServer"))
            .with(EntityMemento::new("ok", "AppServer"));
        persister.checkpoint(&graph);
        persister.delta(&Delta::new().remove(Category::Policies, ""));
        persister.wait_for_writes_completed(DRAIN).unwrap();

        assert_eq!(persister.writer_count(), 1);
        let manifest = persister.load_memento_manifest().unwrap();
        assert_eq!(manifest.entity_ids_to_type().len(), 1);
        assert!(manifest.entity_ids_to_type().contains_key("ok"));
        assert!(!dir.path().join("escape").exists());
        persister.stop().unwrap();
    }

    #[test]
    fn construction_sweeps_stale_temp_files() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("entities")).unwrap();
        let stale = dir.path().join("entities").join("e1.tmp");
        std::fs::write(&stale, "{").unwrap();

        let persister = MementoPersister::open(dir.path()).unwrap();
        assert!(!stale.exists());
        persister.stop().unwrap();
    }

    #[test]
    fn configured_node_reaches_every_log_context() {
        let dir = tempdir().unwrap();
        let mut config = PersistenceConfig::for_directory(dir.path());
        config.node = Some("standby-b".to_owned());
        let persister = MementoPersister::from_config(&config, None).unwrap();
        assert_eq!(persister.context("stop").node, Some("standby-b"));
        assert_eq!(persister.loader.context("load").node, Some("standby-b"));

        persister.checkpoint(&MementoGraph::new().with(EntityMemento::new("e1", "AppServer")));
        persister.wait_for_writes_completed(DRAIN).unwrap();
        assert!(persister.writers.iter().all(|entry| entry.value().node() == Some("standby-b")));
        persister.stop().unwrap();

        let unnamed = MementoPersister::open(dir.path()).unwrap();
        assert_eq!(unnamed.context("stop").node, None);
        unnamed.stop().unwrap();
    }

    #[test]
    fn stop_closes_every_writer() {
        let dir = tempdir().unwrap();
        let persister = MementoPersister::open(dir.path()).unwrap();
        persister.checkpoint(
            &MementoGraph::new()
                .with(EntityMemento::new("e1", "AppServer"))
                .with(LocationMemento::new("loc1", "Localhost")),
        );
        persister.stop().unwrap();

        assert!(persister.writers.iter().all(|entry| entry.value().is_closed()));
        assert!(dir.path().join("entities").join("e1").exists());
        assert!(dir.path().join("locations").join("loc1").exists());
    }

    #[test]
    fn rejects_missing_directory() {
        let dir = tempdir().unwrap();
        let err = MementoPersister::open(dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidDirectory { .. }));
    }
}
