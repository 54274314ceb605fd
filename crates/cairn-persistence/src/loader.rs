//! ---
//! cairn_section: "03-persistence-logging"
//! cairn_subsection: "module"
//! cairn_type: "source"
//! cairn_scope: "code"
//! cairn_description: "Memento persistence abstractions and storage bindings."
//! cairn_version: "v0.1.0"
//! cairn_owner: "tbd"
//! ---
//! Reading a memento store back, either as a manifest or as a full graph.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use cairn_logging::{cairn_debug, cairn_warn, LogContext};

use crate::memento::{Category, DanglingReference, MementoGraph, MementoManifest, Reference};
use crate::metrics::PersistenceMetrics;
use crate::serializer::MementoCodec;
use crate::store::MementoStore;
use crate::{PersistenceError, Result};

/// Caller-side resolver consulted for references the store itself cannot satisfy.
pub trait LookupContext {
    /// Whether a live object exists for `category/id`.
    fn contains(&self, category: Category, id: &str) -> bool;
}

/// Lookup context that knows no objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLookup;

impl LookupContext for NoLookup {
    fn contains(&self, _category: Category, _id: &str) -> bool {
        false
    }
}

impl LookupContext for MementoGraph {
    fn contains(&self, category: Category, id: &str) -> bool {
        MementoGraph::contains(self, &Reference::new(category, id))
    }
}

impl LookupContext for MementoManifest {
    fn contains(&self, category: Category, id: &str) -> bool {
        self.ids_to_type(category)
            .map(|ids| ids.contains_key(id))
            .unwrap_or(false)
    }
}

/// `(category, id) → type` stubs for every memento decoded by a load.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    entries: HashMap<(Category, String), String>,
}

impl ReferenceTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a decoded memento.
    pub fn insert(&mut self, category: Category, id: impl Into<String>, kind: impl Into<String>) {
        self.entries.insert((category, id.into()), kind.into());
    }

    /// Type recorded for `category/id`.
    pub fn kind_of(&self, category: Category, id: &str) -> Option<&str> {
        self.entries
            .get(&(category, id.to_owned()))
            .map(String::as_str)
    }

    /// Number of stubs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LookupContext for ReferenceTable {
    fn contains(&self, category: Category, id: &str) -> bool {
        self.kind_of(category, id).is_some()
    }
}

/// Scans the category directories of a [`MementoStore`].
#[derive(Clone)]
pub struct MementoLoader {
    store: MementoStore,
    codec: Arc<dyn MementoCodec>,
    metrics: Arc<PersistenceMetrics>,
    node: Option<Arc<str>>,
}

impl MementoLoader {
    /// Build a loader over `store` decoding with `codec`.
    pub fn new(
        store: MementoStore,
        codec: Arc<dyn MementoCodec>,
        metrics: Arc<PersistenceMetrics>,
    ) -> Self {
        Self {
            store,
            codec,
            metrics,
            node: None,
        }
    }

    /// Name the controller in the loader's log events.
    pub fn with_node(mut self, node: Option<Arc<str>>) -> Self {
        self.node = node;
        self
    }

    pub(crate) fn context(&self, operation: &'static str) -> LogContext<'_> {
        LogContext::new()
            .with_node(self.node.as_deref())
            .with_operation(operation)
    }

    /// Probe every memento file for its id and type without decoding bodies.
    ///
    /// Files that cannot be read or probed are logged and skipped; failing to
    /// list a category directory is an error.
    pub fn load_manifest(&self) -> Result<MementoManifest> {
        let started = Instant::now();
        let mut manifest = MementoManifest::new();
        for category in Category::MEMENTOS {
            for path in self.store.list_non_temp(category)? {
                let Some(text) = self.read(category, &path) else {
                    continue;
                };
                match self.codec.probe(&text) {
                    Ok(entry) => manifest.insert(category, entry.id, entry.kind),
                    Err(err) => self.skip(category, &path, &err),
                }
            }
        }
        let elapsed = started.elapsed();
        self.metrics
            .observe_load_duration("manifest", elapsed.as_secs_f64());
        cairn_debug!(
            context = self.context("load-manifest"),
            "loaded manifest of {} mementos in {:?}",
            manifest.len(),
            elapsed
        );
        Ok(manifest)
    }

    /// Decode every memento file and resolve cross-references.
    ///
    /// Pass one decodes each file and records a stub per memento; pass two checks
    /// every reference against those stubs and then `lookup`. References that
    /// resolve nowhere are reported through
    /// [`MementoGraph::dangling_references`]. Undecodable files are skipped.
    pub fn load_full(&self, lookup: &dyn LookupContext) -> Result<MementoGraph> {
        let started = Instant::now();
        let mut graph = MementoGraph::new();
        let mut table = ReferenceTable::new();
        let mut outgoing = Vec::new();

        for category in Category::MEMENTOS {
            for path in self.store.list_non_temp(category)? {
                let Some(text) = self.read(category, &path) else {
                    continue;
                };
                let memento = match self.codec.decode(&text) {
                    Ok(memento) if memento.category() != category => {
                        let err = PersistenceError::CategoryMismatch {
                            id: memento.id().to_owned(),
                            expected: category,
                            found: memento.category(),
                        };
                        self.skip(category, &path, &err);
                        continue;
                    }
                    Ok(memento) => memento,
                    Err(err) => {
                        self.skip(category, &path, &err);
                        continue;
                    }
                };
                let file_name = path.file_name().and_then(|name| name.to_str());
                if file_name != Some(memento.id()) {
                    cairn_warn!(
                        context = self
                            .context("load")
                            .with_category(category.dir_name())
                            .with_memento(memento.id()),
                        "memento id differs from its file name {}",
                        path.display()
                    );
                }
                let from = Reference::new(category, memento.id());
                table.insert(category, memento.id(), memento.kind());
                outgoing.push((from, memento.references()));
                graph.insert(memento);
            }
        }

        let mut dangling = Vec::new();
        for (from, references) in outgoing {
            for to in references {
                if table.contains(to.category, &to.id) || lookup.contains(to.category, &to.id) {
                    continue;
                }
                cairn_warn!(
                    context = self
                        .context("load")
                        .with_category(from.category.dir_name())
                        .with_memento(&from.id),
                    "unresolved reference to {}",
                    to
                );
                dangling.push(DanglingReference {
                    from: from.clone(),
                    to,
                });
            }
        }
        graph.set_dangling_references(dangling);

        let elapsed = started.elapsed();
        self.metrics
            .observe_load_duration("full", elapsed.as_secs_f64());
        cairn_debug!(
            context = self.context("load"),
            "loaded {} mementos ({} applications, {} dangling references) in {:?}",
            graph.len(),
            graph.application_ids().len(),
            graph.dangling_references().len(),
            elapsed
        );
        Ok(graph)
    }

    fn read(&self, category: Category, path: &Path) -> Option<String> {
        match fs::read_to_string(path) {
            Ok(text) => Some(text),
            Err(err) => {
                self.skip(category, path, &err.into());
                None
            }
        }
    }

    fn skip(&self, category: Category, path: &Path, err: &PersistenceError) {
        self.metrics.record_decode_failure(category);
        cairn_warn!(
            context = self.context("load").with_category(category.dir_name()),
            "skipping memento file {}: {}",
            path.display(),
            err
        );
    }
}

impl std::fmt::Debug for MementoLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MementoLoader")
            .field("root", &self.store.root())
            .finish_non_exhaustive()
    }
}
