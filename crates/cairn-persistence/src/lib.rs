//! ---
//! cairn_section: "03-persistence-logging"
//! cairn_subsection: "module"
//! cairn_type: "source"
//! cairn_scope: "code"
//! cairn_description: "Memento persistence abstractions and storage bindings."
//! cairn_version: "v0.1.0"
//! cairn_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Durable memento store for orchestrator state.
//!
//! Every entity, location and policy is persisted as one file under
//! `root/{entities,locations,policies}/<id>`. Writes for one object are applied
//! in submission order by a dedicated [`writer::MementoFileWriter`] while
//! different objects proceed in parallel on a shared worker pool. The
//! [`persister::MementoPersister`] facade ties the pieces together and offers
//! checkpoint, delta, manifest/full load, drain and stop operations.

use std::path::PathBuf;
use std::time::Duration;

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// The store root or a category directory cannot be used.
    #[error("invalid directory {}: {reason}", .path.display())]
    InvalidDirectory {
        /// Offending directory.
        path: PathBuf,
        /// Human-readable cause (`does not exist`, `not writable`, ...).
        reason: &'static str,
    },
    /// The id cannot be mapped to a file name.
    #[error("invalid memento id {id:?}: {reason}")]
    InvalidId {
        /// Rejected identifier.
        id: String,
        /// Why the identifier was rejected.
        reason: &'static str,
    },
    /// Wrapper for IO errors encountered while reading/writing memento files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// A document was decoded from a directory belonging to another category.
    #[error("memento {id} belongs to {found} but was stored under {expected}")]
    CategoryMismatch {
        /// Identifier found in the document.
        id: String,
        /// Category implied by the directory.
        expected: memento::Category,
        /// Category recorded in the document.
        found: memento::Category,
    },
    /// The retrying serializer gave up on an operation.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Operation that kept failing.
        operation: serializer::CodecOperation,
        /// Number of attempts made.
        attempts: usize,
        /// Error reported by the final attempt.
        #[source]
        source: Box<PersistenceError>,
    },
    /// The persister has been stopped.
    #[error("persister not running; cannot {0}")]
    NotRunning(&'static str),
    /// A drain did not finish before its deadline.
    #[error("timed out after {timeout:?} waiting for writes to {category}/{id}")]
    Timeout {
        /// Category of the writer still busy.
        category: memento::Category,
        /// Identifier of the writer still busy.
        id: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },
    /// The writer's queue no longer accepts work.
    #[error("writer for {category}/{id} is closed")]
    WriterClosed {
        /// Category of the closed writer.
        category: memento::Category,
        /// Identifier of the closed writer.
        id: String,
    },
    /// The worker pool failed to start or to shut down.
    #[error("writer pool error: {0}")]
    WorkerPool(String),
    /// Wrapper for Prometheus metrics registration failures.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub mod loader;
pub mod memento;
pub mod metrics;
pub mod persister;
pub mod serializer;
pub mod store;
pub mod writer;

pub use loader::{LookupContext, MementoLoader, NoLookup, ReferenceTable};
pub use memento::{
    Category, DanglingReference, Delta, EntityMemento, LocationMemento, Memento, MementoGraph,
    MementoManifest, PolicyMemento, Properties, Reference,
};
pub use metrics::PersistenceMetrics;
pub use persister::{MementoPersister, PersisterState};
pub use serializer::{
    CodecOperation, JsonMementoCodec, ManifestEntry, MementoCodec, RetryingCodec,
    MAX_SERIALIZATION_ATTEMPTS,
};
pub use store::{MementoStore, TEMP_SUFFIX};
pub use writer::{MementoFileWriter, WriterPool};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_object() {
        let err = PersistenceError::Timeout {
            category: Category::Entities,
            id: "e1".into(),
            timeout: Duration::from_millis(250),
        };
        assert_eq!(
            format!("{err}"),
            "timed out after 250ms waiting for writes to entities/e1"
        );

        let err = PersistenceError::NotRunning("load memento manifest");
        assert_eq!(
            format!("{err}"),
            "persister not running; cannot load memento manifest"
        );
    }

    #[test]
    fn retries_exhausted_keeps_source() {
        let inner = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = PersistenceError::RetriesExhausted {
            operation: CodecOperation::Decode,
            attempts: 5,
            source: Box::new(inner.into()),
        };
        assert!(format!("{err}").starts_with("decode failed after 5 attempts"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
