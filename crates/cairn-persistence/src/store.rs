//! ---
//! cairn_section: "03-persistence-logging"
//! cairn_subsection: "module"
//! cairn_type: "source"
//! cairn_scope: "code"
//! cairn_description: "Memento persistence abstractions and storage bindings."
//! cairn_version: "v0.1.0"
//! cairn_owner: "tbd"
//! ---
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::memento::Category;
use crate::{PersistenceError, Result};

/// Suffix reserved for in-flight writes; such files never appear in listings.
pub const TEMP_SUFFIX: &str = ".tmp";

static PROBE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Directory layout of a memento store: `root/{entities,locations,policies,plane}`.
#[derive(Debug, Clone)]
pub struct MementoStore {
    root: PathBuf,
}

impl MementoStore {
    /// Validate the root, create missing category directories and validate those too.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        check_dir_is_accessible(&root)?;
        for category in Category::ALL {
            let dir = root.join(category.dir_name());
            match fs::create_dir(&dir) {
                Ok(()) => debug!(dir = %dir.display(), "created category directory"),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
                Err(err) => {
                    debug!(dir = %dir.display(), error = %err, "unable to create category directory")
                }
            }
            check_dir_is_accessible(&dir)?;
        }
        info!(root = %root.display(), "memento store opened");
        Ok(Self { root })
    }

    /// Open an existing store for inspection without creating or writing anything.
    ///
    /// The root and every memento category directory must already exist and be listable.
    pub fn open_read_only(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        check_dir_is_readable(&root)?;
        for category in Category::MEMENTOS {
            check_dir_is_readable(&root.join(category.dir_name()))?;
        }
        debug!(root = %root.display(), "memento store opened read-only");
        Ok(Self { root })
    }

    /// Store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory backing a category.
    pub fn dir_for(&self, category: Category) -> PathBuf {
        self.root.join(category.dir_name())
    }

    /// File holding the memento `id`; the file name is the raw id.
    pub fn path_for(&self, category: Category, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.dir_for(category).join(id))
    }

    /// Temporary file used while replacing the memento `id`.
    pub fn temp_path_for(&self, category: Category, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.dir_for(category).join(format!("{}{}", id, TEMP_SUFFIX)))
    }

    /// Regular, non-temporary files of a category, sorted by name.
    pub fn list_non_temp(&self, category: Category) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let walker = WalkDir::new(self.dir_for(category))
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();
        for entry in walker {
            let entry = entry.map_err(std::io::Error::from)?;
            let Some(name) = entry.file_name().to_str() else {
                warn!(path = %entry.path().display(), "ignoring non utf-8 file name");
                continue;
            };
            if is_temp_file(name) || !entry.file_type().is_file() {
                continue;
            }
            files.push(entry.into_path());
        }
        Ok(files)
    }

    /// Delete leftover temporary files in every category; returns how many were removed.
    pub fn sweep_temp_files(&self) -> Result<usize> {
        let mut removed = 0usize;
        for category in Category::ALL {
            let dir = self.dir_for(category);
            for entry in WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let is_temp = entry
                    .file_name()
                    .to_str()
                    .map(is_temp_file)
                    .unwrap_or(false);
                if !is_temp {
                    continue;
                }
                match fs::remove_file(entry.path()) {
                    Ok(()) => {
                        debug!(path = %entry.path().display(), "removed stale temporary memento file");
                        removed += 1;
                    }
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }
        if removed > 0 {
            info!(root = %self.root.display(), removed, "swept stale temporary memento files");
        }
        Ok(removed)
    }
}

/// Whether a file name follows the temporary-write convention.
pub fn is_temp_file(name: &str) -> bool {
    name.ends_with(TEMP_SUFFIX)
}

/// Reject ids that cannot be used verbatim as a file name in a category directory.
pub fn validate_id(id: &str) -> Result<()> {
    let reason = if id.is_empty() {
        "empty"
    } else if id == "." || id == ".." {
        "reserved path component"
    } else if id.contains(['/', '\\', '\0']) {
        "contains a path separator or NUL"
    } else if is_temp_file(id) {
        "uses the temporary file suffix"
    } else {
        return Ok(());
    };
    Err(PersistenceError::InvalidId {
        id: id.to_owned(),
        reason,
    })
}

/// Fail unless `dir` exists, is a directory, and can be listed and written.
pub fn check_dir_is_accessible(dir: &Path) -> Result<()> {
    check_dir_is_readable(dir)?;
    if !is_writable(dir) {
        return Err(PersistenceError::InvalidDirectory {
            path: dir.to_path_buf(),
            reason: "not writable",
        });
    }
    Ok(())
}

/// Fail unless `dir` exists, is a directory, and can be listed.
pub fn check_dir_is_readable(dir: &Path) -> Result<()> {
    let invalid = |reason| PersistenceError::InvalidDirectory {
        path: dir.to_path_buf(),
        reason,
    };
    let metadata = match fs::metadata(dir) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => return Err(invalid("does not exist")),
        Err(_) => return Err(invalid("not readable")),
    };
    if !metadata.is_dir() {
        return Err(invalid("not a directory"));
    }
    if fs::read_dir(dir).is_err() {
        return Err(invalid("not readable"));
    }
    Ok(())
}

fn is_writable(dir: &Path) -> bool {
    let probe = dir.join(format!(
        ".access-probe-{}-{}{}",
        std::process::id(),
        PROBE_SEQUENCE.fetch_add(1, Ordering::Relaxed),
        TEMP_SUFFIX
    ));
    match OpenOptions::new().write(true).create_new(true).open(&probe) {
        Ok(_) => {
            let _ = fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}
