//! Run-scoped workspace directories.
//!
//! A workspace is a frames directory (sampled images) plus an output directory (COLMAP
//! database, sparse model, final point cloud). Preparation never aborts on a single
//! stubborn entry: leftover files are reported and the run continues.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::WorkspaceError;
use crate::events::{EventSink, PipelineEvent};

pub const DATABASE_FILE: &str = "database.db";
pub const SPARSE_DIR: &str = "sparse";
pub const MODEL_FILE: &str = "model.ply";

/// Outcome of preparing one directory; `leftovers` lists entries a clean start could not remove.
#[derive(Debug, Default)]
pub struct PrepareReport {
    pub path: PathBuf,
    pub created: bool,
    pub cleared: bool,
    pub leftovers: Vec<(PathBuf, io::Error)>,
}

impl PrepareReport {
    pub fn is_complete(&self) -> bool {
        self.leftovers.is_empty()
    }
}

/// Filesystem removal primitives, swappable so locked entries can be simulated.
pub trait EntryRemover {
    fn remove_tree(&self, path: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FsRemover;

impl EntryRemover for FsRemover {
    fn remove_tree(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

/// Ensure `path` exists as a directory, optionally emptying it first.
///
/// With `clean == false` an existing directory is left untouched. With `clean == true`
/// the directory is removed and recreated; if that fails, entries are deleted one by one
/// and failures are collected in the report instead of aborting.
pub fn prepare(path: &Path, clean: bool, sink: &dyn EventSink) -> Result<PrepareReport, WorkspaceError> {
    prepare_with(path, clean, sink, &FsRemover)
}

pub fn prepare_with(
    path: &Path,
    clean: bool,
    sink: &dyn EventSink,
    remover: &dyn EntryRemover,
) -> Result<PrepareReport, WorkspaceError> {
    let mut report = PrepareReport {
        path: path.to_path_buf(),
        ..PrepareReport::default()
    };

    match fs::metadata(path) {
        Ok(meta) if !meta.is_dir() => {
            return Err(WorkspaceError::NotADirectory(path.to_path_buf()));
        }
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            create_dir(path)?;
            report.created = true;
            return Ok(report);
        }
        Err(e) => {
            return Err(WorkspaceError::Create {
                path: path.to_path_buf(),
                source: e,
            });
        }
    }

    if !clean {
        return Ok(report);
    }

    match remover.remove_tree(path) {
        Ok(()) => {}
        Err(e) => {
            log::debug!(
                "bulk removal of {} failed ({}), deleting entries individually",
                path.display(),
                e
            );
            report.leftovers = remove_entries(path, remover);
        }
    }
    create_dir(path)?;
    report.cleared = true;

    for (entry, err) in &report.leftovers {
        sink.emit(&PipelineEvent::WorkspaceEntryNotRemoved {
            path: entry.clone(),
            reason: err.to_string(),
        });
    }
    sink.emit(&PipelineEvent::WorkspaceCleared {
        path: path.to_path_buf(),
    });
    Ok(report)
}

fn create_dir(path: &Path) -> Result<(), WorkspaceError> {
    fs::create_dir_all(path).map_err(|source| WorkspaceError::Create {
        path: path.to_path_buf(),
        source,
    })?;
    if !path.is_dir() {
        return Err(WorkspaceError::NotADirectory(path.to_path_buf()));
    }
    Ok(())
}

/// Best-effort deletion of the immediate children of `dir`.
fn remove_entries(dir: &Path, remover: &dyn EntryRemover) -> Vec<(PathBuf, io::Error)> {
    let mut failures = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return failures,
        Err(e) => {
            failures.push((dir.to_path_buf(), e));
            return failures;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                failures.push((dir.to_path_buf(), e));
                continue;
            }
        };
        let path = entry.path();
        // file_type() does not follow symlinks, so links are unlinked, never traversed.
        let result = match entry.file_type() {
            Ok(kind) if kind.is_dir() => remover.remove_tree(&path),
            Ok(_) => remover.remove_file(&path),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            failures.push((path, e));
        }
    }
    failures
}

/// Frames + output directory pair with the COLMAP paths derived from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workspace {
    pub frames_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Workspace {
    pub fn new(frames_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            frames_dir: frames_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    /// `<root>/images` + `<root>/output`.
    pub fn under(root: &Path) -> Self {
        Self::new(root.join("images"), root.join("output"))
    }

    pub fn database_path(&self) -> PathBuf {
        self.output_dir.join(DATABASE_FILE)
    }

    pub fn sparse_dir(&self) -> PathBuf {
        self.output_dir.join(SPARSE_DIR)
    }

    /// First reconstructed model written by the mapper.
    pub fn sparse_model_dir(&self) -> PathBuf {
        self.sparse_dir().join("0")
    }

    pub fn model_path(&self) -> PathBuf {
        self.output_dir.join(MODEL_FILE)
    }

    pub fn prepare(&self, clean: bool, sink: &dyn EventSink) -> Result<Vec<PrepareReport>, WorkspaceError> {
        Ok(vec![
            prepare(&self.frames_dir, clean, sink)?,
            prepare(&self.output_dir, clean, sink)?,
        ])
    }
}
