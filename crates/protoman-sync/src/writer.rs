//! Local package writer.
//!
//! Applies a snapshot's files below a proto root so that package `a.b.v1`
//! lands in `<root>/a/b/v1/`. Every file goes through a sibling temporary
//! file and a rename, so no reader ever sees a half-written file. Files
//! whose contents already match are left alone.
//!
//! All functions here block; the engine calls them from
//! `tokio::task::spawn_blocking`.

use std::io::Write;
use std::path::{Path, PathBuf};

use protoman_registry::PackageSnapshot;
use tracing::{debug, trace};

use crate::error::{SyncError, SyncResult};

/// Summary of one apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Directory the package was written to.
    pub dir: PathBuf,
    /// Files whose contents changed.
    pub written: usize,
    /// Files already present with identical contents.
    pub unchanged: usize,
}

/// Apply `snapshot` into `dir` exactly.
pub fn apply_at(dir: &Path, snapshot: &PackageSnapshot) -> SyncResult<ApplyOutcome> {
    ensure_dir(dir)?;

    let mut outcome = ApplyOutcome {
        dir: dir.to_path_buf(),
        written: 0,
        unchanged: 0,
    };
    for file in snapshot.files() {
        let target = dir.join(&file.path);
        if let Some(parent) = target.parent() {
            ensure_dir(parent)?;
        }
        if write_if_changed(&target, &file.contents)? {
            outcome.written += 1;
        } else {
            outcome.unchanged += 1;
        }
    }

    debug!(
        package = %snapshot.name(),
        dir = %dir.display(),
        written = outcome.written,
        unchanged = outcome.unchanged,
        "applied snapshot"
    );
    Ok(outcome)
}

/// The `.proto` files directly inside `dir`, sorted.
///
/// The package directory of `a.b.v1` does not contain the files of
/// `a.b.v1.sub`, so subdirectories are not searched.
pub fn schema_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_schema_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// True for paths ending in `.proto`.
pub fn is_schema_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "proto")
}

/// Create `dir` and its ancestors, failing with `PathConflict` when any of
/// them exists as something other than a directory.
pub(crate) fn ensure_dir(dir: &Path) -> SyncResult<()> {
    if dir.is_dir() {
        return Ok(());
    }
    if let Some(blocker) = dir.ancestors().find(|p| p.exists() && !p.is_dir()) {
        return Err(SyncError::PathConflict {
            path: blocker.to_path_buf(),
            detail: "exists and is not a directory".to_string(),
        });
    }
    std::fs::create_dir_all(dir).map_err(|e| SyncError::io(dir, e))
}

/// Write `contents` to `target` unless it already holds exactly that.
///
/// Returns whether a write happened.
fn write_if_changed(target: &Path, contents: &[u8]) -> SyncResult<bool> {
    if target.is_dir() {
        return Err(SyncError::PathConflict {
            path: target.to_path_buf(),
            detail: "a directory occupies a file's path".to_string(),
        });
    }
    if target.is_file() {
        let existing = std::fs::read(target).map_err(|e| SyncError::io(target, e))?;
        if existing == contents {
            trace!(path = %target.display(), "unchanged");
            return Ok(false);
        }
    }

    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".protoman-")
        .tempfile_in(dir)
        .map_err(|e| SyncError::io(dir, e))?;
    tmp.write_all(contents)
        .map_err(|e| SyncError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| SyncError::io(target, e))?;
    tmp.persist(target)
        .map_err(|e| SyncError::io(target, e.error))?;
    Ok(true)
}
