//! Scaffolding of new schema packages.

use std::io::Write;
use std::path::{Path, PathBuf};

use protoman_registry::PackageName;
use tracing::info;

use crate::error::{SyncError, SyncResult};
use crate::writer::ensure_dir;

/// Creates the first schema file of a new package.
pub trait Scaffolder: Send + Sync {
    /// Create the scaffold for `service` in `package` below `root`,
    /// returning the path of the created file.
    fn scaffold(&self, root: &Path, package: &PackageName, service: &str) -> SyncResult<PathBuf>;
}

/// Writes `<root>/<package dirs>/<service>.proto` with a `proto3` header,
/// the package statement and an empty service.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtoScaffold;

impl ProtoScaffold {
    /// Render the scaffold text.
    pub fn render(package: &PackageName, service: &str) -> String {
        format!(
            "syntax = \"proto3\";\n\npackage {package};\n\nservice {} {{\n}}\n",
            upper_camel(service)
        )
    }
}

impl Scaffolder for ProtoScaffold {
    fn scaffold(&self, root: &Path, package: &PackageName, service: &str) -> SyncResult<PathBuf> {
        let dir = root.join(package.to_relative_path());
        ensure_dir(&dir)?;

        let path = dir.join(format!("{service}.proto"));
        if path.exists() {
            return Err(already_exists(path));
        }

        let mut tmp = tempfile::Builder::new()
            .prefix(".protoman-")
            .tempfile_in(&dir)
            .map_err(|e| SyncError::io(&dir, e))?;
        tmp.write_all(Self::render(package, service).as_bytes())
            .map_err(|e| SyncError::io(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| SyncError::io(&path, e))?;
        // A file created since the check above still wins.
        match tmp.persist_noclobber(&path) {
            Ok(_) => {}
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(already_exists(path))
            }
            Err(e) => return Err(SyncError::io(&path, e.error)),
        }

        info!(package = %package, path = %path.display(), "scaffolded");
        Ok(path)
    }
}

fn already_exists(path: PathBuf) -> SyncError {
    SyncError::PathConflict {
        path,
        detail: "file already exists".to_string(),
    }
}

/// `user_accounts` → `UserAccounts`, `registry` → `Registry`.
fn upper_camel(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
