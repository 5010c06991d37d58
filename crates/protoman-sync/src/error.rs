//! Error types for synchronization operations.

use std::path::PathBuf;

use protoman_registry::RegistryError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while planning or executing an operation.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A path argument does not exist, is not a directory, or is absolute
    /// where a project-relative path is required.
    #[error("invalid path {path}: {reason}")]
    InvalidPath {
        /// The offending path.
        path: PathBuf,
        /// Why it was refused.
        reason: String,
    },

    /// A dotted package or service identifier is malformed.
    #[error("invalid package name '{name}': {reason}")]
    InvalidPackageName {
        /// The rejected name.
        name: String,
        /// Why it was refused.
        reason: String,
    },

    /// The manifest file exists but cannot be understood.
    #[error("manifest {path} is corrupt: {detail}")]
    ManifestCorrupt {
        /// Manifest location.
        path: PathBuf,
        /// Parse or invariant failure.
        detail: String,
    },

    /// The manifest could not be written; nothing was recorded.
    #[error("failed to write manifest {path}: {source}")]
    ManifestWrite {
        /// Manifest location.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// The project configuration file is invalid.
    #[error("invalid configuration {path}: {detail}")]
    Config {
        /// Configuration file location.
        path: PathBuf,
        /// What is wrong with it.
        detail: String,
    },

    /// Registry protocol failure (unreachable, not found, digest mismatch,
    /// rejected).
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A non-directory entry occupies a path that must be a directory, or
    /// a directory occupies a file's path.
    #[error("path conflict at {path}: {detail}")]
    PathConflict {
        /// The conflicting path.
        path: PathBuf,
        /// What was found there.
        detail: String,
    },

    /// Local I/O failure.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying failure.
        source: std::io::Error,
    },

    /// A schema file failed syntax validation.
    #[error("validation failed for {file}: {reason}")]
    ValidationFailed {
        /// The invalid file.
        file: PathBuf,
        /// Validator message.
        reason: String,
    },

    /// Packages import each other in a cycle.
    #[error("dependency cycle: {}", .cycle.join(" -> "))]
    DependencyCycle {
        /// Package names forming the cycle.
        cycle: Vec<String>,
    },

    /// A step was not run because a package it depends on failed.
    #[error("'{name}' not applied: dependency '{dependency}' failed")]
    DependencyFailed {
        /// The package left unapplied.
        name: String,
        /// The failed producer.
        dependency: String,
    },

    /// A step needs a registry but none was configured.
    #[error("no registry configured for this operation")]
    NoRegistry,

    /// The operation was interrupted before a plan could run.
    #[error("operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// Wrap an I/O error with the path that produced it.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convert a registry name error into the local taxonomy.
pub(crate) fn name_error(err: RegistryError) -> SyncError {
    match err {
        RegistryError::InvalidPackageName { name, reason } => {
            SyncError::InvalidPackageName { name, reason }
        }
        other => SyncError::Registry(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_display_joins_members() {
        let err = SyncError::DependencyCycle {
            cycle: vec!["a.v1".into(), "b.v1".into(), "a.v1".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle: a.v1 -> b.v1 -> a.v1");
    }

    #[test]
    fn name_errors_keep_their_category() {
        let err = protoman_registry::PackageName::parse("a..b").unwrap_err();
        assert!(matches!(name_error(err), SyncError::InvalidPackageName { .. }));
    }
}
