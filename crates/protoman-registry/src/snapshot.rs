//! Immutable, content-addressed package snapshots.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};
use crate::integrity::ContentHash;
use crate::name::PackageName;

/// One file of a snapshot, addressed by its path relative to the package
/// directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFile {
    /// Relative path with `/` separators.
    pub path: String,
    /// Raw file contents.
    pub contents: Vec<u8>,
}

impl SnapshotFile {
    /// Create a file entry.
    pub fn new(path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        SnapshotFile {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

/// A package's file set as stored by the registry.
///
/// Files are kept sorted by path; the digest is a deterministic function of
/// the file set alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSnapshot {
    name: PackageName,
    digest: ContentHash,
    files: Vec<SnapshotFile>,
}

impl PackageSnapshot {
    /// Build a snapshot, normalizing and sorting file paths and computing
    /// the digest.
    pub fn new(name: PackageName, files: Vec<SnapshotFile>) -> Result<Self> {
        let files = normalize_files(files)?;
        let digest = digest_files(&files);
        Ok(PackageSnapshot {
            name,
            digest,
            files,
        })
    }

    /// Rebuild a snapshot received from elsewhere, checking that `digest`
    /// matches the contents.
    pub fn from_parts(
        name: PackageName,
        digest: ContentHash,
        files: Vec<SnapshotFile>,
    ) -> Result<Self> {
        let snapshot = PackageSnapshot::new(name, files)?;
        if snapshot.digest != digest {
            return Err(RegistryError::DigestMismatch {
                name: snapshot.name.to_string(),
                expected: digest.to_string(),
                actual: snapshot.digest.to_string(),
            });
        }
        Ok(snapshot)
    }

    /// The package this snapshot belongs to.
    pub fn name(&self) -> &PackageName {
        &self.name
    }

    /// The content digest.
    pub fn digest(&self) -> &ContentHash {
        &self.digest
    }

    /// Files in path order.
    pub fn files(&self) -> &[SnapshotFile] {
        &self.files
    }

    /// True if the snapshot carries no files.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Recompute the digest and compare it with the stored one.
    pub fn verify(&self) -> bool {
        digest_files(&self.files) == self.digest
    }

    /// Split into name, digest and files.
    pub fn into_parts(self) -> (PackageName, ContentHash, Vec<SnapshotFile>) {
        (self.name, self.digest, self.files)
    }
}

fn digest_files(files: &[SnapshotFile]) -> ContentHash {
    ContentHash::of_files(
        files
            .iter()
            .map(|f| (f.path.as_str(), f.contents.as_slice())),
    )
}

fn normalize_files(files: Vec<SnapshotFile>) -> Result<Vec<SnapshotFile>> {
    let mut seen = BTreeSet::new();
    let mut normalized = Vec::with_capacity(files.len());
    for file in files {
        let path = normalize_path(&file.path)?;
        if !seen.insert(path.clone()) {
            return Err(RegistryError::InvalidSnapshot {
                detail: format!("duplicate file '{path}'"),
            });
        }
        normalized.push(SnapshotFile {
            path,
            contents: file.contents,
        });
    }
    normalized.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(normalized)
}

/// Normalize a snapshot-relative path to `/` separators.
///
/// Rejects empty, absolute and escaping paths.
pub fn normalize_path(path: &str) -> Result<String> {
    let unified = path.replace('\\', "/");
    let invalid = |why: &str| RegistryError::InvalidSnapshot {
        detail: format!("file path '{path}' {why}"),
    };

    if unified.starts_with('/') || unified.contains(':') {
        return Err(invalid("must be relative"));
    }
    let mut parts = Vec::new();
    for part in unified.split('/') {
        match part {
            "" => continue,
            "." | ".." => return Err(invalid("must not contain '.' or '..'")),
            _ => parts.push(part),
        }
    }
    if parts.is_empty() {
        return Err(invalid("is empty"));
    }
    Ok(parts.join("/"))
}
