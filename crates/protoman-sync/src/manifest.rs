//! The project manifest (`.protoman`).
//!
//! The manifest records every package a project knows about: packages
//! authored locally and awaiting publish, packages fetched from a registry,
//! or both. It is an explicit value loaded once per invocation, mutated in
//! memory, and saved once by the engine's commit.
//!
//! On disk it is TOML:
//! ```toml
//! [[package]]
//! name = "acme.billing.v1"
//! local_path = "proto/acme/billing/v1"
//! registry_digest = "3f2a…"
//! source_server = "https://registry.example.com"
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use protoman_registry::{ContentHash, PackageName};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// File name of the manifest at the project root.
pub const MANIFEST_FILE: &str = ".protoman";

/// One manifest row.
///
/// At least one of `local_path` or `registry_digest` is always set; the
/// constructors are the only way to build an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageEntry {
    name: PackageName,
    local_path: Option<PathBuf>,
    registry_digest: Option<ContentHash>,
    source_server: Option<String>,
}

impl PackageEntry {
    /// A locally-authored package that has not been published.
    pub fn local(name: PackageName, local_path: PathBuf) -> Self {
        PackageEntry {
            name,
            local_path: Some(local_path),
            registry_digest: None,
            source_server: None,
        }
    }

    /// A package known by its registry digest.
    pub fn published(name: PackageName, digest: ContentHash, server: impl Into<String>) -> Self {
        PackageEntry {
            name,
            local_path: None,
            registry_digest: Some(digest),
            source_server: Some(server.into()),
        }
    }

    /// Replace the local path, keeping registry fields.
    pub fn with_local_path(mut self, local_path: PathBuf) -> Self {
        self.local_path = Some(local_path);
        self
    }

    /// Replace the registry digest and source server, keeping the local path.
    pub fn with_registry(mut self, digest: ContentHash, server: impl Into<String>) -> Self {
        self.registry_digest = Some(digest);
        self.source_server = Some(server.into());
        self
    }

    pub fn name(&self) -> &PackageName {
        &self.name
    }

    pub fn local_path(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    pub fn registry_digest(&self) -> Option<&ContentHash> {
        self.registry_digest.as_ref()
    }

    pub fn source_server(&self) -> Option<&str> {
        self.source_server.as_deref()
    }

    /// Authored here and never published.
    pub fn is_local_only(&self) -> bool {
        self.registry_digest.is_none()
    }
}

/// An ordered collection of entries, unique by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<PackageEntry>,
}

impl Manifest {
    /// Create an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[PackageEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by name.
    pub fn get(&self, name: &PackageName) -> Option<&PackageEntry> {
        self.entries.iter().find(|e| &e.name == name)
    }

    pub fn contains(&self, name: &PackageName) -> bool {
        self.get(name).is_some()
    }

    /// Insert `entry`, replacing any entry with the same name in place.
    ///
    /// Returns the replaced entry.
    pub fn upsert(&mut self, entry: PackageEntry) -> Option<PackageEntry> {
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(slot) => Some(std::mem::replace(slot, entry)),
            None => {
                self.entries.push(entry);
                None
            }
        }
    }

    /// Remove the entry named `name`. Removing an absent name is a no-op.
    pub fn remove(&mut self, name: &PackageName) -> Option<PackageEntry> {
        let index = self.entries.iter().position(|e| &e.name == name)?;
        Some(self.entries.remove(index))
    }

    /// Entries that have a local path but no registry digest.
    pub fn local_only(&self) -> impl Iterator<Item = &PackageEntry> {
        self.entries.iter().filter(|e| e.is_local_only())
    }

    /// Entries tracked against a registry digest.
    pub fn tracked(&self) -> impl Iterator<Item = &PackageEntry> {
        self.entries.iter().filter(|e| e.registry_digest.is_some())
    }
}

/// Serialized form of the manifest file.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestFile {
    #[serde(default, rename = "package", skip_serializing_if = "Vec::is_empty")]
    packages: Vec<EntryRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct EntryRecord {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    local_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    registry_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_server: Option<String>,
}

impl From<&PackageEntry> for EntryRecord {
    fn from(entry: &PackageEntry) -> Self {
        EntryRecord {
            name: entry.name.to_string(),
            local_path: entry.local_path.clone(),
            registry_digest: entry.registry_digest.as_ref().map(|d| d.to_string()),
            source_server: entry.source_server.clone(),
        }
    }
}

impl EntryRecord {
    fn into_entry(self) -> Result<PackageEntry, String> {
        let name = PackageName::parse(&self.name).map_err(|e| e.to_string())?;
        let registry_digest = self
            .registry_digest
            .map(|d| ContentHash::parse(&d))
            .transpose()
            .map_err(|e| format!("package '{name}': {e}"))?;
        if self.local_path.is_none() && registry_digest.is_none() {
            return Err(format!(
                "package '{name}' has neither local_path nor registry_digest"
            ));
        }
        Ok(PackageEntry {
            name,
            local_path: self.local_path,
            registry_digest,
            source_server: self.source_server,
        })
    }
}

impl Manifest {
    /// Parse manifest text.
    pub fn parse(content: &str) -> Result<Self, String> {
        let file: ManifestFile = toml::from_str(content).map_err(|e| e.to_string())?;
        let mut manifest = Manifest::new();
        for record in file.packages {
            let entry = record.into_entry()?;
            if manifest.contains(&entry.name) {
                return Err(format!("duplicate package '{}'", entry.name));
            }
            manifest.entries.push(entry);
        }
        Ok(manifest)
    }

    /// Render manifest text. An empty manifest renders as an empty string.
    pub fn to_toml(&self) -> Result<String, String> {
        let file = ManifestFile {
            packages: self.entries.iter().map(EntryRecord::from).collect(),
        };
        toml::to_string(&file).map_err(|e| e.to_string())
    }
}

/// Reads and atomically writes the manifest file of one project.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    /// The store for the project rooted at `project_root`.
    pub fn new(project_root: &Path) -> Self {
        ManifestStore {
            path: project_root.join(MANIFEST_FILE),
        }
    }

    /// Location of the manifest file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the manifest. A missing file yields an empty manifest.
    pub fn load(&self) -> SyncResult<Manifest> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no manifest, starting empty");
                return Ok(Manifest::new());
            }
            Err(e) => {
                return Err(SyncError::ManifestCorrupt {
                    path: self.path.clone(),
                    detail: e.to_string(),
                })
            }
        };
        Manifest::parse(&content).map_err(|detail| SyncError::ManifestCorrupt {
            path: self.path.clone(),
            detail,
        })
    }

    /// Write the manifest through a temporary file in the same directory,
    /// renamed over the original.
    pub fn save(&self, manifest: &Manifest) -> SyncResult<()> {
        let write_error = |source: std::io::Error| SyncError::ManifestWrite {
            path: self.path.clone(),
            source,
        };
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let text = manifest
            .to_toml()
            .map_err(|e| write_error(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".protoman-")
            .tempfile_in(dir)
            .map_err(write_error)?;
        tmp.write_all(text.as_bytes()).map_err(write_error)?;
        tmp.as_file().sync_all().map_err(write_error)?;
        tmp.persist(&self.path).map_err(|e| write_error(e.error))?;

        debug!(path = %self.path.display(), entries = manifest.len(), "manifest saved");
        Ok(())
    }
}
