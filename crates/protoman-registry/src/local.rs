//! A directory-backed registry service.
//!
//! Layout:
//! ```text
//! <root>/
//!   index.json             name → latest digest + publish history
//!   index.lock             advisory lock held while the index is replaced
//!   blobs/
//!     <digest>.json        one snapshot per distinct file set
//! ```
//!
//! Blobs are content-addressed and written once, so republishing identical
//! content stores nothing new. A publish holds `index.lock` from reading
//! the index until its replacement is in place, so concurrent publishers in
//! this or another process never drop each other's entries. The index also
//! carries a generation counter, and a writer that finds it moved refuses to
//! overwrite it.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::{check_publishable, check_republish, RegistryClient, RepublishPolicy};
use crate::error::{RegistryError, Result};
use crate::integrity::ContentHash;
use crate::name::PackageName;
use crate::snapshot::PackageSnapshot;
use crate::wire::{FetchResponse, PublishReceipt};

const INDEX_FILE: &str = "index.json";
const LOCK_FILE: &str = "index.lock";

/// A registry stored in a local directory.
#[derive(Debug, Clone)]
pub struct LocalRegistry {
    root: PathBuf,
    server: String,
    policy: RepublishPolicy,
    /// Shared by clones; taken before the lock file.
    writer: Arc<Mutex<()>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryIndex {
    #[serde(default)]
    generation: u64,
    #[serde(default)]
    packages: BTreeMap<PackageName, IndexEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexEntry {
    latest: ContentHash,
    history: Vec<PublishRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PublishRecord {
    digest: ContentHash,
    timestamp: String,
}

impl IndexEntry {
    fn record(&self, digest: &ContentHash) -> Option<&PublishRecord> {
        self.history.iter().find(|r| &r.digest == digest)
    }
}

impl LocalRegistry {
    /// Create a registry rooted at the given directory.
    pub fn new(root: PathBuf) -> Self {
        let server = root.display().to_string();
        LocalRegistry {
            root,
            server,
            policy: RepublishPolicy::default(),
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Set the republish policy.
    pub fn with_policy(mut self, policy: RepublishPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    fn blob_path(&self, digest: &ContentHash) -> PathBuf {
        self.root.join("blobs").join(format!("{digest}.json"))
    }

    fn load_index(&self) -> Result<RegistryIndex> {
        let path = self.index_path();
        if !path.is_file() {
            return Ok(RegistryIndex::default());
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&data)?)
    }

    fn store_index(&self, index: &mut RegistryIndex, loaded_generation: u64) -> Result<()> {
        let current = self.load_index()?.generation;
        if current != loaded_generation {
            return Err(RegistryError::unreachable(
                &self.server,
                format!(
                    "index modified concurrently (generation {loaded_generation} → {current})"
                ),
            ));
        }
        index.generation = loaded_generation + 1;
        write_atomic(&self.index_path(), serde_json::to_string_pretty(index)?.as_bytes())
    }

    /// Run `update` while holding the writer lock and an exclusive lock on
    /// `index.lock`. Both are released when `update` returns.
    fn with_index_lock<T>(&self, update: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let _writer = self.writer.lock();
        std::fs::create_dir_all(&self.root)?;
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.root.join(LOCK_FILE))?;
        lock_file.lock_exclusive()?;
        update(self)
    }

    fn load_blob(&self, digest: &ContentHash) -> Result<PackageSnapshot> {
        let data = std::fs::read_to_string(self.blob_path(digest))?;
        let response: FetchResponse = serde_json::from_str(&data)?;
        PackageSnapshot::try_from(response)
    }

    fn publish_blocking(&self, snapshot: &PackageSnapshot) -> Result<PublishReceipt> {
        check_publishable(snapshot)?;
        self.with_index_lock(|reg| reg.publish_locked(snapshot))
    }

    fn publish_locked(&self, snapshot: &PackageSnapshot) -> Result<PublishReceipt> {
        let name = snapshot.name();
        let digest = snapshot.digest();
        let mut index = self.load_index()?;
        let loaded_generation = index.generation;

        let existing = index.packages.get(name);
        let unchanged = check_republish(name, existing.map(|e| &e.latest), digest, self.policy)?;
        if unchanged {
            if let Some(record) = existing.and_then(|e| e.record(digest)) {
                debug!(package = %name, digest = digest.short(), "publish is a no-op");
                return Ok(PublishReceipt {
                    accepted_digest: digest.clone(),
                    timestamp: record.timestamp.clone(),
                });
            }
        }

        let blob = self.blob_path(digest);
        if !blob.is_file() {
            let body = serde_json::to_vec(&FetchResponse::from(snapshot))?;
            write_atomic(&blob, &body)?;
        }

        let timestamp = existing
            .and_then(|e| e.record(digest))
            .map(|r| r.timestamp.clone())
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());

        let entry = index
            .packages
            .entry(name.clone())
            .or_insert_with(|| IndexEntry {
                latest: digest.clone(),
                history: Vec::new(),
            });
        entry.latest = digest.clone();
        if entry.record(digest).is_none() {
            entry.history.push(PublishRecord {
                digest: digest.clone(),
                timestamp: timestamp.clone(),
            });
        }
        self.store_index(&mut index, loaded_generation)?;

        debug!(package = %name, digest = digest.short(), "published");
        Ok(PublishReceipt {
            accepted_digest: digest.clone(),
            timestamp,
        })
    }

    fn fetch_blocking(
        &self,
        name: &PackageName,
        want: Option<&ContentHash>,
    ) -> Result<PackageSnapshot> {
        let index = self.load_index()?;
        let entry = index
            .packages
            .get(name)
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
            })?;

        let digest = match want {
            None => &entry.latest,
            Some(want) if entry.record(want).is_some() => want,
            Some(want) => {
                return Err(RegistryError::DigestMismatch {
                    name: name.to_string(),
                    expected: want.to_string(),
                    actual: entry.latest.to_string(),
                })
            }
        };
        self.load_blob(digest)
    }

    fn resolve_blocking(&self, names: &[PackageName]) -> Result<BTreeMap<PackageName, ContentHash>> {
        let index = self.load_index()?;
        names
            .iter()
            .map(|name| match index.packages.get(name) {
                Some(entry) => Ok((name.clone(), entry.latest.clone())),
                None => Err(RegistryError::NotFound {
                    name: name.to_string(),
                }),
            })
            .collect()
    }

    fn list_blocking(&self, prefix: &str) -> Result<Vec<PackageName>> {
        let index = self.load_index()?;
        Ok(index
            .packages
            .keys()
            .filter(|name| name.is_within(prefix))
            .cloned()
            .collect())
    }

    async fn blocking<T, F>(&self, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(LocalRegistry) -> Result<T> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || call(this))
            .await
            .map_err(|e| RegistryError::unreachable(&self.server, format!("worker failed: {e}")))?
    }
}

#[async_trait]
impl RegistryClient for LocalRegistry {
    fn server(&self) -> &str {
        &self.server
    }

    async fn publish(&self, snapshot: &PackageSnapshot) -> Result<PublishReceipt> {
        let snapshot = snapshot.clone();
        self.blocking(move |reg| reg.publish_blocking(&snapshot)).await
    }

    async fn fetch(
        &self,
        name: &PackageName,
        want: Option<&ContentHash>,
    ) -> Result<PackageSnapshot> {
        let name = name.clone();
        let want = want.cloned();
        self.blocking(move |reg| reg.fetch_blocking(&name, want.as_ref()))
            .await
    }

    async fn resolve(&self, names: &[PackageName]) -> Result<BTreeMap<PackageName, ContentHash>> {
        let names = names.to_vec();
        self.blocking(move |reg| reg.resolve_blocking(&names)).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<PackageName>> {
        let prefix = prefix.to_string();
        self.blocking(move |reg| reg.list_blocking(&prefix)).await
    }
}

/// Write `bytes` to a sibling temporary file, then rename it over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".protoman-")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| RegistryError::Io(e.error))?;
    Ok(())
}
