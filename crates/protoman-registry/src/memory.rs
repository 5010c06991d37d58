//! An in-process registry for tests and dry runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::client::{check_publishable, check_republish, RegistryClient, RepublishPolicy};
use crate::error::{RegistryError, Result};
use crate::integrity::ContentHash;
use crate::name::PackageName;
use crate::snapshot::PackageSnapshot;
use crate::wire::PublishReceipt;

const SERVER: &str = "memory";

/// Per-method call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub publish: usize,
    pub fetch: usize,
    pub resolve: usize,
    pub list: usize,
}

#[derive(Debug, Default)]
struct State {
    packages: BTreeMap<PackageName, Stored>,
    unreachable_budget: usize,
    calls: CallCounts,
}

#[derive(Debug)]
struct Stored {
    latest: ContentHash,
    snapshots: BTreeMap<ContentHash, (PackageSnapshot, String)>,
}

/// A registry held in memory, with scriptable transient failures.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    state: Mutex<State>,
    policy: RepublishPolicy,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the republish policy.
    pub fn with_policy(mut self, policy: RepublishPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Stores a snapshot as the latest for its name, bypassing policy
    /// checks and call counters.
    pub fn insert(&self, snapshot: PackageSnapshot) {
        let mut state = self.state.lock();
        store(&mut state, snapshot, chrono::Utc::now().to_rfc3339());
    }

    /// Makes the next `n` calls fail with `Unreachable`.
    pub fn fail_next(&self, n: usize) {
        self.state.lock().unreachable_budget = n;
    }

    /// Returns the calls received so far.
    pub fn calls(&self) -> CallCounts {
        self.state.lock().calls
    }

    /// Returns the latest digest for `name`, if any.
    pub fn latest(&self, name: &PackageName) -> Option<ContentHash> {
        self.state.lock().packages.get(name).map(|s| s.latest.clone())
    }

    fn begin(&self, count: impl FnOnce(&mut CallCounts)) -> Result<parking_lot::MutexGuard<'_, State>> {
        let mut state = self.state.lock();
        count(&mut state.calls);
        if state.unreachable_budget > 0 {
            state.unreachable_budget -= 1;
            return Err(RegistryError::unreachable(SERVER, "injected failure"));
        }
        Ok(state)
    }
}

fn store(state: &mut State, snapshot: PackageSnapshot, timestamp: String) {
    let digest = snapshot.digest().clone();
    let stored = state
        .packages
        .entry(snapshot.name().clone())
        .or_insert_with(|| Stored {
            latest: digest.clone(),
            snapshots: BTreeMap::new(),
        });
    stored.latest = digest.clone();
    stored
        .snapshots
        .entry(digest)
        .or_insert((snapshot, timestamp));
}

#[async_trait]
impl RegistryClient for MemoryRegistry {
    fn server(&self) -> &str {
        SERVER
    }

    async fn publish(&self, snapshot: &PackageSnapshot) -> Result<PublishReceipt> {
        let mut state = self.begin(|c| c.publish += 1)?;
        check_publishable(snapshot)?;

        let name = snapshot.name();
        let digest = snapshot.digest();
        let existing = state.packages.get(name);
        check_republish(name, existing.map(|s| &s.latest), digest, self.policy)?;

        let timestamp = existing
            .and_then(|s| s.snapshots.get(digest))
            .map(|(_, ts)| ts.clone())
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
        store(&mut state, snapshot.clone(), timestamp.clone());

        Ok(PublishReceipt {
            accepted_digest: digest.clone(),
            timestamp,
        })
    }

    async fn fetch(
        &self,
        name: &PackageName,
        want: Option<&ContentHash>,
    ) -> Result<PackageSnapshot> {
        let state = self.begin(|c| c.fetch += 1)?;
        let stored = state
            .packages
            .get(name)
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
            })?;
        let digest = want.unwrap_or(&stored.latest);
        match stored.snapshots.get(digest) {
            Some((snapshot, _)) => Ok(snapshot.clone()),
            None => Err(RegistryError::DigestMismatch {
                name: name.to_string(),
                expected: digest.to_string(),
                actual: stored.latest.to_string(),
            }),
        }
    }

    async fn resolve(&self, names: &[PackageName]) -> Result<BTreeMap<PackageName, ContentHash>> {
        let state = self.begin(|c| c.resolve += 1)?;
        names
            .iter()
            .map(|name| {
                state
                    .packages
                    .get(name)
                    .map(|s| (name.clone(), s.latest.clone()))
                    .ok_or_else(|| RegistryError::NotFound {
                        name: name.to_string(),
                    })
            })
            .collect()
    }

    async fn list(&self, prefix: &str) -> Result<Vec<PackageName>> {
        let state = self.begin(|c| c.list += 1)?;
        Ok(state
            .packages
            .keys()
            .filter(|n| n.is_within(prefix))
            .cloned()
            .collect())
    }
}
