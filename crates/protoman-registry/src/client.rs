//! Registry client trait and backend selection.
//!
//! The `RegistryClient` trait abstracts over registry transports (a local
//! directory service, HTTP, an in-memory test double). Clients do not retry;
//! every call is safe to repeat with identical arguments.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{RegistryError, Result};
use crate::http::HttpRegistry;
use crate::integrity::ContentHash;
use crate::local::LocalRegistry;
use crate::name::PackageName;
use crate::snapshot::PackageSnapshot;
use crate::wire::PublishReceipt;

/// Abstract registry backend.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Address this client talks to, for reporting and manifest records.
    fn server(&self) -> &str;

    /// Publish a snapshot.
    async fn publish(&self, snapshot: &PackageSnapshot) -> Result<PublishReceipt>;

    /// Fetch a package, either at `want` or at its latest digest.
    async fn fetch(&self, name: &PackageName, want: Option<&ContentHash>)
        -> Result<PackageSnapshot>;

    /// Look up the latest digest of each name without downloading content.
    ///
    /// Fails with `NotFound` on the first unknown name.
    async fn resolve(&self, names: &[PackageName]) -> Result<BTreeMap<PackageName, ContentHash>>;

    /// List published packages at or below a namespace prefix.
    async fn list(&self, prefix: &str) -> Result<Vec<PackageName>>;
}

/// What a registry does when a name is republished with different content.
///
/// Only directory and in-memory registries apply it locally; an HTTP
/// registry enforces its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepublishPolicy {
    /// Published content is immutable; a different digest is `Rejected`.
    #[default]
    Reject,
    /// A different digest becomes the new latest; older digests stay
    /// fetchable.
    Allow,
}

/// Decide whether `digest` may be recorded for `name` given the current
/// latest digest.
///
/// Returns `Ok(true)` for an idempotent republish of the latest content.
pub(crate) fn check_republish(
    name: &PackageName,
    latest: Option<&ContentHash>,
    digest: &ContentHash,
    policy: RepublishPolicy,
) -> Result<bool> {
    match latest {
        None => Ok(false),
        Some(latest) if latest == digest => Ok(true),
        Some(latest) => match policy {
            RepublishPolicy::Allow => Ok(false),
            RepublishPolicy::Reject => Err(RegistryError::Rejected {
                name: name.to_string(),
                reason: format!(
                    "already published with digest {}; published content is immutable",
                    latest.short()
                ),
            }),
        },
    }
}

/// Validate a snapshot before a backend accepts it.
pub(crate) fn check_publishable(snapshot: &PackageSnapshot) -> Result<()> {
    if snapshot.is_empty() {
        return Err(RegistryError::Rejected {
            name: snapshot.name().to_string(),
            reason: "empty file set".to_string(),
        });
    }
    if !snapshot.verify() {
        return Err(RegistryError::Rejected {
            name: snapshot.name().to_string(),
            reason: "digest does not match contents".to_string(),
        });
    }
    Ok(())
}

/// Open a client for `server`.
///
/// `http://` and `https://` addresses use the HTTP transport; `file://`
/// addresses and plain paths use a directory-backed registry that applies
/// `policy`.
pub fn connect(
    server: &str,
    timeout: Duration,
    policy: RepublishPolicy,
) -> Result<Arc<dyn RegistryClient>> {
    let server = server.trim();
    if server.is_empty() {
        return Err(RegistryError::unreachable(server, "no registry address given"));
    }
    if server.starts_with("http://") || server.starts_with("https://") {
        return Ok(Arc::new(HttpRegistry::new(server, timeout)?));
    }
    let path = server.strip_prefix("file://").unwrap_or(server);
    Ok(Arc::new(
        LocalRegistry::new(PathBuf::from(path)).with_policy(policy),
    ))
}
