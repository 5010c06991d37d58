//! Schema package registry protocol and clients.
//!
//! Packages are dotted namespaces (`a.b.v1`) whose schema files are stored
//! by the registry as immutable, content-addressed snapshots. This crate
//! holds the shared vocabulary (names, digests, snapshots, wire types) and
//! the `RegistryClient` boundary with its backends:
//! - **LocalRegistry**: a registry service kept in a directory
//! - **HttpRegistry**: JSON over HTTP to a remote registry
//! - **MemoryRegistry**: in-process, with scriptable failures
//!
//! Clients never touch a project's schema tree and never retry.

pub mod client;
pub mod error;
pub mod http;
pub mod integrity;
pub mod local;
pub mod memory;
pub mod name;
pub mod snapshot;
pub mod wire;

// Re-exports for convenience.
pub use client::{connect, RegistryClient, RepublishPolicy};
pub use error::{RegistryError, Result};
pub use http::HttpRegistry;
pub use integrity::ContentHash;
pub use local::LocalRegistry;
pub use memory::{CallCounts, MemoryRegistry};
pub use name::PackageName;
pub use snapshot::{PackageSnapshot, SnapshotFile};
pub use wire::PublishReceipt;
