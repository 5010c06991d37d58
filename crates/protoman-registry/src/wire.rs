//! Registry wire protocol.
//!
//! Transport-agnostic request and response bodies, serialized as JSON by the
//! HTTP transport and as stored records by the directory-backed registry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::integrity::ContentHash;
use crate::name::PackageName;
use crate::snapshot::{PackageSnapshot, SnapshotFile};

/// `Publish(name, digest, files[])`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub name: PackageName,
    pub digest: ContentHash,
    pub files: Vec<SnapshotFile>,
}

impl From<&PackageSnapshot> for PublishRequest {
    fn from(snapshot: &PackageSnapshot) -> Self {
        PublishRequest {
            name: snapshot.name().clone(),
            digest: snapshot.digest().clone(),
            files: snapshot.files().to_vec(),
        }
    }
}

/// What the registry recorded for an accepted publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub accepted_digest: ContentHash,
    /// RFC 3339 UTC timestamp of the first publish of this digest.
    pub timestamp: String,
}

/// `Fetch(name, wantDigest?)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub name: PackageName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub want_digest: Option<ContentHash>,
}

/// A snapshot as carried on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResponse {
    pub name: PackageName,
    pub digest: ContentHash,
    pub files: Vec<SnapshotFile>,
}

impl From<&PackageSnapshot> for FetchResponse {
    fn from(snapshot: &PackageSnapshot) -> Self {
        FetchResponse {
            name: snapshot.name().clone(),
            digest: snapshot.digest().clone(),
            files: snapshot.files().to_vec(),
        }
    }
}

impl TryFrom<FetchResponse> for PackageSnapshot {
    type Error = RegistryError;

    fn try_from(response: FetchResponse) -> Result<Self, Self::Error> {
        PackageSnapshot::from_parts(response.name, response.digest, response.files)
    }
}

/// `Resolve(names[])`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub names: Vec<PackageName>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub digests: BTreeMap<PackageName, ContentHash>,
}

/// List the packages at or below a namespace prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRequest {
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub names: Vec<PackageName>,
}

/// Machine-readable error codes returned by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    DigestMismatch,
    Rejected,
}

/// Error body returned alongside a non-success status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

impl ErrorBody {
    /// Convert to the client-side error; `fallback_name` fills a missing
    /// package name.
    pub fn into_error(self, fallback_name: &str) -> RegistryError {
        let name = self.name.unwrap_or_else(|| fallback_name.to_string());
        match self.code {
            ErrorCode::NotFound => RegistryError::NotFound { name },
            ErrorCode::DigestMismatch => RegistryError::DigestMismatch {
                name,
                expected: self.expected.unwrap_or_default(),
                actual: self.actual.unwrap_or_default(),
            },
            ErrorCode::Rejected => RegistryError::Rejected {
                name,
                reason: self.message,
            },
        }
    }
}
