//! Registry error types.

/// Errors that can occur while talking to a schema registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The registry could not be reached, or did not answer in a usable way.
    #[error("registry {server} unreachable: {detail}")]
    Unreachable { server: String, detail: String },

    /// The package is unknown to the registry.
    #[error("package not found: {name}")]
    NotFound { name: String },

    /// The registry holds different content than the digest requested.
    #[error("digest mismatch for '{name}': expected {expected}, got {actual}")]
    DigestMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    /// The registry refused a publish.
    #[error("publish of '{name}' rejected: {reason}")]
    Rejected { name: String, reason: String },

    /// A dotted package name is malformed.
    #[error("invalid package name '{name}': {reason}")]
    InvalidPackageName { name: String, reason: String },

    /// A snapshot's file set is malformed.
    #[error("invalid snapshot: {detail}")]
    InvalidSnapshot { detail: String },

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// Creates an [`RegistryError::Unreachable`] for `server`.
    pub fn unreachable(server: impl Into<String>, detail: impl Into<String>) -> Self {
        RegistryError::Unreachable {
            server: server.into(),
            detail: detail.into(),
        }
    }

    /// Returns true if repeating the identical call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RegistryError::Unreachable { .. })
    }
}

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
