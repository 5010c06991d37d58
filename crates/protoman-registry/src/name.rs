//! Dotted package names and their directory form.
//!
//! A package `a.b.v1` lives in the directory `a/b/v1` below a proto root.
//! The mapping is a bijection: [`PackageName::from_relative_path`] undoes
//! [`PackageName::to_relative_path`].

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};

/// A validated, non-empty, dot-delimited package identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageName(String);

impl PackageName {
    /// Parse and validate a dotted name such as `spotify.protoman.v1`.
    pub fn parse(name: &str) -> Result<Self> {
        let invalid = |reason: String| RegistryError::InvalidPackageName {
            name: name.to_string(),
            reason,
        };

        if name.is_empty() {
            return Err(invalid("name is empty".to_string()));
        }
        if name.starts_with('.') || name.ends_with('.') {
            return Err(invalid("leading or trailing dot".to_string()));
        }
        for (i, segment) in name.split('.').enumerate() {
            validate_segment(segment).map_err(|reason| invalid(format!("segment {i}: {reason}")))?;
        }
        Ok(PackageName(name.to_string()))
    }

    /// Get the dotted string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the dot-separated segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// The relative directory for this package (`a.b.v1` → `a/b/v1`).
    pub fn to_relative_path(&self) -> PathBuf {
        self.segments().collect()
    }

    /// Recover a package name from its relative directory form.
    ///
    /// Rejects absolute paths and `.`/`..` components.
    pub fn from_relative_path(path: &Path) -> Result<Self> {
        let mut segments = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => {
                    let part = part.to_str().ok_or_else(|| RegistryError::InvalidPackageName {
                        name: path.display().to_string(),
                        reason: "path is not valid UTF-8".to_string(),
                    })?;
                    segments.push(part);
                }
                _ => {
                    return Err(RegistryError::InvalidPackageName {
                        name: path.display().to_string(),
                        reason: "path must be relative without '.' or '..' components".to_string(),
                    })
                }
            }
        }
        PackageName::parse(&segments.join("."))
    }

    /// True if this name equals `prefix` or lives below it in the namespace.
    ///
    /// An empty prefix matches every name.
    pub fn is_within(&self, prefix: &str) -> bool {
        let prefix = prefix.trim_end_matches('.');
        prefix.is_empty()
            || self.0 == prefix
            || (self.0.starts_with(prefix) && self.0[prefix.len()..].starts_with('.'))
    }
}

/// Check one identifier segment: `[A-Za-z_][A-Za-z0-9_]*`.
pub(crate) fn validate_segment(segment: &str) -> std::result::Result<(), String> {
    let mut chars = segment.chars();
    match chars.next() {
        None => return Err("empty segment".to_string()),
        Some(c) if c.is_ascii_digit() => {
            return Err(format!("'{segment}' begins with a digit"));
        }
        Some(c) if !(c.is_ascii_alphabetic() || c == '_') => {
            return Err(format!("'{segment}' contains invalid character '{c}'"));
        }
        Some(_) => {}
    }
    if let Some(c) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(format!("'{segment}' contains invalid character '{c}'"));
    }
    Ok(())
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PackageName {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        PackageName::parse(s)
    }
}

impl TryFrom<String> for PackageName {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self> {
        PackageName::parse(&value)
    }
}

impl From<PackageName> for String {
    fn from(name: PackageName) -> Self {
        name.0
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
