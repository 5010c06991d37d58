//! Lexical scanning of schema files for `package` and `import` statements.
//!
//! Scanning is line based: `//` comments are stripped and each statement is
//! expected on one line, which is how schema files are written in practice.
//! Full grammar handling is left to the validator collaborator.

use std::collections::BTreeSet;
use std::path::Path;

use protoman_registry::{PackageName, PackageSnapshot};

/// Import paths (`import "a/b/v1/x.proto";`) declared in `source`, in order
/// of appearance. `public` and `weak` modifiers are accepted.
pub fn scan_imports(source: &str) -> Vec<String> {
    source
        .lines()
        .filter_map(|line| {
            let rest = strip_comment(line).trim().strip_prefix("import")?;
            if !rest.starts_with(|c: char| c.is_whitespace() || c == '"') {
                return None;
            }
            let rest = rest.trim_start();
            let rest = ["public", "weak"]
                .iter()
                .find_map(|m| rest.strip_prefix(m).filter(|r| r.starts_with(char::is_whitespace)))
                .unwrap_or(rest)
                .trim_start();
            let quoted = rest.strip_prefix('"')?;
            let end = quoted.find('"')?;
            Some(quoted[..end].to_string())
        })
        .collect()
}

/// The package an import path belongs to: the dotted form of its directory.
///
/// Imports without a directory, and well-known `google/protobuf` types, do
/// not name a package this tool manages.
pub fn import_package(import: &str) -> Option<PackageName> {
    let dir = Path::new(import).parent()?;
    if dir.as_os_str().is_empty() || dir.starts_with("google/protobuf") {
        return None;
    }
    PackageName::from_relative_path(dir).ok()
}

/// The `package` statement of `source`, if present.
pub fn declared_package(source: &str) -> Option<&str> {
    source.lines().find_map(|line| {
        let rest = strip_comment(line).trim().strip_prefix("package")?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let rest = rest.trim();
        Some(rest.strip_suffix(';').unwrap_or(rest).trim())
    })
}

/// Packages imported by the files of `snapshot`, excluding itself.
pub fn snapshot_imports(snapshot: &PackageSnapshot) -> BTreeSet<PackageName> {
    snapshot
        .files()
        .iter()
        .filter_map(|f| std::str::from_utf8(&f.contents).ok())
        .flat_map(scan_imports)
        .filter_map(|import| import_package(&import))
        .filter(|name| name != snapshot.name())
        .collect()
}

pub(crate) fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(i) => &line[..i],
        None => line,
    }
}
