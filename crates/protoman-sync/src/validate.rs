//! Schema validation collaborator.
//!
//! The engine only needs a yes/no answer per file, so validation sits behind
//! [`SchemaValidator`]. The bundled [`ProtoValidator`] is a lexical check:
//! it catches the mistakes that would make a published package unusable
//! (wrong encoding, unbalanced braces, missing or malformed `package`), not
//! type errors.

use std::fmt;
use std::path::{Path, PathBuf};

use protoman_registry::PackageName;
use walkdir::WalkDir;

use crate::imports::strip_comment;
use crate::writer::is_schema_file;

/// A validation failure, with the 1-based line it was found on (0 when it
/// concerns the whole file).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

impl SyntaxError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        SyntaxError {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{}", self.message)
        } else {
            write!(f, "line {}: {}", self.line, self.message)
        }
    }
}

impl std::error::Error for SyntaxError {}

/// Decides whether a schema file is acceptable for publishing.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, path: &Path) -> Result<(), SyntaxError>;
}

/// Lexical validator for `.proto` files.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtoValidator;

impl SchemaValidator for ProtoValidator {
    fn validate(&self, path: &Path) -> Result<(), SyntaxError> {
        let bytes = std::fs::read(path).map_err(|e| SyntaxError::new(0, e.to_string()))?;
        let source = String::from_utf8(bytes)
            .map_err(|_| SyntaxError::new(0, "file is not valid UTF-8"))?;
        validate_source(&source)
    }
}

/// Validate `path`, or every `.proto` file below it when it is a directory.
///
/// Returns the files checked and the failures found, both in path order.
pub fn validate_path(
    validator: &dyn SchemaValidator,
    path: &Path,
) -> Result<(usize, Vec<(PathBuf, SyntaxError)>), walkdir::Error> {
    let mut checked = 0;
    let mut failures = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry?;
        let is_root_file = entry.depth() == 0 && entry.file_type().is_file();
        if !entry.file_type().is_file() || !(is_root_file || is_schema_file(entry.path())) {
            continue;
        }
        checked += 1;
        if let Err(err) = validator.validate(entry.path()) {
            failures.push((entry.path().to_path_buf(), err));
        }
    }
    Ok((checked, failures))
}

/// Validate schema text.
pub fn validate_source(source: &str) -> Result<(), SyntaxError> {
    check_braces(source)?;

    let mut syntax_seen = false;
    let mut package_seen = false;
    for (index, raw) in source.lines().enumerate() {
        let line_no = index + 1;
        let line = strip_comment(raw).trim();

        if let Some(rest) = statement(line, "syntax") {
            if syntax_seen {
                return Err(SyntaxError::new(line_no, "duplicate syntax statement"));
            }
            syntax_seen = true;
            let value = rest
                .strip_prefix('=')
                .map(str::trim)
                .and_then(|v| v.strip_suffix(';'))
                .map(|v| v.trim().trim_matches('"'))
                .ok_or_else(|| SyntaxError::new(line_no, "malformed syntax statement"))?;
            if value != "proto2" && value != "proto3" {
                return Err(SyntaxError::new(
                    line_no,
                    format!("unsupported syntax '{value}'"),
                ));
            }
        } else if let Some(rest) = statement(line, "package") {
            if package_seen {
                return Err(SyntaxError::new(line_no, "duplicate package statement"));
            }
            package_seen = true;
            let name = rest
                .strip_suffix(';')
                .map(str::trim)
                .ok_or_else(|| SyntaxError::new(line_no, "package statement must end with ';'"))?;
            PackageName::parse(name).map_err(|e| SyntaxError::new(line_no, e.to_string()))?;
        }
    }

    if !package_seen {
        return Err(SyntaxError::new(0, "missing package statement"));
    }
    Ok(())
}

/// The remainder of `line` after `keyword`, if the line starts with it as a
/// whole word.
fn statement<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(keyword)?;
    if rest.starts_with(|c: char| c.is_alphanumeric() || c == '_') {
        return None;
    }
    Some(rest.trim_start())
}

/// Check `{}` balance, ignoring string literals and comments.
fn check_braces(source: &str) -> Result<(), SyntaxError> {
    let mut open: Vec<usize> = Vec::new();
    let mut line = 1;
    let mut chars = source.chars().peekable();
    let mut in_block_comment = false;

    while let Some(c) = chars.next() {
        if c == '\n' {
            line += 1;
            continue;
        }
        if in_block_comment {
            if c == '*' && chars.peek() == Some(&'/') {
                chars.next();
                in_block_comment = false;
            }
            continue;
        }
        match c {
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                in_block_comment = true;
            }
            '"' | '\'' => {
                let quote = c;
                let mut closed = false;
                while let Some(s) = chars.next() {
                    match s {
                        '\\' => {
                            chars.next();
                        }
                        '\n' => break,
                        s if s == quote => {
                            closed = true;
                            break;
                        }
                        _ => {}
                    }
                }
                if !closed {
                    return Err(SyntaxError::new(line, "unterminated string literal"));
                }
            }
            '{' => open.push(line),
            '}' => {
                if open.pop().is_none() {
                    return Err(SyntaxError::new(line, "unexpected '}'"));
                }
            }
            _ => {}
        }
    }

    if in_block_comment {
        return Err(SyntaxError::new(line, "unterminated block comment"));
    }
    match open.pop() {
        Some(at) => Err(SyntaxError::new(at, "unclosed '{'")),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"syntax = "proto3";
package acme.billing.v1;

/* a service { */
service Billing {
  rpc Charge(ChargeRequest) returns (ChargeResponse) {} // "}"
}

message ChargeRequest { string note = 1 [default = "{"]; }
message ChargeResponse {}
"#;

    #[test]
    fn accepts_well_formed_file() {
        validate_source(VALID).unwrap();
    }

    #[test]
    fn reports_unclosed_brace_line() {
        let err = validate_source("package a.v1;\nmessage A {\n").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn reports_stray_closing_brace() {
        let err = validate_source("package a.v1;\n}\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.to_string().starts_with("line 2:"));
    }

    #[test]
    fn requires_exactly_one_valid_package() {
        assert!(validate_source("syntax = \"proto3\";\n").is_err());
        assert!(validate_source("package a.v1;\npackage b.v1;\n").is_err());
        assert!(validate_source("package a..v1;\n").is_err());
        assert!(validate_source("package a.v1\n").is_err());
    }

    #[test]
    fn rejects_unknown_syntax() {
        let err = validate_source("syntax = \"proto4\";\npackage a.v1;\n").unwrap_err();
        assert!(err.message.contains("proto4"));
    }

    #[test]
    fn validator_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.proto");
        let bad = dir.path().join("bad.proto");
        std::fs::write(&good, VALID).unwrap();
        std::fs::write(&bad, [0xff, 0xfe]).unwrap();

        assert!(ProtoValidator.validate(&good).is_ok());
        assert_eq!(
            ProtoValidator.validate(&bad).unwrap_err().message,
            "file is not valid UTF-8"
        );
        assert!(ProtoValidator.validate(&dir.path().join("missing.proto")).is_err());
    }

    #[test]
    fn validate_path_walks_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/v1")).unwrap();
        std::fs::write(dir.path().join("a/v1/good.proto"), VALID).unwrap();
        std::fs::write(dir.path().join("a/v1/bad.proto"), "package a.v1;\n{\n").unwrap();
        std::fs::write(dir.path().join("a/v1/notes.txt"), "{").unwrap();

        let (checked, failures) = validate_path(&ProtoValidator, dir.path()).unwrap();
        assert_eq!(checked, 2);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].0.ends_with("bad.proto"));
        assert_eq!(failures[0].1.line, 2);
    }
}
