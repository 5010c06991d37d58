//! Commands that only touch the project: add, remove, generate, validate.

use std::path::Path;

use anyhow::{bail, Context, Result};
use protoman_sync::{validate_path, ProtoValidator, Project};

use super::finish;

/// Run `protoman add <name> --path <dir>`.
pub async fn add(project: &Project, name: &str, path: &Path) -> Result<()> {
    let report = project
        .add(name, path)
        .await
        .with_context(|| format!("adding {name}"))?;
    finish(&report)?;
    println!("Added {name} at {}", path.display());
    Ok(())
}

/// Run `protoman remove <name>`.
pub async fn remove(project: &Project, name: &str) -> Result<()> {
    let report = project
        .remove(name)
        .await
        .with_context(|| format!("removing {name}"))?;
    if !report.committed {
        println!("{name} is not in the manifest");
        return Ok(());
    }
    finish(&report)
}

/// Run `protoman generate <package> <service> <root>`.
pub async fn generate(project: &Project, package: &str, service: &str, root: &Path) -> Result<()> {
    let report = project
        .generate(package, service, root)
        .await
        .with_context(|| format!("generating {package}"))?;
    finish(&report)
}

/// Run `protoman validate <path>`.
///
/// Relative paths are taken from the project directory.
pub fn validate(project: &Project, path: &Path) -> Result<()> {
    let target = project.root().join(path);
    let (checked, failures) = validate_path(&ProtoValidator, &target)
        .with_context(|| format!("reading {}", target.display()))?;

    for (file, err) in &failures {
        let shown = file.strip_prefix(project.root()).unwrap_or(file);
        println!("{}: {err}", shown.display());
    }
    if checked == 0 {
        bail!("no .proto files found at {}", path.display());
    }
    if !failures.is_empty() {
        bail!("{} of {checked} file(s) failed validation", failures.len());
    }
    println!("{checked} file(s) ok");
    Ok(())
}
