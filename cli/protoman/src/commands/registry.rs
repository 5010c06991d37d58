//! Commands that talk to a registry: get, update, publish, list.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use protoman_registry::RegistryClient;
use protoman_sync::Project;
use tracing::warn;

use super::finish;

fn connect(project: &Project, server: &str) -> Result<Arc<dyn RegistryClient>> {
    let config = project.config();
    protoman_registry::connect(server, config.timeout, config.republish)
        .with_context(|| format!("connecting to registry {server}"))
}

/// Resolves on Ctrl-C. If the signal cannot be installed, never resolves.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Run `protoman get <names...> --server <s> --proto-dir <dir>`.
pub async fn get(project: &Project, names: &[String], server: &str, proto_dir: &Path) -> Result<()> {
    let registry = connect(project, server)?;
    let report = project
        .get(names, proto_dir, registry, interrupted())
        .await
        .context("get failed")?;
    finish(&report)
}

/// Run `protoman update --server <s>`.
pub async fn update(project: &Project, server: &str) -> Result<()> {
    let registry = connect(project, server)?;
    let report = project
        .update(registry, interrupted())
        .await
        .context("update failed")?;
    finish(&report)
}

/// Run `protoman publish [files...] --server <s>`.
pub async fn publish(project: &Project, files: &[PathBuf], server: &str) -> Result<()> {
    let registry = connect(project, server)?;
    let report = project
        .publish(files, registry, interrupted())
        .await
        .context("publish failed")?;
    if report.outcomes.is_empty() {
        println!("Nothing to publish.");
        return Ok(());
    }
    finish(&report)
}

/// Run `protoman list [prefix] --server <s>`.
pub async fn list(project: &Project, prefix: &str, server: &str) -> Result<()> {
    let registry = connect(project, server)?;
    let names = registry
        .list(prefix)
        .await
        .with_context(|| format!("listing packages on {server}"))?;
    if names.is_empty() {
        println!("No packages.");
    }
    for name in names {
        println!("{name}");
    }
    Ok(())
}
