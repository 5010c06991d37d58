//! Planning: from the manifest and an operation's arguments to a [`Plan`].
//!
//! Planning never talks to a registry. Argument and schema validation
//! happens here, so an operation that cannot succeed fails before any
//! network call or write.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::DiGraph;
use protoman_registry::{ContentHash, PackageName, PackageSnapshot, SnapshotFile};
use tracing::debug;

use crate::error::{name_error, SyncError, SyncResult};
use crate::imports::{declared_package, snapshot_imports};
use crate::manifest::{Manifest, PackageEntry};
use crate::plan::{ManifestChange, Operation, Plan, Step, StepId};
use crate::validate::SchemaValidator;
use crate::writer::{is_schema_file, schema_files};

/// `add`: record a local package directory.
pub fn plan_add(
    manifest: &Manifest,
    project_root: &Path,
    name: PackageName,
    path: &Path,
) -> SyncResult<Plan> {
    let resolved = project_root.join(path);
    if !resolved.is_dir() {
        let reason = if resolved.exists() {
            "not a directory"
        } else {
            "does not exist"
        };
        return Err(SyncError::InvalidPath {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        });
    }

    let entry = match manifest.get(&name) {
        Some(existing) => existing.clone().with_local_path(path.to_path_buf()),
        None => PackageEntry::local(name, path.to_path_buf()),
    };
    let mut plan = Plan::new(Operation::Add);
    plan.push(
        Step::ManifestUpdate {
            change: ManifestChange::Upsert(entry),
            digest_from: None,
        },
        vec![],
    );
    Ok(plan)
}

/// `remove`: drop a manifest entry. Local files are not touched.
pub fn plan_remove(manifest: &Manifest, name: PackageName) -> Plan {
    let mut plan = Plan::new(Operation::Remove);
    if manifest.contains(&name) {
        plan.push(
            Step::ManifestUpdate {
                change: ManifestChange::Remove(name),
                digest_from: None,
            },
            vec![],
        );
    } else {
        plan.mark_unchanged(name);
    }
    plan
}

/// `get`: fetch each requested package into `proto_dir`.
///
/// A name is skipped when the manifest already tracks it at a registry
/// digest in the same directory and that directory exists.
pub fn plan_get(
    manifest: &Manifest,
    project_root: &Path,
    names: &[PackageName],
    proto_dir: &Path,
) -> Plan {
    let mut plan = Plan::new(Operation::Get).with_import_discovery(proto_dir.to_path_buf());
    for name in names {
        if plan.apply_for(name).is_some() || plan.unchanged().contains(name) {
            continue;
        }
        let dest = proto_dir.join(name.to_relative_path());
        let satisfied = manifest.get(name).is_some_and(|entry| {
            entry.registry_digest().is_some()
                && entry.local_path() == Some(dest.as_path())
                && project_root.join(&dest).is_dir()
        });
        if satisfied {
            debug!(package = %name, "already satisfied");
            plan.mark_unchanged(name.clone());
            continue;
        }
        push_fetch(&mut plan, manifest, name.clone(), None, dest);
    }
    plan
}

/// Extend a `get` plan with the imports found in the snapshot downloaded by
/// Fetch step `fetch`.
///
/// Imported packages that are neither planned nor in the manifest get their
/// own Fetch/Apply/ManifestUpdate steps below the plan's proto directory.
/// The consumer's Apply is ordered after each producer's Apply. Returns the
/// newly planned packages.
pub fn expand_get(
    plan: &mut Plan,
    manifest: &Manifest,
    fetch: StepId,
    snapshot: &PackageSnapshot,
) -> Vec<PackageName> {
    let Some(proto_dir) = plan.discovery_root().map(Path::to_path_buf) else {
        return Vec::new();
    };
    let Some(consumer) = plan.apply_of_fetch(fetch) else {
        return Vec::new();
    };

    let mut added = Vec::new();
    for import in snapshot_imports(snapshot) {
        if let Some(producer) = plan.apply_for(&import) {
            plan.add_edge(consumer, producer);
            continue;
        }
        if manifest.contains(&import) {
            continue;
        }
        let dest = proto_dir.join(import.to_relative_path());
        let (_, producer, _) = push_fetch(plan, manifest, import.clone(), None, dest);
        plan.add_edge(consumer, producer);
        debug!(package = %import, imported_by = %snapshot.name(), "planned transitive fetch");
        added.push(import);
    }
    added
}

/// `update`: fetch every tracked package whose resolved digest differs from
/// the recorded one, into its recorded local path.
///
/// Tracked names missing from `resolved` are left alone.
pub fn plan_update(manifest: &Manifest, resolved: &BTreeMap<PackageName, ContentHash>) -> Plan {
    let mut plan = Plan::new(Operation::Update);
    for entry in manifest.tracked() {
        let Some(latest) = resolved.get(entry.name()) else {
            continue;
        };
        if entry.registry_digest() == Some(latest) {
            plan.mark_unchanged(entry.name().clone());
            continue;
        }
        let dest = entry
            .local_path()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| entry.name().to_relative_path());
        push_fetch(
            &mut plan,
            manifest,
            entry.name().clone(),
            Some(latest.clone()),
            dest,
        );
    }
    plan
}

/// Plan Fetch, Apply and ManifestUpdate for one package.
fn push_fetch(
    plan: &mut Plan,
    manifest: &Manifest,
    name: PackageName,
    want: Option<ContentHash>,
    dest: PathBuf,
) -> (StepId, StepId, StepId) {
    let entry = match manifest.get(&name) {
        Some(existing) => existing.clone().with_local_path(dest.clone()),
        None => PackageEntry::local(name.clone(), dest.clone()),
    };
    let fetch = plan.push(
        Step::Fetch {
            name: name.clone(),
            want,
        },
        vec![],
    );
    let apply = plan.push(
        Step::Apply {
            name,
            dest,
            source: fetch,
        },
        vec![fetch],
    );
    let update = plan.push(
        Step::ManifestUpdate {
            change: ManifestChange::Upsert(entry),
            digest_from: Some(fetch),
        },
        vec![apply],
    );
    (fetch, apply, update)
}

/// A schema file selected for publishing.
struct SourceFile {
    /// Path as given or recorded, for reporting.
    shown: PathBuf,
    /// Path on disk.
    disk: PathBuf,
    /// Package the file must declare, when selected through the manifest.
    expected: Option<PackageName>,
    /// Package directory to record in the manifest.
    local_path: PathBuf,
}

/// `publish`: validate every selected file, then publish one snapshot per
/// declared package, producers before consumers.
///
/// With no `files`, every local-only manifest entry is published from the
/// `.proto` files directly inside its local path. Any invalid file aborts
/// the whole plan.
pub fn plan_publish(
    manifest: &Manifest,
    project_root: &Path,
    files: &[PathBuf],
    validator: &dyn SchemaValidator,
) -> SyncResult<Plan> {
    let sources = if files.is_empty() {
        manifest_sources(manifest, project_root)?
    } else {
        file_sources(project_root, files)?
    };

    for source in &sources {
        validator
            .validate(&source.disk)
            .map_err(|e| SyncError::ValidationFailed {
                file: source.shown.clone(),
                reason: e.to_string(),
            })?;
    }

    let mut groups: BTreeMap<PackageName, (PathBuf, Vec<SnapshotFile>)> = BTreeMap::new();
    for source in sources {
        let bytes = std::fs::read(&source.disk).map_err(|e| SyncError::io(&source.disk, e))?;
        let text = String::from_utf8_lossy(&bytes);
        let declared = declared_package(&text).ok_or_else(|| SyncError::ValidationFailed {
            file: source.shown.clone(),
            reason: "missing package statement".to_string(),
        })?;
        let package = PackageName::parse(declared).map_err(|e| SyncError::ValidationFailed {
            file: source.shown.clone(),
            reason: e.to_string(),
        })?;
        if let Some(expected) = &source.expected {
            if expected != &package {
                return Err(SyncError::ValidationFailed {
                    file: source.shown.clone(),
                    reason: format!("declares package '{package}' but is listed under '{expected}'"),
                });
            }
        }

        let file_name = source
            .disk
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        groups
            .entry(package)
            .or_insert_with(|| (source.local_path.clone(), Vec::new()))
            .1
            .push(SnapshotFile::new(file_name, bytes));
    }

    let mut snapshots = BTreeMap::new();
    for (name, (local_path, files)) in groups {
        let snapshot = PackageSnapshot::new(name.clone(), files)?;
        snapshots.insert(name, (local_path, snapshot));
    }

    let mut plan = Plan::new(Operation::Publish);
    let mut publish_ids: HashMap<PackageName, StepId> = HashMap::new();
    for name in publish_order(&snapshots)? {
        let Some((local_path, snapshot)) = snapshots.get(&name) else {
            continue;
        };
        let after = snapshot_imports(snapshot)
            .iter()
            .filter_map(|producer| publish_ids.get(producer).copied())
            .collect();
        let publish = plan.push(
            Step::Publish {
                snapshot: snapshot.clone(),
            },
            after,
        );
        publish_ids.insert(name.clone(), publish);

        let entry = match manifest.get(&name) {
            Some(existing) => existing.clone().with_local_path(local_path.clone()),
            None => PackageEntry::local(name.clone(), local_path.clone()),
        };
        plan.push(
            Step::ManifestUpdate {
                change: ManifestChange::Upsert(entry),
                digest_from: Some(publish),
            },
            vec![publish],
        );
    }
    Ok(plan)
}

fn manifest_sources(manifest: &Manifest, project_root: &Path) -> SyncResult<Vec<SourceFile>> {
    let mut sources = Vec::new();
    for entry in manifest.local_only() {
        let Some(local_path) = entry.local_path() else {
            continue;
        };
        let dir = project_root.join(local_path);
        let found = schema_files(&dir).map_err(|e| SyncError::InvalidPath {
            path: local_path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if found.is_empty() {
            return Err(SyncError::InvalidPath {
                path: local_path.to_path_buf(),
                reason: format!("no .proto files for package '{}'", entry.name()),
            });
        }
        for disk in found {
            let shown = match disk.file_name() {
                Some(file) => local_path.join(file),
                None => disk.clone(),
            };
            sources.push(SourceFile {
                shown,
                disk,
                expected: Some(entry.name().clone()),
                local_path: local_path.to_path_buf(),
            });
        }
    }
    Ok(sources)
}

fn file_sources(project_root: &Path, files: &[PathBuf]) -> SyncResult<Vec<SourceFile>> {
    let mut sources = Vec::with_capacity(files.len());
    for file in files {
        if !is_schema_file(file) {
            return Err(SyncError::InvalidPath {
                path: file.clone(),
                reason: "must be a .proto file".to_string(),
            });
        }
        let disk = project_root.join(file);
        if !disk.is_file() {
            return Err(SyncError::InvalidPath {
                path: file.clone(),
                reason: "no such file".to_string(),
            });
        }
        let local_path = file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        sources.push(SourceFile {
            shown: file.clone(),
            disk,
            expected: None,
            local_path,
        });
    }
    Ok(sources)
}

/// Order packages so that every package comes after the packages it
/// imports from the same set.
fn publish_order(
    snapshots: &BTreeMap<PackageName, (PathBuf, PackageSnapshot)>,
) -> SyncResult<Vec<PackageName>> {
    let mut graph = DiGraph::<PackageName, ()>::new();
    let nodes: HashMap<&PackageName, _> = snapshots
        .keys()
        .map(|name| (name, graph.add_node(name.clone())))
        .collect();
    for (consumer, (_, snapshot)) in snapshots {
        for producer in snapshot_imports(snapshot) {
            if let (Some(&from), Some(&to)) = (nodes.get(&producer), nodes.get(consumer)) {
                graph.add_edge(from, to, ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(|n| graph[n].clone()).collect()),
        Err(cycle) => {
            let members: BTreeSet<String> = tarjan_scc(&graph)
                .into_iter()
                .find(|scc| scc.contains(&cycle.node_id()))
                .unwrap_or_default()
                .into_iter()
                .map(|n| graph[n].to_string())
                .collect();
            Err(cycle_error(members.into_iter().collect()))
        }
    }
}

/// Build a `DependencyCycle` error that reads as a closed loop.
pub(crate) fn cycle_error(mut members: Vec<String>) -> SyncError {
    if let Some(first) = members.first().cloned() {
        members.push(first);
    }
    SyncError::DependencyCycle { cycle: members }
}

/// `generate`: scaffold a new package below `root` and register it as
/// local-only.
pub fn plan_generate(
    manifest: &Manifest,
    package: PackageName,
    service: &str,
    root: &Path,
) -> SyncResult<Plan> {
    if root.has_root() {
        return Err(SyncError::InvalidPath {
            path: root.to_path_buf(),
            reason: "root path must be relative to the project".to_string(),
        });
    }
    let service_name = PackageName::parse(service).map_err(name_error)?;
    if service_name.segments().count() != 1 {
        return Err(SyncError::InvalidPackageName {
            name: service.to_string(),
            reason: "service name must be a single identifier".to_string(),
        });
    }

    let local_path = root.join(package.to_relative_path());
    let entry = match manifest.get(&package) {
        Some(existing) => existing.clone().with_local_path(local_path),
        None => PackageEntry::local(package.clone(), local_path),
    };

    let mut plan = Plan::new(Operation::Generate);
    let scaffold = plan.push(
        Step::Scaffold {
            package,
            service: service.to_string(),
            root: root.to_path_buf(),
        },
        vec![],
    );
    plan.push(
        Step::ManifestUpdate {
            change: ManifestChange::Upsert(entry),
            digest_from: None,
        },
        vec![scaffold],
    );
    Ok(plan)
}
