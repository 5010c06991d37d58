//! End-to-end operations against in-memory and directory registries.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use protoman_registry::{
    ContentHash, LocalRegistry, MemoryRegistry, PackageName, PackageSnapshot, PublishReceipt,
    RegistryClient, RegistryError, SnapshotFile,
};
use protoman_sync::{
    Manifest, ManifestStore, PackageEntry, Project, RetryConfig, StepKind, StepStatus, SyncConfig,
    SyncError,
};

fn name(s: &str) -> PackageName {
    PackageName::parse(s).unwrap()
}

fn proto(pkg: &str, imports: &[&str]) -> String {
    let mut text = format!("syntax = \"proto3\";\npackage {pkg};\n");
    for import in imports {
        text.push_str(&format!("import \"{import}\";\n"));
    }
    text.push_str("message Thing {}\n");
    text
}

fn snapshot(pkg: &str, imports: &[&str]) -> PackageSnapshot {
    PackageSnapshot::new(
        name(pkg),
        vec![SnapshotFile::new("thing.proto", proto(pkg, imports))],
    )
    .unwrap()
}

fn fast_config() -> SyncConfig {
    SyncConfig::default()
        .with_workers(4)
        .with_retry(RetryConfig::new(3).with_initial_delay(Duration::from_millis(1)))
}

fn project(root: &Path) -> Project {
    Project::with_config(root, fast_config())
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn never() -> std::future::Pending<()> {
    std::future::pending()
}

/// Wraps a [`MemoryRegistry`], slowing fetches down and recording the
/// largest number of fetches in flight at once. Fetches of `held` never
/// answer.
struct InstrumentedRegistry {
    inner: MemoryRegistry,
    delay: Duration,
    held: Option<PackageName>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl InstrumentedRegistry {
    fn new(inner: MemoryRegistry) -> Self {
        InstrumentedRegistry {
            inner,
            delay: Duration::ZERO,
            held: None,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn holding(mut self, held: &str) -> Self {
        self.held = Some(name(held));
        self
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryClient for InstrumentedRegistry {
    fn server(&self) -> &str {
        self.inner.server()
    }

    async fn publish(&self, snapshot: &PackageSnapshot) -> Result<PublishReceipt, RegistryError> {
        self.inner.publish(snapshot).await
    }

    async fn fetch(
        &self,
        name: &PackageName,
        want: Option<&ContentHash>,
    ) -> Result<PackageSnapshot, RegistryError> {
        if self.held.as_ref() == Some(name) {
            std::future::pending::<()>().await;
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let result = self.inner.fetch(name, want).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn resolve(
        &self,
        names: &[PackageName],
    ) -> Result<BTreeMap<PackageName, ContentHash>, RegistryError> {
        self.inner.resolve(names).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<PackageName>, RegistryError> {
        self.inner.list(prefix).await
    }
}

#[tokio::test]
async fn get_writes_files_and_records_digest() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    registry.insert(snapshot("acme.billing.v1", &[]));

    let report = project(dir.path())
        .get(&names(&["acme.billing.v1"]), Path::new("proto"), registry.clone(), never())
        .await
        .unwrap();

    assert!(report.is_success(), "{report}");
    assert!(report.committed);
    let written = dir.path().join("proto/acme/billing/v1/thing.proto");
    assert_eq!(
        std::fs::read_to_string(written).unwrap(),
        proto("acme.billing.v1", &[])
    );

    let manifest = ManifestStore::new(dir.path()).load().unwrap();
    let entry = manifest.get(&name("acme.billing.v1")).unwrap();
    assert_eq!(entry.registry_digest(), registry.latest(&name("acme.billing.v1")).as_ref());
    assert_eq!(entry.local_path(), Some(Path::new("proto/acme/billing/v1")));
    assert_eq!(entry.source_server(), Some("memory"));
}

#[tokio::test]
async fn get_keeps_successes_when_one_package_is_missing() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    registry.insert(snapshot("a.v1", &[]));

    let report = project(dir.path())
        .get(&names(&["a.v1", "missing.v1"]), Path::new("proto"), registry, never())
        .await
        .unwrap();

    assert!(!report.is_success());
    assert!(report.committed);
    assert_eq!(report.failed_packages(), vec![&name("missing.v1")]);
    let fetch_error = report
        .failed()
        .find(|o| o.kind == StepKind::Fetch)
        .and_then(|o| o.error())
        .unwrap();
    assert!(matches!(
        fetch_error,
        SyncError::Registry(RegistryError::NotFound { .. })
    ));

    let manifest = ManifestStore::new(dir.path()).load().unwrap();
    assert!(manifest.contains(&name("a.v1")));
    assert!(!manifest.contains(&name("missing.v1")));
    assert!(!dir.path().join("proto/missing").exists());
}

#[tokio::test]
async fn get_of_satisfied_package_does_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    registry.insert(snapshot("a.v1", &[]));
    let project = project(dir.path());

    project
        .get(&names(&["a.v1"]), Path::new("proto"), registry.clone(), never())
        .await
        .unwrap();
    let report = project
        .get(&names(&["a.v1"]), Path::new("proto"), registry.clone(), never())
        .await
        .unwrap();

    assert_eq!(report.unchanged, vec![name("a.v1")]);
    assert!(!report.committed);
    assert_eq!(registry.calls().fetch, 1);
}

#[tokio::test]
async fn get_follows_imports_transitively() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    registry.insert(snapshot("app.v1", &["lib/v1/thing.proto", "google/protobuf/empty.proto"]));
    registry.insert(snapshot("lib.v1", &["base/v1/thing.proto"]));
    registry.insert(snapshot("base.v1", &[]));

    let report = project(dir.path())
        .get(&names(&["app.v1"]), Path::new("proto"), registry, never())
        .await
        .unwrap();

    assert!(report.is_success(), "{report}");
    for pkg in ["app/v1", "lib/v1", "base/v1"] {
        assert!(dir.path().join("proto").join(pkg).join("thing.proto").is_file());
    }
    let manifest = ManifestStore::new(dir.path()).load().unwrap();
    assert_eq!(manifest.len(), 3);
    assert!(manifest.tracked().all(|e| e.registry_digest().is_some()));
}

#[tokio::test]
async fn failed_import_fails_its_consumer() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    registry.insert(snapshot("app.v1", &["gone/v1/thing.proto"]));

    let report = project(dir.path())
        .get(&names(&["app.v1"]), Path::new("proto"), registry, never())
        .await
        .unwrap();

    assert!(!report.is_success());
    let apply = report
        .outcomes
        .iter()
        .find(|o| o.kind == StepKind::Apply && o.package == name("app.v1"))
        .unwrap();
    assert!(matches!(
        apply.error(),
        Some(SyncError::DependencyFailed { dependency, .. }) if dependency == "gone.v1"
    ));
    assert!(!dir.path().join("proto/app/v1").exists());
    assert!(!report.committed);
}

#[tokio::test]
async fn import_cycle_fails_the_packages_involved() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    registry.insert(snapshot("a.v1", &["b/v1/thing.proto"]));
    registry.insert(snapshot("b.v1", &["a/v1/thing.proto"]));

    let report = project(dir.path())
        .get(&names(&["a.v1"]), Path::new("proto"), registry, never())
        .await
        .unwrap();

    assert!(!report.is_success());
    let cycles: Vec<_> = report
        .failed()
        .filter_map(|o| match o.error() {
            Some(SyncError::DependencyCycle { cycle }) => Some(cycle.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(cycles.len(), 2);
    assert_eq!(cycles[0], vec!["a.v1", "b.v1", "a.v1"]);
    assert!(!report.committed);
    assert!(!ManifestStore::new(dir.path()).path().exists());
}

#[tokio::test]
async fn update_with_nothing_changed_fetches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    registry.insert(snapshot("a.v1", &[]));
    registry.insert(snapshot("b.v1", &[]));
    let project = project(dir.path());
    project
        .get(&names(&["a.v1", "b.v1"]), Path::new("proto"), registry.clone(), never())
        .await
        .unwrap();

    let store = ManifestStore::new(dir.path());
    let before = std::fs::read_to_string(store.path()).unwrap();
    let fetches = registry.calls().fetch;

    let report = project.update(registry.clone(), never()).await.unwrap();

    assert!(report.is_success());
    assert!(!report.committed);
    assert_eq!(report.unchanged.len(), 2);
    assert_eq!(registry.calls().fetch, fetches);
    assert_eq!(std::fs::read_to_string(store.path()).unwrap(), before);
}

#[tokio::test]
async fn update_moves_drifted_packages_to_latest() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    registry.insert(snapshot("a.v1", &[]));
    let project = project(dir.path());
    project
        .get(&names(&["a.v1"]), Path::new("proto"), registry.clone(), never())
        .await
        .unwrap();

    let newer = PackageSnapshot::new(
        name("a.v1"),
        vec![SnapshotFile::new("thing.proto", "package a.v1;\nmessage Newer {}\n")],
    )
    .unwrap();
    registry.insert(newer.clone());

    let report = project.update(registry.clone(), never()).await.unwrap();

    assert!(report.is_success(), "{report}");
    assert!(report.committed);
    let on_disk = std::fs::read_to_string(dir.path().join("proto/a/v1/thing.proto")).unwrap();
    assert!(on_disk.contains("Newer"));
    let manifest = project.manifest().unwrap();
    assert_eq!(
        manifest.get(&name("a.v1")).unwrap().registry_digest(),
        Some(newer.digest())
    );
}

#[tokio::test]
async fn update_reports_packages_the_registry_forgot() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    registry.insert(snapshot("kept.v1", &[]));

    let mut manifest = Manifest::new();
    manifest.upsert(
        PackageEntry::published(name("kept.v1"), ContentHash::compute(b"old"), "memory")
            .with_local_path(PathBuf::from("proto/kept/v1")),
    );
    manifest.upsert(PackageEntry::published(
        name("gone.v1"),
        ContentHash::compute(b"gone"),
        "memory",
    ));
    ManifestStore::new(dir.path()).save(&manifest).unwrap();

    let report = project(dir.path()).update(registry, never()).await.unwrap();

    assert!(!report.is_success());
    assert!(report.committed);
    let resolve = report.failed().next().unwrap();
    assert_eq!(resolve.kind, StepKind::Resolve);
    assert_eq!(resolve.package, name("gone.v1"));
    assert!(dir.path().join("proto/kept/v1/thing.proto").is_file());

    let manifest = ManifestStore::new(dir.path()).load().unwrap();
    assert_eq!(
        manifest.get(&name("gone.v1")).unwrap().registry_digest(),
        Some(&ContentHash::compute(b"gone"))
    );
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    registry.insert(snapshot("a.v1", &[]));
    registry.fail_next(2);

    let report = project(dir.path())
        .get(&names(&["a.v1"]), Path::new("proto"), registry.clone(), never())
        .await
        .unwrap();

    assert!(report.is_success(), "{report}");
    assert_eq!(registry.calls().fetch, 3);
}

#[tokio::test]
async fn retries_are_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    registry.insert(snapshot("a.v1", &[]));
    registry.fail_next(10);

    let report = project(dir.path())
        .get(&names(&["a.v1"]), Path::new("proto"), registry.clone(), never())
        .await
        .unwrap();

    assert!(!report.is_success());
    assert_eq!(registry.calls().fetch, 3);
    let statuses: Vec<_> = report.outcomes.iter().map(|o| (o.kind, &o.status)).collect();
    assert!(matches!(statuses[0], (StepKind::Fetch, StepStatus::Failed(_))));
    assert!(statuses[1..]
        .iter()
        .all(|(_, status)| matches!(status, StepStatus::Skipped)));
}

#[tokio::test]
async fn shutdown_abandons_the_run_without_committing() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    registry.insert(snapshot("a.v1", &[]));

    let report = project(dir.path())
        .get(&names(&["a.v1"]), Path::new("proto"), registry, async {})
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(!report.is_success());
    assert!(!report.committed);
    assert!(!ManifestStore::new(dir.path()).path().exists());
}

#[tokio::test]
async fn registry_calls_never_exceed_the_worker_count() {
    let dir = tempfile::tempdir().unwrap();
    let memory = MemoryRegistry::new();
    let packages: Vec<String> = (0..10).map(|i| format!("p{i}.v1")).collect();
    for pkg in &packages {
        memory.insert(snapshot(pkg, &[]));
    }
    let registry = Arc::new(InstrumentedRegistry::new(memory).with_delay(Duration::from_millis(20)));

    let report = Project::with_config(dir.path(), fast_config().with_workers(2))
        .get(&packages, Path::new("proto"), registry.clone(), never())
        .await
        .unwrap();

    assert!(report.is_success(), "{report}");
    assert_eq!(registry.inner.calls().fetch, 10);
    assert_eq!(registry.peak(), 2);
}

#[tokio::test]
async fn shutdown_commits_packages_that_already_settled() {
    let dir = tempfile::tempdir().unwrap();
    let memory = MemoryRegistry::new();
    memory.insert(snapshot("fast.v1", &[]));
    memory.insert(snapshot("slow.v1", &[]));
    let registry = Arc::new(InstrumentedRegistry::new(memory).holding("slow.v1"));

    let written = dir.path().join("proto/fast/v1/thing.proto");
    let shutdown = async move {
        while !written.is_file() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    };
    let report = project(dir.path())
        .get(&names(&["fast.v1", "slow.v1"]), Path::new("proto"), registry, shutdown)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(report.committed);
    let manifest = ManifestStore::new(dir.path()).load().unwrap();
    assert!(manifest.contains(&name("fast.v1")));
    assert!(!manifest.contains(&name("slow.v1")));
    assert!(!dir.path().join("proto/slow").exists());
}

#[tokio::test]
async fn update_cancelled_while_resolving() {
    let dir = tempfile::tempdir().unwrap();
    let mut manifest = Manifest::new();
    manifest.upsert(PackageEntry::published(
        name("a.v1"),
        ContentHash::compute(b"a"),
        "memory",
    ));
    ManifestStore::new(dir.path()).save(&manifest).unwrap();

    let err = project(dir.path())
        .update(Arc::new(MemoryRegistry::new()), async {})
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Cancelled));
}

#[tokio::test]
async fn add_twice_updates_the_entry_in_place() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("first")).unwrap();
    std::fs::create_dir_all(dir.path().join("second")).unwrap();
    let project = project(dir.path());

    project.add("a.v1", Path::new("first")).await.unwrap();
    project.add("b.v1", Path::new("first")).await.unwrap();
    project.add("a.v1", Path::new("second")).await.unwrap();

    let manifest = project.manifest().unwrap();
    let entries: Vec<_> = manifest
        .entries()
        .iter()
        .map(|e| (e.name().as_str(), e.local_path().unwrap()))
        .collect();
    assert_eq!(
        entries,
        vec![("a.v1", Path::new("second")), ("b.v1", Path::new("first"))]
    );
}

#[tokio::test]
async fn add_rejects_missing_directory() {
    let dir = tempfile::tempdir().unwrap();
    let err = project(dir.path())
        .add("a.v1", Path::new("nowhere"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidPath { .. }));
}

#[tokio::test]
async fn generate_scaffolds_and_registers_local_package() {
    let dir = tempfile::tempdir().unwrap();
    let project = project(dir.path());

    let report = project
        .generate("acme.users.v1", "user_accounts", Path::new("proto"))
        .await
        .unwrap();

    assert!(report.is_success(), "{report}");
    let file = dir.path().join("proto/acme/users/v1/user_accounts.proto");
    let text = std::fs::read_to_string(file).unwrap();
    assert!(text.contains("package acme.users.v1;"));
    assert!(text.contains("service UserAccounts {"));

    let manifest = project.manifest().unwrap();
    let entry = manifest.get(&name("acme.users.v1")).unwrap();
    assert!(entry.is_local_only());
    assert_eq!(entry.local_path(), Some(Path::new("proto/acme/users/v1")));

    let again = project
        .generate("acme.users.v1", "user_accounts", Path::new("proto"))
        .await
        .unwrap();
    assert!(matches!(
        again.failed().next().and_then(|o| o.error()),
        Some(SyncError::PathConflict { .. })
    ));
}

#[tokio::test]
async fn generate_rejects_absolute_root() {
    let dir = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();

    let err = project(dir.path())
        .generate("a.v1", "svc", outside.path())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::InvalidPath { .. }));
    assert!(!outside.path().join("a").exists());
    assert!(!ManifestStore::new(dir.path()).path().exists());
}

#[tokio::test]
async fn publish_refuses_invalid_files_before_contacting_registry() {
    let dir = tempfile::tempdir().unwrap();
    let pkg_dir = dir.path().join("proto/a/v1");
    std::fs::create_dir_all(&pkg_dir).unwrap();
    std::fs::write(pkg_dir.join("good.proto"), proto("a.v1", &[])).unwrap();
    std::fs::write(pkg_dir.join("bad.proto"), "package a.v1;\nmessage Broken {\n").unwrap();
    let project = project(dir.path());
    project.add("a.v1", Path::new("proto/a/v1")).await.unwrap();

    let registry = Arc::new(MemoryRegistry::new());
    let err = project
        .publish(&[], registry.clone(), never())
        .await
        .unwrap_err();

    match err {
        SyncError::ValidationFailed { file, .. } => {
            assert_eq!(file, PathBuf::from("proto/a/v1/bad.proto"))
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(registry.calls().publish, 0);
    assert!(project.manifest().unwrap().get(&name("a.v1")).unwrap().is_local_only());
}

#[tokio::test]
async fn publish_orders_producers_first_and_records_digests() {
    let dir = tempfile::tempdir().unwrap();
    for (pkg, imports) in [("app.v1", vec!["lib/v1/thing.proto"]), ("lib.v1", vec![])] {
        let rel = name(pkg).to_relative_path();
        std::fs::create_dir_all(dir.path().join("proto").join(&rel)).unwrap();
        std::fs::write(
            dir.path().join("proto").join(&rel).join("thing.proto"),
            proto(pkg, &imports),
        )
        .unwrap();
    }
    let files = vec![
        PathBuf::from("proto/app/v1/thing.proto"),
        PathBuf::from("proto/lib/v1/thing.proto"),
    ];
    let registry = Arc::new(MemoryRegistry::new());
    let project = project(dir.path());

    let report = project.publish(&files, registry.clone(), never()).await.unwrap();

    assert!(report.is_success(), "{report}");
    let published: Vec<_> = report
        .succeeded()
        .filter(|o| o.kind == StepKind::Publish)
        .map(|o| o.package.as_str())
        .collect();
    assert_eq!(published, vec!["lib.v1", "app.v1"]);
    let manifest = project.manifest().unwrap();
    for pkg in ["app.v1", "lib.v1"] {
        assert_eq!(
            manifest.get(&name(pkg)).unwrap().registry_digest(),
            registry.latest(&name(pkg)).as_ref()
        );
    }
}

#[tokio::test]
async fn publish_rejects_import_cycles() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.proto"), proto("a.v1", &["b/v1/b.proto"])).unwrap();
    std::fs::write(dir.path().join("b.proto"), proto("b.v1", &["a/v1/a.proto"])).unwrap();
    let registry = Arc::new(MemoryRegistry::new());

    let err = project(dir.path())
        .publish(
            &[PathBuf::from("a.proto"), PathBuf::from("b.proto")],
            registry.clone(),
            never(),
        )
        .await
        .unwrap_err();

    match err {
        SyncError::DependencyCycle { cycle } => assert_eq!(cycle, vec!["a.v1", "b.v1", "a.v1"]),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(registry.calls().publish, 0);
}

#[tokio::test]
async fn published_package_can_be_fetched_by_another_project() {
    let registry_dir = tempfile::tempdir().unwrap();
    let author = tempfile::tempdir().unwrap();
    let consumer = tempfile::tempdir().unwrap();
    let registry: Arc<dyn RegistryClient> =
        Arc::new(LocalRegistry::new(registry_dir.path().to_path_buf()));

    let authoring = project(author.path());
    authoring
        .generate("acme.billing.v1", "billing", Path::new("proto"))
        .await
        .unwrap();
    let report = authoring.publish(&[], registry.clone(), never()).await.unwrap();
    assert!(report.is_success(), "{report}");
    let published = authoring.manifest().unwrap();
    let entry = published.get(&name("acme.billing.v1")).unwrap();
    assert!(entry.registry_digest().is_some());
    assert_eq!(entry.source_server(), Some(registry.server()));

    let report = project(consumer.path())
        .get(&names(&["acme.billing.v1"]), Path::new("vendor"), registry, never())
        .await
        .unwrap();
    assert!(report.is_success(), "{report}");
    assert_eq!(
        std::fs::read(consumer.path().join("vendor/acme/billing/v1/billing.proto")).unwrap(),
        std::fs::read(author.path().join("proto/acme/billing/v1/billing.proto")).unwrap()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_publishes_to_a_directory_registry_all_land() {
    let registry_dir = tempfile::tempdir().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut files = Vec::new();
    for i in 0..12 {
        let pkg = format!("p{i}.v1");
        let rel = PathBuf::from("proto").join(name(&pkg).to_relative_path());
        std::fs::create_dir_all(dir.path().join(&rel)).unwrap();
        std::fs::write(dir.path().join(&rel).join("thing.proto"), proto(&pkg, &[])).unwrap();
        files.push(rel.join("thing.proto"));
    }
    let registry = Arc::new(LocalRegistry::new(registry_dir.path().to_path_buf()));
    let project = Project::with_config(dir.path(), SyncConfig::default());

    let report = project.publish(&files, registry.clone(), never()).await.unwrap();

    assert!(report.is_success(), "{report}");
    assert_eq!(registry.list("").await.unwrap().len(), 12);
    let manifest = project.manifest().unwrap();
    let published: Vec<PackageName> = (0..12).map(|i| name(&format!("p{i}.v1"))).collect();
    let resolved = registry.resolve(&published).await.unwrap();
    for pkg in &published {
        assert_eq!(manifest.get(pkg).unwrap().registry_digest(), resolved.get(pkg));
    }
}

#[tokio::test]
async fn operations_without_manifest_changes_leave_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let report = project(dir.path())
        .publish(&[], Arc::new(MemoryRegistry::new()), never())
        .await
        .unwrap();
    assert!(report.is_success());
    assert!(!ManifestStore::new(dir.path()).path().exists());
}

fn entry_strategy() -> impl Strategy<Value = PackageEntry> {
    (
        "[a-z][a-z0-9_]{0,6}(\\.[a-z][a-z0-9_]{0,6}){0,3}",
        prop::option::of("[a-z]{1,6}(/[a-z0-9]{1,6}){0,3}"),
        prop::option::of(any::<Vec<u8>>()),
    )
        .prop_map(|(pkg, path, digest)| {
            let name = name(&pkg);
            match (path, digest) {
                (Some(path), Some(bytes)) => {
                    PackageEntry::local(name, PathBuf::from(path))
                        .with_registry(ContentHash::compute(&bytes), "https://registry.test")
                }
                (None, Some(bytes)) => {
                    PackageEntry::published(name, ContentHash::compute(&bytes), "memory")
                }
                (path, None) => PackageEntry::local(
                    name,
                    PathBuf::from(path.unwrap_or_else(|| "proto".to_string())),
                ),
            }
        })
}

proptest! {
    #[test]
    fn manifest_survives_save_and_load(entries in prop::collection::vec(entry_strategy(), 0..6)) {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        let mut manifest = Manifest::new();
        for entry in entries {
            manifest.upsert(entry);
        }

        store.save(&manifest).unwrap();
        let loaded = store.load().unwrap();
        prop_assert_eq!(&loaded, &manifest);

        let text = std::fs::read_to_string(store.path()).unwrap();
        store.save(&loaded).unwrap();
        prop_assert_eq!(std::fs::read_to_string(store.path()).unwrap(), text);
    }
}
