//! The synchronization engine.
//!
//! Runs a [`Plan`]: every step whose predecessors have all succeeded is
//! started, at most `workers` of them doing I/O at once. Settled results
//! flow back into a single collector, which records outcomes, extends `get`
//! plans with discovered imports, and releases dependent steps. Workers
//! never touch the manifest; the collector applies the proposed changes and
//! saves once, after everything has settled.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use protoman_registry::{
    ContentHash, PackageName, PackageSnapshot, RegistryClient, RegistryError,
};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::{RetryConfig, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::manifest::{Manifest, ManifestStore};
use crate::plan::{ManifestChange, Plan, Step, StepId, StepKind};
use crate::report::{StepOutcome, StepStatus, SyncReport};
use crate::resolver;
use crate::scaffold::{ProtoScaffold, Scaffolder};
use crate::writer;

/// What a successful step hands to the steps after it.
#[derive(Debug)]
enum Output {
    Nothing,
    Snapshot(Arc<PackageSnapshot>),
    Digest(ContentHash),
    Change(ManifestChange),
}

impl Output {
    fn digest(&self) -> Option<ContentHash> {
        match self {
            Output::Snapshot(snapshot) => Some(snapshot.digest().clone()),
            Output::Digest(digest) => Some(digest.clone()),
            Output::Change(ManifestChange::Upsert(entry)) => entry.registry_digest().cloned(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

type StepFuture = BoxFuture<'static, (StepId, SyncResult<Output>)>;

/// Executes plans against a project directory and, optionally, a registry.
#[derive(Clone)]
pub struct Engine {
    root: PathBuf,
    config: SyncConfig,
    registry: Option<Arc<dyn RegistryClient>>,
    scaffolder: Arc<dyn Scaffolder>,
}

impl Engine {
    /// Create an engine for the project at `root`. Relative step paths are
    /// resolved against it.
    pub fn new(root: PathBuf, config: SyncConfig) -> Self {
        Engine {
            root,
            config,
            registry: None,
            scaffolder: Arc::new(ProtoScaffold),
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn RegistryClient>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_scaffolder(mut self, scaffolder: Arc<dyn Scaffolder>) -> Self {
        self.scaffolder = scaffolder;
        self
    }

    /// Run `plan` to completion and commit the manifest.
    pub async fn execute(
        &self,
        plan: Plan,
        manifest: Manifest,
        store: &ManifestStore,
    ) -> SyncResult<SyncReport> {
        self.execute_until(plan, manifest, store, std::future::pending())
            .await
    }

    /// Run `plan` until it completes or `shutdown` resolves.
    ///
    /// On shutdown no further steps start and in-flight steps are dropped
    /// without being reported; the changes of steps that already settled
    /// are still committed.
    pub async fn execute_until(
        &self,
        plan: Plan,
        mut manifest: Manifest,
        store: &ManifestStore,
        shutdown: impl Future<Output = ()>,
    ) -> SyncResult<SyncReport> {
        info!(operation = %plan.operation(), steps = plan.len(), "executing plan");
        let mut run = Run::new(self, plan, &manifest);

        tokio::pin!(shutdown);
        loop {
            run.schedule();
            if run.in_flight.is_empty() {
                break;
            }
            let event = tokio::select! {
                biased;
                _ = &mut shutdown => None,
                settled = run.in_flight.next() => settled,
            };
            match event {
                Some((id, result)) => run.settle(id, result),
                None => {
                    warn!(
                        in_flight = run.in_flight.len(),
                        "interrupted, abandoning in-flight steps"
                    );
                    run.report.cancelled = true;
                    break;
                }
            }
        }
        run.finish_stuck();

        let (mut report, changes) = run.into_parts();
        if !changes.is_empty() {
            for change in changes {
                match change {
                    ManifestChange::Upsert(entry) => {
                        manifest.upsert(entry);
                    }
                    ManifestChange::Remove(name) => {
                        manifest.remove(&name);
                    }
                }
            }
            save(store, manifest).await?;
            report.committed = true;
            info!(path = %store.path().display(), "manifest committed");
        }
        Ok(report)
    }
}

/// Save on the blocking pool.
async fn save(store: &ManifestStore, manifest: Manifest) -> SyncResult<()> {
    let store = store.clone();
    let path = store.path().to_path_buf();
    tokio::task::spawn_blocking(move || store.save(&manifest))
        .await
        .map_err(|e| SyncError::ManifestWrite {
            path,
            source: std::io::Error::new(std::io::ErrorKind::Other, e),
        })?
}

/// State of one plan execution.
struct Run<'a> {
    engine: &'a Engine,
    plan: Plan,
    manifest: &'a Manifest,
    slots: Vec<Slot>,
    outputs: HashMap<StepId, Output>,
    in_flight: FuturesUnordered<StepFuture>,
    semaphore: Arc<Semaphore>,
    report: SyncReport,
}

impl<'a> Run<'a> {
    fn new(engine: &'a Engine, plan: Plan, manifest: &'a Manifest) -> Self {
        let mut report = SyncReport::new(plan.operation());
        report.unchanged = plan.unchanged().to_vec();
        Run {
            engine,
            slots: vec![Slot::Pending; plan.len()],
            plan,
            manifest,
            outputs: HashMap::new(),
            in_flight: FuturesUnordered::new(),
            semaphore: Arc::new(Semaphore::new(engine.config.workers.max(1))),
            report,
        }
    }

    /// Start every pending step whose predecessors succeeded and settle
    /// every pending step behind a failure, until nothing changes.
    fn schedule(&mut self) {
        loop {
            let mut progressed = false;
            for id in 0..self.plan.len() {
                if self.slots[id] != Slot::Pending {
                    continue;
                }
                let after = self.plan.steps()[id].after.clone();
                if let Some(&blocker) = after
                    .iter()
                    .find(|dep| matches!(self.slots[**dep], Slot::Failed | Slot::Skipped))
                {
                    self.settle_blocked(id, blocker);
                    progressed = true;
                } else if after.iter().all(|dep| self.slots[*dep] == Slot::Done) {
                    self.start(id);
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
    }

    fn start(&mut self, id: StepId) {
        self.slots[id] = Slot::Running;
        let step = self.plan.steps()[id].step.clone();
        debug!(step = id, kind = %step.kind(), package = %step.package(), "starting step");

        let future: StepFuture = match step {
            Step::Fetch { name, want } => {
                let registry = self.engine.registry.clone();
                let retry = self.engine.config.retry.clone();
                let semaphore = self.semaphore.clone();
                async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    (id, fetch(registry, &retry, name, want).await)
                }
                .boxed()
            }
            Step::Apply { dest, source, .. } => {
                let snapshot = match self.outputs.get(&source) {
                    Some(Output::Snapshot(snapshot)) => snapshot.clone(),
                    _ => {
                        self.settle(id, Err(missing_output(source)));
                        return;
                    }
                };
                let dest = self.engine.root.join(dest);
                let semaphore = self.semaphore.clone();
                async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let shown = dest.clone();
                    let result = blocking(&shown, move || writer::apply_at(&dest, &snapshot))
                    .await
                    .map(|_| Output::Nothing);
                    (id, result)
                }
                .boxed()
            }
            Step::Publish { snapshot } => {
                let registry = self.engine.registry.clone();
                let retry = self.engine.config.retry.clone();
                let semaphore = self.semaphore.clone();
                async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    (id, publish(registry, &retry, snapshot).await)
                }
                .boxed()
            }
            Step::Scaffold {
                package,
                service,
                root,
            } => {
                let scaffolder = self.engine.scaffolder.clone();
                let root = self.engine.root.join(root);
                async move {
                    let shown = root.clone();
                    let result = blocking(&shown, move || {
                        scaffolder.scaffold(&root, &package, &service)
                    })
                    .await
                    .map(|_| Output::Nothing);
                    (id, result)
                }
                .boxed()
            }
            Step::ManifestUpdate {
                change,
                digest_from,
            } => {
                let result = self.propose(change, digest_from);
                self.settle(id, result);
                return;
            }
        };
        self.in_flight.push(future);
    }

    /// Resolve a manifest change against the output of its digest source.
    fn propose(
        &self,
        change: ManifestChange,
        digest_from: Option<StepId>,
    ) -> SyncResult<Output> {
        let (entry, source) = match (change, digest_from) {
            (ManifestChange::Upsert(entry), Some(source)) => (entry, source),
            (change, _) => return Ok(Output::Change(change)),
        };
        let digest = self
            .outputs
            .get(&source)
            .and_then(Output::digest)
            .ok_or_else(|| missing_output(source))?;
        let registry = self.engine.registry.as_ref().ok_or(SyncError::NoRegistry)?;
        Ok(Output::Change(ManifestChange::Upsert(
            entry.with_registry(digest, registry.server()),
        )))
    }

    fn settle(&mut self, id: StepId, result: SyncResult<Output>) {
        let step = &self.plan.steps()[id].step;
        let kind = step.kind();
        let package = step.package().clone();

        let (slot, status, digest) = match result {
            Ok(output) => {
                let digest = output.digest();
                self.outputs.insert(id, output);
                (Slot::Done, StepStatus::Done, digest)
            }
            Err(err) => {
                warn!(step = id, kind = %kind, package = %package, error = %err, "step failed");
                (Slot::Failed, StepStatus::Failed(err), None)
            }
        };
        if slot == Slot::Done && matches!(kind, StepKind::Fetch | StepKind::Publish) {
            info!(kind = %kind, package = %package, digest = ?digest.as_ref().map(ContentHash::short), "done");
        }
        self.slots[id] = slot;
        self.report.outcomes.push(StepOutcome {
            id: Some(id),
            kind,
            package,
            status,
            digest,
        });

        if slot == Slot::Done && kind == StepKind::Fetch {
            self.discover(id);
        }
    }

    /// Extend a `get` plan with the imports of a freshly fetched snapshot.
    fn discover(&mut self, fetch: StepId) {
        if self.plan.discovery_root().is_none() {
            return;
        }
        let snapshot = match self.outputs.get(&fetch) {
            Some(Output::Snapshot(snapshot)) => snapshot.clone(),
            _ => return,
        };
        let added = resolver::expand_get(&mut self.plan, self.manifest, fetch, &snapshot);
        self.slots.resize(self.plan.len(), Slot::Pending);
        if !added.is_empty() {
            info!(
                package = %snapshot.name(),
                imports = ?added.iter().map(PackageName::as_str).collect::<Vec<_>>(),
                "fetching imported packages"
            );
        }
        self.fail_cycles();
    }

    /// Fail the pending steps that wait on each other in a cycle.
    fn fail_cycles(&mut self) {
        for cycle in self.plan.cycles() {
            let mut names: Vec<String> = cycle
                .iter()
                .map(|&id| self.plan.steps()[id].step.package().to_string())
                .collect();
            names.sort();
            names.dedup();
            warn!(cycle = ?names, "import cycle");
            for id in cycle {
                if self.slots[id] == Slot::Pending {
                    self.settle(id, Err(resolver::cycle_error(names.clone())));
                }
            }
        }
    }

    fn settle_blocked(&mut self, id: StepId, blocker: StepId) {
        let step = &self.plan.steps()[id].step;
        let kind = step.kind();
        let package = step.package().clone();
        let dependency = self.plan.steps()[blocker].step.package().clone();

        let (slot, status) = if dependency == package {
            (Slot::Skipped, StepStatus::Skipped)
        } else {
            let err = SyncError::DependencyFailed {
                name: package.to_string(),
                dependency: dependency.to_string(),
            };
            warn!(package = %package, dependency = %dependency, "dependency failed");
            (Slot::Failed, StepStatus::Failed(err))
        };
        self.slots[id] = slot;
        self.report.outcomes.push(StepOutcome {
            id: Some(id),
            kind,
            package,
            status,
            digest: None,
        });
    }

    /// Steps still pending after a complete run could never start.
    fn finish_stuck(&mut self) {
        if self.report.cancelled {
            return;
        }
        for id in 0..self.slots.len() {
            if self.slots[id] == Slot::Pending {
                let package = self.plan.steps()[id].step.package().to_string();
                self.settle(id, Err(resolver::cycle_error(vec![package])));
            }
        }
    }

    /// The report and the proposed manifest changes, in plan order.
    fn into_parts(mut self) -> (SyncReport, Vec<ManifestChange>) {
        let mut ids: Vec<StepId> = self.outputs.keys().copied().collect();
        ids.sort_unstable();
        let changes = ids
            .into_iter()
            .filter_map(|id| match self.outputs.remove(&id) {
                Some(Output::Change(change)) => Some(change),
                _ => None,
            })
            .collect();
        (self.report, changes)
    }
}

fn missing_output(source: StepId) -> SyncError {
    SyncError::io(
        PathBuf::new(),
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("output of step {source} is unavailable"),
        ),
    )
}

/// Run blocking disk work on the blocking pool.
async fn blocking<T, F>(path: &Path, work: F) -> SyncResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> SyncResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|e| {
        SyncError::io(path, std::io::Error::new(std::io::ErrorKind::Other, e))
    })?
}

/// Call the registry, retrying retryable failures with backoff.
async fn with_retry<T, F, Fut>(
    retry: &RetryConfig,
    method: &str,
    package: &PackageName,
    mut call: F,
) -> Result<T, RegistryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RegistryError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < retry.max_attempts => {
                attempt += 1;
                let delay = retry.delay_for_attempt(attempt);
                warn!(
                    method,
                    package = %package,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying registry call"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn fetch(
    registry: Option<Arc<dyn RegistryClient>>,
    retry: &RetryConfig,
    name: PackageName,
    want: Option<ContentHash>,
) -> SyncResult<Output> {
    let registry = registry.ok_or(SyncError::NoRegistry)?;
    let snapshot = with_retry(retry, "fetch", &name, || {
        registry.fetch(&name, want.as_ref())
    })
    .await?;

    if snapshot.name() != &name || !snapshot.verify() {
        return Err(RegistryError::DigestMismatch {
            name: name.to_string(),
            expected: want.as_ref().map(ContentHash::to_string).unwrap_or_default(),
            actual: snapshot.digest().to_string(),
        }
        .into());
    }
    if let Some(want) = &want {
        if snapshot.digest() != want {
            return Err(RegistryError::DigestMismatch {
                name: name.to_string(),
                expected: want.to_string(),
                actual: snapshot.digest().to_string(),
            }
            .into());
        }
    }
    Ok(Output::Snapshot(Arc::new(snapshot)))
}

async fn publish(
    registry: Option<Arc<dyn RegistryClient>>,
    retry: &RetryConfig,
    snapshot: PackageSnapshot,
) -> SyncResult<Output> {
    let registry = registry.ok_or(SyncError::NoRegistry)?;
    let receipt = with_retry(retry, "publish", snapshot.name(), || {
        registry.publish(&snapshot)
    })
    .await?;

    if &receipt.accepted_digest != snapshot.digest() {
        return Err(RegistryError::DigestMismatch {
            name: snapshot.name().to_string(),
            expected: snapshot.digest().to_string(),
            actual: receipt.accepted_digest.to_string(),
        }
        .into());
    }
    Ok(Output::Digest(receipt.accepted_digest))
}

/// Resolve the latest digests of `names`, retrying transient failures.
///
/// Names the registry does not know are dropped and returned separately so
/// the rest can still be resolved.
pub async fn resolve_latest(
    registry: &dyn RegistryClient,
    retry: &RetryConfig,
    mut names: Vec<PackageName>,
) -> SyncResult<(BTreeMap<PackageName, ContentHash>, Vec<(PackageName, SyncError)>)> {
    let mut missing = Vec::new();
    loop {
        if names.is_empty() {
            return Ok((BTreeMap::new(), missing));
        }
        let subject = names[0].clone();
        match with_retry(retry, "resolve", &subject, || registry.resolve(&names)).await {
            Ok(resolved) => return Ok((resolved, missing)),
            Err(RegistryError::NotFound { name }) => {
                let Some(index) = names.iter().position(|n| n.as_str() == name) else {
                    return Err(RegistryError::NotFound { name }.into());
                };
                let unknown = names.remove(index);
                warn!(package = %unknown, "not found in registry");
                missing.push((
                    unknown,
                    SyncError::Registry(RegistryError::NotFound { name }),
                ));
            }
            Err(err) => return Err(err.into()),
        }
    }
}
