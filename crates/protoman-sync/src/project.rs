//! Operations on one project directory.
//!
//! A [`Project`] ties the manifest store, configuration and collaborators
//! together. Each operation loads the manifest, plans, executes and commits
//! exactly once.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use protoman_registry::{PackageName, RegistryClient};
use tracing::info;

use crate::config::SyncConfig;
use crate::engine::{resolve_latest, Engine};
use crate::error::{name_error, SyncError, SyncResult};
use crate::manifest::{Manifest, ManifestStore};
use crate::plan::{Operation, StepKind};
use crate::report::SyncReport;
use crate::resolver;
use crate::scaffold::{ProtoScaffold, Scaffolder};
use crate::validate::{ProtoValidator, SchemaValidator};

/// A project rooted at a directory holding (or about to hold) `.protoman`.
#[derive(Clone)]
pub struct Project {
    root: PathBuf,
    store: ManifestStore,
    config: SyncConfig,
    validator: Arc<dyn SchemaValidator>,
    scaffolder: Arc<dyn Scaffolder>,
}

impl Project {
    /// Open the project at `root`, reading `protoman.toml` if present.
    pub fn open(root: impl Into<PathBuf>) -> SyncResult<Self> {
        let root = root.into();
        let config = SyncConfig::load(&root)?;
        Ok(Self::with_config(root, config))
    }

    /// Open the project at `root` with an explicit configuration.
    pub fn with_config(root: impl Into<PathBuf>, config: SyncConfig) -> Self {
        let root = root.into();
        Project {
            store: ManifestStore::new(&root),
            root,
            config,
            validator: Arc::new(ProtoValidator),
            scaffolder: Arc::new(ProtoScaffold),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_scaffolder(mut self, scaffolder: Arc<dyn Scaffolder>) -> Self {
        self.scaffolder = scaffolder;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SyncConfig {
        &mut self.config
    }

    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    /// Load the current manifest.
    pub fn manifest(&self) -> SyncResult<Manifest> {
        self.store.load()
    }

    fn engine(&self) -> Engine {
        Engine::new(self.root.clone(), self.config.clone()).with_scaffolder(self.scaffolder.clone())
    }

    /// Record `path` as the local directory of package `name`.
    pub async fn add(&self, name: &str, path: &Path) -> SyncResult<SyncReport> {
        let name = PackageName::parse(name).map_err(name_error)?;
        let manifest = self.store.load()?;
        let plan = resolver::plan_add(&manifest, &self.root, name, path)?;
        self.engine().execute(plan, manifest, &self.store).await
    }

    /// Forget package `name`. Its files are left in place.
    pub async fn remove(&self, name: &str) -> SyncResult<SyncReport> {
        let name = PackageName::parse(name).map_err(name_error)?;
        let manifest = self.store.load()?;
        let plan = resolver::plan_remove(&manifest, name);
        self.engine().execute(plan, manifest, &self.store).await
    }

    /// Fetch `names` (and the packages they import) into `proto_dir`.
    pub async fn get(
        &self,
        names: &[String],
        proto_dir: &Path,
        registry: Arc<dyn RegistryClient>,
        shutdown: impl Future<Output = ()>,
    ) -> SyncResult<SyncReport> {
        let names = names
            .iter()
            .map(|n| PackageName::parse(n).map_err(name_error))
            .collect::<SyncResult<Vec<_>>>()?;
        let manifest = self.store.load()?;
        let plan = resolver::plan_get(&manifest, &self.root, &names, proto_dir);
        self.engine()
            .with_registry(registry)
            .execute_until(plan, manifest, &self.store, shutdown)
            .await
    }

    /// Bring every tracked package up to the registry's latest digest.
    ///
    /// Packages the registry no longer knows are reported as failures;
    /// the others still update.
    pub async fn update(
        &self,
        registry: Arc<dyn RegistryClient>,
        shutdown: impl Future<Output = ()>,
    ) -> SyncResult<SyncReport> {
        let manifest = self.store.load()?;
        let names: Vec<PackageName> = manifest.tracked().map(|e| e.name().clone()).collect();
        if names.is_empty() {
            info!("no tracked packages");
            return Ok(SyncReport::new(Operation::Update));
        }

        tokio::pin!(shutdown);
        let (resolved, missing) = tokio::select! {
            biased;
            _ = &mut shutdown => return Err(SyncError::Cancelled),
            resolved = resolve_latest(registry.as_ref(), &self.config.retry, names) => resolved?,
        };

        let plan = resolver::plan_update(&manifest, &resolved);
        info!(
            drifted = plan.count(StepKind::Fetch),
            unchanged = plan.unchanged().len(),
            "resolved tracked packages"
        );
        let mut report = self
            .engine()
            .with_registry(registry)
            .execute_until(plan, manifest, &self.store, shutdown)
            .await?;
        for (name, err) in missing {
            report.record_failure(StepKind::Resolve, name, err);
        }
        Ok(report)
    }

    /// Publish `files`, or every local-only package when `files` is empty.
    ///
    /// Relative file paths are taken from the project root.
    pub async fn publish(
        &self,
        files: &[PathBuf],
        registry: Arc<dyn RegistryClient>,
        shutdown: impl Future<Output = ()>,
    ) -> SyncResult<SyncReport> {
        let manifest = self.store.load()?;
        let plan = resolver::plan_publish(&manifest, &self.root, files, self.validator.as_ref())?;
        self.engine()
            .with_registry(registry)
            .execute_until(plan, manifest, &self.store, shutdown)
            .await
    }

    /// Scaffold package `package` with service `service` below `root` and
    /// register it as local-only.
    pub async fn generate(
        &self,
        package: &str,
        service: &str,
        root: &Path,
    ) -> SyncResult<SyncReport> {
        let package = PackageName::parse(package).map_err(name_error)?;
        let manifest = self.store.load()?;
        let plan = resolver::plan_generate(&manifest, package, service, root)?;
        self.engine().execute(plan, manifest, &self.store).await
    }
}
