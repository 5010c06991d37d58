//! Execution plans.
//!
//! A plan is a list of steps with explicit "run after" edges. The resolver
//! builds plans; the engine runs them, and for `get` it may extend the plan
//! while it runs as imports are discovered in downloaded content.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use protoman_registry::{ContentHash, PackageName, PackageSnapshot};

use crate::manifest::PackageEntry;

/// Index of a step within its plan.
pub type StepId = usize;

/// The user-facing operation a plan implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Remove,
    Get,
    Update,
    Publish,
    Generate,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Add => "add",
            Operation::Remove => "remove",
            Operation::Get => "get",
            Operation::Update => "update",
            Operation::Publish => "publish",
            Operation::Generate => "generate",
        };
        f.write_str(name)
    }
}

/// A proposed manifest mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestChange {
    Upsert(PackageEntry),
    Remove(PackageName),
}

impl ManifestChange {
    pub fn package(&self) -> &PackageName {
        match self {
            ManifestChange::Upsert(entry) => entry.name(),
            ManifestChange::Remove(name) => name,
        }
    }
}

/// One unit of work.
#[derive(Debug, Clone)]
pub enum Step {
    /// Download a snapshot, at `want` or at the registry's latest.
    Fetch {
        name: PackageName,
        want: Option<ContentHash>,
    },
    /// Write the snapshot downloaded by step `source` into `dest`.
    Apply {
        name: PackageName,
        dest: PathBuf,
        source: StepId,
    },
    /// Upload a snapshot.
    Publish { snapshot: PackageSnapshot },
    /// Create the first schema file of a new package below `root`.
    Scaffold {
        package: PackageName,
        service: String,
        root: PathBuf,
    },
    /// Propose a manifest change. When `digest_from` is set, the digest
    /// produced by that Fetch or Publish step (and the registry address) is
    /// recorded on the entry.
    ManifestUpdate {
        change: ManifestChange,
        digest_from: Option<StepId>,
    },
}

/// Kind of a step, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Digest lookup issued before planning (`update`).
    Resolve,
    Fetch,
    Apply,
    Publish,
    Scaffold,
    ManifestUpdate,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepKind::Resolve => "resolve",
            StepKind::Fetch => "fetch",
            StepKind::Apply => "apply",
            StepKind::Publish => "publish",
            StepKind::Scaffold => "scaffold",
            StepKind::ManifestUpdate => "manifest",
        };
        f.write_str(name)
    }
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self {
            Step::Fetch { .. } => StepKind::Fetch,
            Step::Apply { .. } => StepKind::Apply,
            Step::Publish { .. } => StepKind::Publish,
            Step::Scaffold { .. } => StepKind::Scaffold,
            Step::ManifestUpdate { .. } => StepKind::ManifestUpdate,
        }
    }

    /// The package this step concerns.
    pub fn package(&self) -> &PackageName {
        match self {
            Step::Fetch { name, .. } | Step::Apply { name, .. } => name,
            Step::Publish { snapshot } => snapshot.name(),
            Step::Scaffold { package, .. } => package,
            Step::ManifestUpdate { change, .. } => change.package(),
        }
    }
}

/// A step and the steps it waits for.
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub id: StepId,
    pub step: Step,
    pub after: Vec<StepId>,
}

/// An ordered set of steps for one operation.
#[derive(Debug, Clone)]
pub struct Plan {
    operation: Operation,
    steps: Vec<PlannedStep>,
    unchanged: Vec<PackageName>,
    discovery_root: Option<PathBuf>,
}

impl Plan {
    /// Create an empty plan.
    pub fn new(operation: Operation) -> Self {
        Plan {
            operation,
            steps: Vec::new(),
            unchanged: Vec::new(),
            discovery_root: None,
        }
    }

    /// Discover imports in fetched content and plan their packages below
    /// `proto_dir` as the plan runs.
    pub fn with_import_discovery(mut self, proto_dir: PathBuf) -> Self {
        self.discovery_root = Some(proto_dir);
        self
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn steps(&self) -> &[PlannedStep] {
        &self.steps
    }

    pub fn step(&self, id: StepId) -> Option<&PlannedStep> {
        self.steps.get(id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Packages that needed no work.
    pub fn unchanged(&self) -> &[PackageName] {
        &self.unchanged
    }

    pub(crate) fn discovery_root(&self) -> Option<&Path> {
        self.discovery_root.as_deref()
    }

    /// Append a step that runs after `after`.
    pub fn push(&mut self, step: Step, after: Vec<StepId>) -> StepId {
        let id = self.steps.len();
        self.steps.push(PlannedStep { id, step, after });
        id
    }

    /// Make `step` wait for `after` as well.
    pub fn add_edge(&mut self, step: StepId, after: StepId) {
        if let Some(planned) = self.steps.get_mut(step) {
            if !planned.after.contains(&after) {
                planned.after.push(after);
            }
        }
    }

    pub fn mark_unchanged(&mut self, name: PackageName) {
        if !self.unchanged.contains(&name) {
            self.unchanged.push(name);
        }
    }

    /// Number of steps of a given kind.
    pub fn count(&self, kind: StepKind) -> usize {
        self.steps.iter().filter(|s| s.step.kind() == kind).count()
    }

    /// The Apply step for `name`, if one is planned.
    pub fn apply_for(&self, name: &PackageName) -> Option<StepId> {
        self.steps.iter().find_map(|s| match &s.step {
            Step::Apply { name: n, .. } if n == name => Some(s.id),
            _ => None,
        })
    }

    /// The Apply step that writes the output of Fetch step `fetch`.
    pub fn apply_of_fetch(&self, fetch: StepId) -> Option<StepId> {
        self.steps.iter().find_map(|s| match &s.step {
            Step::Apply { source, .. } if *source == fetch => Some(s.id),
            _ => None,
        })
    }

    /// Groups of steps that wait on each other in a cycle.
    pub fn cycles(&self) -> Vec<Vec<StepId>> {
        let mut graph: DiGraph<StepId, ()> = DiGraph::with_capacity(self.steps.len(), 0);
        let nodes: HashMap<StepId, NodeIndex> = self
            .steps
            .iter()
            .map(|s| (s.id, graph.add_node(s.id)))
            .collect();
        for step in &self.steps {
            for dep in &step.after {
                if let (Some(&from), Some(&to)) = (nodes.get(dep), nodes.get(&step.id)) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|scc| {
                let mut ids: Vec<StepId> = scc.into_iter().map(|n| graph[n]).collect();
                ids.sort_unstable();
                ids
            })
            .collect()
    }
}
