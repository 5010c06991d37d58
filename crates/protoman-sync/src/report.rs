//! Per-step results of one operation.

use std::fmt;

use protoman_registry::{ContentHash, PackageName};

use crate::error::SyncError;
use crate::plan::{Operation, StepId, StepKind};

/// How a step settled.
#[derive(Debug)]
pub enum StepStatus {
    Done,
    Failed(SyncError),
    /// Not run because an earlier step of the same package failed.
    Skipped,
}

/// The settled result of one step.
#[derive(Debug)]
pub struct StepOutcome {
    /// Plan step, or `None` for work done before planning.
    pub id: Option<StepId>,
    pub kind: StepKind,
    pub package: PackageName,
    pub status: StepStatus,
    /// Digest fetched, published or recorded, when there is one.
    pub digest: Option<ContentHash>,
}

impl StepOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self.status, StepStatus::Done)
    }

    pub fn error(&self) -> Option<&SyncError> {
        match &self.status {
            StepStatus::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Aggregate result of one operation.
///
/// Package-level failures live here; a failure to save the manifest is an
/// `Err` from the operation instead.
#[derive(Debug)]
pub struct SyncReport {
    pub operation: Operation,
    /// Settled steps, in settle order.
    pub outcomes: Vec<StepOutcome>,
    /// Packages that needed no work.
    pub unchanged: Vec<PackageName>,
    /// Whether the manifest was saved.
    pub committed: bool,
    /// Whether the run was interrupted; in-flight steps are not reported.
    pub cancelled: bool,
}

impl SyncReport {
    /// An empty report.
    pub fn new(operation: Operation) -> Self {
        SyncReport {
            operation,
            outcomes: Vec::new(),
            unchanged: Vec::new(),
            committed: false,
            cancelled: false,
        }
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &StepOutcome> {
        self.outcomes.iter().filter(|o| o.is_done())
    }

    pub fn failed(&self) -> impl Iterator<Item = &StepOutcome> {
        self.outcomes.iter().filter(|o| o.error().is_some())
    }

    /// True when nothing failed and the run was not interrupted.
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.failed().next().is_none()
    }

    /// Record a failure that happened outside any plan step.
    pub fn record_failure(&mut self, kind: StepKind, package: PackageName, error: SyncError) {
        self.outcomes.push(StepOutcome {
            id: None,
            kind,
            package,
            status: StepStatus::Failed(error),
            digest: None,
        });
    }

    /// Packages with at least one failed step, in first-failure order.
    pub fn failed_packages(&self) -> Vec<&PackageName> {
        let mut names: Vec<&PackageName> = Vec::new();
        for outcome in self.failed() {
            if !names.contains(&&outcome.package) {
                names.push(&outcome.package);
            }
        }
        names
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.outcomes {
            match &outcome.status {
                StepStatus::Done => {
                    write!(f, "  ok      {:<8} {}", outcome.kind, outcome.package)?;
                    if let Some(digest) = &outcome.digest {
                        write!(f, " @{}", digest.short())?;
                    }
                    writeln!(f)?;
                }
                StepStatus::Failed(err) => {
                    writeln!(f, "  FAILED  {:<8} {}: {err}", outcome.kind, outcome.package)?;
                }
                StepStatus::Skipped => {
                    writeln!(f, "  skipped {:<8} {}", outcome.kind, outcome.package)?;
                }
            }
        }
        for name in &self.unchanged {
            writeln!(f, "  current          {name}")?;
        }

        let failed = self.failed_packages().len();
        write!(f, "{}: ", self.operation)?;
        if self.cancelled {
            write!(f, "cancelled, ")?;
        }
        if failed == 0 {
            write!(f, "ok")?;
        } else {
            write!(f, "{failed} package(s) failed")?;
        }
        if self.committed {
            write!(f, ", manifest updated")?;
        }
        Ok(())
    }
}
