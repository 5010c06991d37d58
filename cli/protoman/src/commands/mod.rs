//! CLI command implementations.

pub mod local;
pub mod registry;

use anyhow::{bail, Result};
use protoman_sync::SyncReport;

/// Print `report` and fail unless every step succeeded.
pub(crate) fn finish(report: &SyncReport) -> Result<()> {
    println!("{report}");
    if report.cancelled {
        bail!("interrupted");
    }
    let failed = report.failed_packages().len();
    if failed > 0 {
        bail!("{failed} package(s) failed");
    }
    Ok(())
}
