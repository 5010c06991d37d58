//! Project-side synchronization for protoman.
//!
//! Keeps a project's schema tree and its `.protoman` manifest consistent with
//! a package registry through a three-stage pipeline: planning (resolver),
//! bounded-concurrency execution (engine), and a single manifest commit.
//! Operations are exposed through [`Project`]: add, remove, get, update,
//! publish and generate.

pub mod config;
pub mod engine;
pub mod error;
pub mod imports;
pub mod manifest;
pub mod plan;
pub mod project;
pub mod report;
pub mod resolver;
pub mod scaffold;
pub mod validate;
pub mod writer;

pub use config::{RetryConfig, SyncConfig};
pub use engine::Engine;
pub use error::{SyncError, SyncResult};
pub use manifest::{Manifest, ManifestStore, PackageEntry};
pub use plan::{ManifestChange, Operation, Plan, Step, StepKind};
pub use project::Project;
pub use report::{StepOutcome, StepStatus, SyncReport};
pub use scaffold::{ProtoScaffold, Scaffolder};
pub use validate::{validate_path, ProtoValidator, SchemaValidator, SyntaxError};
pub use writer::ApplyOutcome;
