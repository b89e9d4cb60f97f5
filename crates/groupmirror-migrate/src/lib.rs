//! # Group permission mirroring
//!
//! This crate copies group-based access control from a Bitbucket Server
//! instance onto a Bitbucket Cloud workspace.
//!
//! ## Overview
//!
//! - **Scanning**: walks global grants, projects and repositories on Server
//!   and collects every group that holds a grant somewhere.
//! - **Flattening**: collapses the four Server sources of access (project
//!   default, project grant, repository default, repository grant) into the
//!   single per-repository privilege Cloud understands.
//! - **Group phase**: creates the groups on Cloud, applies workspace
//!   privileges derived from global grants and replays memberships by email.
//! - **Repository phase**: writes one privilege per group and repository.
//!
//! Both phases are idempotent. Rate limiting is handled transparently and
//! individual failures are reported rather than aborting the run.
//!
//! ## Example
//!
//! ```rust,ignore
//! use groupmirror_migrate::{
//!     GroupMirror, MigrationConfig, MigrationOptions, SourceConfig, TargetConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = MigrationConfig::new(
//!         SourceConfig::new("https://bitbucket.example.com", "admin", "password"),
//!         TargetConfig::new("acme", "migrator", "app-password"),
//!     )
//!     .with_options(MigrationOptions::default().with_dry_run(true));
//!
//!     let report = GroupMirror::new(config)?.run().await?;
//!     report.print_summary();
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod cloud;
pub mod error;
pub mod flatten;
pub mod migrator;
pub mod model;
pub mod orchestrator;
pub mod progress;
pub mod scanner;
pub mod server;
pub mod types;
pub mod verify;

pub use cloud::{group_slug, CloudClient};
pub use error::{MigrationError, Result};
pub use flatten::{effective_permission, workspace_mapping, WorkspaceMapping};
pub use migrator::GroupMirror;
pub use model::{
    GlobalPermission, MigrationSet, PermissionLevel, Project, Repository, ServerStructure,
    WorkspacePrivilege,
};
pub use orchestrator::MirrorOrchestrator;
pub use progress::{ConsoleProgressReporter, MigrationPhase, MigrationProgress, ProgressCallback};
pub use scanner::StructureScanner;
pub use server::ServerClient;
pub use types::*;
pub use verify::{InstanceVerifier, VerificationResult};

/// Version of the migration tools.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
