//! End-to-end run: verify, scan, then the enabled mirroring phases.

use tracing::info;
use validator::Validate;

use crate::cloud::CloudClient;
use crate::error::Result;
use crate::model::ServerStructure;
use crate::orchestrator::MirrorOrchestrator;
use crate::progress::{MigrationPhase, MigrationProgress};
use crate::scanner::{summarize, StructureScanner};
use crate::server::ServerClient;
use crate::types::{MigrationConfig, RunReport};
use crate::verify::{InstanceVerifier, VerificationResult};

/// Mirrors Bitbucket Server group permissions onto a Bitbucket Cloud workspace.
pub struct GroupMirror {
    server: ServerClient,
    cloud: CloudClient,
    config: MigrationConfig,
    progress: MigrationProgress,
}

impl GroupMirror {
    /// Validate `config` and build both clients.
    pub fn new(config: MigrationConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            server: ServerClient::new(&config.source)?,
            cloud: CloudClient::new(&config.target)?,
            config,
            progress: MigrationProgress::new(),
        })
    }

    /// Set a progress tracker.
    pub fn with_progress(mut self, progress: MigrationProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Check both sessions without reading or writing anything else.
    pub async fn verify(&self) -> Result<VerificationResult> {
        self.progress.set_phase(MigrationPhase::Verifying, 0);
        InstanceVerifier::new(&self.server, &self.cloud)
            .verify()
            .await
    }

    /// Crawl the Server instance.
    pub async fn scan(&self) -> Result<ServerStructure> {
        StructureScanner::new(&self.server)
            .with_unused_groups(self.config.options.include_unused_groups)
            .with_progress(&self.progress)
            .scan()
            .await
    }

    /// Verify, scan and run the phases enabled in the options.
    ///
    /// Returns `Err` only for session-level failures; per-entity failures are
    /// listed in the report.
    pub async fn run(&self) -> Result<RunReport> {
        let options = &self.config.options;
        let mut report = RunReport {
            verification: Some(self.verify().await?),
            ..Default::default()
        };

        let structure = self.scan().await?;
        report.scan = Some(summarize(&structure));

        let orchestrator = MirrorOrchestrator::new(&self.server, &self.cloud)
            .with_dry_run(options.dry_run)
            .with_progress(&self.progress);

        if options.mirror_groups {
            report.groups = Some(orchestrator.mirror_groups(&structure).await?);
        }
        if options.mirror_repositories {
            report.repositories = Some(orchestrator.mirror_repo_groups(&structure).await?);
        }

        self.progress.set_phase(MigrationPhase::Complete, 0);
        info!(clean = report.is_clean(), dry_run = options.dry_run, "Run finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrationError;
    use crate::types::{SourceConfig, TargetConfig};

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = MigrationConfig::new(
            SourceConfig::new("not a url", "admin", "secret"),
            TargetConfig::new("acme", "migrator", "app-password"),
        );
        assert!(matches!(
            GroupMirror::new(config),
            Err(MigrationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_new_accepts_valid_config() {
        let config = MigrationConfig::new(
            SourceConfig::new("https://bitbucket.example.com", "admin", "secret"),
            TargetConfig::new("acme", "migrator", "app-password"),
        );
        let mirror = GroupMirror::new(config).unwrap();
        assert_eq!(mirror.config().target.workspace, "acme");
    }
}
