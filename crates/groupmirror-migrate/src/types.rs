//! Configuration and report types shared by the scanner and the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use validator::Validate;

use crate::model::UnrecognizedGrant;
use crate::verify::VerificationResult;

/// Default page size for Server list endpoints.
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Default backoff after a 429 from Bitbucket Server.
pub const SERVER_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(60);

/// Default backoff after a 429 from Bitbucket Cloud.
pub const CLOUD_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(10);

/// Default per-request timeout on both systems.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The two systems a run talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Self-hosted Bitbucket Server / Data Center (source).
    Server,
    /// Bitbucket Cloud (target).
    Cloud,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => write!(f, "Bitbucket Server"),
            Self::Cloud => write!(f, "Bitbucket Cloud"),
        }
    }
}

/// Connection settings for the source instance.
#[derive(Clone, Validate)]
pub struct SourceConfig {
    /// Base URL of the instance, e.g. `https://bitbucket.example.com`.
    #[validate(url)]
    pub url: String,

    #[validate(length(min = 1))]
    pub username: String,

    #[validate(length(min = 1))]
    pub password: String,

    /// Items requested per page.
    #[validate(range(min = 1, max = 1000))]
    pub page_size: u32,

    /// Sleep before retrying a rate-limited request.
    pub rate_limit_backoff: Duration,

    /// Give up on a request with no response after this long.
    pub request_timeout: Duration,
}

impl SourceConfig {
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
            page_size: DEFAULT_PAGE_SIZE,
            rate_limit_backoff: SERVER_RATE_LIMIT_BACKOFF,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Lower the page size (mostly useful in tests).
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_rate_limit_backoff(mut self, backoff: Duration) -> Self {
        self.rate_limit_backoff = backoff;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// REST root, `{url}/rest/api/latest`.
    pub fn api_url(&self) -> String {
        format!("{}/rest/api/latest", self.url)
    }
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("page_size", &self.page_size)
            .field("rate_limit_backoff", &self.rate_limit_backoff)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Connection settings for the target workspace.
#[derive(Clone, Validate)]
pub struct TargetConfig {
    /// Public API root, normally `https://api.bitbucket.org`.
    #[validate(url)]
    pub api_url: String,

    /// Web root hosting the internal workspace endpoint, normally `https://bitbucket.org`.
    #[validate(url)]
    pub web_url: String,

    #[validate(length(min = 1))]
    pub workspace: String,

    #[validate(length(min = 1))]
    pub username: String,

    #[validate(length(min = 1))]
    pub app_password: String,

    /// Sleep before retrying a rate-limited request.
    pub rate_limit_backoff: Duration,

    /// Give up on a request with no response after this long.
    pub request_timeout: Duration,
}

impl TargetConfig {
    pub fn new(
        workspace: impl Into<String>,
        username: impl Into<String>,
        app_password: impl Into<String>,
    ) -> Self {
        Self {
            api_url: "https://api.bitbucket.org".to_string(),
            web_url: "https://bitbucket.org".to_string(),
            workspace: workspace.into(),
            username: username.into(),
            app_password: app_password.into(),
            rate_limit_backoff: CLOUD_RATE_LIMIT_BACKOFF,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Point both the API and web roots somewhere else.
    pub fn with_urls(mut self, api_url: impl Into<String>, web_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self.web_url = web_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_rate_limit_backoff(mut self, backoff: Duration) -> Self {
        self.rate_limit_backoff = backoff;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("api_url", &self.api_url)
            .field("web_url", &self.web_url)
            .field("workspace", &self.workspace)
            .field("username", &self.username)
            .field("app_password", &"<redacted>")
            .field("rate_limit_backoff", &self.rate_limit_backoff)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Options for controlling what gets migrated.
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Run the group, membership and workspace-privilege phase.
    pub mirror_groups: bool,

    /// Run the per-repository group-privilege phase.
    pub mirror_repositories: bool,

    /// Also migrate groups that hold no grant anywhere.
    pub include_unused_groups: bool,

    /// Read everything, write nothing.
    pub dry_run: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            mirror_groups: true,
            mirror_repositories: true,
            include_unused_groups: false,
            dry_run: false,
        }
    }
}

impl MigrationOptions {
    /// Enable or disable the group phase.
    pub fn with_groups(mut self, enabled: bool) -> Self {
        self.mirror_groups = enabled;
        self
    }

    /// Enable or disable the repository phase.
    pub fn with_repositories(mut self, enabled: bool) -> Self {
        self.mirror_repositories = enabled;
        self
    }

    /// Include groups without any grant.
    pub fn with_unused_groups(mut self, include: bool) -> Self {
        self.include_unused_groups = include;
        self
    }

    /// Enable or disable dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Complete configuration for one run.
#[derive(Debug, Clone, Validate)]
pub struct MigrationConfig {
    #[validate(nested)]
    pub source: SourceConfig,

    #[validate(nested)]
    pub target: TargetConfig,

    pub options: MigrationOptions,
}

impl MigrationConfig {
    pub fn new(source: SourceConfig, target: TargetConfig) -> Self {
        Self {
            source,
            target,
            options: MigrationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: MigrationOptions) -> Self {
        self.options = options;
        self
    }
}

/// Membership result for one group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupMigration {
    pub group: String,

    /// Emails added (or already present) on Cloud.
    pub migrated: Vec<String>,

    /// Members that could not be added, by email or by username when they have no email.
    pub failed: Vec<String>,

    /// Set when the member listing broke off; members after that point were not seen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GroupMigration {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            ..Default::default()
        }
    }

    pub fn total_members(&self) -> usize {
        self.migrated.len() + self.failed.len()
    }

    /// Every member was listed and made it across.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.error.is_none()
    }
}

/// Workspace-level capabilities that an operator has to review on Cloud.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspacePrivilegeReport {
    /// Groups that should be able to create repositories.
    pub create_repositories: Vec<String>,

    /// Groups that should administer the workspace.
    pub admin_workspace: Vec<String>,

    /// Groups whose privilege write was rejected.
    pub failed_writes: Vec<String>,

    /// Global grants that map to nothing known.
    pub unrecognized: Vec<(String, String)>,
}

impl WorkspacePrivilegeReport {
    pub fn is_empty(&self) -> bool {
        self.create_repositories.is_empty()
            && self.admin_workspace.is_empty()
            && self.failed_writes.is_empty()
            && self.unrecognized.is_empty()
    }

    pub(crate) fn add_unrecognized(&mut self, grant: &UnrecognizedGrant) {
        self.unrecognized
            .push((grant.group_name.clone(), grant.permission.clone()));
    }
}

/// Outcome of the group phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupMirrorReport {
    /// Groups created or found on Cloud.
    pub groups_migrated: usize,

    /// Groups that could not be created; their members were not attempted.
    pub groups_failed: Vec<String>,

    /// Membership assignments made (including already-present ones).
    pub membership_assignments: usize,

    /// Per-group membership details.
    pub groups: Vec<GroupMigration>,

    pub workspace_privileges: WorkspacePrivilegeReport,

    /// Pairs of (group, earlier group) that map to the same Cloud slug.
    #[serde(default)]
    pub slug_collisions: Vec<(String, String)>,

    pub dry_run: bool,

    pub started_at: Option<DateTime<Utc>>,

    pub completed_at: Option<DateTime<Utc>>,
}

impl GroupMirrorReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    /// Groups with at least one member that could not be added.
    pub fn partial_groups(&self) -> impl Iterator<Item = &GroupMigration> {
        self.groups.iter().filter(|g| !g.is_complete())
    }

    pub fn print_summary(&self) {
        println!("\n=== Group Migration ===\n");
        if self.dry_run {
            println!("(dry run: no writes were sent)");
        }
        println!(
            "Mirrored {} groups with {} group membership assignments",
            self.groups_migrated, self.membership_assignments
        );

        if !self.groups_failed.is_empty() {
            println!("\nGroups that could not be created ({}):", self.groups_failed.len());
            for group in &self.groups_failed {
                println!("  - {group}");
            }
        }

        for group in self.partial_groups() {
            println!(
                "\n{}: {} of {} members migrated. Missing:",
                group.group,
                group.migrated.len(),
                group.total_members()
            );
            if !group.failed.is_empty() {
                println!("  {}", group.failed.join(", "));
            }
            if let Some(error) = &group.error {
                println!("  Member listing stopped early: {error}");
            }
        }

        if !self.slug_collisions.is_empty() {
            println!("\nGroups sharing a Cloud slug (merged on Cloud):");
            for (group, earlier) in &self.slug_collisions {
                println!("  - {group} -> same slug as {earlier}");
            }
        }

        let privileges = &self.workspace_privileges;
        if !privileges.is_empty() {
            println!("\n=== Workspace Privileges (review manually) ===\n");
            println!("Create repositories:  {}", privileges.create_repositories.join(", "));
            println!("Administer workspace: {}", privileges.admin_workspace.join(", "));
            if !privileges.failed_writes.is_empty() {
                println!("Write failed:         {}", privileges.failed_writes.join(", "));
            }
            for (group, permission) in &privileges.unrecognized {
                println!("Unrecognized:         {group} ({permission})");
            }
        }
    }
}

/// A repository/group assignment that Cloud rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAssignment {
    pub repository: String,
    pub group: String,
    pub privilege: String,
}

/// Outcome of the repository phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoMirrorReport {
    /// Repositories visited.
    pub total_repositories: usize,

    /// Repositories with at least one successful assignment.
    pub mirrored_repositories: usize,

    /// Repositories missing on Cloud.
    pub skipped_repositories: Vec<String>,

    /// Assignments Cloud accepted.
    pub assignments_made: usize,

    pub failed_assignments: Vec<FailedAssignment>,

    pub dry_run: bool,

    pub started_at: Option<DateTime<Utc>>,

    pub completed_at: Option<DateTime<Utc>>,
}

impl RepoMirrorReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    pub fn print_summary(&self) {
        println!("\n=== Repository Permissions ===\n");
        if self.dry_run {
            println!("(dry run: no writes were sent)");
        }
        println!(
            "Successfully mirrored the groups/permissions for {} of {} repositories",
            self.mirrored_repositories, self.total_repositories
        );

        if !self.skipped_repositories.is_empty() {
            println!(
                "\nNot found on Cloud ({}):",
                self.skipped_repositories.len()
            );
            for repo in &self.skipped_repositories {
                println!("  - {repo}");
            }
        }

        if !self.failed_assignments.is_empty() {
            println!("\nFailed assignments ({}):", self.failed_assignments.len());
            for failed in &self.failed_assignments {
                println!(
                    "  - {} -> {} ({})",
                    failed.group, failed.repository, failed.privilege
                );
            }
        }
    }
}

/// Counts describing a completed scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub projects: usize,
    pub repositories: usize,
    pub global_grants: usize,
    pub groups_to_migrate: usize,
}

/// Everything a full run produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub verification: Option<VerificationResult>,
    pub scan: Option<ScanSummary>,
    pub groups: Option<GroupMirrorReport>,
    pub repositories: Option<RepoMirrorReport>,
}

impl RunReport {
    /// Whether every attempted entity made it across.
    pub fn is_clean(&self) -> bool {
        let groups_clean = self.groups.as_ref().is_none_or(|g| {
            g.groups_failed.is_empty()
                && g.partial_groups().next().is_none()
                && g.workspace_privileges.failed_writes.is_empty()
                && g.slug_collisions.is_empty()
        });
        let repos_clean = self.repositories.as_ref().is_none_or(|r| {
            r.failed_assignments.is_empty() && r.skipped_repositories.is_empty()
        });
        groups_clean && repos_clean
    }

    pub fn print_summary(&self) {
        if let Some(scan) = &self.scan {
            println!("\n=== Server Scan ===\n");
            println!("Projects:           {}", scan.projects);
            println!("Repositories:       {}", scan.repositories);
            println!("Global grants:      {}", scan.global_grants);
            println!("Groups to migrate:  {}", scan.groups_to_migrate);
        }
        if let Some(groups) = &self.groups {
            groups.print_summary();
        }
        if let Some(repos) = &self.repositories {
            repos.print_summary();
        }

        let status = if self.is_clean() {
            "COMPLETE"
        } else {
            "COMPLETED WITH WARNINGS"
        };
        println!("\nOverall Status: {status}");
    }
}
