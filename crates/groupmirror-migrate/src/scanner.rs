//! Crawl of the Server permission hierarchy.
//!
//! Global grants, then every project with its group grants, then every
//! repository with its group grants. Nothing is written to the source, so a
//! scan can be repeated freely.

use futures::TryStreamExt;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::{
    GlobalGroupGrant, GlobalPermission, MigrationSet, PermissionLevel, Project, Repository,
    ServerStructure, UnrecognizedGrant,
};
use crate::progress::{MigrationPhase, MigrationProgress};
use crate::server::{ProjectAccess, ServerClient, ServerGroupPermission, ServerProject};
use crate::types::ScanSummary;

/// Walks a Server instance and builds a [`ServerStructure`].
pub struct StructureScanner<'a> {
    server: &'a ServerClient,
    include_unused_groups: bool,
    progress: Option<&'a MigrationProgress>,
}

impl<'a> StructureScanner<'a> {
    pub fn new(server: &'a ServerClient) -> Self {
        Self {
            server,
            include_unused_groups: false,
            progress: None,
        }
    }

    /// Also collect groups that hold no grant anywhere.
    pub fn with_unused_groups(mut self, include: bool) -> Self {
        self.include_unused_groups = include;
        self
    }

    /// Report progress while scanning.
    pub fn with_progress(mut self, progress: &'a MigrationProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run the crawl.
    ///
    /// The migration set starts with globally granted groups in listing order,
    /// followed by groups found on projects and repositories in discovery order.
    pub async fn scan(&self) -> Result<ServerStructure> {
        info!("Scanning Bitbucket Server structure");
        if let Some(progress) = self.progress {
            progress.set_phase(MigrationPhase::Scanning, 0);
        }

        let mut structure = ServerStructure::default();
        self.scan_global_grants(&mut structure).await?;

        let mut projects = self.server.projects();
        while let Some(server_project) = projects.try_next().await? {
            if let Some(progress) = self.progress {
                progress.increment(Some(&server_project.key));
            }
            let project = self
                .scan_project(&server_project, &mut structure.migration_set)
                .await?;
            structure.projects.push(project);
        }

        if self.include_unused_groups {
            let mut groups = self.server.groups();
            while let Some(group) = groups.try_next().await? {
                if structure.migration_set.insert(&group.name) {
                    debug!(group = %group.name, "Including group without grants");
                }
            }
        }

        let summary = summarize(&structure);
        info!(
            projects = summary.projects,
            repositories = summary.repositories,
            global_grants = summary.global_grants,
            groups = summary.groups_to_migrate,
            "Scan complete"
        );
        Ok(structure)
    }

    async fn scan_global_grants(&self, structure: &mut ServerStructure) -> Result<()> {
        let mut grants = self.server.global_group_permissions();
        while let Some(grant) = grants.try_next().await? {
            let group_name = grant.group.name;
            structure.migration_set.insert(&group_name);

            match grant.permission.parse::<GlobalPermission>() {
                Ok(permission) => structure.global_grants.push(GlobalGroupGrant {
                    group_name,
                    permission,
                }),
                Err(e) => {
                    warn!(group = %group_name, error = %e, "Unrecognized global permission");
                    structure.unrecognized_grants.push(UnrecognizedGrant {
                        group_name,
                        permission: grant.permission,
                    });
                }
            }
        }
        Ok(())
    }

    async fn scan_project(
        &self,
        server_project: &ServerProject,
        migration_set: &mut MigrationSet,
    ) -> Result<Project> {
        let key = &server_project.key;
        let default_permission = self.project_default(server_project).await?;
        let mut project = Project::new(key, &server_project.name, default_permission);

        let mut grants = self.server.project_group_permissions(key);
        while let Some(grant) = grants.try_next().await? {
            let level = normalize(&grant, key);
            migration_set.insert(&grant.group.name);
            project.groups.insert(grant.group.name, level);
        }

        let mut repos = self.server.repositories(key);
        while let Some(server_repo) = repos.try_next().await? {
            let mut repo = Repository::new(&server_repo.slug, &server_repo.name, server_repo.public);

            let mut grants = self.server.repository_group_permissions(key, &server_repo.slug);
            while let Some(grant) = grants.try_next().await? {
                let level = normalize(&grant, &server_repo.slug);
                migration_set.insert(&grant.group.name);
                repo.groups.insert(grant.group.name, level);
            }

            project.repositories.push(repo);
        }

        debug!(
            project = %key,
            default = %project.default_permission,
            groups = project.groups.len(),
            repositories = project.repositories.len(),
            "Scanned project"
        );
        Ok(project)
    }

    /// First matching check wins: write for all users, read for all users, public flag.
    async fn project_default(&self, project: &ServerProject) -> Result<PermissionLevel> {
        if self
            .server
            .project_access_for_all(&project.key, ProjectAccess::Write)
            .await?
        {
            return Ok(PermissionLevel::Write);
        }
        if self
            .server
            .project_access_for_all(&project.key, ProjectAccess::Read)
            .await?
        {
            return Ok(PermissionLevel::Read);
        }
        if project.public {
            return Ok(PermissionLevel::Read);
        }
        Ok(PermissionLevel::None)
    }
}

/// Counts for a finished scan.
pub fn summarize(structure: &ServerStructure) -> ScanSummary {
    ScanSummary {
        projects: structure.projects.len(),
        repositories: structure.repository_count(),
        global_grants: structure.global_grants.len() + structure.unrecognized_grants.len(),
        groups_to_migrate: structure.migration_set.len(),
    }
}

fn normalize(grant: &ServerGroupPermission, scope: &str) -> PermissionLevel {
    PermissionLevel::from_grant(&grant.permission).unwrap_or_else(|e| {
        warn!(group = %grant.group.name, scope, error = %e, "Ignoring grant");
        PermissionLevel::None
    })
}
