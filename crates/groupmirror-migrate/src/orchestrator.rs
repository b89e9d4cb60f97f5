//! Replays a scanned Server structure onto Cloud.
//!
//! Two phases, each safe to repeat:
//!
//! 1. [`MirrorOrchestrator::mirror_groups`] creates every group, applies its
//!    workspace privilege and copies its members.
//! 2. [`MirrorOrchestrator::mirror_repo_groups`] writes one flattened
//!    privilege per (group, repository) pair.
//!
//! Only session-level errors leave these functions as `Err`. Everything else
//! is logged, counted and left in the returned report.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::cloud::{group_slug, CloudClient, MembershipOutcome, WriteOutcome};
use crate::error::Result;
use crate::flatten::{effective_permission, workspace_mapping};
use crate::model::{ServerStructure, WorkspacePrivilege};
use crate::progress::{MigrationPhase, MigrationProgress};
use crate::server::ServerClient;
use crate::types::{
    FailedAssignment, GroupMigration, GroupMirrorReport, RepoMirrorReport,
    WorkspacePrivilegeReport,
};

/// Drives Cloud writes from a scanned [`ServerStructure`].
pub struct MirrorOrchestrator<'a> {
    server: &'a ServerClient,
    cloud: &'a CloudClient,
    dry_run: bool,
    progress: Option<&'a MigrationProgress>,
}

impl<'a> MirrorOrchestrator<'a> {
    pub fn new(server: &'a ServerClient, cloud: &'a CloudClient) -> Self {
        Self {
            server,
            cloud,
            dry_run: false,
            progress: None,
        }
    }

    /// Read everything but send no writes.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_progress(mut self, progress: &'a MigrationProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    fn tick(&self, item: &str) {
        if let Some(progress) = self.progress {
            progress.increment(Some(item));
        }
    }

    /// Create groups, apply workspace privileges and copy memberships.
    pub async fn mirror_groups(&self, structure: &ServerStructure) -> Result<GroupMirrorReport> {
        let mut report = GroupMirrorReport::new(self.dry_run);
        if let Some(progress) = self.progress {
            progress.set_phase(
                MigrationPhase::MirroringGroups,
                structure.migration_set.len() as u64,
            );
        }

        let mut slugs: HashMap<String, &str> = HashMap::new();
        for group in structure.migration_set.iter() {
            self.tick(group);

            let slug = group_slug(group);
            if slug.is_empty() {
                warn!(group, "Group name has no characters usable in a Cloud slug, skipping");
                report.groups_failed.push(group.to_string());
                continue;
            }
            match slugs.entry(slug) {
                Entry::Occupied(entry) => {
                    let earlier = *entry.get();
                    warn!(group, earlier, slug = %entry.key(), "Group shares its Cloud slug with another group");
                    report
                        .slug_collisions
                        .push((group.to_string(), earlier.to_string()));
                }
                Entry::Vacant(entry) => {
                    entry.insert(group);
                }
            }

            if !self.create_group(group).await? {
                report.groups_failed.push(group.to_string());
                continue;
            }
            report.groups_migrated += 1;

            self.apply_workspace_privilege(group, structure, &mut report.workspace_privileges)
                .await?;

            let migration = self.mirror_members(group).await?;
            report.membership_assignments += migration.migrated.len();

            if migration.is_complete() {
                info!(
                    group,
                    members = migration.total_members(),
                    "Successfully migrated all users in group"
                );
            } else {
                warn!(
                    group,
                    migrated = migration.migrated.len(),
                    total = migration.total_members(),
                    failed = %migration.failed.join(", "),
                    error = migration.error.as_deref().unwrap_or(""),
                    "Group partially migrated"
                );
            }
            report.groups.push(migration);
        }

        info!(
            groups = report.groups_migrated,
            memberships = report.membership_assignments,
            "Mirrored groups"
        );
        report.complete();
        Ok(report)
    }

    /// Returns whether the group exists on Cloud afterwards.
    async fn create_group(&self, group: &str) -> Result<bool> {
        if self.dry_run {
            info!(group, "Dry run: would create group");
            return Ok(true);
        }

        let outcome = self.cloud.create_group(group).await?;
        if !outcome.is_success() {
            warn!(group, ?outcome, "Failed to mirror group to Cloud");
        }
        Ok(outcome.is_success())
    }

    async fn apply_workspace_privilege(
        &self,
        group: &str,
        structure: &ServerStructure,
        report: &mut WorkspacePrivilegeReport,
    ) -> Result<()> {
        if let Some(grant) = structure.unrecognized_grant_for(group) {
            warn!(
                group,
                permission = %grant.permission,
                "Unrecognized global permission, no workspace privilege applied"
            );
            report.add_unrecognized(grant);
            return Ok(());
        }

        let Some(grant) = structure.global_grant_for(group) else {
            return Ok(());
        };

        let mapping = workspace_mapping(grant.permission);
        match mapping.privilege {
            WorkspacePrivilege::None => {}
            WorkspacePrivilege::CreateRepositories => {
                report.create_repositories.push(group.to_string())
            }
            WorkspacePrivilege::AdminWorkspace => report.admin_workspace.push(group.to_string()),
        }

        let Some(level) = mapping.repository_access else {
            debug!(group, permission = %grant.permission, "No workspace write needed");
            return Ok(());
        };
        let privilege = level.cloud_privilege().unwrap_or("none");

        if self.dry_run {
            info!(
                group,
                privilege,
                account_privilege = mapping.privilege.account_privilege(),
                "Dry run: would set workspace privilege"
            );
            return Ok(());
        }

        let outcome = self
            .cloud
            .set_workspace_privilege(group, privilege, mapping.privilege.account_privilege())
            .await?;
        if let WriteOutcome::Failed(failure) = outcome {
            warn!(group, %failure, "Failed to apply global permissions to group on Cloud");
            report.failed_writes.push(group.to_string());
        }
        Ok(())
    }

    /// Copy the members of `group`.
    ///
    /// A listing error other than a session error ends this group only; it is
    /// recorded on the returned [`GroupMigration`].
    async fn mirror_members(&self, group: &str) -> Result<GroupMigration> {
        let mut migration = GroupMigration::new(group);

        let mut members = self.server.group_members(group);
        while let Some(member) = members.next().await {
            let member = match member {
                Ok(member) => member,
                Err(e) if e.is_session_error() => return Err(e),
                Err(e) => {
                    warn!(group, error = %e, "Could not list group members on Server");
                    migration.error = Some(e.to_string());
                    break;
                }
            };

            let Some(email) = member.email_address.as_deref() else {
                warn!(group, user = %member.name, "Member has no email address, cannot add on Cloud");
                migration.failed.push(member.name.clone());
                continue;
            };

            let outcome = if self.dry_run {
                MembershipOutcome::Added
            } else {
                self.cloud.add_member(group, email).await?
            };

            match outcome {
                MembershipOutcome::Added | MembershipOutcome::AlreadyMember => {
                    migration.migrated.push(email.to_string());
                }
                MembershipOutcome::NotProvisioned => {
                    warn!(group, email, "User not yet in the Cloud workspace");
                    migration.failed.push(email.to_string());
                }
                MembershipOutcome::Failed(failure) => {
                    warn!(group, email, %failure, "Failed to add member");
                    migration.failed.push(email.to_string());
                }
            }
        }

        Ok(migration)
    }

    /// Write the flattened privilege of every migrated group on every repository.
    ///
    /// Repositories that do not exist on Cloud yet are skipped whole. A
    /// repository counts as mirrored once one assignment on it succeeds.
    pub async fn mirror_repo_groups(&self, structure: &ServerStructure) -> Result<RepoMirrorReport> {
        let mut report = RepoMirrorReport::new(self.dry_run);
        if let Some(progress) = self.progress {
            progress.set_phase(
                MigrationPhase::MirroringRepositories,
                structure.repository_count() as u64,
            );
        }

        for project in &structure.projects {
            for repo in &project.repositories {
                let label = format!("{}/{}", project.key, repo.slug);
                self.tick(&label);
                report.total_repositories += 1;

                let exists = match self.cloud.repository_exists(&repo.slug).await {
                    Ok(exists) => exists,
                    Err(e) if e.is_session_error() => return Err(e),
                    Err(e) => {
                        warn!(repo = %label, error = %e, "Could not confirm repository on Cloud");
                        false
                    }
                };
                if !exists {
                    warn!(repo = %label, "Repository not found on Cloud, skipping");
                    report.skipped_repositories.push(label);
                    continue;
                }

                info!(repo = %repo.name, "Mirroring group permissions for repo");
                let mut mirrored = false;
                for group in structure.migration_set.iter() {
                    if group_slug(group).is_empty() {
                        continue;
                    }
                    let level = effective_permission(group, project, repo);
                    let Some(privilege) = level.cloud_privilege() else {
                        continue;
                    };

                    let outcome = if self.dry_run {
                        info!(repo = %label, group, privilege, "Dry run: would grant");
                        WriteOutcome::Applied
                    } else {
                        self.cloud
                            .set_repository_privilege(&repo.slug, group, level)
                            .await?
                    };

                    match outcome {
                        WriteOutcome::Applied => {
                            mirrored = true;
                            report.assignments_made += 1;
                        }
                        WriteOutcome::Failed(failure) => {
                            warn!(repo = %label, group, privilege, %failure, "Failed to add group to repository");
                            report.failed_assignments.push(FailedAssignment {
                                repository: label.clone(),
                                group: group.to_string(),
                                privilege: privilege.to_string(),
                            });
                        }
                    }
                }

                if mirrored {
                    report.mirrored_repositories += 1;
                }
            }
        }

        info!(
            mirrored = report.mirrored_repositories,
            total = report.total_repositories,
            "Mirrored repository permissions"
        );
        report.complete();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrationError;
    use crate::model::{
        GlobalGroupGrant, GlobalPermission, MigrationSet, PermissionLevel, Project, Repository,
        UnrecognizedGrant,
    };
    use crate::types::{SourceConfig, TargetConfig};
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_string, method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn clients(uri: &str) -> (ServerClient, CloudClient) {
        let source = SourceConfig::new(uri, "admin", "secret")
            .with_rate_limit_backoff(Duration::from_millis(5));
        let target = TargetConfig::new("acme", "migrator", "app-password")
            .with_urls(uri, uri)
            .with_rate_limit_backoff(Duration::from_millis(5));
        (
            ServerClient::new(&source).unwrap(),
            CloudClient::new(&target).unwrap(),
        )
    }

    fn structure(groups: &[&str]) -> ServerStructure {
        let mut migration_set = MigrationSet::new();
        for group in groups {
            migration_set.insert(group);
        }
        ServerStructure {
            migration_set,
            ..Default::default()
        }
    }

    async fn mount_members(server: &MockServer, group: &str, emails: &[&str]) {
        let values: Vec<_> = emails
            .iter()
            .map(|e| json!({"name": e.split('@').next().unwrap(), "emailAddress": e}))
            .collect();
        Mock::given(method("GET"))
            .and(path("/rest/api/latest/admin/groups/more-members"))
            .and(query_param("context", group))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"values": values, "isLastPage": true})),
            )
            .mount(server)
            .await;
    }

    async fn mount_create_group(server: &MockServer, status: u16) {
        Mock::given(method("POST"))
            .and(path("/1.0/groups/acme"))
            .respond_with(ResponseTemplate::new(status))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_duplicate_member_counts_as_migrated() {
        let mock_server = MockServer::start().await;
        mount_create_group(&mock_server, 200).await;
        mount_members(&mock_server, "g1", &["a@x.com"]).await;
        Mock::given(method("PUT"))
            .and(path("/1.0/groups/acme/g1/members/a@x.com/"))
            .respond_with(ResponseTemplate::new(409))
            .expect(1)
            .mount(&mock_server)
            .await;

        let (server, cloud) = clients(&mock_server.uri());
        let report = MirrorOrchestrator::new(&server, &cloud)
            .mirror_groups(&structure(&["g1"]))
            .await
            .unwrap();

        assert_eq!(report.groups_migrated, 1);
        assert_eq!(report.membership_assignments, 1);
        assert!(report.groups[0].is_complete());
        assert_eq!(report.groups[0].migrated, vec!["a@x.com".to_string()]);
    }

    #[tokio::test]
    async fn test_unprovisioned_member_is_tracked_not_fatal() {
        let mock_server = MockServer::start().await;
        mount_create_group(&mock_server, 200).await;
        mount_members(&mock_server, "g1", &["a@x.com", "new@x.com", "b@x.com"]).await;
        Mock::given(method("PUT"))
            .and(path("/1.0/groups/acme/g1/members/new@x.com/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path_regex(r"^/1\.0/groups/acme/g1/members/[ab]@x\.com/$"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let (server, cloud) = clients(&mock_server.uri());
        let report = MirrorOrchestrator::new(&server, &cloud)
            .mirror_groups(&structure(&["g1"]))
            .await
            .unwrap();

        let group = &report.groups[0];
        assert!(!group.is_complete());
        assert_eq!(group.failed, vec!["new@x.com".to_string()]);
        assert_eq!(report.membership_assignments, 2);
        assert_eq!(report.partial_groups().count(), 1);
    }

    #[tokio::test]
    async fn test_failed_group_creation_skips_members() {
        let mock_server = MockServer::start().await;
        mount_create_group(&mock_server, 500).await;
        Mock::given(method("GET"))
            .and(path("/rest/api/latest/admin/groups/more-members"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"values": []})))
            .expect(0)
            .mount(&mock_server)
            .await;

        let (server, cloud) = clients(&mock_server.uri());
        let report = MirrorOrchestrator::new(&server, &cloud)
            .mirror_groups(&structure(&["g1", "g2"]))
            .await
            .unwrap();

        assert_eq!(report.groups_migrated, 0);
        assert_eq!(report.groups_failed, vec!["g1".to_string(), "g2".to_string()]);
    }

    #[tokio::test]
    async fn test_workspace_privilege_writes() {
        let mock_server = MockServer::start().await;
        mount_create_group(&mock_server, 400).await;
        for group in ["users", "creators", "admins", "root", "odd"] {
            mount_members(&mock_server, group, &[]).await;
        }
        Mock::given(method("PUT"))
            .and(path("/api/internal/workspaces/acme/groups/admins"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/internal/workspaces/acme/groups/root"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path_regex(r"^/api/internal/workspaces/acme/groups/(users|creators|odd)$"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let mut structure = structure(&["users", "creators", "admins", "root", "odd"]);
        structure.global_grants = vec![
            GlobalGroupGrant {
                group_name: "users".to_string(),
                permission: GlobalPermission::LicensedUser,
            },
            GlobalGroupGrant {
                group_name: "creators".to_string(),
                permission: GlobalPermission::ProjectCreate,
            },
            GlobalGroupGrant {
                group_name: "admins".to_string(),
                permission: GlobalPermission::Admin,
            },
            GlobalGroupGrant {
                group_name: "root".to_string(),
                permission: GlobalPermission::SysAdmin,
            },
        ];
        structure.unrecognized_grants = vec![UnrecognizedGrant {
            group_name: "odd".to_string(),
            permission: "SUPER_USER".to_string(),
        }];

        let (server, cloud) = clients(&mock_server.uri());
        let report = MirrorOrchestrator::new(&server, &cloud)
            .mirror_groups(&structure)
            .await
            .unwrap();

        let privileges = &report.workspace_privileges;
        assert_eq!(privileges.create_repositories, vec!["creators", "admins"]);
        assert_eq!(privileges.admin_workspace, vec!["root"]);
        assert_eq!(privileges.failed_writes, vec!["root"]);
        assert_eq!(
            privileges.unrecognized,
            vec![("odd".to_string(), "SUPER_USER".to_string())]
        );
        assert_eq!(report.groups_migrated, 5);
    }

    #[tokio::test]
    async fn test_mirror_groups_is_idempotent() {
        let mock_server = MockServer::start().await;
        mount_members(&mock_server, "g1", &["a@x.com"]).await;
        // First run creates; afterwards Cloud reports the group and member as present.
        Mock::given(method("POST"))
            .and(path("/1.0/groups/acme"))
            .respond_with(ResponseTemplate::new(200))
            .up_to_n_times(1)
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/1.0/groups/acme"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/1.0/groups/acme/g1/members/a@x.com/"))
            .respond_with(ResponseTemplate::new(200))
            .up_to_n_times(1)
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/1.0/groups/acme/g1/members/a@x.com/"))
            .respond_with(ResponseTemplate::new(409))
            .expect(1)
            .mount(&mock_server)
            .await;

        let (server, cloud) = clients(&mock_server.uri());
        let orchestrator = MirrorOrchestrator::new(&server, &cloud);
        let first = orchestrator.mirror_groups(&structure(&["g1"])).await.unwrap();
        let second = orchestrator.mirror_groups(&structure(&["g1"])).await.unwrap();

        for report in [&first, &second] {
            assert_eq!(report.groups_migrated, 1);
            assert!(report.groups_failed.is_empty());
            assert_eq!(report.membership_assignments, 1);
            assert_eq!(report.partial_groups().count(), 0);
            assert_eq!(report.groups[0].migrated, vec!["a@x.com".to_string()]);
        }
        assert_eq!(first.groups[0].failed, second.groups[0].failed);
    }

    #[tokio::test]
    async fn test_member_listing_error_moves_on_to_next_group() {
        let mock_server = MockServer::start().await;
        mount_create_group(&mock_server, 201).await;
        Mock::given(method("GET"))
            .and(path("/rest/api/latest/admin/groups/more-members"))
            .and(query_param("context", "g1"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;
        mount_members(&mock_server, "g2", &["b@x.com"]).await;
        Mock::given(method("PUT"))
            .and(path("/1.0/groups/acme/g2/members/b@x.com/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let (server, cloud) = clients(&mock_server.uri());
        let report = MirrorOrchestrator::new(&server, &cloud)
            .mirror_groups(&structure(&["g1", "g2"]))
            .await
            .unwrap();

        assert_eq!(report.groups_migrated, 2);
        assert_eq!(report.membership_assignments, 1);
        let partial: Vec<&str> = report.partial_groups().map(|g| g.group.as_str()).collect();
        assert_eq!(partial, vec!["g1"]);
        assert!(report.groups[0].error.is_some());
        assert!(report.groups[1].is_complete());
    }

    #[tokio::test]
    async fn test_unusable_group_names_are_guarded() {
        let mock_server = MockServer::start().await;
        mount_create_group(&mock_server, 201).await;
        for group in ["Dev Ops", "dev-ops"] {
            mount_members(&mock_server, group, &[]).await;
        }
        Mock::given(method("GET"))
            .and(path("/rest/api/latest/admin/groups/more-members"))
            .and(query_param("context", "!!!"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"values": []})))
            .expect(0)
            .mount(&mock_server)
            .await;

        let (server, cloud) = clients(&mock_server.uri());
        let report = MirrorOrchestrator::new(&server, &cloud)
            .mirror_groups(&structure(&["Dev Ops", "!!!", "dev-ops"]))
            .await
            .unwrap();

        assert_eq!(report.groups_failed, vec!["!!!".to_string()]);
        assert_eq!(report.groups_migrated, 2);
        assert_eq!(
            report.slug_collisions,
            vec![("dev-ops".to_string(), "Dev Ops".to_string())]
        );
        let requests = mock_server.received_requests().await.unwrap();
        let creations = requests.iter().filter(|r| r.method.as_str() == "POST").count();
        assert_eq!(creations, 2);
    }

    fn repo_structure() -> ServerStructure {
        let mut structure = structure(&["g1", "g2"]);
        structure.global_grants.push(GlobalGroupGrant {
            group_name: "g1".to_string(),
            permission: GlobalPermission::Admin,
        });

        let mut project = Project::new("P", "Platform", PermissionLevel::Read);
        let mut r = Repository::new("r", "R", false);
        r.groups.insert("g1", PermissionLevel::Write);
        project.repositories.push(r);
        project.repositories.push(Repository::new("r2", "R2", false));
        structure.projects.push(project);

        let mut closed = Project::new("C", "Closed", PermissionLevel::None);
        closed.repositories.push(Repository::new("secret", "Secret", false));
        structure.projects.push(closed);
        structure
    }

    #[tokio::test]
    async fn test_mirror_repo_groups() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/2\.0/repositories/acme/(r|secret)$"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/2.0/repositories/acme/r2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/1.0/group-privileges/acme/r/acme/g1"))
            .and(body_string("write"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/1.0/group-privileges/acme/r/acme/g2"))
            .and(body_string("read"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path_regex(r"^/1\.0/group-privileges/acme/(r2|secret)/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let (server, cloud) = clients(&mock_server.uri());
        let report = MirrorOrchestrator::new(&server, &cloud)
            .mirror_repo_groups(&repo_structure())
            .await
            .unwrap();

        assert_eq!(report.total_repositories, 3);
        // "secret" exists but every group flattens to None there.
        assert_eq!(report.mirrored_repositories, 1);
        assert_eq!(report.skipped_repositories, vec!["P/r2".to_string()]);
        assert_eq!(report.assignments_made, 2);
    }

    #[tokio::test]
    async fn test_failed_assignment_does_not_stop_repository() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/2\.0/repositories/acme/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/1.0/group-privileges/acme/r/acme/g1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path_regex(r"^/1\.0/group-privileges/acme/r2?/acme/g2$"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/1.0/group-privileges/acme/r2/acme/g1"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let (server, cloud) = clients(&mock_server.uri());
        let report = MirrorOrchestrator::new(&server, &cloud)
            .mirror_repo_groups(&repo_structure())
            .await
            .unwrap();

        assert_eq!(report.mirrored_repositories, 2);
        assert_eq!(
            report.failed_assignments,
            vec![FailedAssignment {
                repository: "P/r".to_string(),
                group: "g1".to_string(),
                privilege: "write".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_rate_limited_write_is_retried_once_logically() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2.0/repositories/acme/r"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/1.0/group-privileges/acme/r/acme/g1"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/1.0/group-privileges/acme/r/acme/g1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut structure = structure(&["g1"]);
        let mut project = Project::new("P", "Platform", PermissionLevel::None);
        let mut repo = Repository::new("r", "R", false);
        repo.groups.insert("g1", PermissionLevel::Admin);
        project.repositories.push(repo);
        structure.projects.push(project);

        let (server, cloud) = clients(&mock_server.uri());
        let report = MirrorOrchestrator::new(&server, &cloud)
            .mirror_repo_groups(&structure)
            .await
            .unwrap();

        assert_eq!(report.mirrored_repositories, 1);
        assert_eq!(report.assignments_made, 1);
        assert!(report.failed_assignments.is_empty());
    }

    #[tokio::test]
    async fn test_forbidden_aborts_run() {
        let mock_server = MockServer::start().await;
        mount_create_group(&mock_server, 403).await;

        let (server, cloud) = clients(&mock_server.uri());
        let err = MirrorOrchestrator::new(&server, &cloud)
            .mirror_groups(&structure(&["g1", "g2"]))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn test_dry_run_sends_no_writes() {
        let mock_server = MockServer::start().await;
        mount_members(&mock_server, "g1", &["a@x.com"]).await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/2\.0/repositories/acme/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let repos_structure = repo_structure();
        let (server, cloud) = clients(&mock_server.uri());
        let orchestrator = MirrorOrchestrator::new(&server, &cloud).with_dry_run(true);

        let groups = orchestrator.mirror_groups(&structure(&["g1"])).await.unwrap();
        assert!(groups.dry_run);
        assert_eq!(groups.membership_assignments, 1);

        let repos = orchestrator.mirror_repo_groups(&repos_structure).await.unwrap();
        assert!(repos.dry_run);
        assert_eq!(repos.mirrored_repositories, 2);
    }

    #[tokio::test]
    async fn test_stalled_writes_are_recorded_and_run_continues() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/2\.0/repositories/acme/(r|secret)$"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/2.0/repositories/acme/r2"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/1.0/group-privileges/acme/r/acme/g1"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/1.0/group-privileges/acme/r/acme/g2"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let source = SourceConfig::new(mock_server.uri(), "admin", "secret");
        let target = TargetConfig::new("acme", "migrator", "app-password")
            .with_urls(mock_server.uri(), mock_server.uri())
            .with_request_timeout(Duration::from_millis(100));
        let server = ServerClient::new(&source).unwrap();
        let cloud = CloudClient::new(&target).unwrap();

        let report = MirrorOrchestrator::new(&server, &cloud)
            .mirror_repo_groups(&repo_structure())
            .await
            .unwrap();

        assert_eq!(report.total_repositories, 3);
        assert_eq!(report.mirrored_repositories, 1);
        assert_eq!(report.assignments_made, 1);
        assert_eq!(report.skipped_repositories, vec!["P/r2".to_string()]);
        assert_eq!(
            report.failed_assignments,
            vec![FailedAssignment {
                repository: "P/r".to_string(),
                group: "g1".to_string(),
                privilege: "write".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_stalled_member_write_is_a_failed_member() {
        let mock_server = MockServer::start().await;
        mount_create_group(&mock_server, 201).await;
        mount_members(&mock_server, "g1", &["slow@x.com", "b@x.com"]).await;
        Mock::given(method("PUT"))
            .and(path("/1.0/groups/acme/g1/members/slow@x.com/"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/1.0/groups/acme/g1/members/b@x.com/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let source = SourceConfig::new(mock_server.uri(), "admin", "secret");
        let target = TargetConfig::new("acme", "migrator", "app-password")
            .with_urls(mock_server.uri(), mock_server.uri())
            .with_request_timeout(Duration::from_millis(100));
        let server = ServerClient::new(&source).unwrap();
        let cloud = CloudClient::new(&target).unwrap();

        let report = MirrorOrchestrator::new(&server, &cloud)
            .mirror_groups(&structure(&["g1"]))
            .await
            .unwrap();

        let group = &report.groups[0];
        assert_eq!(group.migrated, vec!["b@x.com".to_string()]);
        assert_eq!(group.failed, vec!["slow@x.com".to_string()]);
        assert!(group.error.is_none());
    }

    #[tokio::test]
    async fn test_unusable_group_gets_no_repository_write() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2.0/repositories/acme/r"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/1.0/group-privileges/acme/r/acme/g1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let mut structure = structure(&["g1", "***"]);
        let mut project = Project::new("P", "Platform", PermissionLevel::Read);
        project.repositories.push(Repository::new("r", "R", false));
        structure.projects.push(project);

        let (server, cloud) = clients(&mock_server.uri());
        let report = MirrorOrchestrator::new(&server, &cloud)
            .mirror_repo_groups(&structure)
            .await
            .unwrap();

        assert_eq!(report.assignments_made, 1);
        assert!(report.failed_assignments.is_empty());
    }
}
