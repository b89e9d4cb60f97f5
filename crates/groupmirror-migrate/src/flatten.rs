//! Collapsing the Server permission hierarchy into Cloud's flat model.
//!
//! Both computations are pure. Grant strings have already been normalised by
//! the scanner, so nothing here parses text.

use crate::model::{GlobalPermission, PermissionLevel, Project, Repository, WorkspacePrivilege};

/// How a global grant lands on Cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkspaceMapping {
    /// Capability the group should have on the workspace.
    pub privilege: WorkspacePrivilege,

    /// Default repository level to push to Cloud, `None` when no call is needed.
    pub repository_access: Option<PermissionLevel>,
}

/// Map a Server global permission to its Cloud workspace equivalent.
///
/// | global           | workspace privilege   | write                  |
/// |------------------|-----------------------|------------------------|
/// | `LICENSED_USER`  | none                  | none                   |
/// | `PROJECT_CREATE` | create repositories   | none                   |
/// | `ADMIN`          | create repositories   | admin on all repos     |
/// | `SYS_ADMIN`      | administer workspace  | admin on all repos     |
pub fn workspace_mapping(permission: GlobalPermission) -> WorkspaceMapping {
    match permission {
        GlobalPermission::LicensedUser => WorkspaceMapping {
            privilege: WorkspacePrivilege::None,
            repository_access: None,
        },
        GlobalPermission::ProjectCreate => WorkspaceMapping {
            privilege: WorkspacePrivilege::CreateRepositories,
            repository_access: None,
        },
        GlobalPermission::Admin => WorkspaceMapping {
            privilege: WorkspacePrivilege::CreateRepositories,
            repository_access: Some(PermissionLevel::Admin),
        },
        GlobalPermission::SysAdmin => WorkspaceMapping {
            privilege: WorkspacePrivilege::AdminWorkspace,
            repository_access: Some(PermissionLevel::Admin),
        },
    }
}

/// Effective level from the four contributing sources: the highest wins.
pub fn effective_level(
    project_default: PermissionLevel,
    project_grant: PermissionLevel,
    repository_default: PermissionLevel,
    repository_grant: PermissionLevel,
) -> PermissionLevel {
    project_default
        .max(project_grant)
        .max(repository_default)
        .max(repository_grant)
}

/// Effective level of `group` on `repository` inside `project`.
///
/// Groups without an explicit grant still inherit the project and repository
/// defaults.
pub fn effective_permission(
    group: &str,
    project: &Project,
    repository: &Repository,
) -> PermissionLevel {
    effective_level(
        project.default_permission,
        project.groups.level_for(group),
        repository.default_permission,
        repository.groups.level_for(group),
    )
}
