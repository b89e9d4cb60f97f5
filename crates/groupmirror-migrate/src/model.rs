//! In-memory model of the Bitbucket Server permission hierarchy.
//!
//! The scanner is the only writer. Once a [`ServerStructure`] has been returned
//! it is read through shared references only.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};

/// Access level on a repository, ordered `None < Read < Write < Admin`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    /// No access.
    #[default]
    None,
    /// Read access.
    Read,
    /// Write access.
    Write,
    /// Admin access.
    Admin,
}

impl PermissionLevel {
    /// Normalise a Server grant string such as `PROJECT_ADMIN` or `REPO_READ`.
    ///
    /// Matching is on the suffix only, so project and repository grants share
    /// one vocabulary.
    pub fn from_grant(grant: &str) -> Result<Self> {
        let grant = grant.trim().to_ascii_uppercase();
        if grant.ends_with("_ADMIN") {
            Ok(Self::Admin)
        } else if grant.ends_with("_WRITE") {
            Ok(Self::Write)
        } else if grant.ends_with("_READ") {
            Ok(Self::Read)
        } else {
            Err(MigrationError::UnknownPermission(grant))
        }
    }

    /// The Cloud group-privilege value, or `None` when nothing should be written.
    pub fn cloud_privilege(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Read => Some("read"),
            Self::Write => Some("write"),
            Self::Admin => Some("admin"),
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// Instance-wide permission a Server group can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GlobalPermission {
    /// Can log in; implied on Cloud by workspace membership.
    LicensedUser,
    /// Can create projects.
    ProjectCreate,
    /// Instance administrator.
    Admin,
    /// System administrator.
    SysAdmin,
}

impl FromStr for GlobalPermission {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "LICENSED_USER" => Ok(Self::LicensedUser),
            "PROJECT_CREATE" => Ok(Self::ProjectCreate),
            "ADMIN" => Ok(Self::Admin),
            "SYS_ADMIN" => Ok(Self::SysAdmin),
            other => Err(MigrationError::UnknownPermission(other.to_string())),
        }
    }
}

impl fmt::Display for GlobalPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LicensedUser => write!(f, "LICENSED_USER"),
            Self::ProjectCreate => write!(f, "PROJECT_CREATE"),
            Self::Admin => write!(f, "ADMIN"),
            Self::SysAdmin => write!(f, "SYS_ADMIN"),
        }
    }
}

/// Cloud workspace-level capability of a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspacePrivilege {
    /// Nothing beyond membership.
    #[default]
    None,
    /// "Create repositories" checkbox.
    CreateRepositories,
    /// "Administer workspace" checkbox.
    AdminWorkspace,
}

impl WorkspacePrivilege {
    /// Value of `account_privilege` on the internal workspace endpoint.
    pub fn account_privilege(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::CreateRepositories => "collaborator",
            Self::AdminWorkspace => "admin",
        }
    }
}

impl fmt::Display for WorkspacePrivilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::CreateRepositories => write!(f, "create_repositories"),
            Self::AdminWorkspace => write!(f, "admin_workspace"),
        }
    }
}

/// A group holding an instance-wide permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobalGroupGrant {
    pub group_name: String,
    pub permission: GlobalPermission,
}

/// A global grant whose permission string is not one of the known constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnrecognizedGrant {
    pub group_name: String,
    pub permission: String,
}

/// Server user as returned by the group membership listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub name: String,
    /// Cloud memberships are keyed by email; users without one cannot be mirrored.
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
}

/// Group grants attached to a project or repository, keyed by group name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupGrants(HashMap<String, PermissionLevel>);

impl GroupGrants {
    /// Record a grant. A repeated name keeps the higher level.
    pub fn insert(&mut self, group: impl Into<String>, level: PermissionLevel) {
        let entry = self.0.entry(group.into()).or_default();
        *entry = (*entry).max(level);
    }

    /// Level granted to `group`, `None` when the group holds no grant here.
    pub fn level_for(&self, group: &str) -> PermissionLevel {
        self.0.get(group).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A Server repository with its default level and group grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub slug: String,
    pub name: String,
    /// `Read` for public repositories, `None` otherwise.
    pub default_permission: PermissionLevel,
    pub groups: GroupGrants,
}

impl Repository {
    pub fn new(slug: impl Into<String>, name: impl Into<String>, public: bool) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            default_permission: if public {
                PermissionLevel::Read
            } else {
                PermissionLevel::None
            },
            groups: GroupGrants::default(),
        }
    }
}

/// A Server project with its default level, group grants and repositories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub key: String,
    pub name: String,
    pub default_permission: PermissionLevel,
    pub groups: GroupGrants,
    pub repositories: Vec<Repository>,
}

impl Project {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        default_permission: PermissionLevel,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            default_permission,
            groups: GroupGrants::default(),
            repositories: Vec::new(),
        }
    }
}

/// Ordered, duplicate-free list of group names to migrate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSet {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl MigrationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `name` unless already present. Returns whether it was added.
    pub fn insert(&mut self, name: &str) -> bool {
        if self.seen.contains(name) {
            return false;
        }
        self.seen.insert(name.to_string());
        self.order.push(name.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Names in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

/// Everything the scanner learned about the Server instance.
#[derive(Debug, Clone, Default)]
pub struct ServerStructure {
    pub migration_set: MigrationSet,
    pub global_grants: Vec<GlobalGroupGrant>,
    pub unrecognized_grants: Vec<UnrecognizedGrant>,
    pub projects: Vec<Project>,
}

impl ServerStructure {
    /// Global grant held by `group`, if any.
    pub fn global_grant_for(&self, group: &str) -> Option<&GlobalGroupGrant> {
        self.global_grants.iter().find(|g| g.group_name == group)
    }

    /// Unrecognised global grant held by `group`, if any.
    pub fn unrecognized_grant_for(&self, group: &str) -> Option<&UnrecognizedGrant> {
        self.unrecognized_grants
            .iter()
            .find(|g| g.group_name == group)
    }

    pub fn repository_count(&self) -> usize {
        self.projects.iter().map(|p| p.repositories.len()).sum()
    }
}
