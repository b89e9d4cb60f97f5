//! Read-only access to the Bitbucket Server REST API.

use futures::stream::BoxStream;
use serde::Deserialize;
use tracing::debug;

use crate::client::RestClient;
use crate::error::Result;
use crate::model::User;
use crate::types::{Platform, SourceConfig};

/// Bitbucket Server API response types
#[derive(Debug, Clone, Deserialize)]
pub struct ServerGroupRef {
    pub name: String,
}

/// A `{group, permission}` entry from any of the group permission listings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerGroupPermission {
    pub group: ServerGroupRef,
    pub permission: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerProject {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub public: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerRepository {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub public: bool,
}

#[derive(Debug, Deserialize)]
struct Permitted {
    permitted: bool,
}

/// Project-wide access check for all authenticated users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectAccess {
    Read,
    Write,
}

impl ProjectAccess {
    fn as_path(self) -> &'static str {
        match self {
            Self::Read => "PROJECT_READ",
            Self::Write => "PROJECT_WRITE",
        }
    }
}

/// Client for the source instance.
pub struct ServerClient {
    rest: RestClient,
    base: String,
    api: String,
    page_size: u32,
}

impl ServerClient {
    /// Create a new Server client from its connection settings.
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let rest = RestClient::new(
            Platform::Server,
            &config.username,
            &config.password,
            config.rate_limit_backoff,
            config.request_timeout,
        )?;

        Ok(Self {
            rest,
            base: config.url.clone(),
            api: config.api_url(),
            page_size: config.page_size,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// Body of the unauthenticated `/status` page, e.g. `{"state":"RUNNING"}`.
    pub async fn status(&self) -> Result<String> {
        let url = format!("{}/status", self.base);
        let response = self.rest.send(|c| c.get(&url)).await?;
        Ok(response.text().await?)
    }

    /// Confirm the credentials carry system-admin rights.
    pub async fn check_admin_access(&self) -> Result<()> {
        let url = format!("{}/admin/cluster", self.api);
        let _: serde_json::Value = self.rest.get_json(&url, &[]).await?;
        Ok(())
    }

    fn list<'a, T>(
        &'a self,
        endpoint: &str,
        query: Vec<(&'static str, String)>,
    ) -> BoxStream<'a, Result<T>>
    where
        T: serde::de::DeserializeOwned + Send + 'a,
    {
        let url = format!("{}{endpoint}", self.api);
        debug!(%url, "Listing");
        self.rest.paginate(url, query, self.page_size)
    }

    /// Groups holding an instance-wide permission.
    pub fn global_group_permissions(&self) -> BoxStream<'_, Result<ServerGroupPermission>> {
        self.list("/admin/permissions/groups", Vec::new())
    }

    /// Every group on the instance.
    pub fn groups(&self) -> BoxStream<'_, Result<ServerGroupRef>> {
        self.list("/admin/groups", Vec::new())
    }

    /// Members of `group`.
    pub fn group_members(&self, group: &str) -> BoxStream<'_, Result<User>> {
        self.list(
            "/admin/groups/more-members",
            vec![("context", group.to_string())],
        )
    }

    pub fn projects(&self) -> BoxStream<'_, Result<ServerProject>> {
        self.list("/projects", Vec::new())
    }

    /// Group grants on a project.
    pub fn project_group_permissions(
        &self,
        project_key: &str,
    ) -> BoxStream<'_, Result<ServerGroupPermission>> {
        self.list(
            &format!("/projects/{project_key}/permissions/groups"),
            Vec::new(),
        )
    }

    pub fn repositories(&self, project_key: &str) -> BoxStream<'_, Result<ServerRepository>> {
        self.list(&format!("/projects/{project_key}/repos"), Vec::new())
    }

    /// Group grants on a repository.
    pub fn repository_group_permissions(
        &self,
        project_key: &str,
        repo_slug: &str,
    ) -> BoxStream<'_, Result<ServerGroupPermission>> {
        self.list(
            &format!("/projects/{project_key}/repos/{repo_slug}/permissions/groups"),
            Vec::new(),
        )
    }

    /// Whether every authenticated user holds `access` on the project.
    pub async fn project_access_for_all(
        &self,
        project_key: &str,
        access: ProjectAccess,
    ) -> Result<bool> {
        let url = format!(
            "{}/projects/{project_key}/permissions/{}/all",
            self.api,
            access.as_path()
        );
        let access: Permitted = self.rest.get_json(&url, &[]).await?;
        Ok(access.permitted)
    }
}
