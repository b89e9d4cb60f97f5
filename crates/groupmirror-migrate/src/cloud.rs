//! Writes against a Bitbucket Cloud workspace.
//!
//! Only `401`/`403` come back as `Err` from a write. Any other status, and a
//! write that never got a response, is folded into an outcome value so one
//! rejected or stalled group, member or repository never stops the run.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::client::RestClient;
use crate::error::{MigrationError, Result};
use crate::model::PermissionLevel;
use crate::types::{Platform, TargetConfig};

/// Characters Cloud drops or folds when deriving a group slug.
static SLUG_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9_]+").expect("Invalid regex"));

/// Cloud group slug for a group name.
///
/// Empty when the name has no ASCII letter, digit or underscore; such a group
/// cannot be addressed on Cloud.
pub fn group_slug(name: &str) -> String {
    let lowered = name.to_lowercase();
    SLUG_SEPARATOR
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}

/// Join percent-encoded path segments onto `base`.
///
/// Member emails and repository slugs go through here so that characters
/// such as `+` or `#` cannot change the path.
fn endpoint(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| MigrationError::InvalidConfig(format!("invalid URL {base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| MigrationError::InvalidConfig(format!("{base} cannot be a base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Why a write did not take effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteFailure {
    /// Cloud answered with an unexpected status.
    Status(StatusCode),
    /// No response arrived: connect error, reset or timeout.
    Transport(String),
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(status) => write!(f, "{status}"),
            Self::Transport(message) => write!(f, "no response: {message}"),
        }
    }
}

/// Status of a sent write, or why there is none.
type WriteResponse = std::result::Result<StatusCode, WriteFailure>;

/// Result of creating a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupCreation {
    Created,
    /// Cloud answers `400` for a name that is already taken.
    AlreadyExists,
    Failed(WriteFailure),
}

impl GroupCreation {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Created | Self::AlreadyExists)
    }
}

/// Result of adding a member to a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipOutcome {
    Added,
    /// `409`: the user is already in the group.
    AlreadyMember,
    /// `404`: the user has not joined the workspace yet.
    NotProvisioned,
    Failed(WriteFailure),
}

impl MembershipOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Added | Self::AlreadyMember)
    }
}

/// Result of any other write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    Failed(WriteFailure),
}

impl WriteOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Applied)
    }

    fn from_response(response: WriteResponse) -> Self {
        match response {
            Ok(status) if status.is_success() => Self::Applied,
            Ok(status) => Self::Failed(WriteFailure::Status(status)),
            Err(failure) => Self::Failed(failure),
        }
    }
}

#[derive(Debug, Serialize)]
struct GroupPrivilegeRequest<'a> {
    name: &'a str,
    privilege: &'a str,
    account_privilege: &'a str,
}

/// Workspace metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceInfo {
    pub uuid: String,
}

/// Client for the target workspace.
pub struct CloudClient {
    rest: RestClient,
    api: String,
    web: String,
    workspace: String,
}

impl CloudClient {
    /// Create a new Cloud client from its connection settings.
    pub fn new(config: &TargetConfig) -> Result<Self> {
        let rest = RestClient::new(
            Platform::Cloud,
            &config.username,
            &config.app_password,
            config.rate_limit_backoff,
            config.request_timeout,
        )?;

        Ok(Self {
            rest,
            api: config.api_url.clone(),
            web: config.web_url.clone(),
            workspace: config.workspace.clone(),
        })
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    /// Send a write and hand back its status.
    ///
    /// A request that gets no response is a [`WriteFailure::Transport`], not
    /// an error; `401`/`403` still abort.
    async fn send_write<F>(&self, build: F) -> Result<WriteResponse>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        match self.rest.send(build).await {
            Ok(response) => Ok(Ok(response.status())),
            Err(MigrationError::NetworkError(message)) => {
                warn!(workspace = %self.workspace, error = %message, "Write got no response");
                Ok(Err(WriteFailure::Transport(message)))
            }
            Err(e) => Err(e),
        }
    }

    /// Create `group` in the workspace.
    pub async fn create_group(&self, group: &str) -> Result<GroupCreation> {
        let url = format!("{}/1.0/groups/{}", self.api, self.workspace);
        let response = self
            .send_write(|c| c.post(&url).form(&[("name", group)]))
            .await?;

        let outcome = match response {
            Ok(StatusCode::OK | StatusCode::CREATED) => GroupCreation::Created,
            Ok(StatusCode::BAD_REQUEST) => GroupCreation::AlreadyExists,
            Ok(status) => GroupCreation::Failed(WriteFailure::Status(status)),
            Err(failure) => GroupCreation::Failed(failure),
        };
        debug!(group, ?outcome, "Create group");
        Ok(outcome)
    }

    /// Set the default repository privilege and workspace checkboxes of a group.
    ///
    /// There is no public API for this; the endpoint is the one the web UI uses.
    pub async fn set_workspace_privilege(
        &self,
        group: &str,
        privilege: &str,
        account_privilege: &str,
    ) -> Result<WriteOutcome> {
        let url = format!(
            "{}/api/internal/workspaces/{}/groups/{}",
            self.web,
            self.workspace,
            group_slug(group)
        );
        let body = GroupPrivilegeRequest {
            name: group,
            privilege,
            account_privilege,
        };
        let response = self.send_write(|c| c.put(&url).json(&body)).await?;
        Ok(WriteOutcome::from_response(response))
    }

    /// Add the user with `email` to `group`.
    pub async fn add_member(&self, group: &str, email: &str) -> Result<MembershipOutcome> {
        let slug = group_slug(group);
        let url = endpoint(
            &self.api,
            &["1.0", "groups", &self.workspace, &slug, "members", email, ""],
        )?;
        let response = self
            .send_write(|c| c.put(url.clone()).json(&serde_json::json!({})))
            .await?;

        let outcome = match response {
            Ok(status) if status.is_success() => MembershipOutcome::Added,
            Ok(StatusCode::CONFLICT) => MembershipOutcome::AlreadyMember,
            Ok(StatusCode::NOT_FOUND) => MembershipOutcome::NotProvisioned,
            Ok(status) => MembershipOutcome::Failed(WriteFailure::Status(status)),
            Err(failure) => MembershipOutcome::Failed(failure),
        };
        debug!(group, email, ?outcome, "Add member");
        Ok(outcome)
    }

    /// Whether `repo_slug` already exists in the workspace.
    pub async fn repository_exists(&self, repo_slug: &str) -> Result<bool> {
        let url = endpoint(&self.api, &["2.0", "repositories", &self.workspace, repo_slug])?;
        let response = self.rest.send(|c| c.get(url.clone())).await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(MigrationError::ApiError(format!(
                "Bitbucket Cloud API error ({status}) checking repository {repo_slug}"
            ))),
        }
    }

    /// Grant `group` the given level on `repo_slug`.
    ///
    /// `PermissionLevel::None` is sent as `none`, which revokes the grant.
    pub async fn set_repository_privilege(
        &self,
        repo_slug: &str,
        group: &str,
        level: PermissionLevel,
    ) -> Result<WriteOutcome> {
        let slug = group_slug(group);
        let url = endpoint(
            &self.api,
            &[
                "1.0",
                "group-privileges",
                &self.workspace,
                repo_slug,
                &self.workspace,
                &slug,
            ],
        )?;
        let privilege = level.cloud_privilege().unwrap_or("none");
        let response = self
            .send_write(|c| {
                c.put(url.clone())
                    .header("Content-Type", "text/plain")
                    .body(privilege)
            })
            .await?;
        Ok(WriteOutcome::from_response(response))
    }

    /// Fetch workspace metadata.
    pub async fn workspace_info(&self) -> Result<WorkspaceInfo> {
        let url = format!("{}/2.0/workspaces/{}", self.api, self.workspace);
        self.rest.get_json(&url, &[]).await
    }

    /// Confirm the credentials can read workspace permissions.
    pub async fn check_workspace_permissions(&self) -> Result<()> {
        let url = format!("{}/2.0/workspaces/{}/permissions", self.api, self.workspace);
        let _: serde_json::Value = self.rest.get_json(&url, &[]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_json, body_string, body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cloud(uri: &str) -> CloudClient {
        let config = TargetConfig::new("acme", "migrator", "app-password")
            .with_urls(uri, uri)
            .with_rate_limit_backoff(Duration::from_millis(5));
        CloudClient::new(&config).unwrap()
    }

    #[test]
    fn test_group_slug() {
        assert_eq!(group_slug("Developers"), "developers");
        assert_eq!(group_slug("Release Managers"), "release-managers");
        assert_eq!(group_slug("  ops & infra "), "ops-infra");
        assert_eq!(group_slug("stash_users"), "stash_users");
        assert_eq!(group_slug("#@!"), "");
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let url = endpoint(
            "https://api.bitbucket.org",
            &["1.0", "groups", "acme", "devs", "members", "a#b@x.com", ""],
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.bitbucket.org/1.0/groups/acme/devs/members/a%23b@x.com/"
        );

        let url = endpoint("http://proxy.local/bitbucket/", &["2.0", "repositories"]).unwrap();
        assert_eq!(url.as_str(), "http://proxy.local/bitbucket/2.0/repositories");
    }

    #[tokio::test]
    async fn test_create_group_treats_existing_as_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/1.0/groups/acme"))
            .and(body_string_contains("name=devs"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&mock_server)
            .await;

        let outcome = cloud(&mock_server.uri()).create_group("devs").await.unwrap();
        assert_eq!(outcome, GroupCreation::AlreadyExists);
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_add_member_outcomes() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/1.0/groups/acme/devs/members/a@x.com/"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/1.0/groups/acme/devs/members/new@x.com/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/1.0/groups/acme/devs/members/b@x.com/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let client = cloud(&mock_server.uri());
        assert_eq!(
            client.add_member("devs", "a@x.com").await.unwrap(),
            MembershipOutcome::AlreadyMember
        );
        assert_eq!(
            client.add_member("devs", "new@x.com").await.unwrap(),
            MembershipOutcome::NotProvisioned
        );
        assert_eq!(
            client.add_member("devs", "b@x.com").await.unwrap(),
            MembershipOutcome::Added
        );
    }

    #[tokio::test]
    async fn test_repository_exists() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/2.0/repositories/acme/api"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/2.0/repositories/acme/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = cloud(&mock_server.uri());
        assert!(client.repository_exists("api").await.unwrap());
        assert!(!client.repository_exists("gone").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_repository_privilege_sends_plain_level() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/1.0/group-privileges/acme/api/acme/release-managers"))
            .and(body_string("write"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let outcome = cloud(&mock_server.uri())
            .set_repository_privilege("api", "Release Managers", PermissionLevel::Write)
            .await
            .unwrap();
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_set_workspace_privilege_payload() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/api/internal/workspaces/acme/groups/admins"))
            .and(body_json(serde_json::json!({
                "name": "admins",
                "privilege": "admin",
                "account_privilege": "admin"
            })))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        let outcome = cloud(&mock_server.uri())
            .set_workspace_privilege("admins", "admin", "admin")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WriteOutcome::Failed(WriteFailure::Status(StatusCode::INTERNAL_SERVER_ERROR))
        );
    }

    #[tokio::test]
    async fn test_write_timeout_becomes_failed_outcome() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_millis(500)))
            .mount(&mock_server)
            .await;

        let config = TargetConfig::new("acme", "migrator", "app-password")
            .with_urls(mock_server.uri(), mock_server.uri())
            .with_request_timeout(Duration::from_millis(100));
        let client = CloudClient::new(&config).unwrap();

        let creation = client.create_group("devs").await.unwrap();
        assert!(matches!(
            creation,
            GroupCreation::Failed(WriteFailure::Transport(_))
        ));

        let membership = client.add_member("devs", "a@x.com").await.unwrap();
        assert!(matches!(
            membership,
            MembershipOutcome::Failed(WriteFailure::Transport(_))
        ));
        assert!(!membership.is_success());

        let privilege = client
            .set_repository_privilege("api", "devs", PermissionLevel::Read)
            .await
            .unwrap();
        assert!(matches!(
            privilege,
            WriteOutcome::Failed(WriteFailure::Transport(_))
        ));
    }

    #[test]
    fn test_write_failure_display() {
        assert_eq!(
            WriteFailure::Status(StatusCode::CONFLICT).to_string(),
            "409 Conflict"
        );
        assert_eq!(
            WriteFailure::Transport("timed out".to_string()).to_string(),
            "no response: timed out"
        );
    }
}
