//! Configuration loading: optional YAML file, then command-line and env overrides.

use std::path::Path;
use std::time::Duration;

use groupmirror_migrate::{MigrationConfig, MigrationOptions, SourceConfig, TargetConfig};
use serde::Deserialize;
use thiserror::Error;
use validator::Validate;

/// Problems with the configuration, reported with exit code 2.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("missing required setting `{0}` (set it in the config file, as a flag or via the environment)")]
    Missing(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// Source section of the YAML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSource {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub page_size: Option<u32>,
    pub rate_limit_backoff_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

/// Target section of the YAML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileTarget {
    pub workspace: Option<String>,
    pub username: Option<String>,
    pub app_password: Option<String>,
    pub api_url: Option<String>,
    pub web_url: Option<String>,
    pub rate_limit_backoff_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileOptions {
    #[serde(default)]
    pub include_unused_groups: bool,
    #[serde(default)]
    pub dry_run: bool,
}

/// Layout of the `--config` file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub source: FileSource,
    #[serde(default)]
    pub target: FileTarget,
    #[serde(default)]
    pub options: FileOptions,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }
}

/// Connection settings given on the command line or through the environment.
///
/// Anything set here wins over the config file.
#[derive(Debug, Default, Clone, clap::Args)]
pub struct ConnectionArgs {
    /// Bitbucket Server base URL
    #[arg(long, env = "GROUPMIRROR_SERVER_URL", global = true)]
    pub server_url: Option<String>,

    /// Bitbucket Server admin username
    #[arg(long, env = "GROUPMIRROR_SERVER_USERNAME", global = true)]
    pub server_username: Option<String>,

    /// Bitbucket Server admin password
    #[arg(long, env = "GROUPMIRROR_SERVER_PASSWORD", global = true, hide_env_values = true)]
    pub server_password: Option<String>,

    /// Items per page on Server list endpoints (1-1000)
    #[arg(long, env = "GROUPMIRROR_PAGE_SIZE", global = true)]
    pub page_size: Option<u32>,

    /// Seconds to wait after a 429 from Server
    #[arg(long, env = "GROUPMIRROR_SERVER_BACKOFF_SECS", global = true)]
    pub server_backoff_secs: Option<u64>,

    /// Bitbucket Cloud workspace ID
    #[arg(long, env = "GROUPMIRROR_WORKSPACE", global = true)]
    pub workspace: Option<String>,

    /// Bitbucket Cloud username
    #[arg(long, env = "GROUPMIRROR_CLOUD_USERNAME", global = true)]
    pub cloud_username: Option<String>,

    /// Bitbucket Cloud app password
    #[arg(long, env = "GROUPMIRROR_CLOUD_APP_PASSWORD", global = true, hide_env_values = true)]
    pub cloud_app_password: Option<String>,

    /// Bitbucket Cloud API root
    #[arg(long, env = "GROUPMIRROR_CLOUD_API_URL", global = true)]
    pub cloud_api_url: Option<String>,

    /// Bitbucket Cloud web root
    #[arg(long, env = "GROUPMIRROR_CLOUD_WEB_URL", global = true)]
    pub cloud_web_url: Option<String>,

    /// Seconds to wait after a 429 from Cloud
    #[arg(long, env = "GROUPMIRROR_CLOUD_BACKOFF_SECS", global = true)]
    pub cloud_backoff_secs: Option<u64>,

    /// Seconds before a request to either system with no response is given up
    #[arg(long, env = "GROUPMIRROR_REQUEST_TIMEOUT_SECS", global = true)]
    pub request_timeout_secs: Option<u64>,
}

fn required(value: Option<String>, name: &'static str) -> Result<String, ConfigError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}

/// Merge the file and the arguments into a validated [`MigrationConfig`].
pub fn resolve(
    file: FileConfig,
    args: ConnectionArgs,
    options: MigrationOptions,
) -> Result<MigrationConfig, ConfigError> {
    let FileConfig {
        source,
        target,
        options: file_options,
    } = file;

    let mut source_config = SourceConfig::new(
        required(args.server_url.or(source.url), "source.url")?,
        required(args.server_username.or(source.username), "source.username")?,
        required(args.server_password.or(source.password), "source.password")?,
    );
    if let Some(page_size) = args.page_size.or(source.page_size) {
        source_config = source_config.with_page_size(page_size);
    }
    if let Some(secs) = args.server_backoff_secs.or(source.rate_limit_backoff_secs) {
        source_config = source_config.with_rate_limit_backoff(Duration::from_secs(secs));
    }
    if let Some(secs) = args.request_timeout_secs.or(source.request_timeout_secs) {
        source_config = source_config.with_request_timeout(Duration::from_secs(secs));
    }

    let mut target_config = TargetConfig::new(
        required(args.workspace.or(target.workspace), "target.workspace")?,
        required(args.cloud_username.or(target.username), "target.username")?,
        required(
            args.cloud_app_password.or(target.app_password),
            "target.app_password",
        )?,
    );
    let api_url = args
        .cloud_api_url
        .or(target.api_url)
        .unwrap_or_else(|| target_config.api_url.clone());
    let web_url = args
        .cloud_web_url
        .or(target.web_url)
        .unwrap_or_else(|| target_config.web_url.clone());
    target_config = target_config.with_urls(api_url, web_url);
    if let Some(secs) = args.cloud_backoff_secs.or(target.rate_limit_backoff_secs) {
        target_config = target_config.with_rate_limit_backoff(Duration::from_secs(secs));
    }
    if let Some(secs) = args.request_timeout_secs.or(target.request_timeout_secs) {
        target_config = target_config.with_request_timeout(Duration::from_secs(secs));
    }

    let include_unused_groups = options.include_unused_groups || file_options.include_unused_groups;
    let dry_run = options.dry_run || file_options.dry_run;
    let options = options
        .with_unused_groups(include_unused_groups)
        .with_dry_run(dry_run);

    let config = MigrationConfig::new(source_config, target_config).with_options(options);
    config.validate()?;
    Ok(config)
}
