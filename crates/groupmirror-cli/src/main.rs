//! groupmirror - mirror Bitbucket Server group permissions onto Bitbucket Cloud.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use groupmirror_migrate::{MigrationError, MigrationOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;

use config::{ConfigError, ConnectionArgs, FileConfig};

/// Mirror Bitbucket Server group permissions onto a Bitbucket Cloud workspace
#[derive(Parser, Debug)]
#[command(name = "groupmirror")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML config file; flags and environment variables override it
    #[arg(short, long, env = "GROUPMIRROR_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check both instances accept the configured credentials
    Verify,

    /// Scan Bitbucket Server and list the groups that would be migrated
    Scan {
        /// Also list groups that hold no grant anywhere
        #[arg(long)]
        include_unused_groups: bool,
    },

    /// Mirror groups, memberships and repository permissions
    Migrate {
        /// Only create groups, memberships and workspace privileges
        #[arg(long, conflicts_with = "repos_only")]
        groups_only: bool,

        /// Only apply repository group privileges
        #[arg(long)]
        repos_only: bool,

        /// Read everything but send no writes to Cloud
        #[arg(long)]
        dry_run: bool,

        /// Also migrate groups that hold no grant anywhere
        #[arg(long)]
        include_unused_groups: bool,

        /// Write the full report as JSON to this path
        #[arg(long, value_name = "PATH")]
        report_json: Option<PathBuf>,
    },
}

impl Commands {
    fn options(&self) -> MigrationOptions {
        match self {
            Self::Verify => MigrationOptions::default(),
            Self::Scan {
                include_unused_groups,
            } => MigrationOptions::default().with_unused_groups(*include_unused_groups),
            Self::Migrate {
                groups_only,
                repos_only,
                dry_run,
                include_unused_groups,
                ..
            } => MigrationOptions::default()
                .with_groups(!repos_only)
                .with_repositories(!groups_only)
                .with_dry_run(*dry_run)
                .with_unused_groups(*include_unused_groups),
        }
    }
}

fn init_tracing(verbose: u8, json: bool) {
    let log_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("groupmirror={log_level}").into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Exit code 2 for configuration problems, 1 for everything else.
fn exit_code(error: &anyhow::Error) -> i32 {
    if error.downcast_ref::<ConfigError>().is_some() {
        return 2;
    }
    match error.downcast_ref::<MigrationError>() {
        Some(MigrationError::InvalidConfig(_)) => 2,
        _ => 1,
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let config = config::resolve(file, cli.connection, cli.command.options())?;
    tracing::debug!(?config, "Resolved configuration");

    let progress = !cli.json_logs;
    match cli.command {
        Commands::Verify => commands::verify(config).await,
        Commands::Scan { .. } => commands::scan(config, progress).await,
        Commands::Migrate { report_json, .. } => {
            commands::migrate(config, report_json.as_deref(), progress).await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    if let Err(e) = run(cli).await {
        tracing::error!("{e:#}");
        eprintln!("Error: {e:#}");
        std::process::exit(exit_code(&e));
    }
}
