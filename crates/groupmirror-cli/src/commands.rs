//! CLI command implementations.

use std::path::Path;

use anyhow::{Context, Result};
use groupmirror_migrate::{
    scanner::summarize, ConsoleProgressReporter, GroupMirror, MigrationConfig, MigrationProgress,
    RunReport, ServerStructure,
};
use tracing::{info, warn};

/// Build the mirror, with a terminal progress bar unless logs go to JSON.
fn build_mirror(
    config: MigrationConfig,
    progress: bool,
) -> Result<(GroupMirror, Option<ConsoleProgressReporter>)> {
    let mirror = GroupMirror::new(config)?;
    if !progress {
        return Ok((mirror, None));
    }

    let reporter = ConsoleProgressReporter::new();
    let mirror = mirror.with_progress(MigrationProgress::with_callback(reporter.callback()));
    Ok((mirror, Some(reporter)))
}

fn clear(reporter: Option<&ConsoleProgressReporter>) {
    if let Some(reporter) = reporter {
        reporter.clear();
    }
}

/// Check both sessions and print the result.
pub async fn verify(config: MigrationConfig) -> Result<()> {
    let mirror = GroupMirror::new(config)?;
    let result = mirror
        .verify()
        .await
        .context("instance verification failed")?;
    result.print_summary();
    Ok(())
}

/// Verify, scan and print the migration set with tree statistics.
pub async fn scan(config: MigrationConfig, progress: bool) -> Result<()> {
    let (mirror, reporter) = build_mirror(config, progress)?;

    let outcome: Result<ServerStructure> = async {
        mirror
            .verify()
            .await
            .context("instance verification failed")?;
        mirror.scan().await.context("scan of Bitbucket Server failed")
    }
    .await;
    clear(reporter.as_ref());

    print_structure(&outcome?);
    Ok(())
}

fn print_structure(structure: &ServerStructure) {
    let summary = summarize(structure);

    println!("\n=== Server Scan ===\n");
    println!("Projects:           {}", summary.projects);
    println!("Repositories:       {}", summary.repositories);
    println!("Global grants:      {}", summary.global_grants);
    println!("Groups to migrate:  {}", summary.groups_to_migrate);

    println!("\n=== Migration Set ===\n");
    for group in structure.migration_set.iter() {
        match (
            structure.global_grant_for(group),
            structure.unrecognized_grant_for(group),
        ) {
            (Some(grant), _) => println!("  {group} ({})", grant.permission),
            (None, Some(grant)) => println!("  {group} ({}, unrecognized)", grant.permission),
            (None, None) => println!("  {group}"),
        }
    }
}

/// Run the configured phases and print the report.
pub async fn migrate(
    config: MigrationConfig,
    report_json: Option<&Path>,
    progress: bool,
) -> Result<()> {
    let dry_run = config.options.dry_run;
    let (mirror, reporter) = build_mirror(config, progress)?;

    let outcome = mirror.run().await;
    clear(reporter.as_ref());
    let report = outcome.context("migration aborted")?;

    report.print_summary();
    if let Some(path) = report_json {
        write_report(path, &report)?;
        info!(path = %path.display(), "Wrote JSON report");
    }

    if !report.is_clean() {
        warn!("Some groups, members or repositories were not mirrored; see the report");
    }
    if dry_run {
        println!("\nDry run: nothing was written to Bitbucket Cloud.");
    }
    Ok(())
}

fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write report to {}", path.display()))
}
