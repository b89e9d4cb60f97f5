//! Session checks run before anything is scanned or written.

use serde::Serialize;
use tracing::info;

use crate::cloud::CloudClient;
use crate::error::{MigrationError, Result};
use crate::server::ServerClient;

/// What the pre-flight checks established.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationResult {
    /// `/status` reported `RUNNING`.
    pub server_running: bool,

    /// The Server credentials can read admin endpoints.
    pub server_admin: bool,

    /// The Cloud credentials can read workspace permissions.
    pub workspace_accessible: bool,

    pub workspace_uuid: Option<String>,
}

impl VerificationResult {
    pub fn is_success(&self) -> bool {
        self.server_running && self.server_admin && self.workspace_accessible
    }

    pub fn print_summary(&self) {
        println!("\n=== Verification ===\n");
        println!(
            "Server running:       {}",
            if self.server_running { "✓" } else { "✗" }
        );
        println!(
            "Server admin access:  {}",
            if self.server_admin { "✓" } else { "✗" }
        );
        println!(
            "Workspace access:     {}",
            if self.workspace_accessible { "✓" } else { "✗" }
        );
        if let Some(uuid) = &self.workspace_uuid {
            println!("Workspace UUID:       {uuid}");
        }
    }
}

/// Checks that both instances accept the configured credentials.
pub struct InstanceVerifier<'a> {
    server: &'a ServerClient,
    cloud: &'a CloudClient,
}

impl<'a> InstanceVerifier<'a> {
    pub fn new(server: &'a ServerClient, cloud: &'a CloudClient) -> Self {
        Self { server, cloud }
    }

    /// Run every check, stopping at the first failure.
    ///
    /// All failures are session-level: a run must not continue past them.
    pub async fn verify(&self) -> Result<VerificationResult> {
        let mut result = VerificationResult::default();

        let status = self.server.status().await.map_err(unavailable(format!(
            "could not reach {}/status",
            self.server.base_url()
        )))?;
        if !status.contains("RUNNING") {
            return Err(MigrationError::InstanceNotAvailable(format!(
                "did not get a RUNNING response from {}/status",
                self.server.base_url()
            )));
        }
        result.server_running = true;

        self.server
            .check_admin_access()
            .await
            .map_err(unavailable(format!(
                "could not use the admin API at {} with the provided credentials",
                self.server.base_url()
            )))?;
        result.server_admin = true;
        info!(url = %self.server.base_url(), "Bitbucket Server session verified");

        self.cloud
            .check_workspace_permissions()
            .await
            .map_err(unavailable(format!(
                "could not read permissions of workspace {}",
                self.cloud.workspace()
            )))?;
        result.workspace_accessible = true;

        let workspace = self.cloud.workspace_info().await?;
        info!(workspace = %self.cloud.workspace(), uuid = %workspace.uuid, "Bitbucket Cloud session verified");
        result.workspace_uuid = Some(workspace.uuid);

        Ok(result)
    }
}

/// Wrap non-session failures as `InstanceNotAvailable`, keep 401/403 as they are.
fn unavailable(context: String) -> impl FnOnce(MigrationError) -> MigrationError {
    move |e| {
        if e.is_session_error() {
            e
        } else {
            MigrationError::InstanceNotAvailable(format!("{context}: {e}"))
        }
    }
}
