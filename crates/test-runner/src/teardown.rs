//! Teardown manager.
//!
//! Deleting the test namespace reclaims every namespace-scoped object the
//! run created. The controller's cluster role binding lives outside the
//! namespace under a fixed name and is deleted separately.

use crate::cluster::{ClusterClient, ClusterError};
use crate::templates::CONTROLLER_NAME;
use tracing::{error, info, instrument};

/// Result of one teardown attempt.
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub namespace: Option<ClusterError>,
    pub role_binding: Option<ClusterError>,
}

impl TeardownReport {
    /// Returns true if every deletion succeeded or found nothing to delete.
    pub fn is_clean(&self) -> bool {
        self.namespace.is_none() && self.role_binding.is_none()
    }
}

/// Deletes the resources of one test namespace.
pub struct Teardown<'a> {
    client: &'a dyn ClusterClient,
    namespace: &'a str,
}

/// `NotFound` means the object is already gone.
fn reclaimed(result: Result<(), ClusterError>) -> Option<ClusterError> {
    match result {
        Ok(()) => None,
        Err(e) if e.is_not_found() => None,
        Err(e) => Some(e),
    }
}

impl<'a> Teardown<'a> {
    pub fn new(client: &'a dyn ClusterClient, namespace: &'a str) -> Self {
        Self { client, namespace }
    }

    /// Attempts both deletions, even if the first one fails.
    ///
    /// Failures are logged and returned in the report; they never change the
    /// outcome of the run.
    #[instrument(skip_all, name = "test_runner.teardown", fields(namespace = %self.namespace))]
    pub async fn run(&self) -> TeardownReport {
        let report = TeardownReport {
            namespace: reclaimed(self.client.delete_namespace(self.namespace).await),
            role_binding: reclaimed(self.client.delete_cluster_role_binding(CONTROLLER_NAME).await),
        };

        if let Some(e) = &report.namespace {
            error!(target: "test_runner.teardown", error = %e, "Failed to delete test namespace");
        }
        if let Some(e) = &report.role_binding {
            error!(
                target: "test_runner.teardown",
                binding = CONTROLLER_NAME,
                error = %e,
                "Failed to delete cluster role binding"
            );
        }
        if report.is_clean() {
            info!(target: "test_runner.teardown", "Test environment deleted");
        }

        report
    }
}
