//! Test runner error types.
//!
//! Failures are split by when they happen:
//! - `Setup`: any create or readiness failure while a tier is provisioned
//! - everything else after the job pod was observed is a run failure
//!
//! The workload's own non-zero exit code is not an error; it is carried in
//! [`crate::run::JobOutcome`].

use crate::cluster::ClusterError;
use crate::config::ConfigError;
use crate::orchestrator::Tier;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Test runner error type.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Failed to load test configuration {path}: {message}")]
    TestConfig { path: PathBuf, message: String },

    #[error("Failed to read certificates from {path}: {source}")]
    Certificates {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{what} did not become ready within {waited:?}")]
    NotReady { what: String, waited: Duration },

    #[error("Test job pod matching {selector} has no name")]
    UnnamedPod { selector: String },

    #[error("Failed to write test output: {0}")]
    Output(#[source] std::io::Error),

    #[error("Setting up {tier} failed: {source}")]
    Setup {
        tier: Tier,
        #[source]
        source: Box<RunnerError>,
    },
}

impl RunnerError {
    /// Wraps an error raised while provisioning `tier`.
    pub fn setup(tier: Tier, source: RunnerError) -> Self {
        RunnerError::Setup {
            tier,
            source: Box::new(source),
        }
    }

    /// Returns true if the error was raised while provisioning a tier.
    pub fn is_setup_failure(&self) -> bool {
        matches!(self, RunnerError::Setup { .. })
    }

    /// Returns the tier whose provisioning failed, if any.
    pub fn failed_tier(&self) -> Option<Tier> {
        match self {
            RunnerError::Setup { tier, .. } => Some(*tier),
            _ => None,
        }
    }
}
