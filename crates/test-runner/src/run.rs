//! Test run identity and outcome.

use std::time::Duration;
use uuid::Uuid;

/// Prefix of every test namespace.
pub const TEST_NAME_PREFIX: &str = "onos-test-";

/// Sizing of the environment provisioned for one test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunParams {
    /// onos-config replicas.
    pub nodes: u32,
    /// Raft partitions.
    pub partitions: u32,
    /// Members per Raft partition.
    pub partition_size: u32,
    /// Test job deadline, enforced by the cluster.
    pub timeout: Duration,
}

/// A single test invocation.
///
/// The test name doubles as the namespace name and as the name of the
/// secret and job created for the run. It never changes after construction.
#[derive(Debug, Clone)]
pub struct TestRun {
    test_id: String,
    test_name: String,
    params: RunParams,
}

impl TestRun {
    /// Creates a run with a freshly generated test ID.
    pub fn new(params: RunParams) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), params)
    }

    /// Creates a run for a known test ID.
    pub fn with_id(test_id: impl Into<String>, params: RunParams) -> Self {
        let test_id = test_id.into();
        let test_name = test_name(&test_id);
        Self {
            test_id,
            test_name,
            params,
        }
    }

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    /// Namespace and resource-name prefix for this run.
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn params(&self) -> &RunParams {
        &self.params
    }
}

/// Returns the qualified test name for a test ID.
pub fn test_name(test_id: &str) -> String {
    format!("{}{}", TEST_NAME_PREFIX, test_id)
}

/// Final status reported by the test container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub message: String,
    pub exit_code: i32,
}

impl JobOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn params() -> RunParams {
        RunParams {
            nodes: 1,
            partitions: 1,
            partition_size: 1,
            timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_name_derived_from_id() {
        let run = TestRun::with_id("1234", params());
        assert_eq!(run.test_id(), "1234");
        assert_eq!(run.test_name(), "onos-test-1234");
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = TestRun::new(params());
        let b = TestRun::new(params());
        assert_ne!(a.test_id(), b.test_id());
        assert!(a.test_name().starts_with(TEST_NAME_PREFIX));
        assert!(a.test_name().ends_with(a.test_id()));
    }

    #[test]
    fn test_outcome_success() {
        let ok = JobOutcome {
            message: String::new(),
            exit_code: 0,
        };
        let failed = JobOutcome {
            message: "2 tests failed".to_string(),
            exit_code: 2,
        };
        assert!(ok.succeeded());
        assert!(!failed.succeeded());
    }
}
