//! # Test Runner Test Utilities
//!
//! Fakes and fixtures for exercising the test runner without a cluster.
//!
//! - `fake_cluster` - in-memory [`ClusterClient`](test_runner::cluster::ClusterClient)
//!   with scripted readiness, failure injection and a call log
//! - `fixtures` - pods, deployments, partition sets and run inputs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use runner_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let cluster = FakeCluster::new().with_job_result(0, "PASS");
//!     let certs = tempfile::tempdir().unwrap();
//!     write_certificates(certs.path());
//!
//!     let mut orchestrator = Orchestrator::new(
//!         Arc::new(cluster.clone()),
//!         test_run("1"),
//!         simulators_document(&["dev1"]),
//!         settings(certs.path()),
//!     );
//!     // Run and assert on cluster.calls()...
//! }
//! ```

pub mod fake_cluster;
pub mod fixtures;

pub use fake_cluster::*;
pub use fixtures::*;
