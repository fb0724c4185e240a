//! onos-config Test Runner
//!
//! Provisions a disposable onos-config test environment inside a Kubernetes
//! cluster, runs an integration test job against it, streams the job's output
//! and tears the environment down again.
//!
//! # Provisioning Tiers
//!
//! Tiers are created strictly in order; no tier starts until the previous
//! tier's readiness predicate holds:
//!
//! 1. Namespace (`onos-test-<id>`)
//! 2. Atomix controller (CRDs, RBAC, deployment, service)
//! 3. Raft partitions
//! 4. Device simulators
//! 5. onos-config (TLS secret, store config map, deployment, service)
//! 6. Test job
//!
//! # Exit Codes
//!
//! The process exits with the test container's exit code, or `1` if any
//! phase fails.

pub mod cluster;
pub mod config;
pub mod errors;
pub mod gate;
pub mod job_runner;
pub mod orchestrator;
pub mod provisioner;
pub mod run;
pub mod teardown;
pub mod templates;
pub mod test_config;
