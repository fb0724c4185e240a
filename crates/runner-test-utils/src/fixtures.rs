//! Pre-built cluster objects and run inputs for test runner tests.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use test_runner::cluster::PartitionSet;
use test_runner::config::Images;
use test_runner::gate::ReadinessGate;
use test_runner::orchestrator::OrchestratorSettings;
use test_runner::run::{RunParams, TestRun};
use test_runner::test_config::TestConfigDocument;

/// Poll interval used by fixtures; tests run on a paused clock.
pub const TEST_POLL_INTERVAL: Duration = Duration::from_millis(100);

fn container_status(ready: bool, state: Value) -> Value {
    json!({
        "name": "test",
        "ready": ready,
        "restartCount": 0,
        "image": "",
        "imageID": "",
        "state": state
    })
}

/// Pod in phase `Running` whose first container reports `ready`.
pub fn running_pod(name: &str, labels: BTreeMap<String, String>, ready: bool) -> Pod {
    serde_json::from_value(json!({
        "metadata": {"name": name, "labels": labels},
        "status": {
            "phase": "Running",
            "containerStatuses": [container_status(ready, json!({"running": {}}))]
        }
    }))
    .unwrap()
}

/// Pod in phase `Pending` without container statuses.
pub fn pending_pod(name: &str, labels: BTreeMap<String, String>) -> Pod {
    serde_json::from_value(json!({
        "metadata": {"name": name, "labels": labels},
        "status": {"phase": "Pending"}
    }))
    .unwrap()
}

/// Pod whose first container terminated with `exit_code`.
///
/// The phase is `Succeeded` for a zero exit code and `Failed` otherwise; the
/// container never reports ready.
pub fn terminated_pod(
    name: &str,
    labels: BTreeMap<String, String>,
    exit_code: i32,
    message: &str,
) -> Pod {
    let phase = if exit_code == 0 { "Succeeded" } else { "Failed" };
    serde_json::from_value(json!({
        "metadata": {"name": name, "labels": labels},
        "status": {
            "phase": phase,
            "containerStatuses": [container_status(
                false,
                json!({"terminated": {"exitCode": exit_code, "message": message}})
            )]
        }
    }))
    .unwrap()
}

/// Deployment reporting `ready` ready replicas.
pub fn deployment(name: &str, ready: i32) -> Deployment {
    serde_json::from_value(json!({
        "metadata": {"name": name},
        "status": {"readyReplicas": ready}
    }))
    .unwrap()
}

/// Partition set reporting `ready` ready partitions.
pub fn partition_set(name: &str, partitions: i32, ready: i32) -> PartitionSet {
    serde_json::from_value(json!({
        "apiVersion": "k8s.atomix.io/v1alpha1",
        "kind": "PartitionSet",
        "metadata": {"name": name},
        "spec": {
            "partitions": partitions,
            "template": {"spec": {"size": 1, "protocol": "raft", "image": "", "config": "{}"}}
        },
        "status": {"readyPartitions": ready}
    }))
    .unwrap()
}

/// Single-node, single-partition run with a fixed test ID.
pub fn test_run(test_id: &str) -> TestRun {
    TestRun::with_id(
        test_id,
        RunParams {
            nodes: 1,
            partitions: 1,
            partition_size: 1,
            timeout: Duration::from_secs(600),
        },
    )
}

/// Test configuration document with one empty simulator config per device.
pub fn simulators_document(devices: &[&str]) -> TestConfigDocument {
    let simulators: serde_json::Map<String, Value> = devices
        .iter()
        .map(|device| (device.to_string(), json!({})))
        .collect();
    serde_json::from_value(json!({"simulators": simulators})).unwrap()
}

/// Writes a TLS certificate set into `dir`.
pub fn write_certificates(dir: &Path) {
    std::fs::write(dir.join("tls.cacrt"), "CA CERTIFICATE").unwrap();
    std::fs::write(dir.join("tls.crt"), "CERTIFICATE").unwrap();
    std::fs::write(dir.join("tls.key"), "PRIVATE KEY").unwrap();
}

/// Orchestrator settings polling at [`TEST_POLL_INTERVAL`] without a deadline.
pub fn settings(certs_dir: &Path) -> OrchestratorSettings {
    OrchestratorSettings {
        certs_dir: certs_dir.to_path_buf(),
        gate: ReadinessGate::new(TEST_POLL_INTERVAL),
        cleanup_on_setup_failure: false,
        images: Images::default(),
    }
}
