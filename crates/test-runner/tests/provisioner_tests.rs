//! Integration tests for the resource provisioner.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use runner_test_utils::*;
use test_runner::cluster::ClusterError;
use test_runner::config::Images;
use test_runner::errors::RunnerError;
use test_runner::provisioner::Provisioner;
use test_runner::templates::{ResourceTemplates, CONTROLLER_NAME};

const NAMESPACE: &str = "onos-test-1";

#[tokio::test]
async fn test_existing_resources_are_accepted() {
    let cluster = FakeCluster::new()
        .with_existing("CustomResourceDefinition", "partitionsets.k8s.atomix.io")
        .with_existing("Service", "dev1");
    let images = Images::default();
    let templates = ResourceTemplates::new(NAMESPACE, &images);
    let provisioner = Provisioner::new(&cluster, NAMESPACE);

    provisioner
        .create_custom_resource_definition(&templates.partition_set_crd().unwrap())
        .await
        .unwrap();
    provisioner
        .create_service(&templates.simulator_service("dev1").unwrap())
        .await
        .unwrap();

    assert_eq!(cluster.call_count("create_custom_resource_definition"), 1);
    assert_eq!(cluster.call_count("create_service"), 1);
}

#[tokio::test]
async fn test_stale_role_binding_is_replaced_once() {
    let cluster = FakeCluster::new().with_existing("ClusterRoleBinding", CONTROLLER_NAME);
    let images = Images::default();
    let templates = ResourceTemplates::new(NAMESPACE, &images);
    let provisioner = Provisioner::new(&cluster, NAMESPACE);

    provisioner
        .create_cluster_role_binding(&templates.controller_cluster_role_binding().unwrap())
        .await
        .unwrap();

    let ops: Vec<&str> = cluster.calls().iter().map(|call| call.op).collect();
    assert_eq!(
        ops,
        vec![
            "create_cluster_role_binding",
            "delete_cluster_role_binding",
            "create_cluster_role_binding",
        ]
    );

    // The replacement is the binding for this namespace
    let binding = cluster
        .object("ClusterRoleBinding", CONTROLLER_NAME)
        .unwrap();
    assert_eq!(binding["subjects"][0]["namespace"], NAMESPACE);
}

#[tokio::test]
async fn test_stale_role_binding_delete_failure_is_fatal() {
    // Deleting the stale binding is forbidden
    let cluster = FakeCluster::new()
        .with_existing("ClusterRoleBinding", CONTROLLER_NAME)
        .fail_with("delete_cluster_role_binding", CONTROLLER_NAME, 403);
    let images = Images::default();
    let templates = ResourceTemplates::new(NAMESPACE, &images);
    let provisioner = Provisioner::new(&cluster, NAMESPACE);

    let err = provisioner
        .create_cluster_role_binding(&templates.controller_cluster_role_binding().unwrap())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RunnerError::Cluster(ClusterError::Api { code: 403, .. })
    ));
    assert_eq!(cluster.call_count("create_cluster_role_binding"), 1);
}

#[tokio::test]
async fn test_other_create_errors_are_fatal() {
    let cluster = FakeCluster::new().fail_on("create_pod", "dev1");
    let images = Images::default();
    let templates = ResourceTemplates::new(NAMESPACE, &images);
    let provisioner = Provisioner::new(&cluster, NAMESPACE);

    let err = provisioner
        .create_pod(&templates.simulator_pod("dev1").unwrap())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RunnerError::Cluster(ClusterError::Api { code: 500, .. })
    ));
    assert!(!cluster.contains("Pod", "dev1"));
}
