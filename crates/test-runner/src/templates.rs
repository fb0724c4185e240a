//! Resource templates for every provisioning tier.
//!
//! Templates are plain Kubernetes manifests. Nothing here talks to the
//! cluster; the provisioner decides what to do with them.

use crate::cluster::{PartitionSet, PartitionSetSpec, PartitionSpec, PartitionTemplateSpec};
use crate::config::Images;
use crate::test_config::StoreDocuments;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Name shared by every Atomix controller resource, including the
/// cluster-scoped role binding.
pub const CONTROLLER_NAME: &str = "atomix-controller";

/// Atomix controller control port.
pub const CONTROLLER_PORT: u16 = 5679;

/// Atomix custom resource API group.
pub const ATOMIX_GROUP: &str = "k8s.atomix.io";

/// Name of the Raft partition set.
pub const PARTITION_SET_NAME: &str = "raft";

/// Device simulator gNMI port.
pub const SIMULATOR_PORT: u16 = 10161;

/// Name shared by the onos-config deployment, service and config map.
pub const ONOS_CONFIG_NAME: &str = "onos-config";

/// onos-config gRPC port.
pub const ONOS_CONFIG_PORT: u16 = 5150;

/// Environment variable carrying the comma-separated device IDs to the test job.
pub const TEST_DEVICES_ENV: &str = "ONOS_CONFIG_TEST_DEVICES";

/// Mount path of the TLS secret in onos-config and the test job.
pub const CERTS_MOUNT_PATH: &str = "/etc/onos-config/certs";

/// Mount path of the store documents in onos-config.
pub const CONFIGS_MOUNT_PATH: &str = "/etc/onos-config/configs";

/// Label selecting the test job's pods.
pub const TEST_LABEL: &str = "test";

/// Default Raft protocol configuration, serialized into the partition template.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct RaftProtocol {
    #[serde(skip_serializing_if = "Option::is_none")]
    election_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    heartbeat_interval: Option<String>,
}

/// Builds the manifests for one test namespace.
#[derive(Debug, Clone, Copy)]
pub struct ResourceTemplates<'a> {
    namespace: &'a str,
    images: &'a Images,
}

fn manifest<K: DeserializeOwned>(value: Value) -> Result<K, serde_json::Error> {
    serde_json::from_value(value)
}

/// Label selector matching the pods created by the test job.
pub fn test_job_selector(test_name: &str) -> String {
    format!("{}={}", TEST_LABEL, test_name)
}

impl<'a> ResourceTemplates<'a> {
    pub fn new(namespace: &'a str, images: &'a Images) -> Self {
        Self { namespace, images }
    }

    pub fn namespace_name(&self) -> &str {
        self.namespace
    }

    fn meta(&self, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.namespace.to_string()),
            ..ObjectMeta::default()
        }
    }

    pub fn namespace(&self) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(self.namespace.to_string()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        }
    }

    /// `partitionsets.k8s.atomix.io`
    pub fn partition_set_crd(&self) -> Result<CustomResourceDefinition, serde_json::Error> {
        atomix_crd("PartitionSet", "partitionsets", "partitionset")
    }

    /// `partitions.k8s.atomix.io`
    pub fn partition_crd(&self) -> Result<CustomResourceDefinition, serde_json::Error> {
        atomix_crd("Partition", "partitions", "partition")
    }

    pub fn controller_cluster_role(&self) -> Result<ClusterRole, serde_json::Error> {
        manifest(json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "ClusterRole",
            "metadata": {"name": CONTROLLER_NAME},
            "rules": [
                {
                    "apiGroups": [""],
                    "resources": ["pods", "services", "endpoints", "persistentvolumeclaims", "events", "configmaps", "secrets"],
                    "verbs": ["*"]
                },
                {"apiGroups": [""], "resources": ["namespaces"], "verbs": ["get"]},
                {
                    "apiGroups": ["apps"],
                    "resources": ["deployments", "daemonsets", "replicasets", "statefulsets"],
                    "verbs": ["*"]
                },
                {"apiGroups": ["policy"], "resources": ["poddisruptionbudgets"], "verbs": ["*"]},
                {"apiGroups": [ATOMIX_GROUP], "resources": ["*"], "verbs": ["*"]}
            ]
        }))
    }

    /// Binds the controller's cluster role to this namespace's service account.
    pub fn controller_cluster_role_binding(&self) -> Result<ClusterRoleBinding, serde_json::Error> {
        manifest(json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "ClusterRoleBinding",
            "metadata": {"name": CONTROLLER_NAME},
            "subjects": [{
                "kind": "ServiceAccount",
                "name": CONTROLLER_NAME,
                "namespace": self.namespace
            }],
            "roleRef": {
                "apiGroup": "rbac.authorization.k8s.io",
                "kind": "ClusterRole",
                "name": CONTROLLER_NAME
            }
        }))
    }

    pub fn controller_service_account(&self) -> ServiceAccount {
        ServiceAccount {
            metadata: self.meta(CONTROLLER_NAME),
            ..ServiceAccount::default()
        }
    }

    pub fn controller_deployment(&self) -> Result<Deployment, serde_json::Error> {
        let field = |path: &str| json!({"fieldRef": {"fieldPath": path}});
        manifest(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": CONTROLLER_NAME, "namespace": self.namespace},
            "spec": {
                "replicas": 1,
                "selector": {"matchLabels": {"name": CONTROLLER_NAME}},
                "template": {
                    "metadata": {"labels": {"name": CONTROLLER_NAME}},
                    "spec": {
                        "serviceAccountName": CONTROLLER_NAME,
                        "containers": [{
                            "name": CONTROLLER_NAME,
                            "image": self.images.controller,
                            "imagePullPolicy": "IfNotPresent",
                            "command": ["atomix-controller"],
                            "env": [
                                {"name": "CONTROLLER_NAME", "value": CONTROLLER_NAME},
                                {"name": "CONTROLLER_NAMESPACE", "valueFrom": field("metadata.namespace")},
                                {"name": "POD_NAME", "valueFrom": field("metadata.name")},
                                {"name": "POD_NAMESPACE", "valueFrom": field("metadata.namespace")}
                            ],
                            "ports": [{"name": "control", "containerPort": CONTROLLER_PORT}],
                            "readinessProbe": {
                                "exec": {"command": ["stat", "/tmp/atomix-controller-ready"]},
                                "initialDelaySeconds": 4,
                                "periodSeconds": 10,
                                "failureThreshold": 1
                            }
                        }]
                    }
                }
            }
        }))
    }

    pub fn controller_service(&self) -> Result<Service, serde_json::Error> {
        service(self.namespace, CONTROLLER_NAME, ("name", CONTROLLER_NAME), "control", CONTROLLER_PORT)
    }

    /// Raft partition set with `partitions` partitions of `size` members.
    pub fn partition_set(&self, partitions: u32, size: u32) -> Result<PartitionSet, serde_json::Error> {
        let config = serde_json::to_string(&RaftProtocol::default())?;
        let mut set = PartitionSet::new(
            PARTITION_SET_NAME,
            PartitionSetSpec {
                partitions: clamp_i32(partitions),
                template: PartitionTemplateSpec {
                    spec: PartitionSpec {
                        size: clamp_i32(size),
                        protocol: "raft".to_string(),
                        image: self.images.raft.clone(),
                        config,
                    },
                },
            },
        );
        set.metadata.namespace = Some(self.namespace.to_string());
        Ok(set)
    }

    pub fn simulator_config_map(&self, name: &str, config: &str) -> ConfigMap {
        ConfigMap {
            metadata: self.meta(name),
            data: Some(BTreeMap::from([(
                "config.json".to_string(),
                config.to_string(),
            )])),
            ..ConfigMap::default()
        }
    }

    pub fn simulator_pod(&self, name: &str) -> Result<Pod, serde_json::Error> {
        manifest(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": name,
                "namespace": self.namespace,
                "labels": {"simulator": name}
            },
            "spec": {
                "containers": [{
                    "name": "device-simulator",
                    "image": self.images.simulator,
                    "imagePullPolicy": "IfNotPresent",
                    "ports": [{"name": "gnmi", "containerPort": SIMULATOR_PORT}],
                    "readinessProbe": tcp_probe(SIMULATOR_PORT, 5, 10),
                    "livenessProbe": tcp_probe(SIMULATOR_PORT, 15, 20),
                    "volumeMounts": [{
                        "name": "config",
                        "mountPath": "/etc/simulator/configs",
                        "readOnly": true
                    }]
                }],
                "volumes": [{"name": "config", "configMap": {"name": name}}]
            }
        }))
    }

    pub fn simulator_service(&self, name: &str) -> Result<Service, serde_json::Error> {
        service(self.namespace, name, ("simulator", name), "gnmi", SIMULATOR_PORT)
    }

    /// TLS secret named after the test, one key per certificate file.
    pub fn tls_secret(&self, files: BTreeMap<String, Vec<u8>>) -> Secret {
        let data = files
            .into_iter()
            .map(|(name, contents)| (name, ByteString(contents)))
            .collect();
        Secret {
            metadata: self.meta(self.namespace),
            data: Some(data),
            ..Secret::default()
        }
    }

    pub fn onos_config_config_map(&self, stores: &StoreDocuments) -> ConfigMap {
        let data = BTreeMap::from([
            ("changeStore.json".to_string(), stores.change_store.clone()),
            ("configStore.json".to_string(), stores.config_store.clone()),
            ("deviceStore.json".to_string(), stores.device_store.clone()),
            ("networkStore.json".to_string(), stores.network_store.clone()),
        ]);
        ConfigMap {
            metadata: self.meta(ONOS_CONFIG_NAME),
            data: Some(data),
            ..ConfigMap::default()
        }
    }

    /// In-cluster address of the Atomix controller for this namespace.
    pub fn controller_address(&self) -> String {
        format!(
            "{}.{}.svc.cluster.local:{}",
            CONTROLLER_NAME, self.namespace, CONTROLLER_PORT
        )
    }

    pub fn onos_config_deployment(&self, nodes: u32) -> Result<Deployment, serde_json::Error> {
        let arg = |flag: &str, dir: &str, file: &str| format!("-{}={}/{}", flag, dir, file);
        manifest(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": ONOS_CONFIG_NAME, "namespace": self.namespace},
            "spec": {
                "replicas": nodes,
                "selector": {"matchLabels": {"app": ONOS_CONFIG_NAME}},
                "template": {
                    "metadata": {"labels": {"app": ONOS_CONFIG_NAME}},
                    "spec": {
                        "containers": [{
                            "name": ONOS_CONFIG_NAME,
                            "image": self.images.onos_config,
                            "imagePullPolicy": "IfNotPresent",
                            "env": [
                                {"name": "ATOMIX_CONTROLLER", "value": self.controller_address()},
                                {"name": "ATOMIX_APP", "value": "test"},
                                {"name": "ATOMIX_NAMESPACE", "value": self.namespace}
                            ],
                            "args": [
                                arg("caPath", CERTS_MOUNT_PATH, "tls.cacrt"),
                                arg("keyPath", CERTS_MOUNT_PATH, "tls.key"),
                                arg("certPath", CERTS_MOUNT_PATH, "tls.crt"),
                                arg("configStore", CONFIGS_MOUNT_PATH, "configStore.json"),
                                arg("changeStore", CONFIGS_MOUNT_PATH, "changeStore.json"),
                                arg("deviceStore", CONFIGS_MOUNT_PATH, "deviceStore.json"),
                                arg("networkStore", CONFIGS_MOUNT_PATH, "networkStore.json")
                            ],
                            "ports": [{"name": "grpc", "containerPort": ONOS_CONFIG_PORT}],
                            "readinessProbe": tcp_probe(ONOS_CONFIG_PORT, 5, 10),
                            "livenessProbe": tcp_probe(ONOS_CONFIG_PORT, 15, 20),
                            "volumeMounts": [
                                {"name": "config", "mountPath": CONFIGS_MOUNT_PATH, "readOnly": true},
                                {"name": "secret", "mountPath": CERTS_MOUNT_PATH, "readOnly": true}
                            ]
                        }],
                        "volumes": [
                            {"name": "config", "configMap": {"name": ONOS_CONFIG_NAME}},
                            {"name": "secret", "secret": {"secretName": self.namespace}}
                        ]
                    }
                }
            }
        }))
    }

    pub fn onos_config_service(&self) -> Result<Service, serde_json::Error> {
        service(self.namespace, ONOS_CONFIG_NAME, ("app", ONOS_CONFIG_NAME), "grpc", ONOS_CONFIG_PORT)
    }

    /// Single-completion test job running `args` with the device IDs in
    /// [`TEST_DEVICES_ENV`].
    pub fn test_job(
        &self,
        args: &[String],
        device_ids: &[String],
        timeout: Duration,
    ) -> Result<Job, serde_json::Error> {
        manifest(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {"name": self.namespace, "namespace": self.namespace},
            "spec": {
                "parallelism": 1,
                "completions": 1,
                "backoffLimit": 1,
                "activeDeadlineSeconds": timeout.as_secs(),
                "template": {
                    "metadata": {"labels": {TEST_LABEL: self.namespace}},
                    "spec": {
                        "restartPolicy": "Never",
                        "containers": [{
                            "name": "test",
                            "image": self.images.tests,
                            "imagePullPolicy": "IfNotPresent",
                            "args": args,
                            "env": [{"name": TEST_DEVICES_ENV, "value": device_ids.join(",")}],
                            "volumeMounts": [{
                                "name": "secret",
                                "mountPath": CERTS_MOUNT_PATH,
                                "readOnly": true
                            }]
                        }],
                        "volumes": [{"name": "secret", "secret": {"secretName": self.namespace}}]
                    }
                }
            }
        }))
    }
}

fn atomix_crd(
    kind: &str,
    plural: &str,
    singular: &str,
) -> Result<CustomResourceDefinition, serde_json::Error> {
    manifest(json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "CustomResourceDefinition",
        "metadata": {"name": format!("{}.{}", plural, ATOMIX_GROUP)},
        "spec": {
            "group": ATOMIX_GROUP,
            "names": {
                "kind": kind,
                "listKind": format!("{}List", kind),
                "plural": plural,
                "singular": singular
            },
            "scope": "Namespaced",
            "versions": [{
                "name": "v1alpha1",
                "served": true,
                "storage": true,
                "schema": {
                    "openAPIV3Schema": {
                        "type": "object",
                        "x-kubernetes-preserve-unknown-fields": true
                    }
                },
                "subresources": {"status": {}}
            }]
        }
    }))
}

fn service(
    namespace: &str,
    name: &str,
    selector: (&str, &str),
    port_name: &str,
    port: u16,
) -> Result<Service, serde_json::Error> {
    let (label, value) = selector;
    manifest(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {"name": name, "namespace": namespace},
        "spec": {
            "selector": {label: value},
            "ports": [{"name": port_name, "port": port}]
        }
    }))
}

fn tcp_probe(port: u16, initial_delay_seconds: u32, period_seconds: u32) -> Value {
    json!({
        "tcpSocket": {"port": port},
        "initialDelaySeconds": initial_delay_seconds,
        "periodSeconds": period_seconds
    })
}

fn clamp_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}
