//! Atomix `PartitionSet` custom resource (`k8s.atomix.io/v1alpha1`).

use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Desired state of a set of Raft partitions managed by the Atomix controller.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "k8s.atomix.io",
    version = "v1alpha1",
    kind = "PartitionSet",
    plural = "partitionsets",
    namespaced,
    status = "PartitionSetStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct PartitionSetSpec {
    pub partitions: i32,
    pub template: PartitionTemplateSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionTemplateSpec {
    pub spec: PartitionSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionSpec {
    pub size: i32,
    pub protocol: String,
    pub image: String,
    /// Serialized protocol configuration.
    pub config: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionSetStatus {
    #[serde(default)]
    pub ready_partitions: i32,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use kube::Resource;
    use serde_json::json;

    #[test]
    fn test_partition_set_api_coordinates() {
        assert_eq!(PartitionSet::group(&()), "k8s.atomix.io");
        assert_eq!(PartitionSet::version(&()), "v1alpha1");
        assert_eq!(PartitionSet::kind(&()), "PartitionSet");
        assert_eq!(PartitionSet::plural(&()), "partitionsets");
    }

    #[test]
    fn test_status_deserializes_ready_partitions() {
        let set: PartitionSet = serde_json::from_value(json!({
            "apiVersion": "k8s.atomix.io/v1alpha1",
            "kind": "PartitionSet",
            "metadata": {"name": "raft", "namespace": "onos-test-1"},
            "spec": {
                "partitions": 3,
                "template": {"spec": {"size": 1, "protocol": "raft", "image": "raft:latest", "config": "{}"}}
            },
            "status": {"readyPartitions": 2}
        }))
        .unwrap();

        assert_eq!(set.spec.partitions, 3);
        assert_eq!(set.spec.template.spec.protocol, "raft");
        assert_eq!(set.status.unwrap().ready_partitions, 2);
    }
}
