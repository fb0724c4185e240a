//! Cluster client capability.
//!
//! The orchestrator only needs a narrow set of create/get/list/delete
//! primitives plus a pod log stream. They are expressed as the
//! [`ClusterClient`] trait so provisioning can be driven against an
//! in-memory fake in tests and against the Kubernetes API in production
//! ([`KubeClusterClient`]).

mod crd;
mod kube_client;

pub use crd::{
    PartitionSet, PartitionSetSpec, PartitionSetStatus, PartitionSpec, PartitionTemplateSpec,
};
pub use kube_client::KubeClusterClient;

use bytes::Bytes;
use futures::stream::BoxStream;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use thiserror::Error;

/// Pod log output, chunk by chunk. The stream ending is a normal stop.
pub type LogStream = BoxStream<'static, Result<Bytes, ClusterError>>;

/// Cluster client errors.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("Cluster API returned {code}: {message}")]
    Api { code: u16, message: String },

    #[error("Cluster request failed: {0}")]
    Transport(String),

    #[error("Log stream failed: {0}")]
    Stream(String),

    #[error("Failed to load cluster credentials: {0}")]
    Credentials(String),
}

impl ClusterError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::AlreadyExists { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }
}

/// Cluster operations used to provision, observe and reclaim a test
/// environment.
///
/// Namespaced operations take the namespace explicitly. Create operations
/// must report an existing object as [`ClusterError::AlreadyExists`] and
/// get/delete operations a missing one as [`ClusterError::NotFound`].
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    async fn create_namespace(&self, namespace: &Namespace) -> Result<(), ClusterError>;

    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError>;

    async fn create_custom_resource_definition(
        &self,
        crd: &CustomResourceDefinition,
    ) -> Result<(), ClusterError>;

    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<(), ClusterError>;

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<(), ClusterError>;

    async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), ClusterError>;

    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> Result<(), ClusterError>;

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), ClusterError>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ClusterError>;

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<(), ClusterError>;

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<(), ClusterError>;

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), ClusterError>;

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<(), ClusterError>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ClusterError>;

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, ClusterError>;

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<(), ClusterError>;

    async fn create_partition_set(
        &self,
        namespace: &str,
        set: &PartitionSet,
    ) -> Result<(), ClusterError>;

    async fn get_partition_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PartitionSet, ClusterError>;

    /// Follows the log of the pod's container until the container exits.
    async fn stream_logs(&self, namespace: &str, pod: &str) -> Result<LogStream, ClusterError>;
}
