//! Resource provisioner.
//!
//! One create operation per resource kind. Every create treats an
//! "already exists" answer from the cluster as success and any other error
//! as fatal. The cluster role binding is the exception: it has a fixed,
//! cluster-wide name, so a leftover binding from an earlier run is deleted
//! and the create retried once.

use crate::cluster::{ClusterClient, ClusterError, PartitionSet};
use crate::errors::RunnerError;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Creates resources in one test namespace.
pub struct Provisioner<'a> {
    client: &'a dyn ClusterClient,
    namespace: &'a str,
}

/// Treats `AlreadyExists` as success.
fn exists_ok(result: Result<(), ClusterError>) -> Result<(), RunnerError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_already_exists() => {
            debug!(target: "test_runner.provisioner", reason = %e, "Resource already exists");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

impl<'a> Provisioner<'a> {
    pub fn new(client: &'a dyn ClusterClient, namespace: &'a str) -> Self {
        Self { client, namespace }
    }

    pub async fn create_namespace(&self, namespace: &Namespace) -> Result<(), RunnerError> {
        exists_ok(self.client.create_namespace(namespace).await)
    }

    pub async fn create_custom_resource_definition(
        &self,
        crd: &CustomResourceDefinition,
    ) -> Result<(), RunnerError> {
        exists_ok(self.client.create_custom_resource_definition(crd).await)
    }

    pub async fn create_cluster_role(&self, role: &ClusterRole) -> Result<(), RunnerError> {
        exists_ok(self.client.create_cluster_role(role).await)
    }

    /// Creates the binding, replacing a stale binding of the same name once.
    pub async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<(), RunnerError> {
        match self.client.create_cluster_role_binding(binding).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_already_exists() => {
                let name = binding.metadata.name.as_deref().unwrap_or_default();
                warn!(
                    target: "test_runner.provisioner",
                    binding = %name,
                    "Replacing stale cluster role binding"
                );
                match self.client.delete_cluster_role_binding(name).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
                self.client
                    .create_cluster_role_binding(binding)
                    .await
                    .map_err(RunnerError::from)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn create_service_account(&self, account: &ServiceAccount) -> Result<(), RunnerError> {
        exists_ok(self.client.create_service_account(self.namespace, account).await)
    }

    pub async fn create_deployment(&self, deployment: &Deployment) -> Result<(), RunnerError> {
        exists_ok(self.client.create_deployment(self.namespace, deployment).await)
    }

    pub async fn create_service(&self, service: &Service) -> Result<(), RunnerError> {
        exists_ok(self.client.create_service(self.namespace, service).await)
    }

    pub async fn create_config_map(&self, config_map: &ConfigMap) -> Result<(), RunnerError> {
        exists_ok(self.client.create_config_map(self.namespace, config_map).await)
    }

    pub async fn create_secret(&self, secret: &Secret) -> Result<(), RunnerError> {
        exists_ok(self.client.create_secret(self.namespace, secret).await)
    }

    pub async fn create_pod(&self, pod: &Pod) -> Result<(), RunnerError> {
        exists_ok(self.client.create_pod(self.namespace, pod).await)
    }

    pub async fn create_job(&self, job: &Job) -> Result<(), RunnerError> {
        exists_ok(self.client.create_job(self.namespace, job).await)
    }

    pub async fn create_partition_set(&self, set: &PartitionSet) -> Result<(), RunnerError> {
        exists_ok(self.client.create_partition_set(self.namespace, set).await)
    }
}

/// Reads every file under `dir`, recursing into subdirectories, keyed by
/// file name.
///
/// Contents are kept as raw bytes. Files are visited in lexical path order,
/// so when two files in different directories share a name the later path
/// wins.
pub fn read_certificates(dir: &Path) -> Result<BTreeMap<String, Vec<u8>>, RunnerError> {
    let io_err = |source| RunnerError::Certificates {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = BTreeMap::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| io_err(std::io::Error::from(e)))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let contents = std::fs::read(entry.path()).map_err(io_err)?;
        files.insert(entry.file_name().to_string_lossy().into_owned(), contents);
    }

    info!(
        target: "test_runner.provisioner",
        path = %dir.display(),
        files = files.len(),
        "Loaded certificates"
    );
    Ok(files)
}
