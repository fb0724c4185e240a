//! [`ClusterClient`] backed by the Kubernetes API via kube-rs.

use super::{ClusterClient, ClusterError, LogStream, PartitionSet};
use bytes::Bytes;
use futures::{AsyncBufRead, AsyncBufReadExt, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::NamespaceResourceScope;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::path::Path;
use tracing::debug;

/// Kubernetes API client.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connects using the current context of the kubeconfig at `path`.
    pub async fn from_kubeconfig(path: &Path) -> Result<Self, ClusterError> {
        let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
            ClusterError::Credentials(format!("{}: {}", path.display(), e))
        })?;

        let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ClusterError::Credentials(e.to_string()))?;

        let client =
            Client::try_from(config).map_err(|e| ClusterError::Credentials(e.to_string()))?;

        debug!(
            target: "test_runner.cluster",
            kubeconfig = %path.display(),
            "Kubernetes client created"
        );

        Ok(Self::new(client))
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn cluster<K>(&self) -> Api<K>
    where
        K: Resource,
        <K as Resource>::DynamicType: Default,
    {
        Api::all(self.client.clone())
    }
}

/// Maps a kube error for the named object onto [`ClusterError`].
fn classify(kind: &'static str, name: &str, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(response) if response.code == 409 => ClusterError::AlreadyExists {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(response) if response.code == 404 => ClusterError::NotFound {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(response) => ClusterError::Api {
            code: response.code,
            message: response.message,
        },
        other => ClusterError::Transport(other.to_string()),
    }
}

/// Forwards whatever the reader has buffered, undecoded and unframed.
fn byte_chunks<R>(reader: R) -> LogStream
where
    R: AsyncBufRead + Send + 'static,
{
    futures::stream::try_unfold(Box::pin(reader), |mut reader| async move {
        let chunk = match reader.fill_buf().await {
            Ok(buf) if buf.is_empty() => return Ok(None),
            Ok(buf) => Bytes::copy_from_slice(buf),
            Err(e) => return Err(ClusterError::Stream(e.to_string())),
        };
        reader.consume_unpin(chunk.len());
        Ok(Some((chunk, reader)))
    })
    .boxed()
}

async fn create<K>(api: &Api<K>, kind: &'static str, object: &K) -> Result<(), ClusterError>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let name = object.name_any();
    api.create(&PostParams::default(), object)
        .await
        .map(|_| ())
        .map_err(|e| classify(kind, &name, e))
}

async fn get<K>(api: &Api<K>, kind: &'static str, name: &str) -> Result<K, ClusterError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    api.get(name).await.map_err(|e| classify(kind, name, e))
}

async fn delete<K>(api: &Api<K>, kind: &'static str, name: &str) -> Result<(), ClusterError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    api.delete(name, &DeleteParams::default())
        .await
        .map(|_| ())
        .map_err(|e| classify(kind, name, e))
}

#[async_trait::async_trait]
impl ClusterClient for KubeClusterClient {
    async fn create_namespace(&self, namespace: &Namespace) -> Result<(), ClusterError> {
        create(&self.cluster::<Namespace>(), "Namespace", namespace).await
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError> {
        delete(&self.cluster::<Namespace>(), "Namespace", name).await
    }

    async fn create_custom_resource_definition(
        &self,
        crd: &CustomResourceDefinition,
    ) -> Result<(), ClusterError> {
        create(
            &self.cluster::<CustomResourceDefinition>(),
            "CustomResourceDefinition",
            crd,
        )
        .await
    }

    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<(), ClusterError> {
        create(&self.cluster::<ClusterRole>(), "ClusterRole", role).await
    }

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<(), ClusterError> {
        create(
            &self.cluster::<ClusterRoleBinding>(),
            "ClusterRoleBinding",
            binding,
        )
        .await
    }

    async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), ClusterError> {
        delete(
            &self.cluster::<ClusterRoleBinding>(),
            "ClusterRoleBinding",
            name,
        )
        .await
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> Result<(), ClusterError> {
        create(
            &self.namespaced::<ServiceAccount>(namespace),
            "ServiceAccount",
            account,
        )
        .await
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), ClusterError> {
        create(
            &self.namespaced::<Deployment>(namespace),
            "Deployment",
            deployment,
        )
        .await
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ClusterError> {
        get(&self.namespaced::<Deployment>(namespace), "Deployment", name).await
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<(), ClusterError> {
        create(&self.namespaced::<Service>(namespace), "Service", service).await
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<(), ClusterError> {
        create(
            &self.namespaced::<ConfigMap>(namespace),
            "ConfigMap",
            config_map,
        )
        .await
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), ClusterError> {
        create(&self.namespaced::<Secret>(namespace), "Secret", secret).await
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<(), ClusterError> {
        create(&self.namespaced::<Pod>(namespace), "Pod", pod).await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ClusterError> {
        get(&self.namespaced::<Pod>(namespace), "Pod", name).await
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, ClusterError> {
        self.namespaced::<Pod>(namespace)
            .list(&ListParams::default().labels(label_selector))
            .await
            .map(|list| list.items)
            .map_err(|e| classify("Pod", label_selector, e))
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<(), ClusterError> {
        create(&self.namespaced::<Job>(namespace), "Job", job).await
    }

    async fn create_partition_set(
        &self,
        namespace: &str,
        set: &PartitionSet,
    ) -> Result<(), ClusterError> {
        create(
            &self.namespaced::<PartitionSet>(namespace),
            "PartitionSet",
            set,
        )
        .await
    }

    async fn get_partition_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PartitionSet, ClusterError> {
        get(
            &self.namespaced::<PartitionSet>(namespace),
            "PartitionSet",
            name,
        )
        .await
    }

    async fn stream_logs(&self, namespace: &str, pod: &str) -> Result<LogStream, ClusterError> {
        let params = LogParams {
            follow: true,
            ..LogParams::default()
        };

        let reader = self
            .namespaced::<Pod>(namespace)
            .log_stream(pod, &params)
            .await
            .map_err(|e| classify("Pod", pod, e))?;

        Ok(byte_chunks(reader))
    }
}
