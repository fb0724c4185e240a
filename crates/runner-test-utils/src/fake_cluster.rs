//! In-memory cluster for orchestrator tests.
//!
//! `FakeCluster` implements [`ClusterClient`] over a map of created objects:
//! - every call is recorded in a call log
//! - creating an existing object reports `AlreadyExists`, get/delete of a
//!   missing one reports `NotFound`
//! - deployments, partition sets and simulator pods report not-ready for a
//!   configurable number of polls, then ready
//! - creating a job spawns one scripted pod that runs for a configurable
//!   number of polls and then terminates with a scripted exit code
//! - any operation can be made to fail for a given object name
//!
//! # Example
//!
//! ```rust,ignore
//! use runner_test_utils::FakeCluster;
//!
//! let cluster = FakeCluster::new()
//!     .with_not_ready("Deployment", "onos-config", 3)
//!     .with_job_result(1, "2 tests failed")
//!     .fail_on("create_partition_set", "raft");
//! ```

use crate::fixtures;
use bytes::Bytes;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::ResourceExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use test_runner::cluster::{ClusterClient, ClusterError, LogStream, PartitionSet};

/// Suffix appended to a job's name to form its pod name.
pub const JOB_POD_SUFFIX: &str = "x7k2p";

/// Returns the name of the pod the fake creates for `job`.
pub fn job_pod_name(job: &str) -> String {
    format!("{}-{}", job, JOB_POD_SUFFIX)
}

/// One recorded cluster call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// `ClusterClient` method name, e.g. `create_pod`.
    pub op: &'static str,
    /// Object name, or the label selector for `list_pods`.
    pub name: String,
}

#[derive(Debug, Clone)]
struct JobScript {
    running_polls: usize,
    exit_code: i32,
    message: String,
    /// List the job's pod without a name.
    unnamed: bool,
}

impl Default for JobScript {
    fn default() -> Self {
        Self {
            running_polls: 0,
            exit_code: 0,
            message: "PASS".to_string(),
            unnamed: false,
        }
    }
}

#[derive(Debug, Default)]
struct FakeClusterInner {
    calls: Vec<Call>,
    /// Created objects by (kind, name), serialized.
    objects: BTreeMap<(String, String), Value>,
    /// Creation order of (kind, name).
    created: Vec<(String, String)>,
    /// Injected failures by (op, name).
    failures: HashMap<(String, String), u16>,
    /// Remaining not-ready observations by (kind, name).
    not_ready: HashMap<(String, String), usize>,
    job: JobScript,
    log_chunks: Vec<Bytes>,
    log_error: Option<String>,
}

impl FakeClusterInner {
    fn record(&mut self, op: &'static str, name: &str) -> Result<(), ClusterError> {
        self.calls.push(Call {
            op,
            name: name.to_string(),
        });
        match self.failures.get(&(op.to_string(), name.to_string())) {
            Some(code) => Err(ClusterError::Api {
                code: *code,
                message: format!("injected failure: {} {}", op, name),
            }),
            None => Ok(()),
        }
    }

    fn insert(&mut self, kind: &'static str, name: String, object: Value) -> Result<(), ClusterError> {
        let key = (kind.to_string(), name);
        if self.objects.contains_key(&key) {
            return Err(ClusterError::AlreadyExists { kind, name: key.1 });
        }
        self.created.push(key.clone());
        self.objects.insert(key, object);
        Ok(())
    }

    fn lookup(&self, kind: &'static str, name: &str) -> Result<&Value, ClusterError> {
        self.objects
            .get(&(kind.to_string(), name.to_string()))
            .ok_or_else(|| ClusterError::NotFound {
                kind,
                name: name.to_string(),
            })
    }

    fn remove(&mut self, kind: &'static str, name: &str) -> Result<(), ClusterError> {
        self.objects
            .remove(&(kind.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| ClusterError::NotFound {
                kind,
                name: name.to_string(),
            })
    }

    /// Consumes one not-ready observation; returns true while any remain.
    fn still_not_ready(&mut self, kind: &str, name: &str) -> bool {
        match self.not_ready.get_mut(&(kind.to_string(), name.to_string())) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn job_names(&self) -> Vec<String> {
        self.objects
            .keys()
            .filter(|(kind, _)| kind == "Job")
            .map(|(_, name)| name.clone())
            .collect()
    }

    fn job_labels(job: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("test".to_string(), job.to_string()),
            ("job-name".to_string(), job.to_string()),
        ])
    }

    /// Current state of the job pod; `advance` consumes one running poll.
    fn job_pod(&mut self, job: &str, advance: bool) -> Pod {
        let name = job_pod_name(job);
        let labels = Self::job_labels(job);
        if self.job.running_polls > 0 {
            if advance {
                self.job.running_polls -= 1;
            }
            return fixtures::running_pod(&name, labels, true);
        }
        fixtures::terminated_pod(&name, labels, self.job.exit_code, &self.job.message)
    }
}

fn serialize<K: Serialize>(object: &K) -> Value {
    serde_json::to_value(object).unwrap()
}

fn labels_match(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector.split(',').filter(|s| !s.is_empty()).all(|term| {
        match term.split_once('=') {
            Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
            None => labels.contains_key(term),
        }
    })
}

/// In-memory [`ClusterClient`].
#[derive(Debug, Clone, Default)]
pub struct FakeCluster {
    inner: Arc<Mutex<FakeClusterInner>>,
}

impl FakeCluster {
    /// Create an empty cluster where everything becomes ready on first poll
    /// and the test job passes immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `op` fail with HTTP 500 for the object `name`.
    #[must_use]
    pub fn fail_on(self, op: &str, name: &str) -> Self {
        self.fail_with(op, name, 500)
    }

    /// Make `op` fail with the given HTTP status for the object `name`.
    #[must_use]
    pub fn fail_with(self, op: &str, name: &str, code: u16) -> Self {
        self.inner
            .lock()
            .unwrap()
            .failures
            .insert((op.to_string(), name.to_string()), code);
        self
    }

    /// Report the object as not ready for the next `polls` observations.
    ///
    /// For `Job`, the job's pod is listed as pending that many times.
    #[must_use]
    pub fn with_not_ready(self, kind: &str, name: &str, polls: usize) -> Self {
        self.inner
            .lock()
            .unwrap()
            .not_ready
            .insert((kind.to_string(), name.to_string()), polls);
        self
    }

    /// Pre-create an object, e.g. a stale cluster role binding.
    #[must_use]
    pub fn with_existing(self, kind: &'static str, name: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .objects
            .insert((kind.to_string(), name.to_string()), serde_json::json!({}));
        self
    }

    /// Terminal exit code and message of the job's container.
    #[must_use]
    pub fn with_job_result(self, exit_code: i32, message: &str) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.job.exit_code = exit_code;
            inner.job.message = message.to_string();
        }
        self
    }

    /// Keep the job's pod running for `polls` status polls before it
    /// terminates.
    #[must_use]
    pub fn with_job_running_polls(self, polls: usize) -> Self {
        self.inner.lock().unwrap().job.running_polls = polls;
        self
    }

    /// Log output of the job's pod.
    #[must_use]
    pub fn with_logs<C: AsRef<[u8]>>(self, chunks: &[C]) -> Self {
        self.inner.lock().unwrap().log_chunks = chunks
            .iter()
            .map(|chunk| Bytes::copy_from_slice(chunk.as_ref()))
            .collect();
        self
    }

    /// List the job's pod with no `metadata.name`.
    #[must_use]
    pub fn with_unnamed_job_pod(self) -> Self {
        self.inner.lock().unwrap().job.unnamed = true;
        self
    }

    /// End the log stream with an error after the scripted chunks.
    #[must_use]
    pub fn with_log_error(self, message: &str) -> Self {
        self.inner.lock().unwrap().log_error = Some(message.to_string());
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Number of calls to `op`.
    pub fn call_count(&self, op: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| call.op == op)
            .count()
    }

    /// Names of the `kind` objects created through the client, in order.
    pub fn created(&self, kind: &str) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .created
            .iter()
            .filter(|(k, _)| k == kind)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Kinds created through the client, in order.
    pub fn created_kinds(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .created
            .iter()
            .map(|(kind, _)| kind.clone())
            .collect()
    }

    /// The stored object, serialized.
    pub fn object(&self, kind: &str, name: &str) -> Option<Value> {
        self.inner
            .lock()
            .unwrap()
            .objects
            .get(&(kind.to_string(), name.to_string()))
            .cloned()
    }

    /// Returns true if the object currently exists.
    pub fn contains(&self, kind: &str, name: &str) -> bool {
        self.object(kind, name).is_some()
    }

    fn create<K: Serialize + ResourceExt>(
        &self,
        op: &'static str,
        kind: &'static str,
        object: &K,
    ) -> Result<(), ClusterError> {
        let name = object.name_any();
        let mut inner = self.inner.lock().unwrap();
        inner.record(op, &name)?;
        inner.insert(kind, name, serialize(object))
    }
}

#[async_trait::async_trait]
impl ClusterClient for FakeCluster {
    async fn create_namespace(&self, namespace: &Namespace) -> Result<(), ClusterError> {
        self.create("create_namespace", "Namespace", namespace)
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record("delete_namespace", name)?;
        inner.remove("Namespace", name)
    }

    async fn create_custom_resource_definition(
        &self,
        crd: &CustomResourceDefinition,
    ) -> Result<(), ClusterError> {
        self.create(
            "create_custom_resource_definition",
            "CustomResourceDefinition",
            crd,
        )
    }

    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<(), ClusterError> {
        self.create("create_cluster_role", "ClusterRole", role)
    }

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<(), ClusterError> {
        self.create("create_cluster_role_binding", "ClusterRoleBinding", binding)
    }

    async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), ClusterError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record("delete_cluster_role_binding", name)?;
        inner.remove("ClusterRoleBinding", name)
    }

    async fn create_service_account(
        &self,
        _namespace: &str,
        account: &ServiceAccount,
    ) -> Result<(), ClusterError> {
        self.create("create_service_account", "ServiceAccount", account)
    }

    async fn create_deployment(
        &self,
        _namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), ClusterError> {
        self.create("create_deployment", "Deployment", deployment)
    }

    async fn get_deployment(&self, _namespace: &str, name: &str) -> Result<Deployment, ClusterError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record("get_deployment", name)?;
        let replicas = inner
            .lookup("Deployment", name)?
            .pointer("/spec/replicas")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        let ready = if inner.still_not_ready("Deployment", name) {
            0
        } else {
            replicas as i32
        };
        Ok(fixtures::deployment(name, ready))
    }

    async fn create_service(&self, _namespace: &str, service: &Service) -> Result<(), ClusterError> {
        self.create("create_service", "Service", service)
    }

    async fn create_config_map(
        &self,
        _namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<(), ClusterError> {
        self.create("create_config_map", "ConfigMap", config_map)
    }

    async fn create_secret(&self, _namespace: &str, secret: &Secret) -> Result<(), ClusterError> {
        self.create("create_secret", "Secret", secret)
    }

    async fn create_pod(&self, _namespace: &str, pod: &Pod) -> Result<(), ClusterError> {
        self.create("create_pod", "Pod", pod)
    }

    async fn get_pod(&self, _namespace: &str, name: &str) -> Result<Pod, ClusterError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record("get_pod", name)?;

        if let Some(job) = inner
            .job_names()
            .into_iter()
            .find(|job| job_pod_name(job) == name)
        {
            return Ok(inner.job_pod(&job, true));
        }

        let stored: Pod = serde_json::from_value(inner.lookup("Pod", name)?.clone()).unwrap();
        let labels = stored.labels().clone();
        let ready = !inner.still_not_ready("Pod", name);
        Ok(fixtures::running_pod(name, labels, ready))
    }

    async fn list_pods(
        &self,
        _namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, ClusterError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record("list_pods", label_selector)?;

        let mut pods = Vec::new();
        for ((kind, name), object) in &inner.objects {
            if kind != "Pod" {
                continue;
            }
            let pod: Pod = serde_json::from_value(object.clone()).unwrap();
            if labels_match(pod.labels(), label_selector) {
                pods.push(fixtures::running_pod(name, pod.labels().clone(), true));
            }
        }

        for job in inner.job_names() {
            let labels = FakeClusterInner::job_labels(&job);
            if !labels_match(&labels, label_selector) {
                continue;
            }
            if inner.still_not_ready("Job", &job) {
                pods.push(fixtures::pending_pod(&job_pod_name(&job), labels));
            } else {
                let mut pod = inner.job_pod(&job, false);
                if inner.job.unnamed {
                    pod.metadata.name = None;
                }
                pods.push(pod);
            }
        }

        Ok(pods)
    }

    async fn create_job(&self, _namespace: &str, job: &Job) -> Result<(), ClusterError> {
        self.create("create_job", "Job", job)
    }

    async fn create_partition_set(
        &self,
        _namespace: &str,
        set: &PartitionSet,
    ) -> Result<(), ClusterError> {
        self.create("create_partition_set", "PartitionSet", set)
    }

    async fn get_partition_set(
        &self,
        _namespace: &str,
        name: &str,
    ) -> Result<PartitionSet, ClusterError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record("get_partition_set", name)?;
        let partitions = inner
            .lookup("PartitionSet", name)?
            .pointer("/spec/partitions")
            .and_then(Value::as_i64)
            .unwrap_or(0) as i32;
        let ready = if inner.still_not_ready("PartitionSet", name) {
            0
        } else {
            partitions
        };
        Ok(fixtures::partition_set(name, partitions, ready))
    }

    async fn stream_logs(&self, _namespace: &str, pod: &str) -> Result<LogStream, ClusterError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record("stream_logs", pod)?;

        let mut items: Vec<Result<Bytes, ClusterError>> =
            inner.log_chunks.iter().cloned().map(Ok).collect();
        if let Some(message) = &inner.log_error {
            items.push(Err(ClusterError::Stream(message.clone())));
        }
        Ok(futures::stream::iter(items).boxed())
    }
}
