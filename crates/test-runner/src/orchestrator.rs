//! Stage orchestrator.
//!
//! Provisions the test environment tier by tier. Every tier creates its
//! resources through the [`Provisioner`] and then blocks on its readiness
//! predicate through the [`ReadinessGate`]; the next tier never starts
//! before that predicate holds. The first failure aborts the run.
//!
//! Once the test job's pod is observed, the [`JobRunner`] streams its output
//! and the [`Teardown`] manager always runs afterwards. A provisioning
//! failure skips teardown unless cleanup on setup failure is enabled and the
//! namespace was already created.

use crate::cluster::{ClusterClient, PartitionSet};
use crate::config::{Config, Images};
use crate::errors::RunnerError;
use crate::gate::ReadinessGate;
use crate::job_runner::{first_container_ready, JobRunner};
use crate::provisioner::{read_certificates, Provisioner};
use crate::run::{JobOutcome, TestRun};
use crate::teardown::{Teardown, TeardownReport};
use crate::templates::{
    test_job_selector, ResourceTemplates, CONTROLLER_NAME, ONOS_CONFIG_NAME, PARTITION_SET_NAME,
};
use crate::test_config::TestConfigDocument;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tracing::{info, instrument, warn};

/// One ordered stage of the provisioning sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Namespace,
    Controller,
    Partitions,
    Simulators,
    SystemUnderTest,
    TestJob,
}

impl Tier {
    /// All tiers, in provisioning order.
    pub const ALL: [Tier; 6] = [
        Tier::Namespace,
        Tier::Controller,
        Tier::Partitions,
        Tier::Simulators,
        Tier::SystemUnderTest,
        Tier::TestJob,
    ];

    /// 1-based position in the provisioning sequence.
    pub fn position(self) -> usize {
        match self {
            Tier::Namespace => 1,
            Tier::Controller => 2,
            Tier::Partitions => 3,
            Tier::Simulators => 4,
            Tier::SystemUnderTest => 5,
            Tier::TestJob => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Tier::Namespace => "namespace",
            Tier::Controller => "atomix-controller",
            Tier::Partitions => "partitions",
            Tier::Simulators => "simulators",
            Tier::SystemUnderTest => "onos-config",
            Tier::TestJob => "test job",
        }
    }

    /// Resource kinds created by this tier.
    pub fn resource_kinds(self) -> &'static [&'static str] {
        match self {
            Tier::Namespace => &["Namespace"],
            Tier::Controller => &[
                "CustomResourceDefinition",
                "ClusterRole",
                "ClusterRoleBinding",
                "ServiceAccount",
                "Deployment",
                "Service",
            ],
            Tier::Partitions => &["PartitionSet"],
            Tier::Simulators => &["ConfigMap", "Pod", "Service"],
            Tier::SystemUnderTest => &["Secret", "ConfigMap", "Deployment", "Service"],
            Tier::TestJob => &["Job"],
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Inputs the orchestrator takes from process configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub certs_dir: PathBuf,
    pub gate: ReadinessGate,
    pub cleanup_on_setup_failure: bool,
    pub images: Images,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            certs_dir: config.certs_dir.clone(),
            gate: ReadinessGate::new(config.poll_interval).with_deadline(config.ready_timeout),
            cleanup_on_setup_failure: config.cleanup_on_setup_failure,
            images: config.images.clone(),
        }
    }
}

fn ready_replicas(deployment: &Deployment) -> i64 {
    deployment
        .status
        .as_ref()
        .and_then(|status| status.ready_replicas)
        .map(i64::from)
        .unwrap_or(0)
}

fn ready_partitions(set: &PartitionSet) -> i64 {
    set.status
        .as_ref()
        .map(|status| i64::from(status.ready_partitions))
        .unwrap_or(0)
}

/// Drives one test run from namespace creation to teardown.
pub struct Orchestrator {
    client: Arc<dyn ClusterClient>,
    run: TestRun,
    document: TestConfigDocument,
    settings: OrchestratorSettings,
    namespace_created: bool,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        run: TestRun,
        document: TestConfigDocument,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            client,
            run,
            document,
            settings,
            namespace_created: false,
        }
    }

    pub fn test_run(&self) -> &TestRun {
        &self.run
    }

    /// Returns true once the namespace tier succeeded.
    pub fn namespace_created(&self) -> bool {
        self.namespace_created
    }

    fn templates(&self) -> ResourceTemplates<'_> {
        ResourceTemplates::new(self.run.test_name(), &self.settings.images)
    }

    fn provisioner(&self) -> Provisioner<'_> {
        Provisioner::new(self.client.as_ref(), self.run.test_name())
    }

    /// Provisions the environment, runs the test job and tears the
    /// environment down again.
    ///
    /// The workload's exit code is returned in the outcome, not as an error.
    pub async fn run<W>(&mut self, args: &[String], out: &mut W) -> Result<JobOutcome, RunnerError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let pod = match self.provision(args).await {
            Ok(pod) => pod,
            Err(e) => {
                if self.settings.cleanup_on_setup_failure && self.namespace_created {
                    warn!(
                        target: "test_runner.orchestrator",
                        error = %e,
                        "Provisioning failed, deleting partial test environment"
                    );
                    self.teardown().await;
                }
                return Err(e);
            }
        };

        let outcome = match pod.metadata.name {
            Some(pod_name) => {
                JobRunner::new(self.client.as_ref(), self.run.test_name(), self.settings.gate)
                    .observe(&pod_name, out)
                    .await
            }
            None => Err(RunnerError::UnnamedPod {
                selector: test_job_selector(self.run.test_name()),
            }),
        };

        self.teardown().await;
        outcome
    }

    async fn provision(&mut self, args: &[String]) -> Result<Pod, RunnerError> {
        self.setup().await?;
        self.start(args).await
    }

    /// Provisions every tier up to and including onos-config.
    #[instrument(skip_all, name = "test_runner.orchestrator.setup", fields(test = %self.run.test_name()))]
    pub async fn setup(&mut self) -> Result<(), RunnerError> {
        for tier in Tier::ALL.into_iter().filter(|tier| *tier != Tier::TestJob) {
            info!(
                target: "test_runner.orchestrator",
                tier = %tier,
                position = tier.position(),
                "Provisioning tier"
            );

            let result = match tier {
                Tier::Namespace => self.setup_namespace().await,
                Tier::Controller => self.setup_controller().await,
                Tier::Partitions => self.setup_partitions().await,
                Tier::Simulators => self.setup_simulators().await,
                Tier::SystemUnderTest => self.setup_onos_config().await,
                Tier::TestJob => Ok(()),
            };
            result.map_err(|e| RunnerError::setup(tier, e))?;
        }
        Ok(())
    }

    /// Creates the test job and waits until its pod is running or terminal.
    #[instrument(skip_all, name = "test_runner.orchestrator.start", fields(test = %self.run.test_name()))]
    pub async fn start(&self, args: &[String]) -> Result<Pod, RunnerError> {
        info!(
            target: "test_runner.orchestrator",
            tier = %Tier::TestJob,
            position = Tier::TestJob.position(),
            "Provisioning tier"
        );

        self.start_job(args)
            .await
            .map_err(|e| RunnerError::setup(Tier::TestJob, e))
    }

    /// Deletes the test namespace and the controller's role binding.
    pub async fn teardown(&self) -> TeardownReport {
        Teardown::new(self.client.as_ref(), self.run.test_name())
            .run()
            .await
    }

    async fn setup_namespace(&mut self) -> Result<(), RunnerError> {
        self.provisioner()
            .create_namespace(&self.templates().namespace())
            .await?;
        self.namespace_created = true;
        Ok(())
    }

    async fn setup_controller(&self) -> Result<(), RunnerError> {
        let templates = self.templates();
        let provisioner = self.provisioner();

        provisioner
            .create_custom_resource_definition(&templates.partition_set_crd()?)
            .await?;
        provisioner
            .create_custom_resource_definition(&templates.partition_crd()?)
            .await?;
        provisioner
            .create_cluster_role(&templates.controller_cluster_role()?)
            .await?;
        provisioner
            .create_cluster_role_binding(&templates.controller_cluster_role_binding()?)
            .await?;
        provisioner
            .create_service_account(&templates.controller_service_account())
            .await?;
        provisioner
            .create_deployment(&templates.controller_deployment()?)
            .await?;
        provisioner
            .create_service(&templates.controller_service()?)
            .await?;

        let client = self.client.as_ref();
        let namespace = self.run.test_name();
        self.settings
            .gate
            .wait_for(
                "atomix-controller deployment",
                move || client.get_deployment(namespace, CONTROLLER_NAME),
                |deployment: &Deployment| ready_replicas(deployment) == 1,
            )
            .await?;
        Ok(())
    }

    async fn setup_partitions(&self) -> Result<(), RunnerError> {
        let params = self.run.params();
        let set = self
            .templates()
            .partition_set(params.partitions, params.partition_size)?;
        self.provisioner().create_partition_set(&set).await?;

        let requested = i64::from(params.partitions);
        let client = self.client.as_ref();
        let namespace = self.run.test_name();
        self.settings
            .gate
            .wait_for(
                "raft partition set",
                move || client.get_partition_set(namespace, PARTITION_SET_NAME),
                |set: &PartitionSet| ready_partitions(set) == requested,
            )
            .await?;
        Ok(())
    }

    /// Creates every simulator before waiting on any of them, so the pods
    /// start in parallel.
    async fn setup_simulators(&self) -> Result<(), RunnerError> {
        let simulators = self.document.simulator_configs()?;
        let templates = self.templates();
        let provisioner = self.provisioner();

        for (name, config) in &simulators {
            provisioner
                .create_config_map(&templates.simulator_config_map(name, config))
                .await?;
            provisioner.create_pod(&templates.simulator_pod(name)?).await?;
            provisioner
                .create_service(&templates.simulator_service(name)?)
                .await?;
        }

        let client = self.client.as_ref();
        let namespace = self.run.test_name();
        for name in simulators.keys() {
            let name = name.as_str();
            self.settings
                .gate
                .wait_for(
                    &format!("simulator pod {}", name),
                    move || client.get_pod(namespace, name),
                    first_container_ready,
                )
                .await?;
        }

        info!(
            target: "test_runner.orchestrator",
            simulators = simulators.len(),
            "Simulators ready"
        );
        Ok(())
    }

    async fn setup_onos_config(&self) -> Result<(), RunnerError> {
        let templates = self.templates();
        let provisioner = self.provisioner();

        let certificates = read_certificates(&self.settings.certs_dir)?;
        provisioner
            .create_secret(&templates.tls_secret(certificates))
            .await?;

        let stores = self.document.store_documents()?;
        provisioner
            .create_config_map(&templates.onos_config_config_map(&stores))
            .await?;

        let nodes = self.run.params().nodes;
        provisioner
            .create_deployment(&templates.onos_config_deployment(nodes)?)
            .await?;
        provisioner
            .create_service(&templates.onos_config_service()?)
            .await?;

        let expected = i64::from(nodes);
        let client = self.client.as_ref();
        let namespace = self.run.test_name();
        self.settings
            .gate
            .wait_for(
                "onos-config deployment",
                move || client.get_deployment(namespace, ONOS_CONFIG_NAME),
                |deployment: &Deployment| ready_replicas(deployment) == expected,
            )
            .await?;
        Ok(())
    }

    async fn start_job(&self, args: &[String]) -> Result<Pod, RunnerError> {
        let job = self.templates().test_job(
            args,
            &self.document.device_ids(),
            self.run.params().timeout,
        )?;
        self.provisioner().create_job(&job).await?;

        JobRunner::new(self.client.as_ref(), self.run.test_name(), self.settings.gate)
            .await_running(&test_job_selector(self.run.test_name()))
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tiers_are_ordered() {
        let positions: Vec<usize> = Tier::ALL.iter().map(|tier| tier.position()).collect();
        assert_eq!(positions, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_tier_display() {
        assert_eq!(Tier::Partitions.to_string(), "partitions");
        assert_eq!(Tier::SystemUnderTest.to_string(), "onos-config");
        assert_eq!(Tier::TestJob.to_string(), "test job");
    }

    #[test]
    fn test_every_tier_owns_resources() {
        for tier in Tier::ALL {
            assert!(!tier.resource_kinds().is_empty(), "{} owns nothing", tier);
        }
        assert!(Tier::Controller
            .resource_kinds()
            .contains(&"ClusterRoleBinding"));
    }

    #[test]
    fn test_ready_replicas_defaults_to_zero() {
        let deployment: Deployment =
            serde_json::from_value(json!({"metadata": {"name": "onos-config"}})).unwrap();
        assert_eq!(ready_replicas(&deployment), 0);

        let deployment: Deployment = serde_json::from_value(json!({
            "metadata": {"name": "onos-config"},
            "status": {"readyReplicas": 2}
        }))
        .unwrap();
        assert_eq!(ready_replicas(&deployment), 2);
    }

    #[test]
    fn test_ready_partitions_defaults_to_zero() {
        let set: PartitionSet = serde_json::from_value(json!({
            "apiVersion": "k8s.atomix.io/v1alpha1",
            "kind": "PartitionSet",
            "metadata": {"name": "raft"},
            "spec": {
                "partitions": 1,
                "template": {"spec": {"size": 1, "protocol": "raft", "image": "raft", "config": "{}"}}
            }
        }))
        .unwrap();
        assert_eq!(ready_partitions(&set), 0);
    }
}
