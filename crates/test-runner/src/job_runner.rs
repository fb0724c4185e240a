//! Job runner.
//!
//! Finds the test job's pod, streams its log output and extracts the test
//! container's terminal status. Log streaming and terminal-status polling
//! are independent observations of the same pod; the outcome is only
//! reported once polling has seen a terminated container, whenever the log
//! stream happens to end.

use crate::cluster::ClusterClient;
use crate::errors::RunnerError;
use crate::gate::ReadinessGate;
use crate::run::JobOutcome;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ContainerStateTerminated, Pod};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, instrument};

const PHASE_RUNNING: &str = "Running";
const PHASE_SUCCEEDED: &str = "Succeeded";
const PHASE_FAILED: &str = "Failed";

/// Returns true once a job pod can be observed: it is running with its
/// first container ready, or it has already reached a terminal phase.
///
/// Accepting terminal phases lets a job that fails instantly be observed
/// instead of waiting forever for a running phase that never comes.
pub fn is_running_observed(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };

    match status.phase.as_deref() {
        Some(PHASE_RUNNING) => first_container_ready(pod),
        Some(PHASE_SUCCEEDED) | Some(PHASE_FAILED) => true,
        _ => false,
    }
}

/// Returns true if the pod's first container reports ready.
pub fn first_container_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.container_statuses.as_ref())
        .and_then(|statuses| statuses.first())
        .map(|status| status.ready)
        .unwrap_or(false)
}

/// Terminated state of the pod's first container, if it has one.
pub fn terminated_state(pod: &Pod) -> Option<&ContainerStateTerminated> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .first()?
        .state
        .as_ref()?
        .terminated
        .as_ref()
}

/// Observes the test job in one namespace.
pub struct JobRunner<'a> {
    client: &'a dyn ClusterClient,
    namespace: &'a str,
    gate: ReadinessGate,
}

impl<'a> JobRunner<'a> {
    pub fn new(client: &'a dyn ClusterClient, namespace: &'a str, gate: ReadinessGate) -> Self {
        Self {
            client,
            namespace,
            gate,
        }
    }

    /// Waits until a pod matching `selector` is running or terminal and
    /// returns it.
    #[instrument(skip_all, name = "test_runner.job.await_running")]
    pub async fn await_running(&self, selector: &str) -> Result<Pod, RunnerError> {
        let client = self.client;
        let namespace = self.namespace;
        let pod = self
            .gate
            .wait_for_map(
                &format!("test job pods {}", selector),
                move || client.list_pods(namespace, selector),
                |pods: Vec<Pod>| pods.into_iter().find(is_running_observed),
            )
            .await?;

        info!(
            target: "test_runner.job",
            pod = pod.metadata.name.as_deref().unwrap_or_default(),
            phase = pod.status.as_ref().and_then(|s| s.phase.as_deref()).unwrap_or_default(),
            "Test job pod observed"
        );
        Ok(pod)
    }

    /// Copies the pod's log output to `out` until the stream ends.
    pub async fn stream_logs<W>(&self, pod: &str, out: &mut W) -> Result<(), RunnerError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut stream = self.client.stream_logs(self.namespace, pod).await?;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            out.write_all(&chunk).await.map_err(RunnerError::Output)?;
        }
        out.flush().await.map_err(RunnerError::Output)?;

        Ok(())
    }

    /// Polls the pod until its first container has terminated.
    ///
    /// The job's own deadline is enforced by the cluster, so this wait never
    /// applies the gate's provisioning deadline.
    pub async fn await_outcome(&self, pod: &str) -> Result<JobOutcome, RunnerError> {
        let client = self.client;
        let namespace = self.namespace;
        let outcome = self
            .gate
            .unbounded()
            .wait_for_map(
                &format!("test pod {}", pod),
                move || client.get_pod(namespace, pod),
                |observed: Pod| {
                    terminated_state(&observed).map(|terminated| JobOutcome {
                        message: terminated.message.clone().unwrap_or_default(),
                        exit_code: terminated.exit_code,
                    })
                },
            )
            .await?;

        info!(
            target: "test_runner.job",
            pod = %pod,
            exit_code = outcome.exit_code,
            "Test job finished"
        );
        Ok(outcome)
    }

    /// Streams the pod's logs to `out` while polling for its terminal status.
    ///
    /// Either observation failing aborts the other.
    pub async fn observe<W>(&self, pod: &str, out: &mut W) -> Result<JobOutcome, RunnerError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let (_, outcome) = tokio::try_join!(self.stream_logs(pod, out), self.await_outcome(pod))?;
        Ok(outcome)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod(status: serde_json::Value) -> Pod {
        serde_json::from_value(json!({
            "metadata": {"name": "onos-test-1-abcde", "labels": {"test": "onos-test-1"}},
            "status": status
        }))
        .unwrap()
    }

    #[test]
    fn test_pending_pod_not_observed() {
        let p = pod(json!({"phase": "Pending"}));
        assert!(!is_running_observed(&p));
    }

    #[test]
    fn test_pod_without_status_not_observed() {
        let p: Pod = serde_json::from_value(json!({"metadata": {"name": "p"}})).unwrap();
        assert!(!is_running_observed(&p));
        assert!(!first_container_ready(&p));
        assert!(terminated_state(&p).is_none());
    }

    #[test]
    fn test_running_pod_requires_ready_container() {
        let not_ready = pod(json!({
            "phase": "Running",
            "containerStatuses": [{"name": "test", "ready": false, "restartCount": 0, "image": "", "imageID": ""}]
        }));
        let ready = pod(json!({
            "phase": "Running",
            "containerStatuses": [{"name": "test", "ready": true, "restartCount": 0, "image": "", "imageID": ""}]
        }));
        let no_statuses = pod(json!({"phase": "Running"}));

        assert!(!is_running_observed(&not_ready));
        assert!(is_running_observed(&ready));
        assert!(!is_running_observed(&no_statuses));
    }

    #[test]
    fn test_succeeded_pod_observed_without_ready_container() {
        let p = pod(json!({
            "phase": "Succeeded",
            "containerStatuses": [{
                "name": "test", "ready": false, "restartCount": 0, "image": "", "imageID": "",
                "state": {"terminated": {"exitCode": 0}}
            }]
        }));
        assert!(is_running_observed(&p));
        assert!(!first_container_ready(&p));
    }

    #[test]
    fn test_failed_pod_observed() {
        let p = pod(json!({"phase": "Failed"}));
        assert!(is_running_observed(&p));
    }

    #[test]
    fn test_terminated_state_extracted() {
        let p = pod(json!({
            "phase": "Failed",
            "containerStatuses": [{
                "name": "test", "ready": false, "restartCount": 0, "image": "", "imageID": "",
                "state": {"terminated": {"exitCode": 3, "message": "3 tests failed"}}
            }]
        }));

        let terminated = terminated_state(&p).unwrap();
        assert_eq!(terminated.exit_code, 3);
        assert_eq!(terminated.message.as_deref(), Some("3 tests failed"));
    }

    #[test]
    fn test_running_container_has_no_terminated_state() {
        let p = pod(json!({
            "phase": "Running",
            "containerStatuses": [{
                "name": "test", "ready": true, "restartCount": 0, "image": "", "imageID": "",
                "state": {"running": {}}
            }]
        }));
        assert!(terminated_state(&p).is_none());
    }
}
