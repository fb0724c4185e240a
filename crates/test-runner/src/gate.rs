//! Readiness gate.
//!
//! Every provisioning tier blocks on the same primitive: re-fetch the
//! observed state of a cluster object, evaluate a readiness predicate over
//! it, and sleep a fixed interval when it is not ready yet. Observed state is
//! never cached between polls.
//!
//! A fetch error stops the wait immediately. Fetch errors here are
//! configuration or permission problems rather than transient availability
//! issues, so they are not retried.

use crate::cluster::ClusterError;
use crate::errors::RunnerError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Default interval between readiness polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Fixed-interval readiness poller with an optional overall deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessGate {
    interval: Duration,
    deadline: Option<Duration>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl ReadinessGate {
    /// Creates a gate that waits forever.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    /// Gives up with [`RunnerError::NotReady`] once `deadline` has elapsed.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// The same gate without an overall deadline.
    #[must_use]
    pub fn unbounded(self) -> Self {
        self.with_deadline(None)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Polls `fetch` until `is_ready` holds for the observed state and
    /// returns that state.
    ///
    /// `what` names the awaited object in logs and errors.
    pub async fn wait_for<T, F, Fut, P>(
        &self,
        what: &str,
        fetch: F,
        mut is_ready: P,
    ) -> Result<T, RunnerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClusterError>>,
        P: FnMut(&T) -> bool,
    {
        self.wait_for_map(what, fetch, |observed| {
            is_ready(&observed).then_some(observed)
        })
        .await
    }

    /// Polls `fetch` until `select` extracts a value from the observed state
    /// and returns that value. `None` means not ready yet.
    pub async fn wait_for_map<T, U, F, Fut, S>(
        &self,
        what: &str,
        mut fetch: F,
        mut select: S,
    ) -> Result<U, RunnerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClusterError>>,
        S: FnMut(T) -> Option<U>,
    {
        let start = Instant::now();
        let mut polls: u64 = 0;
        debug!(target: "test_runner.gate", what = %what, "Waiting for readiness");

        loop {
            let observed = fetch().await?;
            polls += 1;

            if let Some(selected) = select(observed) {
                debug!(
                    target: "test_runner.gate",
                    what = %what,
                    polls = polls,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Ready"
                );
                return Ok(selected);
            }

            if let Some(deadline) = self.deadline {
                let waited = start.elapsed();
                if waited >= deadline {
                    return Err(RunnerError::NotReady {
                        what: what.to_string(),
                        waited,
                    });
                }
            }

            sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const INTERVAL: Duration = Duration::from_millis(100);

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_n_polls_sleeps_n_times() {
        let not_ready_polls = 7;
        let counter = AtomicUsize::new(0);
        let fetches = &counter;
        let gate = ReadinessGate::new(INTERVAL);
        let start = Instant::now();

        let observed = gate
            .wait_for(
                "deployment",
                move || async move { Ok::<_, ClusterError>(fetches.fetch_add(1, Ordering::SeqCst)) },
                |count| *count >= not_ready_polls,
            )
            .await
            .unwrap();

        assert_eq!(observed, not_ready_polls);
        assert_eq!(fetches.load(Ordering::SeqCst), not_ready_polls + 1);
        // With the clock paused, elapsed time is exactly one interval per sleep.
        assert_eq!(start.elapsed(), INTERVAL * not_ready_polls as u32);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_immediately_does_not_sleep() {
        let gate = ReadinessGate::new(INTERVAL);
        let start = Instant::now();

        gate.wait_for("pod", || async { Ok::<_, ClusterError>(true) }, |ready| *ready)
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_returned_without_sleeping() {
        let counter = AtomicUsize::new(0);
        let fetches = &counter;
        let gate = ReadinessGate::new(INTERVAL);
        let start = Instant::now();

        let err = gate
            .wait_for(
                "partition set raft",
                move || async move {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Err::<bool, _>(ClusterError::Api {
                        code: 403,
                        message: "forbidden".to_string(),
                    })
                },
                |_| true,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RunnerError::Cluster(ClusterError::Api { code: 403, .. })
        ));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_after_polling_stops_the_wait() {
        let counter = AtomicUsize::new(0);
        let fetches = &counter;
        let gate = ReadinessGate::new(INTERVAL);

        let err = gate
            .wait_for(
                "deployment",
                move || async move {
                    let n = fetches.fetch_add(1, Ordering::SeqCst);
                    if n < 3 {
                        Ok(false)
                    } else {
                        Err(ClusterError::NotFound {
                            kind: "Deployment",
                            name: "onos-config".to_string(),
                        })
                    }
                },
                |ready| *ready,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RunnerError::Cluster(ClusterError::NotFound { .. })));
        assert_eq!(fetches.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let gate = ReadinessGate::new(INTERVAL).with_deadline(Some(Duration::from_secs(1)));

        let err = gate
            .wait_for(
                "simulator dev1",
                || async { Ok::<_, ClusterError>(false) },
                |ready| *ready,
            )
            .await
            .unwrap_err();

        match err {
            RunnerError::NotReady { what, waited } => {
                assert_eq!(what, "simulator dev1");
                assert!(waited >= Duration::from_secs(1));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_map_returns_selected_value() {
        let counter = AtomicUsize::new(0);
        let fetches = &counter;
        let gate = ReadinessGate::new(INTERVAL);
        let start = Instant::now();

        let selected = gate
            .wait_for_map(
                "test job pods",
                move || async move {
                    let n = fetches.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ClusterError>(vec![format!("pending-{n}"), format!("pod-{n}")])
                },
                |pods: Vec<String>| pods.into_iter().find(|pod| pod == "pod-2"),
            )
            .await
            .unwrap();

        assert_eq!(selected, "pod-2");
        assert_eq!(fetches.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), INTERVAL * 2);
    }

    #[test]
    fn test_unbounded_clears_deadline() {
        let gate = ReadinessGate::default().with_deadline(Some(Duration::from_secs(30)));
        assert_eq!(gate.deadline(), Some(Duration::from_secs(30)));
        assert_eq!(gate.unbounded().deadline(), None);
        assert_eq!(gate.interval(), DEFAULT_POLL_INTERVAL);
    }
}
