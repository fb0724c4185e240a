//! onos-config Test Runner
//!
//! Provisions a test environment in the cluster named by the kubeconfig,
//! runs the test image with the command-line arguments and exits with the
//! test container's exit code.

use std::sync::Arc;
use test_runner::cluster::KubeClusterClient;
use test_runner::config::Config;
use test_runner::errors::RunnerError;
use test_runner::orchestrator::{Orchestrator, OrchestratorSettings};
use test_runner::run::{JobOutcome, RunParams, TestRun};
use test_runner::test_config::TestConfigDocument;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "test_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let code = match run().await {
        Ok(outcome) => {
            println!("{}", outcome.message);
            outcome.exit_code
        }
        Err(e) => {
            error!(error = %e, setup = e.is_setup_failure(), "Test run failed");
            println!("{}", e);
            1
        }
    };

    std::process::exit(code);
}

async fn run() -> Result<JobOutcome, RunnerError> {
    let config = Config::from_env()?;

    // Validated before anything touches the cluster
    let document = TestConfigDocument::load(&config.configs_dir, &config.test_config)?;

    let client = KubeClusterClient::from_kubeconfig(&config.kubeconfig).await?;

    let params = RunParams {
        nodes: config.nodes,
        partitions: config.partitions,
        partition_size: config.partition_size,
        timeout: config.timeout,
    };
    let test_run = match &config.test_id {
        Some(id) => TestRun::with_id(id.clone(), params),
        None => TestRun::new(params),
    };

    info!(
        test = %test_run.test_name(),
        config = %config.test_config,
        nodes = params.nodes,
        partitions = params.partitions,
        partition_size = params.partition_size,
        "Starting test run"
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut orchestrator = Orchestrator::new(
        Arc::new(client),
        test_run,
        document,
        OrchestratorSettings::from_config(&config),
    );

    let mut stdout = tokio::io::stdout();
    orchestrator.run(&args, &mut stdout).await
}
