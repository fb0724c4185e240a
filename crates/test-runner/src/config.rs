//! Test runner configuration.
//!
//! Configuration is loaded from environment variables and validated once at
//! startup. Directory locations and cluster credentials are explicit values
//! rather than being derived from the location of the binary.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default directory holding test configuration documents.
pub const DEFAULT_CONFIGS_DIR: &str = "test/configs";

/// Default directory holding TLS certificate files.
pub const DEFAULT_CERTS_DIR: &str = "test/certs";

/// Default test job deadline in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 600;

/// Default readiness polling interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Container images used by the test environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Images {
    pub controller: String,
    pub raft: String,
    pub simulator: String,
    pub onos_config: String,
    pub tests: String,
}

impl Default for Images {
    fn default() -> Self {
        Self {
            controller: "atomix/atomix-k8s-controller:latest".to_string(),
            raft: "atomix/atomix-raft-protocol:latest".to_string(),
            simulator: "onosproject/device-simulator:latest".to_string(),
            onos_config: "onosproject/onos-config:latest".to_string(),
            tests: "onosproject/onos-config-integration-tests:latest".to_string(),
        }
    }
}

/// Test runner configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the test configuration document (without `.json`).
    pub test_config: String,

    /// Directory holding test configuration documents.
    pub configs_dir: PathBuf,

    /// Directory holding the TLS certificate files mounted into onos-config and the test job.
    pub certs_dir: PathBuf,

    /// Path to the kubeconfig used to reach the cluster.
    pub kubeconfig: PathBuf,

    /// Number of onos-config replicas.
    pub nodes: u32,

    /// Number of Raft partitions.
    pub partitions: u32,

    /// Number of members per Raft partition.
    pub partition_size: u32,

    /// Deadline for the test job, enforced by the cluster.
    pub timeout: Duration,

    /// Interval between readiness polls.
    pub poll_interval: Duration,

    /// Optional overall deadline for each provisioning readiness wait.
    /// Unset means wait forever.
    pub ready_timeout: Option<Duration>,

    /// Tear the namespace down when provisioning fails after it was created.
    pub cleanup_on_setup_failure: bool,

    /// Reuse this test ID instead of generating a new one.
    pub test_id: Option<String>,

    /// Container images.
    pub images: Images,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let test_config = vars
            .get("ONOS_TEST_CONFIG")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("ONOS_TEST_CONFIG".to_string()))?
            .clone();

        let configs_dir = vars
            .get("ONOS_TEST_CONFIGS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIGS_DIR));

        let certs_dir = vars
            .get("ONOS_TEST_CERTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CERTS_DIR));

        let kubeconfig = resolve_kubeconfig(vars)?;

        let nodes = parse_positive(vars, "ONOS_TEST_NODES", 1)?;
        let partitions = parse_positive(vars, "ONOS_TEST_PARTITIONS", 1)?;
        let partition_size = parse_positive(vars, "ONOS_TEST_PARTITION_SIZE", 1)?;

        let timeout = Duration::from_secs(parse_positive(
            vars,
            "ONOS_TEST_TIMEOUT_SECONDS",
            DEFAULT_TIMEOUT_SECONDS,
        )?);

        let poll_interval = Duration::from_millis(parse_positive(
            vars,
            "ONOS_TEST_POLL_INTERVAL_MS",
            DEFAULT_POLL_INTERVAL_MS,
        )?);

        let ready_timeout = if vars.contains_key("ONOS_TEST_READY_TIMEOUT_SECONDS") {
            Some(Duration::from_secs(parse_positive(
                vars,
                "ONOS_TEST_READY_TIMEOUT_SECONDS",
                0,
            )?))
        } else {
            None
        };

        let cleanup_on_setup_failure = match vars.get("ONOS_TEST_CLEANUP_ON_SETUP_FAILURE") {
            Some(value) => parse_bool("ONOS_TEST_CLEANUP_ON_SETUP_FAILURE", value)?,
            None => false,
        };

        let test_id = vars.get("ONOS_TEST_ID").filter(|v| !v.is_empty()).cloned();

        let defaults = Images::default();
        let image = |name: &str, default: String| vars.get(name).cloned().unwrap_or(default);
        let images = Images {
            controller: image("ONOS_TEST_CONTROLLER_IMAGE", defaults.controller),
            raft: image("ONOS_TEST_RAFT_IMAGE", defaults.raft),
            simulator: image("ONOS_TEST_SIMULATOR_IMAGE", defaults.simulator),
            onos_config: image("ONOS_TEST_ONOS_CONFIG_IMAGE", defaults.onos_config),
            tests: image("ONOS_TEST_TESTS_IMAGE", defaults.tests),
        };

        Ok(Config {
            test_config,
            configs_dir,
            certs_dir,
            kubeconfig,
            nodes,
            partitions,
            partition_size,
            timeout,
            poll_interval,
            ready_timeout,
            cleanup_on_setup_failure,
            test_id,
            images,
        })
    }
}

/// Resolves the kubeconfig path from `KUBECONFIG`, falling back to
/// `<home>/.kube/config`.
fn resolve_kubeconfig(vars: &HashMap<String, String>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = vars.get("KUBECONFIG").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(path));
    }

    let home = vars
        .get("HOME")
        .filter(|v| !v.is_empty())
        .or_else(|| vars.get("USERPROFILE").filter(|v| !v.is_empty()))
        .ok_or_else(|| {
            ConfigError::MissingEnvVar("KUBECONFIG (no home directory configured)".to_string())
        })?;

    Ok(PathBuf::from(home).join(".kube").join("config"))
}

fn parse_positive<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: T = value_str.parse().map_err(|e| ConfigError::InvalidValue {
        name: name.to_string(),
        message: format!("must be a valid positive integer, got '{}': {}", value_str, e),
    })?;

    if value <= T::default() {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: "must be greater than 0".to_string(),
        });
    }

    Ok(value)
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("expected a boolean, got '{}'", other),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            ("ONOS_TEST_CONFIG".to_string(), "default".to_string()),
            ("HOME".to_string(), "/home/tester".to_string()),
        ])
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&base_vars()).unwrap();

        assert_eq!(config.test_config, "default");
        assert_eq!(config.configs_dir, PathBuf::from(DEFAULT_CONFIGS_DIR));
        assert_eq!(config.certs_dir, PathBuf::from(DEFAULT_CERTS_DIR));
        assert_eq!(config.kubeconfig, PathBuf::from("/home/tester/.kube/config"));
        assert_eq!(config.nodes, 1);
        assert_eq!(config.partitions, 1);
        assert_eq!(config.partition_size, 1);
        assert_eq!(config.timeout, Duration::from_secs(600));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.ready_timeout, None);
        assert!(!config.cleanup_on_setup_failure);
        assert_eq!(config.test_id, None);
        assert_eq!(config.images, Images::default());
    }

    #[test]
    fn test_missing_config_name() {
        let mut vars = base_vars();
        vars.remove("ONOS_TEST_CONFIG");

        let err = Config::from_vars(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(name) if name == "ONOS_TEST_CONFIG"));
    }

    #[test]
    fn test_kubeconfig_env_wins_over_home() {
        let mut vars = base_vars();
        vars.insert("KUBECONFIG".to_string(), "/etc/kube/admin.conf".to_string());

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.kubeconfig, PathBuf::from("/etc/kube/admin.conf"));
    }

    #[test]
    fn test_userprofile_fallback() {
        let mut vars = base_vars();
        vars.remove("HOME");
        vars.insert("USERPROFILE".to_string(), "C:\\Users\\tester".to_string());

        let config = Config::from_vars(&vars).unwrap();
        assert!(config.kubeconfig.starts_with("C:\\Users\\tester"));
    }

    #[test]
    fn test_no_home_directory() {
        let mut vars = base_vars();
        vars.remove("HOME");

        let err = Config::from_vars(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));
    }

    #[test]
    fn test_custom_sizes() {
        let mut vars = base_vars();
        vars.insert("ONOS_TEST_NODES".to_string(), "3".to_string());
        vars.insert("ONOS_TEST_PARTITIONS".to_string(), "4".to_string());
        vars.insert("ONOS_TEST_PARTITION_SIZE".to_string(), "3".to_string());
        vars.insert("ONOS_TEST_TIMEOUT_SECONDS".to_string(), "120".to_string());
        vars.insert("ONOS_TEST_POLL_INTERVAL_MS".to_string(), "250".to_string());
        vars.insert("ONOS_TEST_READY_TIMEOUT_SECONDS".to_string(), "300".to_string());

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.nodes, 3);
        assert_eq!(config.partitions, 4);
        assert_eq!(config.partition_size, 3);
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.ready_timeout, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_zero_nodes_rejected() {
        let mut vars = base_vars();
        vars.insert("ONOS_TEST_NODES".to_string(), "0".to_string());

        let err = Config::from_vars(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name, .. } if name == "ONOS_TEST_NODES"));
    }

    #[test]
    fn test_non_numeric_partitions_rejected() {
        let mut vars = base_vars();
        vars.insert("ONOS_TEST_PARTITIONS".to_string(), "many".to_string());

        let err = Config::from_vars(&vars).unwrap_err();
        assert!(err.to_string().contains("ONOS_TEST_PARTITIONS"));
    }

    #[test]
    fn test_cleanup_flag() {
        let mut vars = base_vars();
        vars.insert(
            "ONOS_TEST_CLEANUP_ON_SETUP_FAILURE".to_string(),
            "true".to_string(),
        );
        assert!(Config::from_vars(&vars).unwrap().cleanup_on_setup_failure);

        vars.insert(
            "ONOS_TEST_CLEANUP_ON_SETUP_FAILURE".to_string(),
            "maybe".to_string(),
        );
        assert!(Config::from_vars(&vars).is_err());
    }

    #[test]
    fn test_image_overrides_and_test_id() {
        let mut vars = base_vars();
        vars.insert(
            "ONOS_TEST_ONOS_CONFIG_IMAGE".to_string(),
            "registry.local/onos-config:dev".to_string(),
        );
        vars.insert("ONOS_TEST_ID".to_string(), "abc123".to_string());

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.images.onos_config, "registry.local/onos-config:dev");
        assert_eq!(config.images.tests, Images::default().tests);
        assert_eq!(config.test_id.as_deref(), Some("abc123"));
    }
}
