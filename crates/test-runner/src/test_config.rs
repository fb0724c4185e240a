//! Test configuration documents.
//!
//! A test configuration is a JSON document naming the device simulators to
//! start and, optionally, the onos-config store documents to load. When the
//! device or configuration store is omitted but simulators are present, an
//! equivalent store is synthesized with one entry per simulator so the
//! workload always sees a consistent device inventory.

use crate::errors::RunnerError;
use crate::templates::SIMULATOR_PORT;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Version stamped on synthesized store documents and entries.
const STORE_VERSION: &str = "1.0.0";

/// Device connection timeout (seconds) stamped on synthesized device entries.
const DEVICE_TIMEOUT_SECONDS: u32 = 5;

/// Creation timestamp stamped on synthesized configuration entries.
const CONFIG_TIMESTAMP: &str = "2019-05-09T16:24:17Z";

/// A parsed test configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConfigDocument {
    /// Device ID to opaque simulator configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulators: Option<BTreeMap<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_store: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_store: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_store: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_store: Option<Value>,
}

/// The four serialized store documents mounted into onos-config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDocuments {
    pub change_store: String,
    pub network_store: String,
    pub device_store: String,
    pub config_store: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct DeviceStoreDocument {
    version: &'static str,
    storetype: &'static str,
    store: BTreeMap<String, DeviceEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct DeviceEntry {
    #[serde(rename = "ID")]
    id: String,
    addr: String,
    software_version: &'static str,
    timeout: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ConfigStoreDocument {
    version: &'static str,
    storetype: &'static str,
    store: BTreeMap<String, ConfigEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ConfigEntry {
    name: String,
    device: String,
    version: &'static str,
    #[serde(rename = "Type")]
    device_type: &'static str,
    created: &'static str,
    updated: &'static str,
    changes: Vec<String>,
}

impl TestConfigDocument {
    /// Loads `<dir>/<name>.json`.
    pub fn load(dir: &Path, name: &str) -> Result<Self, RunnerError> {
        let path = dir.join(format!("{}.json", name));
        let bytes = std::fs::read(&path).map_err(|e| RunnerError::TestConfig {
            path: path.clone(),
            message: e.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| RunnerError::TestConfig {
            path,
            message: e.to_string(),
        })
    }

    /// Parses a document from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialized simulator configurations keyed by device ID.
    pub fn simulator_configs(&self) -> Result<BTreeMap<String, String>, RunnerError> {
        let Some(simulators) = &self.simulators else {
            return Ok(BTreeMap::new());
        };
        simulators
            .iter()
            .map(|(name, config)| {
                serde_json::to_string(config)
                    .map(|json| (name.clone(), json))
                    .map_err(RunnerError::from)
            })
            .collect()
    }

    /// Device IDs of every configured simulator.
    pub fn device_ids(&self) -> Vec<String> {
        self.simulators
            .as_ref()
            .map(|simulators| simulators.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Serializes the four store documents, synthesizing the device and
    /// configuration stores from the simulators when they are absent.
    ///
    /// Absent change and network stores serialize as JSON `null`. Absent
    /// device and configuration stores with no simulators serialize as
    /// the empty string.
    pub fn store_documents(&self) -> Result<StoreDocuments, RunnerError> {
        let change_store = serde_json::to_string(&self.change_store)?;
        let network_store = serde_json::to_string(&self.network_store)?;

        let device_store = match (&self.device_store, &self.simulators) {
            (Some(store), _) => serde_json::to_string(store)?,
            (None, Some(simulators)) => {
                serde_json::to_string(&synthesize_device_store(simulators.keys()))?
            }
            (None, None) => String::new(),
        };

        let config_store = match (&self.config_store, &self.simulators) {
            (Some(store), _) => serde_json::to_string(store)?,
            (None, Some(simulators)) => {
                serde_json::to_string(&synthesize_config_store(simulators.keys()))?
            }
            (None, None) => String::new(),
        };

        Ok(StoreDocuments {
            change_store,
            network_store,
            device_store,
            config_store,
        })
    }
}

fn synthesize_device_store<'a>(names: impl Iterator<Item = &'a String>) -> DeviceStoreDocument {
    let store = names
        .map(|name| {
            (
                name.clone(),
                DeviceEntry {
                    id: name.clone(),
                    addr: format!("{}:{}", name, SIMULATOR_PORT),
                    software_version: STORE_VERSION,
                    timeout: DEVICE_TIMEOUT_SECONDS,
                },
            )
        })
        .collect();

    DeviceStoreDocument {
        version: STORE_VERSION,
        storetype: "device",
        store,
    }
}

fn synthesize_config_store<'a>(names: impl Iterator<Item = &'a String>) -> ConfigStoreDocument {
    let store = names
        .map(|name| {
            let config_name = format!("{}-{}", name, STORE_VERSION);
            (
                config_name.clone(),
                ConfigEntry {
                    name: config_name,
                    device: name.clone(),
                    version: STORE_VERSION,
                    device_type: "Devicesim",
                    created: CONFIG_TIMESTAMP,
                    updated: CONFIG_TIMESTAMP,
                    changes: Vec::new(),
                },
            )
        })
        .collect();

    ConfigStoreDocument {
        version: STORE_VERSION,
        storetype: "config",
        store,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn parse(value: Value) -> TestConfigDocument {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_device_store_synthesized_from_simulators() {
        let doc = parse(json!({"simulators": {"dev1": {}, "dev2": {}}}));
        let stores = doc.store_documents().unwrap();

        let device_store: Value = serde_json::from_str(&stores.device_store).unwrap();
        assert_eq!(device_store["Version"], "1.0.0");
        assert_eq!(device_store["Storetype"], "device");

        let entries = device_store["Store"].as_object().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["dev1"]["ID"], "dev1");
        assert_eq!(entries["dev1"]["Addr"], "dev1:10161");
        assert_eq!(entries["dev2"]["Addr"], "dev2:10161");
        assert_eq!(entries["dev2"]["SoftwareVersion"], "1.0.0");
        assert_eq!(entries["dev2"]["Timeout"], 5);
    }

    #[test]
    fn test_config_store_synthesized_from_simulators() {
        let doc = parse(json!({"simulators": {"dev1": {}, "dev2": {}}}));
        let stores = doc.store_documents().unwrap();

        let config_store: Value = serde_json::from_str(&stores.config_store).unwrap();
        assert_eq!(config_store["Storetype"], "config");

        let entries = config_store["Store"].as_object().unwrap();
        assert_eq!(entries.len(), 2);
        let entry = &entries["dev1-1.0.0"];
        assert_eq!(entry["Name"], "dev1-1.0.0");
        assert_eq!(entry["Device"], "dev1");
        assert_eq!(entry["Type"], "Devicesim");
        assert_eq!(entry["Created"], CONFIG_TIMESTAMP);
        assert_eq!(entry["Changes"], json!([]));
    }

    #[test]
    fn test_one_entry_per_simulator_and_device_ids_match() {
        let names = ["alpha", "bravo", "charlie", "delta", "echo"];
        let simulators: serde_json::Map<String, Value> = names
            .iter()
            .map(|name| (name.to_string(), json!({"name": name})))
            .collect();
        let doc = parse(json!({ "simulators": simulators }));
        let stores = doc.store_documents().unwrap();

        let device_store: Value = serde_json::from_str(&stores.device_store).unwrap();
        let device_keys: BTreeSet<String> = device_store["Store"]
            .as_object()
            .unwrap()
            .keys()
            .cloned()
            .collect();

        let config_store: Value = serde_json::from_str(&stores.config_store).unwrap();
        let config_devices: BTreeSet<String> = config_store["Store"]
            .as_object()
            .unwrap()
            .values()
            .map(|entry| entry["Device"].as_str().unwrap().to_string())
            .collect();

        let expected: BTreeSet<String> = names.iter().map(|n| n.to_string()).collect();
        let device_ids: BTreeSet<String> = doc.device_ids().into_iter().collect();

        assert_eq!(device_keys, expected);
        assert_eq!(config_devices, expected);
        assert_eq!(device_ids, expected);
        assert_eq!(doc.device_ids().len(), names.len());
    }

    #[test]
    fn test_explicit_stores_serialized_unchanged() {
        let device_store = json!({
            "Version": "2.0.0",
            "Storetype": "device",
            "Store": {"switch-1": {"ID": "switch-1", "Addr": "10.0.0.1:10161", "Timeout": 10}}
        });
        let config_store = json!({
            "Version": "2.0.0",
            "Storetype": "config",
            "Store": {}
        });
        let doc = parse(json!({
            "simulators": {"dev1": {}},
            "deviceStore": device_store.clone(),
            "configStore": config_store.clone(),
        }));

        let stores = doc.store_documents().unwrap();
        let device_round_trip: Value = serde_json::from_str(&stores.device_store).unwrap();
        let config_round_trip: Value = serde_json::from_str(&stores.config_store).unwrap();

        assert_eq!(device_round_trip, device_store);
        assert_eq!(config_round_trip, config_store);
    }

    #[test]
    fn test_absent_stores_without_simulators() {
        let doc = parse(json!({}));
        let stores = doc.store_documents().unwrap();

        assert_eq!(stores.change_store, "null");
        assert_eq!(stores.network_store, "null");
        assert_eq!(stores.device_store, "");
        assert_eq!(stores.config_store, "");
        assert!(doc.device_ids().is_empty());
        assert!(doc.simulator_configs().unwrap().is_empty());
    }

    #[test]
    fn test_change_and_network_stores_passed_through() {
        let doc = parse(json!({
            "changeStore": {"Version": "1.0.0", "Storetype": "change", "Store": {}},
            "networkStore": {"Version": "1.0.0", "Storetype": "network", "Store": []},
        }));
        let stores = doc.store_documents().unwrap();

        let change: Value = serde_json::from_str(&stores.change_store).unwrap();
        let network: Value = serde_json::from_str(&stores.network_store).unwrap();
        assert_eq!(change["Storetype"], "change");
        assert_eq!(network["Store"], json!([]));
    }

    #[test]
    fn test_simulator_configs_serialized_per_device() {
        let doc = parse(json!({
            "simulators": {"dev1": {"openconfig-interfaces": {"eth0": true}}, "dev2": {}}
        }));
        let configs = doc.simulator_configs().unwrap();

        assert_eq!(configs.len(), 2);
        let dev1: Value = serde_json::from_str(&configs["dev1"]).unwrap();
        assert_eq!(dev1, json!({"openconfig-interfaces": {"eth0": true}}));
        assert_eq!(configs["dev2"], "{}");
    }

    #[test]
    fn test_simulators_must_be_an_object() {
        let result = TestConfigDocument::from_json(r#"{"simulators": ["dev1"]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("single.json"),
            r#"{"simulators": {"device-1": {}}}"#,
        )
        .unwrap();

        let doc = TestConfigDocument::load(dir.path(), "single").unwrap();
        assert_eq!(doc.device_ids(), vec!["device-1".to_string()]);

        let missing = TestConfigDocument::load(dir.path(), "missing").unwrap_err();
        assert!(matches!(missing, RunnerError::TestConfig { .. }));
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();

        let err = TestConfigDocument::load(dir.path(), "broken").unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }
}
