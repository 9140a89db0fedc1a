//! Service configuration.
//!
//! Loaded from a JSON file; any missing option falls back to its default.
//! If the file does not exist, a defaulted configuration is written to it
//! and the service continues.

use crate::bus::AccessPolicy;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// Top-level configuration: bus connection plus the service definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_nats_url")]
    pub nats_url: String,
    /// When false, every endpoint answers access requests itself with full
    /// access granted.
    #[serde(default)]
    pub external_access: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(flatten)]
    pub service: ServiceConfig,
}

/// The resource-serving half of the configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Resource-id prefix for every registered pattern.
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    /// Origin URL template with `${name}` placeholders.
    #[serde(default)]
    pub url: String,
    /// Milliseconds between refresh cycles.
    #[serde(default = "default_refresh_time")]
    pub refresh_time: u64,
    /// Refresh cycles before forced eviction and reset.
    #[serde(default = "default_refresh_count")]
    pub refresh_count: u32,
    /// Milliseconds to extend bus request timeouts by on cold reads;
    /// disabled when zero.
    #[serde(default)]
    pub timeout: u64,
    #[serde(flatten)]
    pub resource: ResourceConfig,
    #[serde(skip)]
    pub access: AccessPolicy,
}

/// One node of the declarative resource tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfig {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pattern: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id_prop: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceConfig>,
}

fn default_nats_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}

fn default_service_name() -> String {
    "rest2res".to_string()
}

fn default_refresh_time() -> u64 {
    5000
}

fn default_refresh_count() -> u32 {
    12
}

impl Default for Config {
    fn default() -> Self {
        Config {
            nats_url: default_nats_url(),
            external_access: false,
            debug: false,
            service: ServiceConfig {
                service_name: default_service_name(),
                endpoints: Vec::new(),
            },
        }
    }
}

impl Config {
    /// Load a configuration file, or write a defaulted one if it does not
    /// exist yet.
    pub async fn load(path: &Path) -> Result<Self> {
        match fs::read(path).await {
            Ok(data) => {
                let mut cfg: Config = serde_json::from_slice(&data)
                    .map_err(|e| Error::Config(format!("error parsing config file: {}", e)))?;
                cfg.set_defaults();
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Config::default();
                match serde_json::to_vec_pretty(&cfg) {
                    Ok(out) => {
                        let _ = fs::write(path, out).await;
                    }
                    Err(e) => return Err(Error::Config(format!("error encoding config: {}", e))),
                }
                Ok(cfg)
            }
            Err(e) => Err(Error::Config(format!("error loading config file: {}", e))),
        }
    }

    /// Normalize zero-valued options back to their defaults.
    pub fn set_defaults(&mut self) {
        for ep in &mut self.service.endpoints {
            if ep.refresh_time == 0 {
                ep.refresh_time = default_refresh_time();
            }
            if ep.refresh_count == 0 {
                ep.refresh_count = default_refresh_count();
            }
        }
    }

    /// Apply the access policy implied by `externalAccess`.
    pub fn apply_access_policy(&mut self) {
        if !self.external_access {
            for ep in &mut self.service.endpoints {
                ep.access = AccessPolicy::Granted;
            }
        }
    }
}
