//! Configuration loading. YAML via `serde_yaml`, the way `catalog`, `doc` and `flowctl`
//! load their own config/fixture documents elsewhere in the wider codebase.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::errors::ConfigError;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    /// Response-selection policy name. Only `"replicator"` (the default selection policy)
    /// is recognised today; the field exists so additional policies can be added without a
    /// config format change.
    #[serde(rename = "Type", default = "default_cluster_type")]
    pub cluster_type: String,
    #[serde(rename = "Weight")]
    pub weight: u32,
    #[serde(rename = "Backends")]
    pub backends: Vec<Url>,
    #[serde(rename = "Options", default)]
    pub options: HashMap<String, String>,
}

fn default_cluster_type() -> String {
    "replicator".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Clusters", default)]
    pub clusters: Vec<String>,
    #[serde(rename = "ShardsCount", default = "default_shards_count")]
    pub shards_count: u64,
}

fn default_shards_count() -> u64 {
    1024
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(rename = "Listen")]
    pub listen: String,

    #[serde(rename = "Backends", default)]
    pub backends: Vec<Url>,

    #[serde(rename = "Clusters", default)]
    pub clusters: HashMap<String, ClusterConfig>,

    #[serde(rename = "Client")]
    pub client: ClientConfig,

    #[serde(rename = "ConnLimit")]
    pub conn_limit: usize,

    #[serde(rename = "ConnectionTimeout", with = "humantime_serde")]
    pub connection_timeout: Duration,

    #[serde(rename = "ConnectionDialTimeout", with = "humantime_serde")]
    pub connection_dial_timeout: Duration,

    #[serde(rename = "AdditionalRequestHeaders", default)]
    pub additional_request_headers: HashMap<String, String>,

    #[serde(rename = "AdditionalResponseHeaders", default)]
    pub additional_response_headers: HashMap<String, String>,

    #[serde(rename = "MaintainedBackend", default)]
    pub maintained_backend: Option<Url>,

    #[serde(rename = "SyncLogMethods", default)]
    pub sync_log_methods: Vec<String>,

    /// Bind address for the `/metrics` Prometheus endpoint.
    #[serde(rename = "MetricsListen", default = "default_metrics_listen")]
    pub metrics_listen: String,
}

fn default_metrics_listen() -> String {
    "127.0.0.1:9094".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.client.clusters.is_empty() && self.backends.is_empty() {
            return Err(ConfigError::NoClusters);
        }

        for (name, cluster) in &self.clusters {
            if cluster.weight < 1 {
                return Err(ConfigError::ZeroWeight(name.clone()));
            }
            if cluster.backends.is_empty() {
                return Err(ConfigError::EmptyBackendSet(name.clone()));
            }
        }

        for name in &self.client.clusters {
            if !self.clusters.contains_key(name) {
                return Err(ConfigError::UnknownCluster(name.clone()));
            }
        }

        if self.client.shards_count < 1 {
            return Err(ConfigError::ZeroShardsCount(self.client.name.clone()));
        }

        if !self.listen.contains(':') {
            return Err(ConfigError::InvalidListenAddr(self.listen.clone()));
        }

        Ok(())
    }
}
