use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::grid::labels::LabelRule;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub report: ReportConfig,
    /// Extra code-to-label rules merged over the built-in table.
    pub labels: Vec<LabelRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Static bearer token. When unset the API is open (trusted-network
    /// deployments only).
    pub auth_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            host: "127.0.0.1".to_string(),
            port: 3000,
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the store snapshot.
    pub path: String,
    /// Snapshot after every mutating request, not just at shutdown.
    pub snapshot_on_write: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            path: "./data".to_string(),
            snapshot_on_write: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Cap on distinct time columns in the printed grid.
    pub max_time_columns: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        ReportConfig {
            max_time_columns: 12,
        }
    }
}

/// Load configuration from a YAML file. A missing file is not an error:
/// every section has working defaults.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = fs::read_to_string(path)?;
    let config = serde_yaml::from_str(&raw)?;
    Ok(config)
}
