use std::{
    collections::BTreeMap,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::dispatcher::PowerLimitRequest;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const DEFAULT_API_PORT: u16 = 8080;

const DEFAULT_MODE: &str = "all";
const DEFAULT_POWER_LIMIT: u32 = 250;
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to open configuration file {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse configuration file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

// Startup configuration, read once from a Json file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    // "all" or "manual"
    pub mode: String,
    // Power limit in watts for "all" mode
    pub power_limit: u32,
    // GPU index to power limit in watts for "manual" mode
    pub manual_limits: BTreeMap<i64, u32>,

    // Required to start the API server
    pub api_key: String,
    pub api_port: u16,
    #[serde(rename = "startAPIServer")]
    pub start_api_server: bool,

    // Upper bound on a single GPU call and on waiting for the GPUs
    pub gateway_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: DEFAULT_MODE.to_string(),
            power_limit: DEFAULT_POWER_LIMIT,
            manual_limits: BTreeMap::new(),
            api_key: String::new(),
            api_port: DEFAULT_API_PORT,
            start_api_server: false,
            gateway_timeout_secs: DEFAULT_GATEWAY_TIMEOUT_SECS,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Parsing config file at: {:?}", path);

        let file = File::open(path).map_err(|source| ConfigError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_reader(BufReader::new(file)).map_err(|source| {
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    // The power limit change described by the configuration
    pub fn power_request(&self) -> PowerLimitRequest {
        PowerLimitRequest {
            mode: self.mode.clone(),
            power_limit: self.power_limit,
            manual_limits: self.manual_limits.clone(),
        }
    }

    // Port 0 falls back to the default port
    pub fn api_port(&self) -> u16 {
        if self.api_port == 0 {
            DEFAULT_API_PORT
        } else {
            self.api_port
        }
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs.max(1))
    }
}
