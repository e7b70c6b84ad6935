use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

use crate::util::{
    get_database_path, get_default_database_path, get_default_probe_binary, get_probe_binary,
};

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "get_default_database_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: get_default_database_path(),
        }
    }
}

/// How the iperf3 client is invoked
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Path or name of the iperf3 binary
    pub binary: PathBuf,

    /// Extra time granted on top of the test duration for connection setup
    /// and report generation
    pub setup_allowance_secs: u64,

    /// Test length used by reachability checks
    pub reachability_duration_secs: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            binary: get_default_probe_binary(),
            setup_allowance_secs: 10,
            reachability_duration_secs: 1,
        }
    }
}

impl ProbeConfig {
    pub fn setup_allowance(&self) -> Duration {
        Duration::from_secs(self.setup_allowance_secs)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How long a stop waits for a loop to acknowledge before aborting it
    pub stop_timeout_secs: u64,

    /// How often the registry is re-read while running
    pub reconcile_interval_secs: u64,

    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stop_timeout_secs: 5,
            reconcile_interval_secs: 10,
            event_capacity: 256,
        }
    }
}

impl SchedulerConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }
}

/// A target seeded from the config file
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct TargetConfig {
    pub hostname: String,
    #[serde(default = "crate::util::get_default_port")]
    pub port: u16,
    #[serde(default = "default_duration")]
    pub duration: u32,
    #[serde(default = "default_interval")]
    pub interval: u32,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    /// Storage configuration (optional - defaults to SQLite)
    pub storage: Option<StorageConfig>,

    pub probe: Option<ProbeConfig>,

    pub scheduler: Option<SchedulerConfig>,

    /// Targets upserted into the registry on start
    pub targets: Option<Vec<TargetConfig>>,
}

impl Config {
    /// Storage settings with the `THROUGHPUT_DB` override applied
    pub fn storage(&self) -> StorageConfig {
        let storage = self.storage.clone().unwrap_or_default();
        match (storage, get_database_path()) {
            (StorageConfig::Sqlite { .. }, Some(path)) => StorageConfig::Sqlite { path },
            (storage, _) => storage,
        }
    }

    /// Probe settings with the `IPERF3_BIN` override applied
    pub fn probe(&self) -> ProbeConfig {
        let mut probe = self.probe.clone().unwrap_or_default();
        if let Some(binary) = get_probe_binary() {
            probe.binary = binary;
        }
        probe
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        self.scheduler.clone().unwrap_or_default()
    }

    pub fn targets(&self) -> &[TargetConfig] {
        self.targets.as_deref().unwrap_or_default()
    }
}

pub(crate) fn default_duration() -> u32 {
    10
}

pub(crate) fn default_interval() -> u32 {
    5
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
