//! Runtime configuration loaded from `config.toml`.
//!
//! All knobs of the scanning engine live here: endpoint tiers, the scan
//! window parameters, the contract alias table, module include/exclude lists,
//! channel routing and per-channel status definitions. Unusable configuration
//! (malformed ABI path, missing default channel, zero batch size) aborts
//! startup with a descriptive error; nothing here is mutated at runtime.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy::primitives::Address;
use serde::Deserialize;

use crate::error::{WatchError, WatchResult};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory holding the durable scan state (`scan_state.json`).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    pub endpoints: EndpointsConfig,
    pub events: EventsConfig,
    #[serde(default)]
    pub modules: ModulesConfig,
    /// Event-name prefix → channel id. Must contain a `default` entry.
    pub channels: HashMap<String, u64>,
    /// Contract alias → (address, ABI file).
    #[serde(default)]
    pub contracts: HashMap<String, ContractConfig>,
    /// Named status-message definitions.
    #[serde(default)]
    pub status: HashMap<String, StatusConfig>,
    #[serde(default)]
    pub sink: SinkConfig,
    /// Whether a reorg that invalidates already-notified events emits an
    /// operator correction notice to the default channel.
    #[serde(default)]
    pub notify_corrections: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointsConfig {
    pub execution: ExecutionEndpointsConfig,
    #[serde(default)]
    pub consensus: ConsensusEndpointsConfig,
}

/// Execution-layer endpoint tiers, tried in declared order within each list,
/// current before mainnet before archive.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionEndpointsConfig {
    #[serde(default)]
    pub current: Vec<String>,
    #[serde(default)]
    pub mainnet: Vec<String>,
    #[serde(default)]
    pub archive: Vec<String>,
}

/// Consensus-layer (beacon REST) endpoints, a flat ordered list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsensusEndpointsConfig {
    #[serde(default)]
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Earliest block ever scanned; no backfill before this point.
    pub genesis: u64,
    #[serde(default = "default_batch_size")]
    pub block_batch_size: u64,
    /// Trailing blocks re-scanned each cycle to tolerate short reorgs.
    #[serde(default = "default_lookback")]
    pub lookback_distance: u64,
    /// Blocks held back from the chain head before they are scanned.
    #[serde(default)]
    pub confirmation_margin: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModulesConfig {
    /// Empty means "all modules except excluded".
    #[serde(default)]
    pub include: Vec<String>,
    /// Takes precedence over `include`.
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractConfig {
    pub address: Address,
    /// Path to the contract's JSON ABI, relative to the config file.
    pub abi: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    /// Name of the status plugin producing the summary.
    pub plugin: String,
    /// Channel-table key the summary is sent to.
    pub channel: String,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SinkConfig {
    /// When set, payloads are POSTed here as JSON; otherwise they are only
    /// logged.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_batch_size() -> u64 {
    500
}

fn default_lookback() -> u64 {
    8
}

fn default_poll_interval() -> u64 {
    12
}

fn default_cooldown() -> u64 {
    300
}

impl Config {
    /// Load and validate configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Config`] if the file cannot be read or parsed,
    /// or fails validation.
    pub fn load(path: &Path) -> WatchResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| WatchError::Config(format!("reading {}: {e}", path.display())))?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| WatchError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup validation; violations abort with a descriptive error.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Config`], [`WatchError::InvalidBatchSize`] or
    /// [`WatchError::NoEndpoints`] on the first violation found.
    pub fn validate(&self) -> WatchResult<()> {
        if self.events.block_batch_size == 0 {
            return Err(WatchError::InvalidBatchSize);
        }
        if self.events.lookback_distance >= self.events.block_batch_size {
            return Err(WatchError::InvalidLookback);
        }
        let execution = &self.endpoints.execution;
        if execution.current.is_empty()
            && execution.mainnet.is_empty()
            && execution.archive.is_empty()
        {
            return Err(WatchError::NoEndpoints);
        }
        if !self.channels.contains_key("default") {
            return Err(WatchError::Config(
                "channels table must contain a `default` entry".into(),
            ));
        }
        let mut seen_addresses: HashMap<Address, &str> = HashMap::new();
        for (alias, contract) in &self.contracts {
            if let Some(other) = seen_addresses.insert(contract.address, alias) {
                return Err(WatchError::Config(format!(
                    "contracts `{alias}` and `{other}` share address {}",
                    contract.address
                )));
            }
        }
        for (name, status) in &self.status {
            if !self.channels.contains_key(&status.channel) {
                return Err(WatchError::Config(format!(
                    "status `{name}` references unknown channel `{}`",
                    status.channel
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.events.poll_interval_secs)
    }
}
