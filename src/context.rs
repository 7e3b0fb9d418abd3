//! Shared handles for the long-running tasks.
//!
//! Built once at startup from configuration; the scanner and the status
//! manager each take the handles they need. Dropping the context on shutdown
//! releases everything.

use std::{path::Path, sync::Arc};

use tracing::info;

use crate::{
    config::Config,
    cursor::{CursorStore, FileCursorStore},
    endpoint_pool::{ConsensusPool, ExecutionPool, HealthConfig},
    error::WatchResult,
    registry::ContractRegistry,
    sink::{NotificationSink, TracingSink, WebhookSink},
};

pub struct WatchContext {
    pub config: Config,
    pub execution: ExecutionPool,
    pub consensus: ConsensusPool,
    pub registry: ContractRegistry,
    pub store: Arc<dyn CursorStore>,
    pub sink: Arc<dyn NotificationSink>,
}

impl WatchContext {
    /// Build every collaborator from validated configuration. ABI paths are
    /// resolved relative to `base_dir` (the config file's directory).
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::WatchError::Config`] on unusable endpoints,
    /// ABIs, or sink settings.
    pub fn initialize(config: Config, base_dir: &Path) -> WatchResult<Self> {
        let health = HealthConfig::default();
        let execution = ExecutionPool::from_config(&config.endpoints.execution, health.clone())?;
        let consensus = ConsensusPool::from_config(&config.endpoints.consensus, health)?;
        let registry = ContractRegistry::from_config(&config, base_dir)?;

        let store: Arc<dyn CursorStore> = Arc::new(FileCursorStore::new(
            base_dir.join(&config.data_dir).join("scan_state.json"),
        ));
        let sink: Arc<dyn NotificationSink> = match &config.sink.webhook_url {
            Some(url) => Arc::new(WebhookSink::new(url)?),
            None => Arc::new(TracingSink),
        };

        info!(
            contracts = config.contracts.len(),
            execution_endpoints = execution.endpoints().len(),
            consensus_endpoints = consensus.endpoints().len(),
            "context initialized"
        );

        Ok(Self {
            config,
            execution,
            consensus,
            registry,
            store,
            sink,
        })
    }

    /// Footer line attached to status payloads.
    #[must_use]
    pub fn footer(&self, module_count: usize) -> String {
        let plural = if module_count == 1 { "module" } else { "modules" };
        format!(
            "tracking {} contracts using {module_count} {plural}",
            self.config.contracts.len()
        )
    }
}
