//! Consensus-layer (beacon REST) endpoint pool.
//!
//! A flat ordered list of base URLs with the same health bookkeeping as the
//! execution pool. Only a small slice of the beacon API is needed: arbitrary
//! JSON GETs for status plugins and the head slot.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::warn;

use crate::{
    config::ConsensusEndpointsConfig,
    endpoint_pool::{
        health::{EndpointHealth, HealthConfig, HealthTracker},
        TierClass,
    },
    error::{WatchError, WatchResult},
};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct ConsensusEndpoint {
    pub base_url: String,
    health: HealthTracker,
}

impl ConsensusEndpoint {
    #[must_use]
    pub fn new(base_url: impl Into<String>, health_config: HealthConfig) -> Self {
        Self {
            base_url: base_url.into(),
            health: HealthTracker::new(health_config),
        }
    }

    #[must_use]
    pub fn health(&self) -> EndpointHealth {
        self.health.health()
    }

    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.health.failure_count()
    }
}

/// Ordered pool of beacon REST endpoints.
///
/// Unlike the execution pool this may be empty; status plugins treat a
/// missing consensus layer as "no beacon data" rather than an error.
#[derive(Debug, Clone)]
pub struct ConsensusPool {
    client: Client,
    endpoints: Vec<ConsensusEndpoint>,
}

impl ConsensusPool {
    /// Build the pool from configuration, preserving declared order.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Config`] if the HTTP client cannot be built.
    pub fn from_config(
        config: &ConsensusEndpointsConfig,
        health_config: HealthConfig,
    ) -> WatchResult<Self> {
        let endpoints = config
            .urls
            .iter()
            .map(|url| ConsensusEndpoint::new(url.trim_end_matches('/'), health_config.clone()))
            .collect();
        let client = Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| WatchError::Config(format!("building HTTP client: {e}")))?;
        Ok(Self { client, endpoints })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    #[must_use]
    pub fn endpoints(&self) -> &[ConsensusEndpoint] {
        &self.endpoints
    }

    /// GET `path` from the first endpoint that answers with valid JSON.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::AllEndpointsUnavailable`] once every endpoint has
    /// been tried or skipped.
    pub async fn get_json(&self, path: &str) -> WatchResult<Value> {
        let mut last_error = String::from("all endpoints skipped as dead");
        for endpoint in &self.endpoints {
            if !endpoint.health.allow() {
                continue;
            }
            let url = format!("{}{path}", endpoint.base_url);
            match self.fetch(&url).await {
                Ok(value) => {
                    endpoint.health.record_success();
                    return Ok(value);
                }
                Err(e) => {
                    endpoint.health.record_failure();
                    warn!(url = %endpoint.base_url, error = %e, "beacon endpoint failed, trying next");
                    last_error = e.to_string();
                }
            }
        }
        Err(WatchError::AllEndpointsUnavailable {
            tier_class: TierClass::Consensus,
            last_error,
        })
    }

    /// Current head slot from `/eth/v1/beacon/headers/head`.
    ///
    /// # Errors
    ///
    /// Endpoint exhaustion as in [`ConsensusPool::get_json`]; a well-formed
    /// HTTP response with an unexpected body also counts as unavailable.
    pub async fn head_slot(&self) -> WatchResult<u64> {
        let value = self.get_json("/eth/v1/beacon/headers/head").await?;
        parse_head_slot(&value).ok_or_else(|| WatchError::AllEndpointsUnavailable {
            tier_class: TierClass::Consensus,
            last_error: "malformed beacon header response".into(),
        })
    }

    async fn fetch(&self, url: &str) -> WatchResult<Value> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}

fn parse_head_slot(value: &Value) -> Option<u64> {
    value
        .pointer("/data/header/message/slot")?
        .as_str()?
        .parse()
        .ok()
}
