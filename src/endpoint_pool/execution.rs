//! Tiered execution-layer endpoint pool.
//!
//! Endpoints are tried in declared order, current tier first, then mainnet,
//! then archive. Each attempt retries with exponential backoff inside a
//! bounded call timeout; a failed endpoint is marked degraded and the next
//! one is tried. Exhausting the list yields
//! [`WatchError::AllEndpointsUnavailable`].

use std::{future::Future, time::Duration};

use alloy::{
    network::Ethereum,
    providers::{Provider, RootProvider},
    rpc::types::{Filter, Log},
    transports::{RpcError, TransportErrorKind},
};
use backon::{ExponentialBuilder, Retryable};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::{
    config::ExecutionEndpointsConfig,
    endpoint_pool::{
        health::{EndpointHealth, HealthConfig, HealthTracker},
        TierClass,
    },
    error::{WatchError, WatchResult},
};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: usize = 2;
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(200);

/// Execution-layer endpoint tier, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExecutionTier {
    Current,
    Mainnet,
    Archive,
}

impl std::fmt::Display for ExecutionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Current => write!(f, "current"),
            Self::Mainnet => write!(f, "mainnet"),
            Self::Archive => write!(f, "archive"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionEndpoint {
    pub url: String,
    pub tier: ExecutionTier,
    provider: RootProvider<Ethereum>,
    health: HealthTracker,
}

impl ExecutionEndpoint {
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        tier: ExecutionTier,
        provider: RootProvider<Ethereum>,
        health_config: HealthConfig,
    ) -> Self {
        Self {
            url: url.into(),
            tier,
            provider,
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

/// Ordered pool of execution-layer providers with retry, timeout and
/// declared-order failover.
#[derive(Debug, Clone)]
pub struct ExecutionPool {
    endpoints: Vec<ExecutionEndpoint>,
    call_timeout: Duration,
    max_retries: usize,
    min_delay: Duration,
}

impl ExecutionPool {
    /// Build the pool from configuration, connecting HTTP providers in
    /// declared order.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::NoEndpoints`] when no endpoint is configured and
    /// [`WatchError::Config`] on an unparsable URL.
    pub fn from_config(
        config: &ExecutionEndpointsConfig,
        health_config: HealthConfig,
    ) -> WatchResult<Self> {
        let tiers = [
            (ExecutionTier::Current, &config.current),
            (ExecutionTier::Mainnet, &config.mainnet),
            (ExecutionTier::Archive, &config.archive),
        ];
        let mut endpoints = Vec::new();
        for (tier, urls) in tiers {
            for url in urls {
                let parsed = url
                    .parse()
                    .map_err(|e| WatchError::Config(format!("endpoint url `{url}`: {e}")))?;
                let provider = RootProvider::new_http(parsed);
                endpoints.push(ExecutionEndpoint::new(
                    url.clone(),
                    tier,
                    provider,
                    health_config.clone(),
                ));
            }
        }
        Self::new(endpoints)
    }

    /// Build the pool from already-constructed endpoints, preserving order.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::NoEndpoints`] on an empty list.
    pub fn new(endpoints: Vec<ExecutionEndpoint>) -> WatchResult<Self> {
        if endpoints.is_empty() {
            return Err(WatchError::NoEndpoints);
        }
        Ok(Self {
            endpoints,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            min_delay: DEFAULT_MIN_DELAY,
        })
    }

    #[must_use]
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    #[must_use]
    pub fn endpoints(&self) -> &[ExecutionEndpoint] {
        &self.endpoints
    }

    /// Fetch logs matching `filter` from the first endpoint that answers.
    ///
    /// # Errors
    ///
    /// See [`ExecutionPool::execute`].
    pub async fn get_logs(&self, filter: &Filter) -> WatchResult<Vec<Log>> {
        self.execute(move |provider| async move { provider.get_logs(filter).await })
            .await
    }

    /// Fetch the latest block number from the first endpoint that answers.
    ///
    /// # Errors
    ///
    /// See [`ExecutionPool::execute`].
    pub async fn get_block_number(&self) -> WatchResult<u64> {
        self.execute(move |provider| async move { provider.get_block_number().await })
            .await
    }

    /// Run `operation` against endpoints in declared order until one succeeds.
    ///
    /// Dead endpoints outside their probe window are skipped. Each attempt
    /// retries with exponential backoff inside `call_timeout`; failure marks
    /// the endpoint and moves on.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::AllEndpointsUnavailable`] once every endpoint has
    /// been tried or skipped.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> WatchResult<T>
    where
        F: Fn(RootProvider<Ethereum>) -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let mut last_error = String::from("all endpoints skipped as dead");
        for endpoint in &self.endpoints {
            if !endpoint.health.allow() {
                continue;
            }
            match self.try_endpoint(endpoint, &operation).await {
                Ok(value) => {
                    endpoint.health.record_success();
                    return Ok(value);
                }
                Err(e) => {
                    endpoint.health.record_failure();
                    warn!(url = %endpoint.url, tier = %endpoint.tier, error = %e,
                        "endpoint failed, trying next");
                    last_error = e.to_string();
                }
            }
        }
        Err(WatchError::AllEndpointsUnavailable {
            tier_class: TierClass::Execution,
            last_error,
        })
    }

    /// One endpoint attempt: exponential backoff retries inside the call
    /// timeout.
    async fn try_endpoint<T, F, Fut>(
        &self,
        endpoint: &ExecutionEndpoint,
        operation: F,
    ) -> WatchResult<T>
    where
        F: Fn(RootProvider<Ethereum>) -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let retry_strategy = ExponentialBuilder::default()
            .with_max_times(self.max_retries)
            .with_min_delay(self.min_delay);

        timeout(
            self.call_timeout,
            (|| operation(endpoint.provider.clone()))
                .retry(retry_strategy)
                .notify(|err: &RpcError<TransportErrorKind>, dur: Duration| {
                    info!(error = %err, "RPC error, retrying after {:?}", dur);
                })
                .sleep(tokio::time::sleep),
        )
        .await
        .map_err(|_| WatchError::Timeout)?
        .map_err(WatchError::from)
    }
}
