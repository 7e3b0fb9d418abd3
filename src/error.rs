use std::sync::Arc;

use alloy::{
    primitives::Address,
    transports::{RpcError, TransportErrorKind},
};
use thiserror::Error;

use crate::endpoint_pool::TierClass;

pub type WatchResult<T> = Result<T, WatchError>;

/// Errors emitted by the watcher.
///
/// Most variants are local to a unit of work smaller than a batch commit (a
/// single log, event or module invocation) and are logged and skipped by the
/// scan loop. Only [`WatchError::Persistence`] halts the loop, since resuming
/// on a half-applied commit risks double notification.
#[derive(Error, Debug)]
pub enum WatchError {
    /// The underlying RPC transport returned an error.
    #[error("RPC error: {0}")]
    Rpc(Arc<RpcError<TransportErrorKind>>),

    /// A timeout elapsed while waiting for an upstream response.
    #[error("operation timed out")]
    Timeout,

    /// Every endpoint in a tier class has been tried and failed.
    #[error("all {tier_class} endpoints unavailable, last error: {last_error}")]
    AllEndpointsUnavailable {
        tier_class: TierClass,
        last_error: String,
    },

    /// An HTTP request to a consensus-layer endpoint failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A log was emitted by an address with no registered contract.
    ///
    /// Third-party contracts share block ranges with registered ones, so this
    /// is an expected per-log outcome, skipped without logging noise.
    #[error("no contract registered at {0}")]
    UnknownContract(Address),

    /// A log did not match the registered ABI for its contract.
    #[error("log does not match ABI for {alias}.{event}: {reason}")]
    DecodeMismatch {
        alias: String,
        event: String,
        reason: String,
    },

    /// A module failed while handling a decoded event.
    #[error("module {module} failed: {reason}")]
    Dispatch { module: String, reason: String },

    /// The cursor store could not complete an atomic read or write.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// The configuration is unusable; startup aborts with this error.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The configured block batch size is invalid (must be greater than zero).
    #[error("block batch size must be greater than 0")]
    InvalidBatchSize,

    /// The lookback distance must stay below the batch size, or the cursor
    /// could move backwards.
    #[error("lookback distance must be smaller than the block batch size")]
    InvalidLookback,

    /// No execution-layer endpoint was configured.
    #[error("at least one execution-layer endpoint is required")]
    NoEndpoints,
}

impl From<RpcError<TransportErrorKind>> for WatchError {
    fn from(error: RpcError<TransportErrorKind>) -> Self {
        WatchError::Rpc(Arc::new(error))
    }
}

impl WatchError {
    /// True for errors that must stop the scan loop instead of being retried.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, WatchError::Persistence(_) | WatchError::Config(_))
    }
}
