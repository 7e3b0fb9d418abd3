//! Ordered, health-checked pools of upstream RPC endpoints.
//!
//! Two pools exist: a tiered execution-layer pool over alloy providers and a
//! flat consensus-layer pool over the beacon REST API. Both try endpoints in
//! declared order, track per-endpoint health, and skip dead endpoints until a
//! cooldown admits a probe.

mod consensus;
mod execution;
mod health;

pub use consensus::{ConsensusEndpoint, ConsensusPool};
pub use execution::{ExecutionEndpoint, ExecutionPool, ExecutionTier};
pub use health::{EndpointHealth, HealthConfig, HealthTracker};

/// Which pool an exhaustion error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierClass {
    Execution,
    Consensus,
}

impl std::fmt::Display for TierClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Execution => write!(f, "execution-layer"),
            Self::Consensus => write!(f, "consensus-layer"),
        }
    }
}
