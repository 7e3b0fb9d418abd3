//! Per-endpoint health bookkeeping.
//!
//! Health transitions:
//! - `Healthy` → `Degraded`:  first transport failure
//! - `Degraded` → `Dead`:     failure streak reaches `dead_threshold`
//! - `Dead` → `Degraded`:     `dead_cooldown` has elapsed, one probe allowed
//! - any → `Healthy`:         a call succeeds

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Health of a single configured endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointHealth {
    /// Last call succeeded.
    Healthy,
    /// Recent failures, still tried in order.
    Degraded,
    /// Skipped until the cooldown elapses, then one probe is allowed.
    Dead,
}

impl std::fmt::Display for EndpointHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Consecutive failures before the endpoint is marked dead.
    pub dead_threshold: u32,
    /// How long a dead endpoint is skipped before a probe is allowed.
    pub dead_cooldown: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            dead_threshold: 5,
            dead_cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct HealthInner {
    health: EndpointHealth,
    failure_streak: u32,
    total_failures: u64,
    dead_since: Option<Instant>,
    probing: bool,
}

/// Thread-safe health tracker, shared between the pool and status snapshots.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    config: HealthConfig,
    inner: Arc<Mutex<HealthInner>>,
}

impl HealthTracker {
    #[must_use]
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(HealthInner {
                health: EndpointHealth::Healthy,
                failure_streak: 0,
                total_failures: 0,
                dead_since: None,
                probing: false,
            })),
        }
    }

    /// Whether the pool may try this endpoint now.
    ///
    /// For a dead endpoint whose cooldown has elapsed this admits exactly one
    /// probe; further calls are rejected until the probe reports back.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().expect("health lock poisoned");
        match inner.health {
            EndpointHealth::Healthy | EndpointHealth::Degraded => true,
            EndpointHealth::Dead => {
                if inner.probing {
                    return false;
                }
                let elapsed = inner
                    .dead_since
                    .map(|since| since.elapsed())
                    .unwrap_or_default();
                if elapsed >= self.config.dead_cooldown {
                    inner.probing = true;
                    tracing::info!("dead endpoint cooldown elapsed, allowing probe");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("health lock poisoned");
        inner.health = EndpointHealth::Healthy;
        inner.failure_streak = 0;
        inner.dead_since = None;
        inner.probing = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("health lock poisoned");
        inner.failure_streak += 1;
        inner.total_failures += 1;
        inner.probing = false;
        if inner.failure_streak >= self.config.dead_threshold {
            if inner.health != EndpointHealth::Dead {
                tracing::warn!(streak = inner.failure_streak, "endpoint marked dead");
            }
            inner.health = EndpointHealth::Dead;
            inner.dead_since = Some(Instant::now());
        } else {
            inner.health = EndpointHealth::Degraded;
        }
    }

    #[must_use]
    pub fn health(&self) -> EndpointHealth {
        self.inner.lock().expect("health lock poisoned").health
    }

    /// Lifetime failure count, used by tests and status snapshots.
    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.inner
            .lock()
            .expect("health lock poisoned")
            .total_failures
    }
}
