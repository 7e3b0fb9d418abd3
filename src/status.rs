//! Periodic status messages with per-channel cooldown.
//!
//! Runs on its own timer, decoupled from block progress. Each tick takes one
//! protocol snapshot and hands it to every status plugin whose channel is
//! due. A plugin failure is logged and still consumes the cooldown, so a
//! broken plugin cannot retry-storm its channel.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    config::Config,
    endpoint_pool::{ConsensusPool, ExecutionPool},
    error::{WatchError, WatchResult},
    sink::{send_with_retry, NotificationSink, DEFAULT_SEND_RETRIES},
    types::{ChannelId, Payload},
};

const STATUS_TICK: Duration = Duration::from_secs(30);

/// One upstream snapshot per tick, shared by every due plugin.
#[derive(Debug, Clone)]
pub struct ProtocolSnapshot {
    /// Latest execution-layer block, if any endpoint answered.
    pub execution_head: Option<u64>,
    /// Beacon head slot, if a consensus endpoint answered.
    pub beacon_slot: Option<u64>,
    pub taken_at: DateTime<Utc>,
}

/// A status summary plugin.
pub trait StatusModule: Send + Sync {
    fn name(&self) -> &str;

    /// Render the snapshot into a payload.
    ///
    /// # Errors
    ///
    /// A message describing the failure; it is logged and the channel's
    /// cooldown still applies.
    fn status(&self, snapshot: &ProtocolSnapshot) -> Result<Payload, String>;
}

struct StatusChannelState {
    name: String,
    plugin: String,
    channel: ChannelId,
    cooldown: Duration,
    last_emitted: Option<Instant>,
}

impl StatusChannelState {
    fn due(&self, now: Instant) -> bool {
        self.last_emitted
            .is_none_or(|at| now.duration_since(at) >= self.cooldown)
    }
}

pub struct StatusCooldownManager {
    execution: ExecutionPool,
    consensus: ConsensusPool,
    sink: Arc<dyn NotificationSink>,
    plugins: HashMap<String, Box<dyn StatusModule>>,
    channels: Vec<StatusChannelState>,
    footer: String,
}

impl StatusCooldownManager {
    /// Build the manager from the `[status.<name>]` config entries.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Config`] when an entry names an unknown plugin.
    /// Unknown channels were already rejected by config validation.
    pub fn from_config(
        config: &Config,
        plugins: Vec<Box<dyn StatusModule>>,
        execution: ExecutionPool,
        consensus: ConsensusPool,
        sink: Arc<dyn NotificationSink>,
        footer: String,
    ) -> WatchResult<Self> {
        let plugins: HashMap<String, Box<dyn StatusModule>> = plugins
            .into_iter()
            .map(|plugin| (plugin.name().to_string(), plugin))
            .collect();

        let mut channels = Vec::new();
        for (name, status) in &config.status {
            if !plugins.contains_key(&status.plugin) {
                return Err(WatchError::Config(format!(
                    "status `{name}` references unknown plugin `{}`",
                    status.plugin
                )));
            }
            let channel = *config
                .channels
                .get(&status.channel)
                .ok_or_else(|| WatchError::Config(format!("unknown channel {}", status.channel)))?;
            channels.push(StatusChannelState {
                name: name.clone(),
                plugin: status.plugin.clone(),
                channel,
                cooldown: Duration::from_secs(status.cooldown_secs),
                last_emitted: None,
            });
        }

        Ok(Self {
            execution,
            consensus,
            sink,
            plugins,
            channels,
            footer,
        })
    }

    /// Run until the shutdown signal flips.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(STATUS_TICK);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick_once(Instant::now()).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("status manager shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// One tick: snapshot once, emit to every due channel.
    pub async fn tick_once(&mut self, now: Instant) {
        if !self.channels.iter().any(|c| c.due(now)) {
            return;
        }
        let snapshot = self.snapshot().await;

        for channel in &mut self.channels {
            if !channel.due(now) {
                continue;
            }
            channel.last_emitted = Some(now);
            let plugin = self
                .plugins
                .get(&channel.plugin)
                .expect("plugin presence checked at startup");
            match plugin.status(&snapshot) {
                Ok(payload) => {
                    let payload = payload.with_footer(self.footer.clone());
                    send_with_retry(
                        self.sink.as_ref(),
                        channel.channel,
                        &payload,
                        DEFAULT_SEND_RETRIES,
                    )
                    .await;
                }
                Err(reason) => {
                    warn!(
                        status = %channel.name,
                        plugin = %channel.plugin,
                        %reason,
                        "status plugin failed, waiting out cooldown"
                    );
                }
            }
        }
    }

    async fn snapshot(&self) -> ProtocolSnapshot {
        let execution_head = match self.execution.get_block_number().await {
            Ok(head) => Some(head),
            Err(e) => {
                warn!(error = %e, "status snapshot missing execution head");
                None
            }
        };
        let beacon_slot = if self.consensus.is_empty() {
            None
        } else {
            match self.consensus.head_slot().await {
                Ok(slot) => Some(slot),
                Err(e) => {
                    warn!(error = %e, "status snapshot missing beacon slot");
                    None
                }
            }
        };
        ProtocolSnapshot {
            execution_head,
            beacon_slot,
            taken_at: Utc::now(),
        }
    }
}
