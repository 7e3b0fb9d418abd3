//! The sequential block-range scan loop.
//!
//! One cycle walks the phases fetch → decode → dispatch → commit over a
//! bounded block range. The range always re-covers `lookback` already
//! processed blocks so short reorgs are observed; the dedup ledger keeps the
//! overlap from re-notifying. Commit discipline: the ledger (with this
//! cycle's identities) is persisted before dispatch, the cursor advance
//! after, so a crash at any point either loses nothing or replays a range
//! whose identities are already suppressed.

use std::{sync::Arc, time::Duration};

use alloy::rpc::types::{Filter, Log};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    context::WatchContext,
    cursor::{CursorStore, ScanState},
    dispatch::EventDispatcher,
    endpoint_pool::ExecutionPool,
    error::{WatchError, WatchResult},
    registry::ContractRegistry,
    sink::{send_with_retry, NotificationSink, DEFAULT_SEND_RETRIES},
    types::{DecodedEvent, Payload},
};

/// Consecutive failed cycles before the operator is told the service is
/// interrupted.
const INTERRUPT_STREAK: u32 = 3;

/// Slowdown factor applied to the poll interval while cycles keep failing.
const ERROR_INTERVAL_FACTOR: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanPhase {
    Idle,
    FetchingRange,
    Decoding,
    Dispatching,
    Committing,
    FailedRetry,
}

impl std::fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::FetchingRange => write!(f, "fetching-range"),
            Self::Decoding => write!(f, "decoding"),
            Self::Dispatching => write!(f, "dispatching"),
            Self::Committing => write!(f, "committing"),
            Self::FailedRetry => write!(f, "failed-retry"),
        }
    }
}

/// Next scan range, or `None` when the confirmed head has not reached the
/// next unscanned block.
fn scan_range(
    state: &ScanState,
    genesis: u64,
    lookback: u64,
    batch_size: u64,
    head_limit: u64,
) -> Option<(u64, u64)> {
    let from = state.next_from(genesis, lookback);
    if head_limit < from {
        return None;
    }
    let to = from.saturating_add(batch_size.saturating_sub(1)).min(head_limit);
    Some((from, to))
}

pub struct BlockRangeScanner {
    execution: ExecutionPool,
    registry: ContractRegistry,
    dispatcher: EventDispatcher,
    store: Arc<dyn CursorStore>,
    sink: Arc<dyn NotificationSink>,
    genesis: u64,
    batch_size: u64,
    lookback: u64,
    confirmation_margin: u64,
    poll_interval: Duration,
    notify_corrections: bool,
    state: ScanState,
    phase: ScanPhase,
    failure_streak: u32,
    interrupt_notified: bool,
}

impl BlockRangeScanner {
    #[must_use]
    pub fn new(ctx: &WatchContext, dispatcher: EventDispatcher) -> Self {
        Self {
            execution: ctx.execution.clone(),
            registry: ctx.registry.clone(),
            dispatcher,
            store: Arc::clone(&ctx.store),
            sink: Arc::clone(&ctx.sink),
            genesis: ctx.config.events.genesis,
            batch_size: ctx.config.events.block_batch_size,
            lookback: ctx.config.events.lookback_distance,
            confirmation_margin: ctx.config.events.confirmation_margin,
            poll_interval: ctx.config.poll_interval(),
            notify_corrections: ctx.config.notify_corrections,
            state: ScanState::default(),
            phase: ScanPhase::Idle,
            failure_streak: 0,
            interrupt_notified: false,
        }
    }

    /// Load persisted progress; call before the first cycle.
    ///
    /// # Errors
    ///
    /// Propagates [`WatchError::Persistence`] from the store; a half-read
    /// state must halt startup, not silently rescan from genesis.
    pub async fn init(&mut self) -> WatchResult<()> {
        if let Some(state) = self.store.load().await? {
            info!(
                last_processed_block = ?state.last_processed_block,
                tracked_blocks = state.ledger.tracked_blocks(),
                "resuming from persisted scan state"
            );
            self.state = state;
        } else {
            info!(genesis = self.genesis, "no persisted state, starting at genesis");
        }
        Ok(())
    }

    #[must_use]
    pub fn state(&self) -> &ScanState {
        &self.state
    }

    #[must_use]
    pub fn execution(&self) -> &ExecutionPool {
        &self.execution
    }

    /// Run cycles until the shutdown signal flips.
    ///
    /// Transient cycle errors slow the loop down and, past a streak
    /// threshold, emit a service-interruption notice; only persistence
    /// failures abort.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error ([`WatchError::is_fatal`]).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> WatchResult<()> {
        self.init().await?;
        loop {
            if *shutdown.borrow() {
                info!("scanner shutting down");
                return Ok(());
            }

            let sleep_for = match self.run_cycle().await {
                Ok(caught_up) => {
                    self.on_cycle_success();
                    if caught_up {
                        self.poll_interval
                    } else {
                        // Backlog remains; start the next batch right away.
                        continue;
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "fatal scanner error");
                    return Err(e);
                }
                Err(e) => {
                    self.on_cycle_error(&e).await;
                    self.poll_interval * ERROR_INTERVAL_FACTOR
                }
            };

            tokio::select! {
                () = tokio::time::sleep(sleep_for) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// One full scan cycle. Returns `true` when the confirmed head was
    /// reached, i.e. the caller should wait for new blocks.
    ///
    /// # Errors
    ///
    /// Transient upstream errors leave the cursor untouched; persistence
    /// errors are fatal to the caller.
    pub async fn run_cycle(&mut self) -> WatchResult<bool> {
        self.phase = ScanPhase::FetchingRange;
        let head = self.execution.get_block_number().await?;
        let head_limit = head.saturating_sub(self.confirmation_margin);

        let Some((from, to)) = scan_range(
            &self.state,
            self.genesis,
            self.lookback,
            self.batch_size,
            head_limit,
        ) else {
            debug!(head_limit, "no new confirmed blocks");
            self.phase = ScanPhase::Idle;
            return Ok(true);
        };

        debug!(from, to, phase = %self.phase, "scanning range");
        // An empty address set would match every contract on chain.
        let mut logs = if self.registry.is_empty() {
            Vec::new()
        } else {
            let filter = Filter::new()
                .address(self.registry.addresses())
                .from_block(from)
                .to_block(to);
            self.execution.get_logs(&filter).await?
        };
        logs.sort_by_key(|log| (log.block_number, log.log_index));

        self.phase = ScanPhase::Decoding;
        let reorged = self.observe_blocks(&logs);
        let events = self.decode_new(&logs);

        // Ledger first: once these identities are durable, a crash during
        // dispatch replays the range without re-notifying. No pruning here:
        // until the cursor advance is durable, a replay starts from the old
        // cursor and must still find the old window's identities.
        self.phase = ScanPhase::Committing;
        for event in &events {
            self.state.ledger.mark_seen(&event.identity);
        }
        self.store.commit(&self.state).await?;

        self.phase = ScanPhase::Dispatching;
        if !reorged.is_empty() {
            self.notify_reorg(&reorged).await;
        }
        let mut dispatched = 0usize;
        for event in &events {
            for (channel, payload) in self.dispatcher.dispatch(event) {
                send_with_retry(self.sink.as_ref(), channel, &payload, DEFAULT_SEND_RETRIES)
                    .await;
                dispatched += 1;
            }
        }

        self.phase = ScanPhase::Committing;
        // Monotonic even if an inconsistent endpoint reported a lower head.
        let advanced = self
            .state
            .last_processed_block
            .map_or(to, |last| last.max(to));
        self.state.last_processed_block = Some(advanced);
        // Prune in the same commit that advances the cursor: entries below
        // the new lookback window are unreachable only once the cursor is
        // durable.
        let cutoff = advanced.saturating_add(1).saturating_sub(self.lookback);
        self.state.ledger.prune_below(cutoff);
        self.store.commit(&self.state).await?;
        self.phase = ScanPhase::Idle;

        info!(
            from,
            to,
            events = events.len(),
            dispatched,
            reorged_blocks = reorged.len(),
            "cycle committed"
        );
        Ok(to == head_limit)
    }

    /// Record every (block, hash) pair seen in the logs, collecting heights
    /// where the hash contradicts the ledger.
    fn observe_blocks(&mut self, logs: &[Log]) -> Vec<u64> {
        let mut reorged = Vec::new();
        for log in logs {
            let (Some(number), Some(hash)) = (log.block_number, log.block_hash) else {
                continue;
            };
            if self.state.ledger.observe_block(number, hash) {
                warn!(block_number = number, "block hash changed inside lookback window");
                reorged.push(number);
            }
        }
        reorged.dedup();
        reorged
    }

    /// Decode logs against the registry, dropping unknown contracts
    /// silently, mismatches loudly, and already-seen identities quietly.
    fn decode_new(&self, logs: &[Log]) -> Vec<DecodedEvent> {
        let mut events = Vec::new();
        for log in logs {
            let event = match self.registry.decode(log) {
                Ok(event) => event,
                Err(WatchError::UnknownContract(_)) => continue,
                Err(e) => {
                    warn!(error = %e, "skipping undecodable log");
                    continue;
                }
            };
            if self.state.ledger.is_duplicate(&event.identity) {
                continue;
            }
            events.push(event);
        }
        events.sort_by_key(DecodedEvent::score);
        events
    }

    async fn notify_reorg(&self, heights: &[u64]) {
        if !self.notify_corrections {
            return;
        }
        let body = format!(
            "Blocks replaced by a chain reorganization: {}.\n\
             Earlier notifications for these blocks may describe discarded transactions.",
            heights
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        let payload = Payload::new("Chain reorganization detected", body);
        send_with_retry(
            self.sink.as_ref(),
            self.dispatcher.channels().default_channel(),
            &payload,
            DEFAULT_SEND_RETRIES,
        )
        .await;
    }

    fn on_cycle_success(&mut self) {
        if self.interrupt_notified {
            info!("scan loop recovered");
        }
        self.failure_streak = 0;
        self.interrupt_notified = false;
    }

    async fn on_cycle_error(&mut self, error: &WatchError) {
        self.phase = ScanPhase::FailedRetry;
        self.failure_streak += 1;
        warn!(
            error = %error,
            streak = self.failure_streak,
            phase = %self.phase,
            "scan cycle failed, slowing down"
        );
        if self.failure_streak >= INTERRUPT_STREAK && !self.interrupt_notified {
            self.interrupt_notified = true;
            let payload = Payload::new(
                "service_interrupted",
                format!("Event scanning has failed {} times in a row: {error}", self.failure_streak),
            );
            send_with_retry(
                self.sink.as_ref(),
                self.dispatcher.channels().default_channel(),
                &payload,
                DEFAULT_SEND_RETRIES,
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(last: Option<u64>) -> ScanState {
        ScanState {
            last_processed_block: last,
            ..ScanState::default()
        }
    }

    #[test]
    fn first_cycle_spans_genesis_to_batch_end() {
        // genesis=1000, batch=500, head=1499: the whole backlog fits.
        assert_eq!(
            scan_range(&state(None), 1000, 8, 500, 1499),
            Some((1000, 1499))
        );
    }

    #[test]
    fn resumed_cycle_rewinds_by_lookback() {
        // After [1000,1499], head at 1510: rescan the 8-block tail.
        assert_eq!(
            scan_range(&state(Some(1499)), 1000, 8, 500, 1510),
            Some((1492, 1510))
        );
    }

    #[test]
    fn batch_size_caps_the_range() {
        assert_eq!(
            scan_range(&state(None), 0, 8, 100, 10_000),
            Some((0, 99))
        );
    }

    #[test]
    fn no_range_when_head_is_behind() {
        // Lookback still reaches back, so a head just below `from` waits.
        assert_eq!(scan_range(&state(Some(100)), 0, 0, 500, 100), None);
        // With lookback the overlap alone is re-scanned.
        assert_eq!(
            scan_range(&state(Some(100)), 0, 8, 500, 100),
            Some((93, 100))
        );
    }

    #[test]
    fn head_before_genesis_yields_nothing() {
        assert_eq!(scan_range(&state(None), 1000, 8, 500, 999), None);
    }
}
