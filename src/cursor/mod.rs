//! Durable scan progress: cursor plus dedup ledger.
//!
//! The only durable state in the system. The cursor records the last fully
//! processed block; the ledger records, per block inside the lookback window,
//! the block hash and every event identity already dispatched. Everything
//! else is rebuilt from configuration at startup.

mod file;
mod memory;

use std::collections::{BTreeMap, HashSet};

use alloy::primitives::B256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{error::WatchResult, types::EventIdentity};

pub use file::FileCursorStore;
pub use memory::MemoryCursorStore;

/// The persisted scan state document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanState {
    /// Last block whose batch was fully dispatched and committed; `None`
    /// before the first successful cycle.
    pub last_processed_block: Option<u64>,
    pub ledger: DedupLedger,
}

impl ScanState {
    /// First block of the next scan range.
    ///
    /// Re-scans `lookback` already-processed blocks to catch short reorgs,
    /// but never before `genesis`.
    #[must_use]
    pub fn next_from(&self, genesis: u64, lookback: u64) -> u64 {
        match self.last_processed_block {
            Some(last) => last.saturating_add(1).saturating_sub(lookback).max(genesis),
            None => genesis,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct BlockEntry {
    block_hash: B256,
    /// `(transaction_hash, log_index)` of every dispatched event in the block.
    seen: HashSet<(B256, u64)>,
}

/// Per-block record of dispatched event identities inside the lookback
/// window.
///
/// Keyed by block number; a hash mismatch at a recorded height means the
/// block was reorged out, so every identity recorded under the old hash is
/// invalidated and the replacement block's events dispatch fresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupLedger {
    blocks: BTreeMap<u64, BlockEntry>,
}

impl DedupLedger {
    /// Record the hash observed for a block this cycle.
    ///
    /// Returns `true` when a different hash was already recorded at that
    /// height, i.e. the prior entries were invalidated by a reorg.
    pub fn observe_block(&mut self, number: u64, hash: B256) -> bool {
        match self.blocks.get_mut(&number) {
            Some(entry) if entry.block_hash == hash => false,
            Some(entry) => {
                entry.block_hash = hash;
                entry.seen.clear();
                true
            }
            None => {
                self.blocks.insert(
                    number,
                    BlockEntry {
                        block_hash: hash,
                        seen: HashSet::new(),
                    },
                );
                false
            }
        }
    }

    /// Whether this exact identity was already dispatched.
    #[must_use]
    pub fn is_duplicate(&self, identity: &EventIdentity) -> bool {
        self.blocks
            .get(&identity.block_number)
            .is_some_and(|entry| {
                entry.block_hash == identity.block_hash
                    && entry
                        .seen
                        .contains(&(identity.transaction_hash, identity.log_index))
            })
    }

    /// Record a dispatched identity.
    pub fn mark_seen(&mut self, identity: &EventIdentity) {
        let entry = self
            .blocks
            .entry(identity.block_number)
            .or_insert_with(|| BlockEntry {
                block_hash: identity.block_hash,
                seen: HashSet::new(),
            });
        if entry.block_hash != identity.block_hash {
            entry.block_hash = identity.block_hash;
            entry.seen.clear();
        }
        entry
            .seen
            .insert((identity.transaction_hash, identity.log_index));
    }

    /// Drop entries below `cutoff`; they are outside the lookback window and
    /// will never be re-scanned.
    pub fn prune_below(&mut self, cutoff: u64) {
        self.blocks = self.blocks.split_off(&cutoff);
    }

    /// Number of blocks currently tracked.
    #[must_use]
    pub fn tracked_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Number of identities recorded for `block`.
    #[must_use]
    pub fn seen_at(&self, block: u64) -> usize {
        self.blocks.get(&block).map_or(0, |entry| entry.seen.len())
    }
}

/// Atomic persistence of the scan state document.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the persisted state; `None` on first run.
    async fn load(&self) -> WatchResult<Option<ScanState>>;

    /// Durably replace the persisted state. Must be atomic with respect to a
    /// process crash.
    async fn commit(&self, state: &ScanState) -> WatchResult<()>;
}

#[cfg(test)]
mod tests {
    use alloy::primitives::b256;

    use super::*;

    const HASH_A: B256 =
        b256!("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
    const HASH_B: B256 =
        b256!("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");

    fn identity(block: u64, log_index: u64, block_hash: B256) -> EventIdentity {
        EventIdentity {
            block_number: block,
            block_hash,
            transaction_hash: b256!(
                "0x1234123412341234123412341234123412341234123412341234123412341234"
            ),
            log_index,
        }
    }

    #[test]
    fn first_range_starts_at_genesis() {
        let state = ScanState::default();
        assert_eq!(state.next_from(1000, 8), 1000);
    }

    #[test]
    fn resumed_range_rewinds_by_lookback_but_not_before_genesis() {
        let state = ScanState {
            last_processed_block: Some(1499),
            ledger: DedupLedger::default(),
        };
        assert_eq!(state.next_from(1000, 8), 1492);

        let early = ScanState {
            last_processed_block: Some(1003),
            ledger: DedupLedger::default(),
        };
        assert_eq!(early.next_from(1000, 8), 1000);
    }

    #[test]
    fn marked_identities_are_duplicates() {
        let mut ledger = DedupLedger::default();
        let id = identity(100, 0, HASH_A);

        assert!(!ledger.is_duplicate(&id));
        ledger.mark_seen(&id);
        assert!(ledger.is_duplicate(&id));
        assert!(!ledger.is_duplicate(&identity(100, 1, HASH_A)));
    }

    #[test]
    fn reorged_block_invalidates_prior_entries() {
        let mut ledger = DedupLedger::default();
        let old = identity(100, 0, HASH_A);
        ledger.observe_block(100, HASH_A);
        ledger.mark_seen(&old);

        // Same height, new hash: a reorg replaced the block.
        assert!(ledger.observe_block(100, HASH_B));
        assert!(!ledger.is_duplicate(&old));

        let replacement = identity(100, 0, HASH_B);
        assert!(!ledger.is_duplicate(&replacement));
        ledger.mark_seen(&replacement);
        assert!(ledger.is_duplicate(&replacement));
    }

    #[test]
    fn repeated_observation_of_same_hash_is_not_a_reorg() {
        let mut ledger = DedupLedger::default();
        assert!(!ledger.observe_block(100, HASH_A));
        assert!(!ledger.observe_block(100, HASH_A));
    }

    #[test]
    fn prune_drops_entries_below_cutoff() {
        let mut ledger = DedupLedger::default();
        for block in 95..=105 {
            ledger.observe_block(block, HASH_A);
        }
        ledger.prune_below(100);

        assert_eq!(ledger.tracked_blocks(), 6);
        assert!(!ledger.observe_block(100, HASH_A));
        // 99 was pruned, so re-observing it is a fresh insert.
        assert!(!ledger.observe_block(99, HASH_B));
    }

    #[test]
    fn scan_state_round_trips_through_json() {
        let mut state = ScanState {
            last_processed_block: Some(1499),
            ledger: DedupLedger::default(),
        };
        state.ledger.observe_block(1499, HASH_A);
        state.ledger.mark_seen(&identity(1499, 7, HASH_A));

        let json = serde_json::to_string(&state).expect("serializes");
        let restored: ScanState = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(restored, state);
    }
}
