//! End-to-end scan cycles against mocked transports.

mod common;

use std::sync::Arc;

use blockwatch::{
    CursorStore, DedupLedger, EventIdentity, MemoryCursorStore, ScanState, WatchError,
};

use common::{
    block_hash, build_scanner, deposit_log, harness, mock_endpoint, push_cycle, tx_hash,
    FlakyCursorStore, RecordingSink, DEFAULT_CHANNEL, DEPOSIT_CHANNEL,
};

#[tokio::test]
async fn first_cycle_scans_genesis_to_head_and_commits() {
    let mut h = harness(false, None);
    h.scanner.init().await.expect("init");

    let log = deposit_log(1200, 0, block_hash(1200, 0), tx_hash(1));
    push_cycle(&h.asserter, 1499, &[log]);

    let caught_up = h.scanner.run_cycle().await.expect("cycle");
    assert!(caught_up);

    let state = h.store.snapshot().expect("committed");
    assert_eq!(state.last_processed_block, Some(1499));

    let sent = h.sink.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, DEPOSIT_CHANNEL);
    assert_eq!(sent[0].1.title, "pool.Deposit");
    assert_eq!(sent[0].1.block_number, Some(1200));
}

#[tokio::test]
async fn lookback_overlap_re_detects_but_does_not_re_notify() {
    let mut h = harness(false, None);
    h.scanner.init().await.expect("init");

    // Cycle 1: genesis=1000, batch=500, head=1499 → [1000, 1499].
    let old = deposit_log(1495, 0, block_hash(1495, 0), tx_hash(1));
    push_cycle(&h.asserter, 1499, &[old.clone()]);
    assert!(h.scanner.run_cycle().await.expect("cycle 1"));

    // Cycle 2: head=1510 → [1492, 1510]; the old event reappears in the
    // overlap alongside one genuinely new event.
    let new = deposit_log(1505, 0, block_hash(1505, 0), tx_hash(2));
    push_cycle(&h.asserter, 1510, &[old, new]);
    assert!(h.scanner.run_cycle().await.expect("cycle 2"));

    let state = h.store.snapshot().expect("committed");
    assert_eq!(state.last_processed_block, Some(1510));

    let sent = h.sink.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].1.block_number, Some(1495));
    assert_eq!(sent[1].1.block_number, Some(1505));
}

#[tokio::test]
async fn replayed_range_after_crash_does_not_re_notify() {
    // Simulate a crash between dispatch and cursor commit: the ledger holds
    // the identity, the cursor still points before the range.
    let identity = EventIdentity {
        block_number: 1495,
        block_hash: block_hash(1495, 0),
        transaction_hash: tx_hash(1),
        log_index: 0,
    };
    let mut ledger = DedupLedger::default();
    ledger.observe_block(1495, block_hash(1495, 0));
    ledger.mark_seen(&identity);
    let crashed = ScanState {
        last_processed_block: Some(1491),
        ledger,
    };

    let mut h = harness(false, Some(crashed));
    h.scanner.init().await.expect("init");

    let replayed = deposit_log(1495, 0, block_hash(1495, 0), tx_hash(1));
    push_cycle(&h.asserter, 1499, &[replayed]);
    assert!(h.scanner.run_cycle().await.expect("cycle"));

    // The range is replayed, the notification is not.
    assert!(h.sink.sent().is_empty());
    let state = h.store.snapshot().expect("committed");
    assert_eq!(state.last_processed_block, Some(1499));
}

#[tokio::test]
async fn crash_on_cursor_commit_keeps_old_window_identities() {
    // Cycle 2 advances the window well past cycle 1's; a crash on its cursor
    // commit must leave the old window's identities in the durable ledger,
    // since the replay restarts from the old cursor.
    let (asserter, endpoint) = mock_endpoint("primary");
    let durable = Arc::new(MemoryCursorStore::new());
    // Commits 1-2 belong to cycle 1, commit 3 is cycle 2's ledger write,
    // commit 4 is cycle 2's cursor advance.
    let flaky = Arc::new(FlakyCursorStore::new(durable.clone(), 4));
    let sink = Arc::new(RecordingSink::default());
    let mut scanner = build_scanner(
        vec![endpoint],
        false,
        flaky as Arc<dyn CursorStore>,
        sink.clone(),
    );
    scanner.init().await.expect("init");

    // Cycle 1: [1000, 1499], one dispatched event at 1495.
    let old = deposit_log(1495, 0, block_hash(1495, 0), tx_hash(1));
    push_cycle(&asserter, 1499, &[old.clone()]);
    assert!(scanner.run_cycle().await.expect("cycle 1"));
    assert_eq!(sink.sent().len(), 1);

    // Cycle 2: head 1999 → [1492, 1991], duplicate suppressed, then the
    // cursor commit "crashes".
    push_cycle(&asserter, 1999, &[old.clone()]);
    let result = scanner.run_cycle().await;
    assert!(matches!(result, Err(WatchError::Persistence(_))));

    let survived = durable.snapshot().expect("cycle 2 ledger commit survived");
    assert_eq!(survived.last_processed_block, Some(1499));

    // Restart over the surviving state: the replay covers 1495 again and
    // must stay silent.
    let (asserter2, endpoint2) = mock_endpoint("primary");
    let sink2 = Arc::new(RecordingSink::default());
    let mut resumed = build_scanner(
        vec![endpoint2],
        false,
        durable.clone() as Arc<dyn CursorStore>,
        sink2.clone(),
    );
    resumed.init().await.expect("init after restart");

    push_cycle(&asserter2, 1999, &[old]);
    assert!(!resumed.run_cycle().await.expect("replay cycle"));

    assert!(sink2.sent().is_empty());
    assert_eq!(
        durable.snapshot().expect("committed").last_processed_block,
        Some(1991)
    );
}

#[tokio::test]
async fn reorg_inside_lookback_invalidates_and_re_notifies() {
    let mut h = harness(true, None);
    h.scanner.init().await.expect("init");

    // Cycle 1 dispatches an event at height 1495 on fork 0.
    let original = deposit_log(1495, 0, block_hash(1495, 0), tx_hash(1));
    push_cycle(&h.asserter, 1499, &[original]);
    assert!(h.scanner.run_cycle().await.expect("cycle 1"));
    assert_eq!(h.sink.sent().len(), 1);

    // Cycle 2 sees a different hash at 1495: the block was replaced and the
    // replacement carries a different transaction.
    let replacement = deposit_log(1495, 0, block_hash(1495, 1), tx_hash(9));
    push_cycle(&h.asserter, 1510, &[replacement]);
    assert!(h.scanner.run_cycle().await.expect("cycle 2"));

    let sent = h.sink.sent();
    assert_eq!(sent.len(), 3);

    // Correction notice to the default channel first, then the replacement
    // event through normal routing.
    assert_eq!(sent[1].0, DEFAULT_CHANNEL);
    assert_eq!(sent[1].1.title, "Chain reorganization detected");
    assert!(sent[1].1.body.contains("1495"));
    assert_eq!(sent[2].0, DEPOSIT_CHANNEL);
    assert_eq!(sent[2].1.block_number, Some(1495));
}

#[tokio::test]
async fn reorg_correction_notice_is_off_by_default() {
    let mut h = harness(false, None);
    h.scanner.init().await.expect("init");

    let original = deposit_log(1495, 0, block_hash(1495, 0), tx_hash(1));
    push_cycle(&h.asserter, 1499, &[original]);
    assert!(h.scanner.run_cycle().await.expect("cycle 1"));

    let replacement = deposit_log(1495, 0, block_hash(1495, 1), tx_hash(9));
    push_cycle(&h.asserter, 1510, &[replacement]);
    assert!(h.scanner.run_cycle().await.expect("cycle 2"));

    // Replacement event is re-notified, but no operator correction is sent.
    let sent = h.sink.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|(channel, _)| *channel == DEPOSIT_CHANNEL));
}

#[tokio::test]
async fn idle_when_head_has_not_advanced() {
    let mut h = harness(false, None);
    h.scanner.init().await.expect("init");

    push_cycle(&h.asserter, 1499, &[]);
    assert!(h.scanner.run_cycle().await.expect("cycle 1"));

    // Head unchanged: only the lookback overlap is re-scanned, empty.
    push_cycle(&h.asserter, 1499, &[]);
    assert!(h.scanner.run_cycle().await.expect("cycle 2"));

    assert!(h.sink.sent().is_empty());
    let state = h.store.snapshot().expect("committed");
    assert_eq!(state.last_processed_block, Some(1499));
}

#[tokio::test]
async fn backlog_is_consumed_in_batches() {
    let mut h = harness(false, None);
    h.scanner.init().await.expect("init");

    // Head far ahead of genesis: the first cycle stops at the batch cap and
    // reports more work pending.
    push_cycle(&h.asserter, 2200, &[]);
    let caught_up = h.scanner.run_cycle().await.expect("cycle 1");
    assert!(!caught_up);
    assert_eq!(
        h.store.snapshot().expect("committed").last_processed_block,
        Some(1499)
    );

    push_cycle(&h.asserter, 2200, &[]);
    let caught_up = h.scanner.run_cycle().await.expect("cycle 2");
    assert!(!caught_up);

    push_cycle(&h.asserter, 2200, &[]);
    let caught_up = h.scanner.run_cycle().await.expect("cycle 3");
    assert!(caught_up);
    assert_eq!(
        h.store.snapshot().expect("committed").last_processed_block,
        Some(2200)
    );
}
