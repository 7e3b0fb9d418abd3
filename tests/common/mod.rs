//! Shared harness: mocked transports, an in-memory store, and a recording
//! sink wired into a scanner.

// Each integration test binary uses its own slice of the harness.
#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use alloy::{
    network::Ethereum,
    primitives::{address, Address, B256, U256},
    providers::{mock::Asserter, RootProvider},
    rpc::{client::RpcClient, types::Log},
    sol,
    sol_types::SolEvent,
};
use async_trait::async_trait;

use blockwatch::{
    dispatch::EventDispatcher,
    endpoint_pool::{
        ConsensusPool, ExecutionEndpoint, ExecutionPool, ExecutionTier, HealthConfig,
    },
    BlockRangeScanner, ChannelId, Config, ContractRegistry, CursorStore, MemoryCursorStore,
    NotificationSink, Payload, RawEventModule, ScanState, WatchContext, WatchError, WatchResult,
};

sol! {
    event Deposit(address indexed from, uint256 amount);
}

pub const DEPOSIT_ABI: &str = r#"[
    {
        "type": "event",
        "name": "Deposit",
        "inputs": [
            { "name": "from", "type": "address", "indexed": true },
            { "name": "amount", "type": "uint256", "indexed": false }
        ],
        "anonymous": false
    }
]"#;

pub const POOL: Address = address!("0x1000000000000000000000000000000000000001");
pub const SENDER: Address = address!("0xd8dA6BF26964af9d7eed9e03e53415d37aa96045");

pub const DEFAULT_CHANNEL: ChannelId = 1;
pub const DEPOSIT_CHANNEL: ChannelId = 2;

/// Records every delivered payload.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(ChannelId, Payload)>>,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<(ChannelId, Payload)> {
        self.sent.lock().expect("sink lock").clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, channel: ChannelId, payload: &Payload) -> WatchResult<()> {
        self.sent
            .lock()
            .expect("sink lock")
            .push((channel, payload.clone()));
        Ok(())
    }
}

/// Delegates to an in-memory store but fails one chosen commit, simulating
/// a process crash at that point. Commits are counted from 1.
pub struct FlakyCursorStore {
    inner: Arc<MemoryCursorStore>,
    commits: AtomicUsize,
    fail_on: usize,
}

impl FlakyCursorStore {
    pub fn new(inner: Arc<MemoryCursorStore>, fail_on: usize) -> Self {
        Self {
            inner,
            commits: AtomicUsize::new(0),
            fail_on,
        }
    }
}

#[async_trait]
impl CursorStore for FlakyCursorStore {
    async fn load(&self) -> WatchResult<Option<ScanState>> {
        self.inner.load().await
    }

    async fn commit(&self, state: &ScanState) -> WatchResult<()> {
        let n = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on {
            return Err(WatchError::Persistence("simulated crash during commit".into()));
        }
        self.inner.commit(state).await
    }
}

pub struct Harness {
    pub scanner: BlockRangeScanner,
    pub asserter: Asserter,
    pub sink: Arc<RecordingSink>,
    pub store: Arc<MemoryCursorStore>,
}

fn test_config(notify_corrections: bool) -> Config {
    // Top-level keys must precede the first table header.
    let text = format!(
        r#"
        notify_corrections = {notify_corrections}

        [endpoints.execution]
        current = ["http://localhost:8545"]

        [events]
        genesis = 1000
        block_batch_size = 500
        lookback_distance = 8
        confirmation_margin = 0

        [channels]
        default = {DEFAULT_CHANNEL}
        Deposit = {DEPOSIT_CHANNEL}
        "#
    );
    toml::from_str(&text).expect("test config parses")
}

pub fn mock_endpoint(name: &str) -> (Asserter, ExecutionEndpoint) {
    let asserter = Asserter::new();
    let provider = RootProvider::<Ethereum>::new(RpcClient::mocked(asserter.clone()));
    let endpoint = ExecutionEndpoint::new(
        name,
        ExecutionTier::Current,
        provider,
        HealthConfig::default(),
    );
    (asserter, endpoint)
}

/// Wire a scanner over the test config, registry, and the given store/sink.
pub fn build_scanner(
    endpoints: Vec<ExecutionEndpoint>,
    notify_corrections: bool,
    store: Arc<dyn CursorStore>,
    sink: Arc<RecordingSink>,
) -> BlockRangeScanner {
    let config = test_config(notify_corrections);

    let execution = ExecutionPool::new(endpoints)
        .expect("pool")
        .with_max_retries(0)
        .with_min_delay(std::time::Duration::from_millis(1));
    let consensus =
        ConsensusPool::from_config(&config.endpoints.consensus, HealthConfig::default())
            .expect("consensus pool");

    let abi = serde_json::from_str(DEPOSIT_ABI).expect("valid ABI");
    let mut registry = ContractRegistry::new();
    registry.register("pool", POOL, &abi).expect("registers");

    let dispatcher = EventDispatcher::from_config(&config, vec![Box::new(RawEventModule)])
        .expect("dispatcher");
    let ctx = WatchContext {
        config,
        execution,
        consensus,
        registry,
        store,
        sink: sink.clone() as Arc<dyn NotificationSink>,
    };
    BlockRangeScanner::new(&ctx, dispatcher)
}

pub fn harness_with_endpoints(
    endpoints: Vec<ExecutionEndpoint>,
    asserter: Asserter,
    notify_corrections: bool,
    initial: Option<ScanState>,
) -> Harness {
    let store = Arc::new(match initial {
        Some(state) => MemoryCursorStore::with_state(state),
        None => MemoryCursorStore::new(),
    });
    let sink = Arc::new(RecordingSink::default());
    let scanner = build_scanner(
        endpoints,
        notify_corrections,
        store.clone() as Arc<dyn CursorStore>,
        sink.clone(),
    );

    Harness {
        scanner,
        asserter,
        sink,
        store,
    }
}

pub fn harness(notify_corrections: bool, initial: Option<ScanState>) -> Harness {
    let (asserter, endpoint) = mock_endpoint("primary");
    harness_with_endpoints(vec![endpoint], asserter, notify_corrections, initial)
}

/// Deterministic per-block hash for test chains.
pub fn block_hash(block: u64, fork: u8) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&block.to_be_bytes());
    bytes[31] = fork;
    B256::from(bytes)
}

pub fn tx_hash(seed: u64) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[0] = 0x77;
    bytes[24..].copy_from_slice(&seed.to_be_bytes());
    B256::from(bytes)
}

pub fn deposit_log(block: u64, log_index: u64, hash: B256, transaction_hash: B256) -> Log {
    let data = Deposit {
        from: SENDER,
        amount: U256::from(1_000u64),
    }
    .encode_log_data();
    Log {
        inner: alloy::primitives::Log {
            address: POOL,
            data,
        },
        block_number: Some(block),
        block_hash: Some(hash),
        transaction_hash: Some(transaction_hash),
        log_index: Some(log_index),
        ..Default::default()
    }
}

/// Queue one cycle's worth of responses: the head, then the logs.
pub fn push_cycle(asserter: &Asserter, head: u64, logs: &[Log]) {
    asserter.push_success(&format!("0x{head:x}"));
    asserter.push_success(&logs.to_vec());
}
