use alloy::{dyn_abi::DynSolValue, primitives::B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Target channel for a notification payload.
pub type ChannelId = u64;

/// Deduplication key of a single emitted log.
///
/// The block hash is part of the identity: after a reorg the same
/// (block number, log index) position can carry a different event, and the
/// ledger must not treat the replacement as already seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventIdentity {
    pub block_number: u64,
    pub block_hash: B256,
    pub transaction_hash: B256,
    pub log_index: u64,
}

/// A log decoded against a registered contract ABI.
///
/// Ephemeral: produced per scan cycle, consumed by the dispatcher, never
/// persisted beyond the dedup ledger entry for its identity.
#[derive(Debug, Clone)]
pub struct DecodedEvent {
    /// Alias of the registered contract that emitted the log.
    pub contract: String,
    /// ABI event name.
    pub name: String,
    pub block_number: u64,
    pub identity: EventIdentity,
    /// Field values in ABI declaration order, paired with their names.
    pub fields: Vec<(String, DynSolValue)>,
}

impl DecodedEvent {
    /// Ordering key within a batch: blocks ascending, then original log order.
    #[must_use]
    pub fn score(&self) -> u128 {
        (u128::from(self.block_number) << 64) | u128::from(self.identity.log_index)
    }
}

/// A renderable notification produced by a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub title: String,
    pub body: String,
    /// Event name for channel routing; `None` for status and operator notices.
    pub event_name: Option<String>,
    pub block_number: Option<u64>,
    pub time_seen: DateTime<Utc>,
    /// Footer metadata, e.g. "tracking mainnet using 2 modules".
    pub footer: Option<String>,
}

impl Payload {
    #[must_use]
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            event_name: None,
            block_number: None,
            time_seen: Utc::now(),
            footer: None,
        }
    }

    #[must_use]
    pub fn for_event(mut self, event_name: impl Into<String>, block_number: u64) -> Self {
        self.event_name = Some(event_name.into());
        self.block_number = Some(block_number);
        self
    }

    #[must_use]
    pub fn with_footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }
}

/// Renders a decoded ABI value for inclusion in a payload body.
#[must_use]
pub fn format_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Address(a) => format!("{a}"),
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Uint(v, _) => v.to_string(),
        DynSolValue::Int(v, _) => v.to_string(),
        DynSolValue::String(s) => s.clone(),
        DynSolValue::Bytes(b) => format!("0x{}", alloy::hex::encode(b)),
        DynSolValue::FixedBytes(b, size) => {
            format!("0x{}", alloy::hex::encode(&b.as_slice()[..*size]))
        }
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            let inner: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", inner.join(", "))
        }
        other => format!("{other:?}"),
    }
}
