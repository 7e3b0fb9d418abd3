//! blockwatch watches a smart-contract ecosystem on-chain and turns emitted
//! events and periodic protocol state into channel notifications.
//!
//! The main entry points are [`WatchContext::initialize`], which builds every
//! collaborator from a [`Config`], and [`BlockRangeScanner::run`], the
//! sequential scan loop. The loop advances a durable cursor in batches,
//! re-scanning a short lookback window each cycle so shallow reorgs are
//! observed, and a persisted dedup ledger keeps the overlap (and crash
//! replays) from notifying twice.
//!
//! # Delivery guarantees
//!
//! Per event identity (block hash, transaction hash, log index) at most one
//! dispatch is ever recorded. The ledger is committed before dispatch and the
//! cursor after, so a crash anywhere in a cycle either replays a fully
//! suppressed range or loses only undelivered payloads, never duplicates.
//!
//! # Extension seams
//!
//! The notification transport is a [`NotificationSink`], persistence is a
//! [`CursorStore`], per-event formatting is an [`EventModule`], and periodic
//! summaries are [`StatusModule`]s driven by the [`StatusCooldownManager`].

pub mod config;
pub mod context;
pub mod cursor;
pub mod dispatch;
pub mod endpoint_pool;
pub mod error;
pub mod modules;
pub mod registry;
pub mod scanner;
pub mod sink;
pub mod status;
pub mod types;

pub use config::Config;
pub use context::WatchContext;
pub use cursor::{CursorStore, DedupLedger, FileCursorStore, MemoryCursorStore, ScanState};
pub use dispatch::{EventDispatcher, EventModule, ModuleFilter, Trigger};
pub use error::{WatchError, WatchResult};
pub use modules::{NetworkStatusModule, RawEventModule};
pub use registry::ContractRegistry;
pub use scanner::BlockRangeScanner;
pub use sink::{NotificationSink, TracingSink, WebhookSink};
pub use status::{ProtocolSnapshot, StatusCooldownManager, StatusModule};
pub use types::{ChannelId, DecodedEvent, EventIdentity, Payload};
