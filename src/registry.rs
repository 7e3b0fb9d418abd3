//! Contract registry: alias → (address, ABI), log decoding.
//!
//! ABIs are supplied as JSON files and parsed at startup; at scan time a log
//! is resolved by `(emitting address, topic0)` and decoded with
//! `alloy::dyn_abi`. Decode outcomes are per-log: an unregistered address is
//! skipped silently, a registered address with a log that does not fit its
//! ABI is logged and skipped, and neither aborts the batch.

use std::{
    collections::HashMap,
    path::Path,
};

use alloy::{
    dyn_abi::EventExt,
    json_abi::{Event as AbiEvent, JsonAbi},
    primitives::{Address, B256},
    rpc::types::Log,
};

use crate::{
    config::Config,
    error::{WatchError, WatchResult},
    types::{DecodedEvent, EventIdentity},
};

/// One registered contract: its alias and the ABI events keyed by selector.
#[derive(Debug, Clone)]
pub struct RegisteredContract {
    pub alias: String,
    pub address: Address,
    events: HashMap<B256, AbiEvent>,
}

#[derive(Debug, Clone, Default)]
pub struct ContractRegistry {
    by_address: HashMap<Address, RegisteredContract>,
}

impl ContractRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `[contracts.<alias>]` entry, resolving ABI paths relative
    /// to `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Config`] on an unreadable or malformed ABI file
    /// or a duplicate alias/address.
    pub fn from_config(config: &Config, base_dir: &Path) -> WatchResult<Self> {
        let mut registry = Self::new();
        for (alias, contract) in &config.contracts {
            let path = base_dir.join(&contract.abi);
            let text = std::fs::read_to_string(&path).map_err(|e| {
                WatchError::Config(format!("reading ABI {}: {e}", path.display()))
            })?;
            let abi: JsonAbi = serde_json::from_str(&text).map_err(|e| {
                WatchError::Config(format!("parsing ABI {}: {e}", path.display()))
            })?;
            registry.register(alias, contract.address, &abi)?;
        }
        Ok(registry)
    }

    /// Register a contract's events under `alias`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Config`] when the alias or address is already
    /// registered.
    pub fn register(&mut self, alias: &str, address: Address, abi: &JsonAbi) -> WatchResult<()> {
        if self.by_address.values().any(|c| c.alias == alias) {
            return Err(WatchError::Config(format!(
                "duplicate contract alias `{alias}`"
            )));
        }
        if self.by_address.contains_key(&address) {
            return Err(WatchError::Config(format!(
                "address {address} already registered"
            )));
        }
        let events = abi
            .events()
            .map(|event| (event.selector(), event.clone()))
            .collect();
        self.by_address.insert(
            address,
            RegisteredContract {
                alias: alias.to_string(),
                address,
                events,
            },
        );
        Ok(())
    }

    /// Addresses of every registered contract, for the scan filter.
    #[must_use]
    pub fn addresses(&self) -> Vec<Address> {
        self.by_address.keys().copied().collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    /// Resolve the emitting contract and ABI event for a log.
    ///
    /// # Errors
    ///
    /// [`WatchError::UnknownContract`] for an unregistered address,
    /// [`WatchError::DecodeMismatch`] when the log carries no topic0 or an
    /// unregistered selector.
    pub fn resolve(&self, log: &Log) -> WatchResult<(&RegisteredContract, &AbiEvent)> {
        let address = log.address();
        let contract = self
            .by_address
            .get(&address)
            .ok_or(WatchError::UnknownContract(address))?;
        let topic0 = log.topic0().ok_or_else(|| WatchError::DecodeMismatch {
            alias: contract.alias.clone(),
            event: "<anonymous>".into(),
            reason: "log has no topic0".into(),
        })?;
        let event = contract
            .events
            .get(topic0)
            .ok_or_else(|| WatchError::DecodeMismatch {
                alias: contract.alias.clone(),
                event: format!("{topic0}"),
                reason: "selector not present in ABI".into(),
            })?;
        Ok((contract, event))
    }

    /// Decode a log into a [`DecodedEvent`].
    ///
    /// Topic arity is validated against the ABI before decoding, so a log
    /// whose indexed layout drifted from the registered ABI is rejected
    /// instead of mis-assigned.
    ///
    /// # Errors
    ///
    /// See [`ContractRegistry::resolve`]; additionally
    /// [`WatchError::DecodeMismatch`] for arity or payload mismatches and
    /// for pending logs without block metadata.
    pub fn decode(&self, log: &Log) -> WatchResult<DecodedEvent> {
        let (contract, event) = self.resolve(log)?;
        let mismatch = |reason: String| WatchError::DecodeMismatch {
            alias: contract.alias.clone(),
            event: event.name.clone(),
            reason,
        };

        let indexed_count = event.inputs.iter().filter(|input| input.indexed).count();
        let topic_count = log.topics().len();
        if topic_count != indexed_count + 1 {
            return Err(mismatch(format!(
                "expected {} topics, log has {topic_count}",
                indexed_count + 1
            )));
        }

        let identity = match (
            log.block_number,
            log.block_hash,
            log.transaction_hash,
            log.log_index,
        ) {
            (Some(block_number), Some(block_hash), Some(transaction_hash), Some(log_index)) => {
                EventIdentity {
                    block_number,
                    block_hash,
                    transaction_hash,
                    log_index,
                }
            }
            _ => return Err(mismatch("log missing block metadata".into())),
        };

        let decoded = event
            .decode_log(log.data())
            .map_err(|e| mismatch(e.to_string()))?;

        // Re-interleave indexed and body values back into declaration order.
        let mut indexed = decoded.indexed.into_iter();
        let mut body = decoded.body.into_iter();
        let mut fields = Vec::with_capacity(event.inputs.len());
        for input in &event.inputs {
            let value = if input.indexed {
                indexed.next()
            } else {
                body.next()
            };
            let value = value.ok_or_else(|| mismatch("decoded value count mismatch".into()))?;
            fields.push((input.name.clone(), value));
        }

        Ok(DecodedEvent {
            contract: contract.alias.clone(),
            name: event.name.clone(),
            block_number: identity.block_number,
            identity,
            fields,
        })
    }
}
