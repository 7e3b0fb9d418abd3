//! Fan-out of decoded events to registered modules.
//!
//! Modules are a static set built at startup. Enablement is a pure
//! include/exclude predicate evaluated per dispatch, with exclude taking
//! precedence and an empty include list meaning "all". A failing module is
//! logged and skipped; it never poisons the batch or its neighbours.

use std::collections::HashMap;

use tracing::warn;

use crate::{
    config::{Config, ModulesConfig},
    error::{WatchError, WatchResult},
    types::{ChannelId, DecodedEvent, Payload},
};

/// What a module wants to be invoked for. `None` matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trigger {
    pub contract: Option<String>,
    pub event: Option<String>,
}

impl Trigger {
    /// Matches every decoded event.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on(contract: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            contract: Some(contract.into()),
            event: Some(event.into()),
        }
    }

    #[must_use]
    pub fn matches(&self, event: &DecodedEvent) -> bool {
        self.contract.as_deref().is_none_or(|c| c == event.contract)
            && self.event.as_deref().is_none_or(|e| e == event.name)
    }
}

/// An event-handling module.
///
/// Handlers are pure payload builders; anything long-running or fallible in
/// an interesting way belongs behind the sink, not here.
pub trait EventModule: Send + Sync {
    fn name(&self) -> &str;

    fn triggers(&self) -> Vec<Trigger>;

    /// Build a payload for the event, or `None` to stay silent.
    ///
    /// # Errors
    ///
    /// A message describing the failure; the dispatcher logs it and moves on.
    fn handle(&self, event: &DecodedEvent) -> Result<Option<Payload>, String>;
}

/// Include/exclude predicate over module names. Exclude wins; an empty
/// include list enables everything not excluded.
#[derive(Debug, Clone, Default)]
pub struct ModuleFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl ModuleFilter {
    #[must_use]
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    #[must_use]
    pub fn from_config(config: &ModulesConfig) -> Self {
        Self::new(config.include.clone(), config.exclude.clone())
    }

    #[must_use]
    pub fn enabled(&self, module: &str) -> bool {
        if self.exclude.iter().any(|m| m == module) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|m| m == module)
    }
}

/// Event-name prefix → channel routing with a `default` fallback.
#[derive(Debug, Clone)]
pub struct ChannelTable {
    entries: HashMap<String, ChannelId>,
    default: ChannelId,
}

impl ChannelTable {
    /// # Errors
    ///
    /// Returns [`WatchError::Config`] when the table has no `default` entry.
    pub fn new(entries: HashMap<String, ChannelId>) -> WatchResult<Self> {
        let default = *entries.get("default").ok_or_else(|| {
            WatchError::Config("channel table must contain a `default` entry".into())
        })?;
        Ok(Self { entries, default })
    }

    #[must_use]
    pub fn default_channel(&self) -> ChannelId {
        self.default
    }

    /// Longest prefix of the event name wins; no match falls back to
    /// `default`.
    #[must_use]
    pub fn route(&self, event_name: Option<&str>) -> ChannelId {
        let Some(name) = event_name else {
            return self.default;
        };
        self.entries
            .iter()
            .filter(|(prefix, _)| *prefix != "default" && name.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map_or(self.default, |(_, channel)| *channel)
    }
}

pub struct EventDispatcher {
    modules: Vec<Box<dyn EventModule>>,
    filter: ModuleFilter,
    channels: ChannelTable,
}

impl EventDispatcher {
    #[must_use]
    pub fn new(
        modules: Vec<Box<dyn EventModule>>,
        filter: ModuleFilter,
        channels: ChannelTable,
    ) -> Self {
        Self {
            modules,
            filter,
            channels,
        }
    }

    /// # Errors
    ///
    /// See [`ChannelTable::new`].
    pub fn from_config(
        config: &Config,
        modules: Vec<Box<dyn EventModule>>,
    ) -> WatchResult<Self> {
        Ok(Self::new(
            modules,
            ModuleFilter::from_config(&config.modules),
            ChannelTable::new(config.channels.clone())?,
        ))
    }

    #[must_use]
    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    #[must_use]
    pub fn enabled_module_count(&self) -> usize {
        self.modules
            .iter()
            .filter(|module| self.filter.enabled(module.name()))
            .count()
    }

    /// Fan one event out to every enabled module whose triggers match,
    /// returning the routed payloads in module registration order.
    #[must_use]
    pub fn dispatch(&self, event: &DecodedEvent) -> Vec<(ChannelId, Payload)> {
        let mut out = Vec::new();
        for module in &self.modules {
            if !self.filter.enabled(module.name()) {
                continue;
            }
            if !module.triggers().iter().any(|t| t.matches(event)) {
                continue;
            }
            match module.handle(event) {
                Ok(Some(payload)) => {
                    let channel = self.channels.route(payload.event_name.as_deref());
                    out.push((channel, payload));
                }
                Ok(None) => {}
                Err(reason) => {
                    let error = WatchError::Dispatch {
                        module: module.name().to_string(),
                        reason,
                    };
                    warn!(
                        contract = %event.contract,
                        event = %event.name,
                        block_number = event.block_number,
                        error = %error,
                        "module failed, skipping"
                    );
                }
            }
        }
        out
    }
}
