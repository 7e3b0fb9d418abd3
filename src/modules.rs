//! The static module set.
//!
//! Rich per-event formatting lives outside this crate; what ships here is a
//! generic renderer for any registered event and a network status plugin, so
//! the binary is useful out of the box.

use crate::{
    dispatch::{EventModule, Trigger},
    status::{ProtocolSnapshot, StatusModule},
    types::{format_value, DecodedEvent, Payload},
};

/// Renders every registered event as a field list.
#[derive(Debug, Clone, Default)]
pub struct RawEventModule;

impl EventModule for RawEventModule {
    fn name(&self) -> &str {
        "raw_events"
    }

    fn triggers(&self) -> Vec<Trigger> {
        vec![Trigger::any()]
    }

    fn handle(&self, event: &DecodedEvent) -> Result<Option<Payload>, String> {
        let mut body = String::new();
        for (name, value) in &event.fields {
            body.push_str(name);
            body.push_str(": ");
            body.push_str(&format_value(value));
            body.push('\n');
        }
        body.push_str(&format!("block: {}", event.block_number));

        let title = format!("{}.{}", event.contract, event.name);
        Ok(Some(
            Payload::new(title, body).for_event(&event.name, event.block_number),
        ))
    }
}

/// Summarizes the protocol snapshot.
#[derive(Debug, Clone, Default)]
pub struct NetworkStatusModule;

impl StatusModule for NetworkStatusModule {
    fn name(&self) -> &str {
        "network_status"
    }

    fn status(&self, snapshot: &ProtocolSnapshot) -> Result<Payload, String> {
        if snapshot.execution_head.is_none() && snapshot.beacon_slot.is_none() {
            return Err("no upstream data in snapshot".into());
        }
        let head = snapshot
            .execution_head
            .map_or_else(|| "unknown".to_string(), |h| h.to_string());
        let slot = snapshot
            .beacon_slot
            .map_or_else(|| "unknown".to_string(), |s| s.to_string());
        let body = format!(
            "Execution head: {head}\nBeacon slot: {slot}\nObserved: {}",
            snapshot.taken_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        Ok(Payload::new("Network Status", body))
    }
}
