//! Notification delivery seam.
//!
//! The channel transport is an external collaborator behind the
//! [`NotificationSink`] trait. Delivery failures are retried a bounded number
//! of times and then dropped with an error log: losing a notification is
//! acceptable, corrupting the scan cursor is not.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::Client;
use serde_json::json;
use tracing::{error, info};

use crate::{
    error::{WatchError, WatchResult},
    types::{ChannelId, Payload},
};

pub const DEFAULT_SEND_RETRIES: usize = 3;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one payload to one channel.
    async fn send(&self, channel: ChannelId, payload: &Payload) -> WatchResult<()>;
}

/// Deliver with bounded retries; on exhaustion the payload is logged and
/// dropped so the caller can keep scanning.
pub async fn send_with_retry(
    sink: &dyn NotificationSink,
    channel: ChannelId,
    payload: &Payload,
    max_retries: usize,
) {
    let retry_strategy = ExponentialBuilder::default()
        .with_max_times(max_retries)
        .with_min_delay(Duration::from_millis(250));

    let attempt = || sink.send(channel, payload);
    let result = attempt
        .retry(retry_strategy)
        .notify(|err: &WatchError, dur: Duration| {
            info!(error = %err, "notification send failed, retrying after {:?}", dur);
        })
        .sleep(tokio::time::sleep)
        .await;

    if let Err(e) = result {
        error!(channel, title = %payload.title, error = %e, "dropping notification after retries");
    }
}

/// POSTs payloads as JSON to a configured webhook.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    /// # Errors
    ///
    /// Returns [`WatchError::Config`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>) -> WatchResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| WatchError::Config(format!("building webhook client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, channel: ChannelId, payload: &Payload) -> WatchResult<()> {
        let body = json!({
            "channel": channel,
            "title": payload.title,
            "body": payload.body,
            "event_name": payload.event_name,
            "block_number": payload.block_number,
            "time_seen": payload.time_seen,
            "footer": payload.footer,
        });
        self.client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Logs payloads instead of delivering them; the default when no webhook is
/// configured.
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn send(&self, channel: ChannelId, payload: &Payload) -> WatchResult<()> {
        info!(
            channel,
            title = %payload.title,
            body = %payload.body,
            block_number = ?payload.block_number,
            "notification"
        );
        Ok(())
    }
}
