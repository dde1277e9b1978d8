// src/notify/mod.rs
//! Notification fan-out: plain channels, one optional interactive channel that can
//! carry accept/reject buttons, and the local record for suppressed items.

pub mod console;
pub mod slack;
pub mod telegram;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use tracing::{info, warn};

pub use console::ConsoleNotifier;
pub use slack::SlackNotifier;
pub use telegram::TelegramChannel;

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, text: &str) -> Result<()>;

    async fn notify_urgent(&self, text: &str) -> Result<()> {
        self.notify(text).await
    }
}

/// A human judgement on a previously delivered item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub article_id: String,
    pub relevant: bool,
    /// Channel-specific handle used to acknowledge the verdict.
    pub receipt: String,
}

/// A channel that can attach accept/reject affordances and report verdicts back.
#[async_trait]
pub trait FeedbackChannel: Notifier {
    async fn send_with_feedback(&self, text: &str, article_id: &str) -> Result<()>;

    /// Verdicts received since the last poll.
    async fn poll_verdicts(&self) -> Result<Vec<Verdict>>;

    async fn acknowledge(&self, verdict: &Verdict) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct NotifierMux {
    channels: Vec<Arc<dyn Notifier>>,
    interactive: Option<Arc<dyn FeedbackChannel>>,
}

impl NotifierMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, channel: Arc<dyn Notifier>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn with_interactive(mut self, channel: Arc<dyn FeedbackChannel>) -> Self {
        self.interactive = Some(channel);
        self
    }

    pub fn has_interactive(&self) -> bool {
        self.interactive.is_some()
    }

    pub fn interactive(&self) -> Option<Arc<dyn FeedbackChannel>> {
        self.interactive.clone()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len() + usize::from(self.interactive.is_some())
    }

    /// Sends to every channel; failures are logged per channel. Returns successful sends.
    pub async fn deliver(&self, text: &str, urgent: bool, feedback_id: Option<&str>) -> usize {
        let mut ok = 0;
        for ch in &self.channels {
            let res = if urgent {
                ch.notify_urgent(text).await
            } else {
                ch.notify(text).await
            };
            match res {
                Ok(()) => ok += 1,
                Err(e) => warn!(channel = ch.name(), error = ?e, "notification failed"),
            }
        }

        if let Some(ch) = &self.interactive {
            let res = match feedback_id {
                Some(id) => ch.send_with_feedback(text, id).await,
                None if urgent => ch.notify_urgent(text).await,
                None => ch.notify(text).await,
            };
            match res {
                Ok(()) => ok += 1,
                Err(e) => warn!(channel = ch.name(), error = ?e, "notification failed"),
            }
        }
        ok
    }

    /// Operator alert on every channel.
    pub async fn alert(&self, text: &str) -> usize {
        warn!(target: "triage", "{text}");
        self.deliver(text, true, None).await
    }

    /// Local-only record for items that were not pushed to humans.
    pub fn record_local(&self, text: &str) {
        info!(target: "triage", "{text}");
    }
}

/// Runs `build` up to `max_retries` times with a 500ms-doubling backoff until a 2xx.
pub(crate) async fn send_with_retries<F>(
    channel: &str,
    max_retries: u8,
    build: F,
) -> Result<reqwest::Response>
where
    F: Fn() -> RequestBuilder,
{
    let max_retries = max_retries.max(1);
    let mut attempt: u8 = 0;
    loop {
        attempt += 1;
        let err = match build().send().await {
            Ok(rsp) => match rsp.error_for_status() {
                Ok(rsp) => return Ok(rsp),
                Err(e) => anyhow!("{channel} HTTP error: {e}"),
            },
            Err(e) => anyhow!("{channel} request failed: {e}"),
        };
        if attempt >= max_retries {
            return Err(err);
        }
        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| anyhow!("building notifier HTTP client: {e}"))
}
