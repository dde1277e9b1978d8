// src/notify/slack.rs
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{http_client, send_with_retries, Notifier};
use crate::window::ActiveWindow;

/// Slack incoming-webhook channel.
pub struct SlackNotifier {
    webhook_url: String,
    client: Client,
    max_retries: u8,
    window: Option<ActiveWindow>,
}

#[derive(Serialize)]
struct SlackPayload<'a> {
    text: &'a str,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            webhook_url: webhook_url.into(),
            client: http_client(Duration::from_secs(10)).context("slack client")?,
            max_retries: 3,
            window: None,
        })
    }

    /// Drops messages outside the given local-time window.
    pub fn with_window(mut self, window: Option<ActiveWindow>) -> Self {
        self.window = window;
        self
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn name(&self) -> &str {
        "slack"
    }

    async fn notify(&self, text: &str) -> Result<()> {
        if !crate::window::is_open(self.window.as_ref()) {
            tracing::debug!("slack outside delivery window, dropping message");
            return Ok(());
        }
        let payload = SlackPayload { text };
        send_with_retries("slack", self.max_retries, || {
            self.client.post(&self.webhook_url).json(&payload)
        })
        .await?;
        Ok(())
    }
}
