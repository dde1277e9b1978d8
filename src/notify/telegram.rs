// src/notify/telegram.rs
//! Telegram Bot API channel with inline accept/reject buttons.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{http_client, send_with_retries, FeedbackChannel, Notifier, Verdict};
use crate::window::{self, ActiveWindow};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

pub struct TelegramChannel {
    api_base: String,
    chat_id: String,
    client: Client,
    window: Option<ActiveWindow>,
    max_retries: u8,
    /// Next `getUpdates` offset; 0 until the first update is seen.
    next_offset: AtomicI64,
}

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    #[serde(default)]
    data: Option<String>,
}

/// `r:<id>` is relevant, `i:<id>` irrelevant.
fn parse_callback_data(data: &str) -> Option<(bool, String)> {
    let (prefix, id) = data.split_once(':')?;
    if id.is_empty() {
        return None;
    }
    match prefix {
        "r" => Some((true, id.to_string())),
        "i" => Some((false, id.to_string())),
        _ => None,
    }
}

fn feedback_markup(article_id: &str) -> serde_json::Value {
    json!({
        "inline_keyboard": [[
            { "text": "👍", "callback_data": format!("r:{article_id}") },
            { "text": "👎", "callback_data": format!("i:{article_id}") },
        ]]
    })
}

impl TelegramChannel {
    pub fn new(token: &str, chat_id: impl Into<String>) -> Result<Self> {
        Self::with_api_base(DEFAULT_API_BASE, token, chat_id)
    }

    /// Points the channel at a different Bot API host (self-hosted server, tests).
    pub fn with_api_base(api_base: &str, token: &str, chat_id: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api_base: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
            chat_id: chat_id.into(),
            client: http_client(Duration::from_secs(30)).context("telegram client")?,
            window: None,
            max_retries: 3,
            next_offset: AtomicI64::new(0),
        })
    }

    pub fn with_window(mut self, window: Option<ActiveWindow>) -> Self {
        self.window = window;
        self
    }

    async fn send_message(&self, body: serde_json::Value) -> Result<()> {
        if !window::is_open(self.window.as_ref()) {
            debug!("telegram outside delivery window, dropping message");
            return Ok(());
        }
        let url = format!("{}/sendMessage", self.api_base);
        send_with_retries("telegram", self.max_retries, || {
            self.client.post(&url).json(&body)
        })
        .await?;
        Ok(())
    }

    /// Turns an update batch into verdicts and advances the offset past it.
    fn absorb_updates(&self, updates: Vec<Update>) -> Vec<Verdict> {
        let mut verdicts = Vec::new();
        let mut max_id = None::<i64>;
        for update in updates {
            max_id = Some(max_id.map_or(update.update_id, |m| m.max(update.update_id)));
            let Some(query) = update.callback_query else {
                continue;
            };
            let Some((relevant, article_id)) =
                query.data.as_deref().and_then(parse_callback_data)
            else {
                debug!(data = ?query.data, "ignoring unrelated callback");
                continue;
            };
            verdicts.push(Verdict {
                article_id,
                relevant,
                receipt: query.id,
            });
        }
        if let Some(max_id) = max_id {
            self.next_offset.fetch_max(max_id + 1, Ordering::SeqCst);
        }
        verdicts
    }
}

#[async_trait]
impl Notifier for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn notify(&self, text: &str) -> Result<()> {
        self.send_message(json!({ "chat_id": self.chat_id, "text": text }))
            .await
    }
}

#[async_trait]
impl FeedbackChannel for TelegramChannel {
    async fn send_with_feedback(&self, text: &str, article_id: &str) -> Result<()> {
        self.send_message(json!({
            "chat_id": self.chat_id,
            "text": text,
            "reply_markup": feedback_markup(article_id),
        }))
        .await
    }

    async fn poll_verdicts(&self) -> Result<Vec<Verdict>> {
        let mut url = format!("{}/getUpdates?timeout=0", self.api_base);
        let offset = self.next_offset.load(Ordering::SeqCst);
        if offset > 0 {
            url.push_str(&format!("&offset={offset}"));
        }

        let resp: UpdatesResponse = self
            .client
            .get(&url)
            .send()
            .await
            .context("telegram getUpdates")?
            .error_for_status()
            .context("telegram getUpdates non-2xx")?
            .json()
            .await
            .context("decoding telegram getUpdates")?;

        if !resp.ok {
            return Err(anyhow!(
                "telegram getUpdates not ok: {}",
                resp.description.unwrap_or_default()
            ));
        }
        Ok(self.absorb_updates(resp.result))
    }

    async fn acknowledge(&self, verdict: &Verdict) -> Result<()> {
        let url = format!("{}/answerCallbackQuery", self.api_base);
        let body = json!({ "callback_query_id": verdict.receipt });
        send_with_retries("telegram", 1, || self.client.post(&url).json(&body)).await?;
        Ok(())
    }
}
