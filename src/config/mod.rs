// src/config/mod.rs
pub mod rss;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

pub use rss::{parse_frequency, FeedEntry, FeedGroupConfig, RssConfig};

use crate::window::ActiveWindow;

pub const ENV_CONFIG_PATH: &str = "FEED_TRIAGE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const ENV_SLACK_WEBHOOK: &str = "SLACK_WEBHOOK_URL";
pub const ENV_TELEGRAM_TOKEN: &str = "TELEGRAM_BOT_TOKEN";

fn default_store_path() -> PathBuf {
    PathBuf::from("data/state.json")
}
fn default_true() -> bool {
    true
}
fn default_feedback_frequency() -> String {
    "30m".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub rss: Option<RssConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_true")]
    pub console: bool,
    #[serde(default)]
    pub slack: Option<SlackConfig>,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            console: true,
            slack: None,
            telegram: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// "ENV" means: read from SLACK_WEBHOOK_URL
    pub webhook_url: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

impl SlackConfig {
    pub fn delivery_window(&self) -> Result<Option<ActiveWindow>> {
        ActiveWindow::from_bounds(self.from.as_deref(), self.to.as_deref())
            .context("slack delivery window")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// "ENV" means: read from TELEGRAM_BOT_TOKEN
    pub token: String,
    pub chat_id: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default = "default_feedback_frequency")]
    pub feedback_frequency: String,
}

impl TelegramConfig {
    pub fn delivery_window(&self) -> Result<Option<ActiveWindow>> {
        ActiveWindow::from_bounds(self.from.as_deref(), self.to.as_deref())
            .context("telegram delivery window")
    }

    pub fn feedback_interval(&self) -> Result<Duration> {
        parse_frequency(&self.feedback_frequency).context("telegram feedback_frequency")
    }
}

fn resolve_secret(value: &mut String, env_key: &str) -> Result<()> {
    if value.trim().eq_ignore_ascii_case("env") {
        *value = env::var(env_key).map_err(|_| anyhow!("Missing {env_key} env var"))?;
    }
    Ok(())
}

impl AppConfig {
    /// Reads, resolves `"ENV"` secrets and validates.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&data).with_context(|| format!("loading config {}", path.display()))
    }

    pub fn from_toml_str(data: &str) -> Result<Self> {
        let mut cfg: AppConfig = toml::from_str(data).context("parsing config toml")?;

        if let Some(slack) = cfg.output.slack.as_mut() {
            resolve_secret(&mut slack.webhook_url, ENV_SLACK_WEBHOOK)?;
        }
        if let Some(tg) = cfg.output.telegram.as_mut() {
            resolve_secret(&mut tg.token, ENV_TELEGRAM_TOKEN)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(slack) = &self.output.slack {
            url::Url::parse(&slack.webhook_url).context("slack webhook_url is not a valid url")?;
            slack.delivery_window()?;
        }
        if let Some(tg) = &self.output.telegram {
            if tg.token.trim().is_empty() || tg.chat_id.trim().is_empty() {
                return Err(anyhow!("telegram needs both token and chat_id"));
            }
            tg.delivery_window()?;
            tg.feedback_interval()?;
        }
        if let Some(rss) = &self.rss {
            rss.validate()?;
        }
        Ok(())
    }
}

/// Config path: first CLI argument, then $FEED_TRIAGE_CONFIG, then `config.toml`.
pub fn resolve_path(cli_arg: Option<String>) -> PathBuf {
    cli_arg
        .filter(|s| !s.trim().is_empty())
        .or_else(|| env::var(ENV_CONFIG_PATH).ok().filter(|s| !s.trim().is_empty()))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
