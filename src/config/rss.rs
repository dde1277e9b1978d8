// src/config/rss.rs
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::ingest::types::{FeedSource, HtmlRules};
use crate::window::ActiveWindow;

fn default_frequency() -> String {
    "half_hourly".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RssConfig {
    /// `hourly` | `half_hourly` | `daily` | `<n>s` | `<n>m` | `<n>h`
    #[serde(default = "default_frequency")]
    pub frequency: String,
    /// Title keywords shared by every feed.
    #[serde(default)]
    pub important_keywords: Vec<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub groups: Vec<FeedGroupConfig>,
}

/// Feeds sharing one topic group and rule set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedGroupConfig {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub important_keywords: Vec<String>,
    #[serde(default)]
    pub ignore_url_signatures: Vec<String>,
    #[serde(default)]
    pub keyword_only: bool,
    #[serde(default)]
    pub html: Option<HtmlRules>,
    #[serde(default)]
    pub feeds: Vec<FeedEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEntry {
    pub name: String,
    pub url: String,
}

impl RssConfig {
    /// One FeedSource per feed entry, carrying its group's rules.
    pub fn sources(&self) -> Vec<FeedSource> {
        self.groups
            .iter()
            .flat_map(|g| {
                g.feeds.iter().map(move |f| FeedSource {
                    group: g.group.trim().to_string(),
                    name: f.name.trim().to_string(),
                    url: f.url.trim().to_string(),
                    important_keywords: g.important_keywords.clone(),
                    ignore_url_signatures: g.ignore_url_signatures.clone(),
                    html: g.html.clone(),
                    keyword_only: g.keyword_only,
                })
            })
            .collect()
    }

    pub fn poll_interval(&self) -> Result<Duration> {
        parse_frequency(&self.frequency)
    }

    pub fn active_window(&self) -> Result<Option<ActiveWindow>> {
        ActiveWindow::from_bounds(self.from.as_deref(), self.to.as_deref())
            .context("rss active window")
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.poll_interval()?;
        self.active_window()?;
        for source in self.sources() {
            let parsed = url::Url::parse(&source.url)
                .with_context(|| format!("feed [{}] has an invalid url", source.display_name()))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                bail!(
                    "feed [{}] url must be http(s), got {}",
                    source.display_name(),
                    parsed.scheme()
                );
            }
            if source.name.is_empty() {
                bail!("feed {} has no name", source.url);
            }
        }
        Ok(())
    }
}

/// Named cadences or `<n>s|m|h`.
pub fn parse_frequency(raw: &str) -> Result<Duration> {
    let s = raw.trim().to_ascii_lowercase();
    match s.as_str() {
        "hourly" => return Ok(Duration::from_secs(3600)),
        "half_hourly" => return Ok(Duration::from_secs(1800)),
        "daily" => return Ok(Duration::from_secs(86_400)),
        _ => {}
    }
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| anyhow!("frequency `{raw}` has no unit"))?;
    let (num, unit) = s.split_at(split);
    let n: u64 = num
        .parse()
        .map_err(|_| anyhow!("invalid frequency `{raw}`"))?;
    let secs = match unit {
        "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        _ => bail!("invalid frequency unit in `{raw}`"),
    };
    if secs == 0 {
        bail!("frequency `{raw}` must be positive");
    }
    Ok(Duration::from_secs(secs))
}
