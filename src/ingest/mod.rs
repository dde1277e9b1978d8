// src/ingest/mod.rs
pub mod feed;
pub mod fetch;
pub mod html;
pub mod keywords;
pub mod types;

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::classifier::Classifier;
use crate::ingest::feed::parse_feed;
use crate::ingest::fetch::{fetch_with_retry, Conditional, ContentFetcher, RetryPolicy};
use crate::ingest::keywords::{highlight, KeywordMatcher};
use crate::ingest::types::{FeedItem, FeedSource, HtmlRules};
use crate::notify::NotifierMux;
use crate::store::{CacheEntry, Store};

/// Items published longer ago than this are never considered.
pub const MAX_ITEM_AGE_DAYS: i64 = 30;
/// Consecutive fetch failures that raise an operator alert (once).
pub const FAILURE_ALERT_THRESHOLD: u32 = 10;

const URGENT_PREFIX: &str = "📰 🚨 ";
const NORMAL_PREFIX: &str = "📰 ";

/// One-time metrics registration.
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_items_total", "Feed items parsed from sources.");
        describe_counter!(
            "ingest_dedup_total",
            "Items skipped because their link was already seen."
        );
        describe_counter!(
            "ingest_notified_total",
            "Items pushed to notification channels (urgent or normal)."
        );
        describe_counter!(
            "ingest_suppressed_total",
            "Items the classifier kept to the local record."
        );
        describe_counter!(
            "ingest_fetch_failures_total",
            "Feed fetches that failed after retries, or did not parse."
        );
    });
}

/// Normalize text: decode entities, strip tags, unify quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    re_ws.replace_all(&out, " ").trim().to_string()
}

/// Short content-addressed id for an item: hex of the first 5 bytes of SHA-256(link).
pub fn article_id(link: &str) -> String {
    let digest = Sha256::digest(link.as_bytes());
    let mut s = String::with_capacity(10);
    for b in &digest[..5] {
        let _ = write!(&mut s, "{:02x}", b);
    }
    s
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Title keywords applied to every source in addition to its own.
    pub global_keywords: Vec<String>,
    pub max_age: ChronoDuration,
    pub failure_alert_threshold: u32,
    pub retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            global_keywords: Vec::new(),
            max_age: ChronoDuration::days(MAX_ITEM_AGE_DAYS),
            failure_alert_threshold: FAILURE_ALERT_THRESHOLD,
            retry: RetryPolicy::default(),
        }
    }
}

struct ContentRule {
    rules: HtmlRules,
    keywords: KeywordMatcher,
}

/// A source with its keyword rules compiled.
struct SourceRules {
    source: FeedSource,
    title: KeywordMatcher,
    content: Option<ContentRule>,
}

impl SourceRules {
    fn compile(source: FeedSource, global_keywords: &[String]) -> Result<Self> {
        let name = source.display_name();
        let title = KeywordMatcher::union(&[
            source.important_keywords.as_slice(),
            global_keywords,
        ])
        .with_context(|| format!("title keywords for {name}"))?;

        let content = match source.html.as_ref() {
            Some(rules) if !rules.selectors.is_empty() => {
                html::compile_selectors(&rules.selectors)
                    .with_context(|| format!("HTML selectors for {name}"))?;
                let keywords = KeywordMatcher::new(&rules.important_keywords)
                    .with_context(|| format!("HTML keywords for {name}"))?;
                Some(ContentRule {
                    rules: rules.clone(),
                    keywords,
                })
            }
            _ => None,
        };

        Ok(Self {
            source,
            title,
            content,
        })
    }
}

/// What happened to one source in a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    NotModified,
    RateLimited,
    Failed { fail_count: u32, alerted: bool },
    Processed(ItemTally),
}

/// Per-item counters for a processed source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemTally {
    pub items: usize,
    pub stale: usize,
    pub ignored: usize,
    pub duplicates: usize,
    pub urgent: usize,
    pub notified: usize,
    pub suppressed: usize,
}

impl ItemTally {
    fn add(&mut self, other: &ItemTally) {
        self.items += other.items;
        self.stale += other.stale;
        self.ignored += other.ignored;
        self.duplicates += other.duplicates;
        self.urgent += other.urgent;
        self.notified += other.notified;
        self.suppressed += other.suppressed;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub sources: usize,
    pub processed: usize,
    pub not_modified: usize,
    pub rate_limited: usize,
    pub failed: usize,
    pub alerts: usize,
    pub items: ItemTally,
}

impl CycleReport {
    fn absorb(&mut self, outcome: &SourceOutcome) {
        match outcome {
            SourceOutcome::NotModified => self.not_modified += 1,
            SourceOutcome::RateLimited => self.rate_limited += 1,
            SourceOutcome::Failed { alerted, .. } => {
                self.failed += 1;
                if *alerted {
                    self.alerts += 1;
                }
            }
            SourceOutcome::Processed(tally) => {
                self.processed += 1;
                self.items.add(tally);
            }
        }
    }
}

enum Triage {
    Urgent(String),
    Notify(String),
    Record(String),
}

/// Fetch → filter → dedup → rules → classifier → notify, for every configured source.
pub struct FeedPipeline {
    sources: Vec<Arc<SourceRules>>,
    store: Arc<dyn Store>,
    classifier: Classifier,
    fetcher: Arc<dyn ContentFetcher>,
    notifier: Arc<NotifierMux>,
    settings: PipelineSettings,
}

impl FeedPipeline {
    /// Compiles every source's rules; an invalid keyword or selector is an error.
    pub fn new(
        sources: Vec<FeedSource>,
        store: Arc<dyn Store>,
        classifier: Classifier,
        fetcher: Arc<dyn ContentFetcher>,
        notifier: Arc<NotifierMux>,
        settings: PipelineSettings,
    ) -> Result<Self> {
        ensure_metrics_described();
        let sources = sources
            .into_iter()
            .map(|s| SourceRules::compile(s, &settings.global_keywords).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            sources,
            store,
            classifier,
            fetcher,
            notifier,
            settings,
        })
    }

    pub async fn poll_cycle(self: &Arc<Self>) -> CycleReport {
        self.poll_cycle_at(Utc::now()).await
    }

    /// One poll over all sources concurrently; `now` drives the age filter.
    pub async fn poll_cycle_at(self: &Arc<Self>, now: DateTime<Utc>) -> CycleReport {
        let mut set = JoinSet::new();
        for rules in &self.sources {
            let this = Arc::clone(self);
            let rules = Arc::clone(rules);
            set.spawn(async move { this.process_source(&rules, now).await });
        }

        let mut report = CycleReport {
            sources: self.sources.len(),
            ..Default::default()
        };
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => report.absorb(&outcome),
                Err(e) => {
                    warn!(target: "ingest", error = %e, "source task aborted");
                    report.failed += 1;
                }
            }
        }

        info!(
            target: "ingest",
            sources = report.sources,
            processed = report.processed,
            not_modified = report.not_modified,
            failed = report.failed,
            items = report.items.items,
            urgent = report.items.urgent,
            notified = report.items.notified,
            suppressed = report.items.suppressed,
            "poll cycle finished"
        );
        report
    }

    async fn process_source(&self, rules: &SourceRules, now: DateTime<Utc>) -> SourceOutcome {
        let url = rules.source.url.as_str();
        let name = rules.source.display_name();

        let cached = match self.store.http_cache_get(url).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(target: "ingest", source = %name, url, error = %e, "http cache lookup failed");
                CacheEntry::default()
            }
        };
        let conditional = Conditional {
            etag: cached.etag.clone(),
            last_modified: cached.last_modified.clone(),
        };

        let resp =
            match fetch_with_retry(self.fetcher.as_ref(), url, &conditional, &self.settings.retry)
                .await
            {
                Ok(resp) => resp,
                Err(e) => return self.record_failure(rules, &e.to_string()).await,
            };

        match resp.status {
            304 => {
                debug!(target: "ingest", source = %name, url, "not modified");
                if let Err(e) = self
                    .store
                    .http_cache_not_modified(url, resp.etag.clone(), resp.last_modified.clone())
                    .await
                {
                    warn!(target: "ingest", url, error = %e, "http cache update failed");
                }
                return SourceOutcome::NotModified;
            }
            429 => {
                warn!(target: "ingest", source = %name, url, "rate limited, skipping this cycle");
                return SourceOutcome::RateLimited;
            }
            status if !resp.is_success() => {
                return self
                    .record_failure(rules, &format!("HTTP status {status}"))
                    .await;
            }
            _ => {}
        }

        let items = match parse_feed(&resp.body) {
            Ok(items) => items,
            Err(e) => return self.record_failure(rules, &format!("{e:#}")).await,
        };

        if let Err(e) = self
            .store
            .http_cache_set(url, resp.etag.clone(), resp.last_modified.clone())
            .await
        {
            warn!(target: "ingest", url, error = %e, "http cache update failed");
        }

        let mut tally = ItemTally::default();
        for item in items {
            self.process_item(rules, item, now, &mut tally).await;
        }
        debug!(target: "ingest", source = %name, ?tally, "source processed");
        SourceOutcome::Processed(tally)
    }

    async fn record_failure(&self, rules: &SourceRules, reason: &str) -> SourceOutcome {
        let url = rules.source.url.as_str();
        let name = rules.source.display_name();
        counter!("ingest_fetch_failures_total").increment(1);

        let fail_count = match self.store.http_cache_increment_fail(url).await {
            Ok(n) => n,
            Err(e) => {
                warn!(target: "ingest", source = %name, url, error = %e, reason, "feed failed; failure counter unavailable");
                return SourceOutcome::Failed {
                    fail_count: 0,
                    alerted: false,
                };
            }
        };
        warn!(target: "ingest", source = %name, url, fail_count, reason, "feed fetch failed");

        let alerted = fail_count == self.settings.failure_alert_threshold;
        if alerted {
            self.notifier
                .alert(&format!(
                    "RSS: could not process feed [{name}] <{url}> after {fail_count} consecutive failures: {reason}"
                ))
                .await;
        }
        SourceOutcome::Failed {
            fail_count,
            alerted,
        }
    }

    async fn process_item(
        &self,
        rules: &SourceRules,
        item: FeedItem,
        now: DateTime<Utc>,
        tally: &mut ItemTally,
    ) {
        let source = &rules.source;
        tally.items += 1;
        counter!("ingest_items_total").increment(1);

        if let Some(published) = item.published {
            if now.signed_duration_since(published) > self.settings.max_age {
                tally.stale += 1;
                return;
            }
        }

        if source.is_ignored_link(&item.link) {
            tally.ignored += 1;
            return;
        }

        match self.store.dedup_check_and_insert(&item.link).await {
            Ok(false) => {}
            Ok(true) => {
                tally.duplicates += 1;
                counter!("ingest_dedup_total").increment(1);
                return;
            }
            Err(e) => {
                // store fault counts as seen
                warn!(target: "ingest", link = %item.link, error = %e, "dedup check failed");
                tally.duplicates += 1;
                return;
            }
        }

        match self.triage(rules, &item).await {
            Triage::Urgent(message) => {
                self.publish(source, &item, &format!("{URGENT_PREFIX}{message}"), true)
                    .await;
                tally.urgent += 1;
            }
            Triage::Notify(message) => {
                self.publish(source, &item, &format!("{NORMAL_PREFIX}{message}"), false)
                    .await;
                tally.notified += 1;
            }
            Triage::Record(message) => {
                self.notifier
                    .record_local(&format!("{NORMAL_PREFIX}{message}"));
                counter!("ingest_suppressed_total").increment(1);
                tally.suppressed += 1;
            }
        }
    }

    async fn triage(&self, rules: &SourceRules, item: &FeedItem) -> Triage {
        let source = &rules.source;
        let name = source.display_name();

        if let Some(hit) = rules.title.find(&item.title) {
            return Triage::Urgent(format!(
                "[{name}]: {} - <{}>",
                highlight(&item.title, &hit),
                item.link
            ));
        }

        if let Some(keyword) = self.content_match(rules, &item.link).await {
            return Triage::Urgent(format!(
                "[{name}]: {} *{keyword}* - <{}>",
                item.title, item.link
            ));
        }

        let message = format!("[{name}]: {} - <{}>", item.title, item.link);
        if source.keyword_only {
            return Triage::Record(message);
        }
        if !self.classifier.is_ready(&source.group).await {
            return Triage::Notify(message);
        }

        let score = self.classifier.score(&source.group, &item.title).await;
        debug!(target: "triage", group = %source.group, score, title = %item.title, "classified");
        if score > 0.5 {
            Triage::Notify(message)
        } else {
            Triage::Record(message)
        }
    }

    /// Body keyword search. Any failure counts as no match.
    async fn content_match(&self, rules: &SourceRules, link: &str) -> Option<String> {
        let content = rules.content.as_ref()?;
        if content.keywords.is_empty() || content.rules.is_ignored_link(link) {
            return None;
        }

        let resp = match fetch_with_retry(
            self.fetcher.as_ref(),
            link,
            &Conditional::default(),
            &self.settings.retry,
        )
        .await
        {
            Ok(resp) if resp.is_success() => resp,
            Ok(resp) => {
                warn!(target: "ingest", link, status = resp.status, "article page returned non-success status");
                return None;
            }
            Err(e) => {
                warn!(target: "ingest", link, error = %e, "could not fetch article page");
                return None;
            }
        };

        let selector = match html::compile_selectors(&content.rules.selectors) {
            Ok(sel) => sel,
            Err(e) => {
                warn!(target: "ingest", link, error = %e, "content selectors rejected");
                return None;
            }
        };
        let text = html::extract_text(&resp.body, &selector);
        if text.is_empty() {
            debug!(target: "ingest", link, "no content matched the selectors");
            return None;
        }
        content.keywords.find(&text).map(|m| m.text)
    }

    async fn publish(&self, source: &FeedSource, item: &FeedItem, text: &str, urgent: bool) {
        let feedback_id = if self.notifier.has_interactive() {
            let id = article_id(&item.link);
            match self.store.article_save(&id, &source.group, &item.title).await {
                Ok(()) => Some(id),
                Err(e) => {
                    warn!(target: "ingest", link = %item.link, error = %e, "could not register article for feedback");
                    None
                }
            }
        } else {
            None
        };

        self.notifier
            .deliver(text, urgent, feedback_id.as_deref())
            .await;
        counter!("ingest_notified_total").increment(1);
    }
}
