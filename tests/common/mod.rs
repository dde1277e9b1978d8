// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_triage::ingest::fetch::{Conditional, ContentFetcher, FetchError, FetchResponse, RetryPolicy};
use feed_triage::ingest::types::FeedSource;
use feed_triage::ingest::{FeedPipeline, PipelineSettings};
use feed_triage::store::{ArticleRecord, CacheEntry, Counts, StoreError, StoreResult};
use feed_triage::{
    Classifier, FeedbackChannel, Label, MemoryStore, Notifier, NotifierMux, Store, Verdict,
};

/// Per-URL queue of canned responses. The last one repeats.
#[derive(Default)]
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, VecDeque<Result<FetchResponse, String>>>>,
    pub requests: Mutex<Vec<(String, Conditional)>>,
}

impl ScriptedFetcher {
    pub fn push(&self, url: &str, resp: Result<FetchResponse, String>) {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(resp);
    }

    /// Replaces the script for `url` with one repeating response.
    pub fn set(&self, url: &str, resp: Result<FetchResponse, String>) {
        let mut routes = self.routes.lock().unwrap();
        let queue = routes.entry(url.to_string()).or_default();
        queue.clear();
        queue.push_back(resp);
    }

    pub fn ok(&self, url: &str, body: &str) {
        self.set(url, Ok(response(200, body, None)));
    }

    pub fn status(&self, url: &str, status: u16) {
        self.set(url, Ok(response(status, "", None)));
    }

    pub fn requests_for(&self, url: &str) -> Vec<Conditional> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, c)| c.clone())
            .collect()
    }
}

pub fn response(status: u16, body: &str, etag: Option<&str>) -> FetchResponse {
    FetchResponse {
        status,
        body: body.to_string(),
        etag: etag.map(str::to_string),
        last_modified: None,
    }
}

#[async_trait]
impl ContentFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        url: &str,
        conditional: &Conditional,
    ) -> Result<FetchResponse, FetchError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), conditional.clone()));
        let mut routes = self.routes.lock().unwrap();
        let queue = routes
            .get_mut(url)
            .ok_or_else(|| FetchError::Connection(format!("no route for {url}")))?;
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match next {
            Some(Ok(resp)) => Ok(resp),
            Some(Err(msg)) => Err(FetchError::Connection(msg)),
            None => Err(FetchError::Connection(format!("empty route for {url}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub text: String,
    pub urgent: bool,
    pub feedback_id: Option<String>,
}

/// Records every message; doubles as the interactive channel.
#[derive(Default)]
pub struct Recorder {
    pub sent: Mutex<Vec<Sent>>,
    pub pending: Mutex<Vec<Verdict>>,
    pub acked: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn messages(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn push(&self, text: &str, urgent: bool, feedback_id: Option<&str>) {
        self.sent.lock().unwrap().push(Sent {
            text: text.to_string(),
            urgent,
            feedback_id: feedback_id.map(str::to_string),
        });
    }
}

#[async_trait]
impl Notifier for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }
    async fn notify(&self, text: &str) -> Result<()> {
        self.push(text, false, None);
        Ok(())
    }
    async fn notify_urgent(&self, text: &str) -> Result<()> {
        self.push(text, true, None);
        Ok(())
    }
}

#[async_trait]
impl FeedbackChannel for Recorder {
    async fn send_with_feedback(&self, text: &str, article_id: &str) -> Result<()> {
        let urgent = text.starts_with("📰 🚨");
        self.push(text, urgent, Some(article_id));
        Ok(())
    }
    async fn poll_verdicts(&self) -> Result<Vec<Verdict>> {
        Ok(std::mem::take(&mut *self.pending.lock().unwrap()))
    }
    async fn acknowledge(&self, verdict: &Verdict) -> Result<()> {
        self.acked.lock().unwrap().push(verdict.receipt.clone());
        Ok(())
    }
}

pub struct Harness {
    pub pipeline: Arc<FeedPipeline>,
    pub store: Arc<MemoryStore>,
    pub classifier: Classifier,
    pub fetcher: Arc<ScriptedFetcher>,
    pub recorder: Arc<Recorder>,
}

pub fn source(group: &str, name: &str, url: &str) -> FeedSource {
    FeedSource {
        group: group.into(),
        name: name.into(),
        url: url.into(),
        ..Default::default()
    }
}

pub fn settings() -> PipelineSettings {
    PipelineSettings {
        retry: RetryPolicy::immediate(1),
        ..Default::default()
    }
}

/// Pipeline over a fresh in-memory store. `interactive` wires the recorder as the
/// feedback channel instead of a plain one.
pub fn harness(
    sources: Vec<FeedSource>,
    settings: PipelineSettings,
    interactive: bool,
) -> Harness {
    let store = Arc::new(MemoryStore::in_memory());
    let classifier = Classifier::new(store.clone());
    let fetcher = Arc::new(ScriptedFetcher::default());
    let recorder = Arc::new(Recorder::default());
    let mux = if interactive {
        NotifierMux::new().with_interactive(recorder.clone())
    } else {
        NotifierMux::new().with_channel(recorder.clone())
    };
    let pipeline = FeedPipeline::new(
        sources,
        store.clone(),
        classifier.clone(),
        fetcher.clone(),
        Arc::new(mux),
        settings,
    )
    .unwrap();
    Harness {
        pipeline: Arc::new(pipeline),
        store,
        classifier,
        fetcher,
        recorder,
    }
}

/// Minimal RSS 2.0 document. `items` are (title, link, pubDate).
pub fn rss(items: &[(&str, &str, Option<&str>)]) -> String {
    let mut body = String::from(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>t</title>"#,
    );
    for (title, link, date) in items {
        body.push_str("<item><title>");
        body.push_str(title);
        body.push_str("</title><link>");
        body.push_str(link);
        body.push_str("</link>");
        if let Some(d) = date {
            body.push_str("<pubDate>");
            body.push_str(d);
            body.push_str("</pubDate>");
        }
        body.push_str("</item>");
    }
    body.push_str("</channel></rss>");
    body
}

/// Store whose dedup, statistics and article tables are down. The HTTP cache still
/// works so fetches go through.
#[derive(Default)]
pub struct FaultyStore {
    cache: MemoryStore,
}

fn down<T>() -> StoreResult<T> {
    Err(StoreError::Unavailable("connection refused".into()))
}

#[async_trait]
impl Store for FaultyStore {
    async fn dedup_check_and_insert(&self, _link: &str) -> StoreResult<bool> {
        down()
    }
    async fn dedup_prune_older_than(&self, _horizon: DateTime<Utc>) -> StoreResult<usize> {
        down()
    }
    async fn word_stat_increment(&self, _g: &str, _t: &str, _l: Label) -> StoreResult<()> {
        down()
    }
    async fn word_stat_decrement(&self, _g: &str, _t: &str, _l: Label) -> StoreResult<()> {
        down()
    }
    async fn word_stats_for_group(&self, _g: &str) -> StoreResult<HashMap<String, Counts>> {
        down()
    }
    async fn group_stat_increment(&self, _g: &str, _l: Label) -> StoreResult<()> {
        down()
    }
    async fn group_stat_decrement(&self, _g: &str, _l: Label) -> StoreResult<()> {
        down()
    }
    async fn group_stat_get(&self, _g: &str) -> StoreResult<Counts> {
        down()
    }
    async fn http_cache_get(&self, url: &str) -> StoreResult<CacheEntry> {
        self.cache.http_cache_get(url).await
    }
    async fn http_cache_set(
        &self,
        url: &str,
        etag: Option<String>,
        last_modified: Option<String>,
    ) -> StoreResult<()> {
        self.cache.http_cache_set(url, etag, last_modified).await
    }
    async fn http_cache_not_modified(
        &self,
        url: &str,
        etag: Option<String>,
        last_modified: Option<String>,
    ) -> StoreResult<()> {
        self.cache.http_cache_not_modified(url, etag, last_modified).await
    }
    async fn http_cache_increment_fail(&self, url: &str) -> StoreResult<u32> {
        self.cache.http_cache_increment_fail(url).await
    }
    async fn article_save(&self, _id: &str, _g: &str, _text: &str) -> StoreResult<()> {
        down()
    }
    async fn article_lookup(&self, _id: &str) -> StoreResult<Option<ArticleRecord>> {
        down()
    }
    async fn article_set_label(&self, _id: &str, _l: Label) -> StoreResult<()> {
        down()
    }
    async fn article_prune_older_than(&self, _horizon: DateTime<Utc>) -> StoreResult<usize> {
        down()
    }
}
