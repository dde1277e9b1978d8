// src/store/mod.rs
//! Persistent state contract shared by the classifier, the ingest pipeline and the
//! feedback loop. The store is the only synchronization point for that state:
//! every operation here is atomic on its own, callers never take extra locks.

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::MemoryStore;

/// Human (or training) verdict for a piece of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Relevant,
    Irrelevant,
}

impl Label {
    pub fn from_relevant(relevant: bool) -> Self {
        if relevant {
            Label::Relevant
        } else {
            Label::Irrelevant
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Label::Relevant => Label::Irrelevant,
            Label::Irrelevant => Label::Relevant,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Label::Relevant => "relevant",
            Label::Irrelevant => "irrelevant",
        }
    }
}

/// Per-label counters. Used both for a single token and for a whole group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub relevant: u64,
    pub irrelevant: u64,
}

impl Counts {
    pub fn total(&self) -> u64 {
        self.relevant + self.irrelevant
    }

    pub fn get(&self, label: Label) -> u64 {
        match label {
            Label::Relevant => self.relevant,
            Label::Irrelevant => self.irrelevant,
        }
    }

    pub(crate) fn increment(&mut self, label: Label) {
        match label {
            Label::Relevant => self.relevant += 1,
            Label::Irrelevant => self.irrelevant += 1,
        }
    }

    /// Clamped at zero.
    pub(crate) fn decrement(&mut self, label: Label) {
        match label {
            Label::Relevant => self.relevant = self.relevant.saturating_sub(1),
            Label::Irrelevant => self.irrelevant = self.irrelevant.saturating_sub(1),
        }
    }
}

/// Conditional-request validators plus the consecutive failure counter for one URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub fail_count: u32,
}

/// Item registered for later feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub group: String,
    pub text: String,
    pub label: Option<Label>,
    pub created: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    /// Atomically records `link` as seen. Returns `true` when it was already present.
    async fn dedup_check_and_insert(&self, link: &str) -> StoreResult<bool>;
    /// Deletes dedup records first seen before `horizon`. Returns how many went away.
    async fn dedup_prune_older_than(&self, horizon: DateTime<Utc>) -> StoreResult<usize>;

    async fn word_stat_increment(&self, group: &str, token: &str, label: Label)
        -> StoreResult<()>;
    async fn word_stat_decrement(&self, group: &str, token: &str, label: Label)
        -> StoreResult<()>;
    async fn word_stats_for_group(&self, group: &str) -> StoreResult<HashMap<String, Counts>>;

    async fn group_stat_increment(&self, group: &str, label: Label) -> StoreResult<()>;
    async fn group_stat_decrement(&self, group: &str, label: Label) -> StoreResult<()>;
    async fn group_stat_get(&self, group: &str) -> StoreResult<Counts>;

    async fn http_cache_get(&self, url: &str) -> StoreResult<CacheEntry>;
    /// Stores fresh validators after a successful fetch and resets the failure counter.
    async fn http_cache_set(
        &self,
        url: &str,
        etag: Option<String>,
        last_modified: Option<String>,
    ) -> StoreResult<()>;
    /// Refreshes validators after a 304 without touching the failure counter.
    async fn http_cache_not_modified(
        &self,
        url: &str,
        etag: Option<String>,
        last_modified: Option<String>,
    ) -> StoreResult<()>;
    /// Returns the new consecutive failure count.
    async fn http_cache_increment_fail(&self, url: &str) -> StoreResult<u32>;

    async fn article_save(&self, id: &str, group: &str, text: &str) -> StoreResult<()>;
    async fn article_lookup(&self, id: &str) -> StoreResult<Option<ArticleRecord>>;
    async fn article_set_label(&self, id: &str, label: Label) -> StoreResult<()>;
    async fn article_prune_older_than(&self, horizon: DateTime<Utc>) -> StoreResult<usize>;
}
