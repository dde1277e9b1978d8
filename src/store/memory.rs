// src/store/memory.rs
//! In-process store with an optional JSON snapshot on disk.
//!
//! All state lives behind one `tokio::sync::RwLock`: reads run concurrently, writes
//! are serialized, so check-and-insert and clamped decrements are atomic.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::{ArticleRecord, CacheEntry, Counts, Label, Store, StoreResult};

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    #[serde(default)]
    seen: HashMap<String, DateTime<Utc>>,
    #[serde(default)]
    words: HashMap<String, HashMap<String, Counts>>,
    #[serde(default)]
    groups: HashMap<String, Counts>,
    #[serde(default)]
    http_cache: HashMap<String, CacheEntry>,
    #[serde(default)]
    articles: HashMap<String, ArticleRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    path: Option<PathBuf>,
    flush_lock: Mutex<()>,
}

impl MemoryStore {
    /// Volatile store; `flush` is a no-op.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the snapshot at `path`. A missing file yields an empty store, a corrupt
    /// one is an error.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match fs::read(&path).await {
            Ok(bytes) => {
                let state: State = serde_json::from_slice(&bytes)?;
                info!(
                    path = %path.display(),
                    seen = state.seen.len(),
                    groups = state.groups.len(),
                    articles = state.articles.len(),
                    "store snapshot loaded"
                );
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no store snapshot yet, starting empty");
                State::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
            flush_lock: Mutex::new(()),
        })
    }

    /// Writes the snapshot atomically (temp file + rename).
    pub async fn flush(&self) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.flush_lock.lock().await;

        let bytes = {
            let state = self.state.read().await;
            serde_json::to_vec(&*state)?
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "store snapshot written");
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn dedup_check_and_insert(&self, link: &str) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        if state.seen.contains_key(link) {
            return Ok(true);
        }
        state.seen.insert(link.to_string(), Utc::now());
        Ok(false)
    }

    async fn dedup_prune_older_than(&self, horizon: DateTime<Utc>) -> StoreResult<usize> {
        let mut state = self.state.write().await;
        let before = state.seen.len();
        state.seen.retain(|_, first_seen| *first_seen >= horizon);
        Ok(before - state.seen.len())
    }

    async fn word_stat_increment(
        &self,
        group: &str,
        token: &str,
        label: Label,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state
            .words
            .entry(group.to_string())
            .or_default()
            .entry(token.to_string())
            .or_default()
            .increment(label);
        Ok(())
    }

    async fn word_stat_decrement(
        &self,
        group: &str,
        token: &str,
        label: Label,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(counts) = state
            .words
            .get_mut(group)
            .and_then(|words| words.get_mut(token))
        {
            counts.decrement(label);
        }
        Ok(())
    }

    async fn word_stats_for_group(&self, group: &str) -> StoreResult<HashMap<String, Counts>> {
        let state = self.state.read().await;
        Ok(state.words.get(group).cloned().unwrap_or_default())
    }

    async fn group_stat_increment(&self, group: &str, label: Label) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.groups.entry(group.to_string()).or_default().increment(label);
        Ok(())
    }

    async fn group_stat_decrement(&self, group: &str, label: Label) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(counts) = state.groups.get_mut(group) {
            counts.decrement(label);
        }
        Ok(())
    }

    async fn group_stat_get(&self, group: &str) -> StoreResult<Counts> {
        let state = self.state.read().await;
        Ok(state.groups.get(group).copied().unwrap_or_default())
    }

    async fn http_cache_get(&self, url: &str) -> StoreResult<CacheEntry> {
        let state = self.state.read().await;
        Ok(state.http_cache.get(url).cloned().unwrap_or_default())
    }

    async fn http_cache_set(
        &self,
        url: &str,
        etag: Option<String>,
        last_modified: Option<String>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.http_cache.insert(
            url.to_string(),
            CacheEntry {
                etag,
                last_modified,
                fail_count: 0,
            },
        );
        Ok(())
    }

    async fn http_cache_not_modified(
        &self,
        url: &str,
        etag: Option<String>,
        last_modified: Option<String>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let entry = state.http_cache.entry(url.to_string()).or_default();
        if etag.is_some() {
            entry.etag = etag;
        }
        if last_modified.is_some() {
            entry.last_modified = last_modified;
        }
        Ok(())
    }

    async fn http_cache_increment_fail(&self, url: &str) -> StoreResult<u32> {
        let mut state = self.state.write().await;
        let entry = state.http_cache.entry(url.to_string()).or_default();
        entry.fail_count = entry.fail_count.saturating_add(1);
        Ok(entry.fail_count)
    }

    async fn article_save(&self, id: &str, group: &str, text: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state
            .articles
            .entry(id.to_string())
            .or_insert_with(|| ArticleRecord {
                group: group.to_string(),
                text: text.to_string(),
                label: None,
                created: Utc::now(),
            });
        Ok(())
    }

    async fn article_lookup(&self, id: &str) -> StoreResult<Option<ArticleRecord>> {
        let state = self.state.read().await;
        Ok(state.articles.get(id).cloned())
    }

    async fn article_set_label(&self, id: &str, label: Label) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(article) = state.articles.get_mut(id) {
            article.label = Some(label);
        }
        Ok(())
    }

    async fn article_prune_older_than(&self, horizon: DateTime<Utc>) -> StoreResult<usize> {
        let mut state = self.state.write().await;
        let before = state.articles.len();
        state.articles.retain(|_, a| a.created >= horizon);
        Ok(before - state.articles.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    #[tokio::test]
    async fn dedup_reports_already_present_after_first_insert() {
        let store = MemoryStore::in_memory();
        assert!(!store.dedup_check_and_insert("https://a.test/1").await.unwrap());
        for _ in 0..5 {
            assert!(store.dedup_check_and_insert("https://a.test/1").await.unwrap());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_dedup_admits_exactly_one() {
        let store = Arc::new(MemoryStore::in_memory());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let s = store.clone();
            handles.push(tokio::spawn(async move {
                s.dedup_check_and_insert("https://a.test/race").await.unwrap()
            }));
        }
        let mut fresh = 0;
        for h in handles {
            if !h.await.unwrap() {
                fresh += 1;
            }
        }
        assert_eq!(fresh, 1);
    }

    #[tokio::test]
    async fn decrements_clamp_at_zero() {
        let store = MemoryStore::in_memory();
        store.group_stat_decrement("g", Label::Relevant).await.unwrap();
        store
            .word_stat_decrement("g", "token", Label::Irrelevant)
            .await
            .unwrap();
        assert_eq!(store.group_stat_get("g").await.unwrap(), Counts::default());

        store
            .word_stat_increment("g", "token", Label::Relevant)
            .await
            .unwrap();
        store
            .word_stat_decrement("g", "token", Label::Relevant)
            .await
            .unwrap();
        store
            .word_stat_decrement("g", "token", Label::Relevant)
            .await
            .unwrap();
        let words = store.word_stats_for_group("g").await.unwrap();
        assert_eq!(words["token"], Counts::default());
    }

    #[tokio::test]
    async fn fail_counter_increments_and_resets_on_success() {
        let store = MemoryStore::in_memory();
        let url = "https://feed.test/rss";
        assert_eq!(store.http_cache_increment_fail(url).await.unwrap(), 1);
        assert_eq!(store.http_cache_increment_fail(url).await.unwrap(), 2);

        store
            .http_cache_not_modified(url, Some("\"v2\"".into()), None)
            .await
            .unwrap();
        let entry = store.http_cache_get(url).await.unwrap();
        assert_eq!(entry.fail_count, 2);
        assert_eq!(entry.etag.as_deref(), Some("\"v2\""));

        store
            .http_cache_set(url, Some("\"v3\"".into()), Some("Tue, 01 Oct 2024".into()))
            .await
            .unwrap();
        let entry = store.http_cache_get(url).await.unwrap();
        assert_eq!(entry.fail_count, 0);
        assert_eq!(entry.etag.as_deref(), Some("\"v3\""));
        assert_eq!(store.http_cache_increment_fail(url).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn prune_drops_only_old_rows() {
        let store = MemoryStore::in_memory();
        store.dedup_check_and_insert("old").await.unwrap();
        store.article_save("abc", "g", "title").await.unwrap();

        let past = Utc::now() - Duration::days(1);
        assert_eq!(store.dedup_prune_older_than(past).await.unwrap(), 0);
        assert_eq!(store.article_prune_older_than(past).await.unwrap(), 0);

        let future = Utc::now() + Duration::seconds(5);
        assert_eq!(store.dedup_prune_older_than(future).await.unwrap(), 1);
        assert_eq!(store.article_prune_older_than(future).await.unwrap(), 1);
        assert!(!store.dedup_check_and_insert("old").await.unwrap());
        assert!(store.article_lookup("abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn article_save_keeps_first_record() {
        let store = MemoryStore::in_memory();
        store.article_save("id1", "sec", "first").await.unwrap();
        store.article_set_label("id1", Label::Relevant).await.unwrap();
        store.article_save("id1", "sec", "second").await.unwrap();

        let a = store.article_lookup("id1").await.unwrap().unwrap();
        assert_eq!(a.text, "first");
        assert_eq!(a.label, Some(Label::Relevant));
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let store = MemoryStore::open(&path).await.unwrap();
        store.dedup_check_and_insert("https://a.test/x").await.unwrap();
        store.group_stat_increment("sec", Label::Relevant).await.unwrap();
        store
            .word_stat_increment("sec", "malware", Label::Relevant)
            .await
            .unwrap();
        store
            .http_cache_set("https://a.test/rss", Some("e1".into()), None)
            .await
            .unwrap();
        store.flush().await.unwrap();

        let reopened = MemoryStore::open(&path).await.unwrap();
        assert!(reopened
            .dedup_check_and_insert("https://a.test/x")
            .await
            .unwrap());
        assert_eq!(reopened.group_stat_get("sec").await.unwrap().relevant, 1);
        assert_eq!(
            reopened.word_stats_for_group("sec").await.unwrap()["malware"].relevant,
            1
        );
        assert_eq!(
            reopened
                .http_cache_get("https://a.test/rss")
                .await
                .unwrap()
                .etag
                .as_deref(),
            Some("e1")
        );
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(MemoryStore::open(&path).await.is_err());
    }
}
