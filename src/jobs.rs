// src/jobs.rs
//! The scheduled jobs the binary registers.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tracing::{debug, info};

use crate::feedback::FeedbackLoop;
use crate::ingest::FeedPipeline;
use crate::scheduler::Job;
use crate::store::{MemoryStore, Store};
use crate::window::ActiveWindow;

/// Dedup rows and article records older than this are pruned.
pub const RETENTION_DAYS: i64 = 30;

/// One pipeline poll cycle, skipped outside the active window.
pub struct PollJob {
    pipeline: Arc<FeedPipeline>,
    window: Option<ActiveWindow>,
}

impl PollJob {
    pub fn new(pipeline: Arc<FeedPipeline>, window: Option<ActiveWindow>) -> Self {
        Self { pipeline, window }
    }
}

#[async_trait]
impl Job for PollJob {
    fn name(&self) -> &str {
        "rss-poll"
    }

    async fn run(&self) -> Result<()> {
        if !crate::window::is_open(self.window.as_ref()) {
            debug!(target: "ingest", "outside active window, skipping poll");
            return Ok(());
        }
        self.pipeline.poll_cycle().await;
        Ok(())
    }
}

pub struct FeedbackJob {
    feedback: FeedbackLoop,
}

impl FeedbackJob {
    pub fn new(feedback: FeedbackLoop) -> Self {
        Self { feedback }
    }
}

#[async_trait]
impl Job for FeedbackJob {
    fn name(&self) -> &str {
        "feedback-poll"
    }

    async fn run(&self) -> Result<()> {
        self.feedback.poll_once().await?;
        Ok(())
    }
}

/// Retention sweep over seen links and article records.
pub struct PruneJob {
    store: Arc<dyn Store>,
    retention: ChronoDuration,
}

impl PruneJob {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            retention: ChronoDuration::days(RETENTION_DAYS),
        }
    }
}

#[async_trait]
impl Job for PruneJob {
    fn name(&self) -> &str {
        "prune"
    }

    async fn run(&self) -> Result<()> {
        let horizon = Utc::now() - self.retention;
        let links = self
            .store
            .dedup_prune_older_than(horizon)
            .await
            .context("pruning seen links")?;
        let articles = self
            .store
            .article_prune_older_than(horizon)
            .await
            .context("pruning article records")?;
        info!(target: "scheduler", links, articles, %horizon, "pruned old records");
        Ok(())
    }
}

/// Writes the store snapshot to disk.
pub struct FlushJob {
    store: Arc<MemoryStore>,
}

impl FlushJob {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Job for FlushJob {
    fn name(&self) -> &str {
        "snapshot-flush"
    }

    async fn run(&self) -> Result<()> {
        self.store.flush().await.context("flushing store snapshot")?;
        Ok(())
    }
}
