// src/app.rs
//! Builds the store, notifiers, pipeline and scheduler from configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::classifier::Classifier;
use crate::config::{AppConfig, OutputConfig};
use crate::feedback::FeedbackLoop;
use crate::ingest::fetch::{HttpFetcher, RetryPolicy};
use crate::ingest::{FeedPipeline, PipelineSettings};
use crate::jobs::{FeedbackJob, FlushJob, PollJob, PruneJob};
use crate::notify::{ConsoleNotifier, NotifierMux, SlackNotifier, TelegramChannel};
use crate::scheduler::Scheduler;
use crate::store::MemoryStore;

pub const PRUNE_INTERVAL: Duration = Duration::from_secs(24 * 3600);
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub struct App {
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<NotifierMux>,
    pub scheduler: Scheduler,
}

pub fn build_notifier(output: &OutputConfig) -> Result<NotifierMux> {
    let mut mux = NotifierMux::new();
    if output.console {
        mux = mux.with_channel(Arc::new(ConsoleNotifier));
    }
    if let Some(slack) = &output.slack {
        let ch = SlackNotifier::new(slack.webhook_url.clone())?
            .with_window(slack.delivery_window()?);
        mux = mux.with_channel(Arc::new(ch));
    }
    if let Some(tg) = &output.telegram {
        let ch = TelegramChannel::new(&tg.token, tg.chat_id.clone())?
            .with_window(tg.delivery_window()?);
        mux = mux.with_interactive(Arc::new(ch));
    }
    Ok(mux)
}

/// Opens the store (a corrupt snapshot is fatal) and registers every job.
pub async fn build(cfg: &AppConfig) -> Result<App> {
    let store = Arc::new(
        MemoryStore::open(&cfg.store_path)
            .await
            .with_context(|| format!("opening store {}", cfg.store_path.display()))?,
    );
    let classifier = Classifier::new(store.clone());
    let notifier = Arc::new(build_notifier(&cfg.output)?);
    let mut scheduler = Scheduler::new();

    if let Some(rss) = &cfg.rss {
        let retry = RetryPolicy::default();
        let fetcher = Arc::new(HttpFetcher::new(retry.timeout)?);
        let settings = PipelineSettings {
            global_keywords: rss.important_keywords.clone(),
            retry,
            ..Default::default()
        };
        let pipeline = FeedPipeline::new(
            rss.sources(),
            store.clone(),
            classifier.clone(),
            fetcher,
            notifier.clone(),
            settings,
        )?;
        let interval = rss.poll_interval()?;
        info!(sources = rss.sources().len(), every_secs = interval.as_secs(), "rss enabled");
        scheduler.add(
            interval,
            Arc::new(PollJob::new(Arc::new(pipeline), rss.active_window()?)),
        );
    }

    if let (Some(channel), Some(tg)) = (notifier.interactive(), &cfg.output.telegram) {
        let feedback = FeedbackLoop::new(channel, store.clone(), classifier.clone());
        scheduler.add(tg.feedback_interval()?, Arc::new(FeedbackJob::new(feedback)));
    }

    scheduler.add(PRUNE_INTERVAL, Arc::new(PruneJob::new(store.clone())));
    scheduler.add(FLUSH_INTERVAL, Arc::new(FlushJob::new(store.clone())));

    Ok(App {
        store,
        notifier,
        scheduler,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_jobs_for_configured_features() {
        let dir = tempfile::tempdir().unwrap();
        let raw = format!(
            r#"
store_path = "{}"
[output.telegram]
token = "t"
chat_id = "1"
[rss]
frequency = "15m"
[[rss.groups]]
group = "g"
[[rss.groups.feeds]]
name = "F"
url = "https://f.test/rss"
"#,
            dir.path().join("state.json").display()
        );
        let cfg = AppConfig::from_toml_str(&raw).unwrap();
        let app = build(&cfg).await.unwrap();
        let names: Vec<&str> = app.scheduler.tasks().iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["rss-poll", "feedback-poll", "prune", "snapshot-flush"]);
        assert!(app.notifier.has_interactive());
        assert_eq!(app.notifier.channel_count(), 2);
    }

    #[tokio::test]
    async fn minimal_config_only_runs_maintenance() {
        let dir = tempfile::tempdir().unwrap();
        let raw = format!(
            "store_path = \"{}\"\n[output]\nconsole = false\n",
            dir.path().join("s.json").display()
        );
        let cfg = AppConfig::from_toml_str(&raw).unwrap();
        let app = build(&cfg).await.unwrap();
        assert_eq!(app.scheduler.tasks().len(), 2);
        assert_eq!(app.notifier.channel_count(), 0);
    }
}
