// src/feedback.rs
//! Pulls human verdicts from the interactive channel and retrains the classifier.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::classifier::Classifier;
use crate::notify::{FeedbackChannel, Notifier, Verdict};
use crate::store::{Label, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictOutcome {
    /// No article record (pruned or never issued).
    Unknown,
    /// The same label was already applied.
    Duplicate,
    Trained(Label),
    /// The earlier opposite label was untrained first.
    Reversed(Label),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedbackReport {
    pub received: usize,
    pub trained: usize,
    pub reversed: usize,
    pub duplicates: usize,
    pub unknown: usize,
    pub errors: usize,
}

pub struct FeedbackLoop {
    channel: Arc<dyn FeedbackChannel>,
    store: Arc<dyn Store>,
    classifier: Classifier,
}

impl FeedbackLoop {
    pub fn new(
        channel: Arc<dyn FeedbackChannel>,
        store: Arc<dyn Store>,
        classifier: Classifier,
    ) -> Self {
        Self {
            channel,
            store,
            classifier,
        }
    }

    /// One poll of the channel. Only the poll itself can fail; per-verdict errors are
    /// logged and counted.
    pub async fn poll_once(&self) -> Result<FeedbackReport> {
        let verdicts = self
            .channel
            .poll_verdicts()
            .await
            .with_context(|| format!("polling {} for verdicts", self.channel.name()))?;

        let mut report = FeedbackReport {
            received: verdicts.len(),
            ..Default::default()
        };
        for verdict in &verdicts {
            match self.handle(verdict).await {
                Ok(VerdictOutcome::Unknown) => report.unknown += 1,
                Ok(VerdictOutcome::Duplicate) => report.duplicates += 1,
                Ok(VerdictOutcome::Trained(_)) => report.trained += 1,
                Ok(VerdictOutcome::Reversed(_)) => report.reversed += 1,
                Err(e) => {
                    warn!(target: "feedback", article = %verdict.article_id, error = ?e, "verdict not applied");
                    report.errors += 1;
                }
            }
        }
        if report.received > 0 {
            info!(
                target: "feedback",
                received = report.received,
                trained = report.trained,
                reversed = report.reversed,
                unknown = report.unknown,
                "verdicts processed"
            );
        }
        Ok(report)
    }

    /// Applies one verdict. On error the verdict is not acknowledged; channels that
    /// already advanced past it (Telegram's update offset) do not deliver it again.
    pub async fn handle(&self, verdict: &Verdict) -> Result<VerdictOutcome> {
        let Some(article) = self
            .store
            .article_lookup(&verdict.article_id)
            .await
            .context("article lookup")?
        else {
            debug!(target: "feedback", article = %verdict.article_id, "unknown article, dropping verdict");
            self.ack(verdict).await;
            return Ok(VerdictOutcome::Unknown);
        };

        let label = Label::from_relevant(verdict.relevant);
        let outcome = match article.label {
            Some(previous) if previous == label => VerdictOutcome::Duplicate,
            Some(previous) => {
                self.classifier
                    .untrain(&article.group, &article.text, previous)
                    .await
                    .context("untraining previous verdict")?;
                self.classifier
                    .train(&article.group, &article.text, label)
                    .await
                    .context("training")?;
                VerdictOutcome::Reversed(label)
            }
            None => {
                self.classifier
                    .train(&article.group, &article.text, label)
                    .await
                    .context("training")?;
                VerdictOutcome::Trained(label)
            }
        };

        if !matches!(outcome, VerdictOutcome::Duplicate) {
            self.store
                .article_set_label(&verdict.article_id, label)
                .await
                .context("recording verdict label")?;
            info!(
                target: "feedback",
                group = %article.group,
                label = label.as_str(),
                reversed = matches!(outcome, VerdictOutcome::Reversed(_)),
                text = %article.text,
                "classifier trained"
            );
        }

        self.ack(verdict).await;
        Ok(outcome)
    }

    async fn ack(&self, verdict: &Verdict) {
        if let Err(e) = self.channel.acknowledge(verdict).await {
            warn!(target: "feedback", receipt = %verdict.receipt, error = ?e, "acknowledge failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Inbox {
        pending: Mutex<Vec<Verdict>>,
        acked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for Inbox {
        fn name(&self) -> &str {
            "inbox"
        }
        async fn notify(&self, _text: &str) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl FeedbackChannel for Inbox {
        async fn send_with_feedback(&self, _text: &str, _id: &str) -> Result<()> {
            Ok(())
        }
        async fn poll_verdicts(&self) -> Result<Vec<Verdict>> {
            Ok(std::mem::take(&mut *self.pending.lock().unwrap()))
        }
        async fn acknowledge(&self, v: &Verdict) -> Result<()> {
            self.acked.lock().unwrap().push(v.receipt.clone());
            Ok(())
        }
    }

    fn verdict(id: &str, relevant: bool, receipt: &str) -> Verdict {
        Verdict {
            article_id: id.into(),
            relevant,
            receipt: receipt.into(),
        }
    }

    async fn setup() -> (Arc<Inbox>, Arc<MemoryStore>, FeedbackLoop) {
        let inbox = Arc::new(Inbox::default());
        let store = Arc::new(MemoryStore::in_memory());
        let classifier = Classifier::new(store.clone());
        store
            .article_save("abc", "security", "npm malware found")
            .await
            .unwrap();
        let fl = FeedbackLoop::new(inbox.clone(), store.clone(), classifier);
        (inbox, store, fl)
    }

    #[tokio::test]
    async fn unknown_ids_are_acknowledged_and_dropped() {
        let (inbox, store, fl) = setup().await;
        let out = fl.handle(&verdict("nope", true, "cb0")).await.unwrap();
        assert_eq!(out, VerdictOutcome::Unknown);
        assert_eq!(*inbox.acked.lock().unwrap(), vec!["cb0".to_string()]);
        assert_eq!(store.group_stat_get("security").await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn verdict_trains_and_repeat_is_noop() {
        let (_inbox, store, fl) = setup().await;
        assert_eq!(
            fl.handle(&verdict("abc", true, "cb1")).await.unwrap(),
            VerdictOutcome::Trained(Label::Relevant)
        );
        assert_eq!(
            fl.handle(&verdict("abc", true, "cb2")).await.unwrap(),
            VerdictOutcome::Duplicate
        );
        let g = store.group_stat_get("security").await.unwrap();
        assert_eq!((g.relevant, g.irrelevant), (1, 0));
        let rec = store.article_lookup("abc").await.unwrap().unwrap();
        assert_eq!(rec.label, Some(Label::Relevant));
    }

    #[tokio::test]
    async fn reversal_moves_counts_to_the_new_label() {
        let (_inbox, store, fl) = setup().await;
        fl.handle(&verdict("abc", true, "cb1")).await.unwrap();
        assert_eq!(
            fl.handle(&verdict("abc", false, "cb2")).await.unwrap(),
            VerdictOutcome::Reversed(Label::Irrelevant)
        );
        let g = store.group_stat_get("security").await.unwrap();
        assert_eq!((g.relevant, g.irrelevant), (0, 1));
        let words = store.word_stats_for_group("security").await.unwrap();
        assert_eq!(words["malware"].relevant, 0);
        assert_eq!(words["malware"].irrelevant, 1);
    }

    #[tokio::test]
    async fn poll_once_reports_every_verdict() {
        let (inbox, _store, fl) = setup().await;
        inbox.pending.lock().unwrap().extend([
            verdict("abc", false, "a"),
            verdict("gone", true, "b"),
            verdict("abc", false, "c"),
        ]);
        let report = fl.poll_once().await.unwrap();
        assert_eq!(report.received, 3);
        assert_eq!(report.trained, 1);
        assert_eq!(report.unknown, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(inbox.acked.lock().unwrap().len(), 3);
    }
}
