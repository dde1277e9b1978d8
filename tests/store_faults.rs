// tests/store_faults.rs
mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use common::{rss, settings, source, FaultyStore, Recorder, ScriptedFetcher};
use feed_triage::ingest::FeedPipeline;
use feed_triage::{Classifier, FeedbackLoop, Label, NotifierMux, Store, Verdict};

const FEED: &str = "https://ex.test/feed.xml";

#[tokio::test]
async fn dedup_fault_counts_as_seen_and_sends_nothing() {
    let store: Arc<dyn Store> = Arc::new(FaultyStore::default());
    let fetcher = Arc::new(ScriptedFetcher::default());
    let recorder = Arc::new(Recorder::default());
    let mut src = source("security", "Example", FEED);
    src.important_keywords = vec!["malware".into()];
    let pipeline = Arc::new(
        FeedPipeline::new(
            vec![src],
            store.clone(),
            Classifier::new(store.clone()),
            fetcher.clone(),
            Arc::new(NotifierMux::new().with_interactive(recorder.clone())),
            settings(),
        )
        .unwrap(),
    );
    fetcher.ok(
        FEED,
        &rss(&[
            ("npm malware found", "https://ex.test/1", None),
            ("Quiet news", "https://ex.test/2", None),
        ]),
    );

    let report = pipeline
        .poll_cycle_at(Utc.with_ymd_and_hms(2024, 10, 10, 12, 0, 0).unwrap())
        .await;

    assert_eq!(report.processed, 1);
    assert_eq!(report.items.items, 2);
    assert_eq!(report.items.duplicates, 2);
    assert_eq!(report.items.urgent, 0);
    assert_eq!(report.items.notified, 0);
    assert!(recorder.messages().is_empty());
}

#[tokio::test]
async fn classifier_degrades_to_neutral_when_store_is_down() {
    let classifier = Classifier::new(Arc::new(FaultyStore::default()));
    assert_eq!(classifier.score("security", "npm malware found").await, 0.5);
    assert!(!classifier.is_ready("security").await);
    assert!(classifier
        .train("security", "npm malware found", Label::Relevant)
        .await
        .is_err());
}

#[tokio::test]
async fn verdict_is_left_unacknowledged_when_lookup_fails() {
    let store: Arc<dyn Store> = Arc::new(FaultyStore::default());
    let inbox = Arc::new(Recorder::default());
    inbox.pending.lock().unwrap().push(Verdict {
        article_id: "abcdef0123".into(),
        relevant: true,
        receipt: "cb1".into(),
    });
    let feedback = FeedbackLoop::new(inbox.clone(), store.clone(), Classifier::new(store));

    let report = feedback.poll_once().await.unwrap();
    assert_eq!(report.received, 1);
    assert_eq!(report.errors, 1);
    assert!(inbox.acked.lock().unwrap().is_empty());
}
