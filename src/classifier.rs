// src/classifier.rs
//! Online naive Bayes relevance classifier, partitioned by topic group.
//!
//! Statistics live in the [`Store`]; the classifier itself holds no state, so any
//! number of clones can train and score concurrently.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::store::{Label, Store, StoreResult};

/// Trained documents (both labels together) needed before scores are trusted.
pub const MIN_TRAINING_DOCUMENTS: u64 = 30;

/// Probability returned when there is nothing to base a score on.
pub const NEUTRAL_PRIOR: f64 = 0.5;

/// Lowercase, split on anything that is not a letter or digit, drop tokens shorter
/// than three characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_string)
        .collect()
}

#[derive(Clone)]
pub struct Classifier {
    store: Arc<dyn Store>,
}

impl Classifier {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn train(&self, group: &str, text: &str, label: Label) -> StoreResult<()> {
        for token in tokenize(text) {
            self.store.word_stat_increment(group, &token, label).await?;
        }
        self.store.group_stat_increment(group, label).await?;
        debug!(target: "classifier", group, label = label.as_str(), "trained");
        Ok(())
    }

    /// Reverses an earlier `train` with the same arguments. Counts never go below zero.
    pub async fn untrain(&self, group: &str, text: &str, label: Label) -> StoreResult<()> {
        for token in tokenize(text) {
            self.store.word_stat_decrement(group, &token, label).await?;
        }
        self.store.group_stat_decrement(group, label).await?;
        debug!(target: "classifier", group, label = label.as_str(), "untrained");
        Ok(())
    }

    /// Probability that `text` is relevant for `group`. Store faults degrade to the
    /// neutral prior.
    ///
    /// A group trained with only one label has a zero prior for the other, so the
    /// result is exactly `1.0` or `0.0` until both labels have been seen.
    pub async fn score(&self, group: &str, text: &str) -> f64 {
        match self.try_score(group, text).await {
            Ok(p) => p,
            Err(e) => {
                warn!(target: "classifier", group, error = %e, "score fell back to neutral prior");
                NEUTRAL_PRIOR
            }
        }
    }

    async fn try_score(&self, group: &str, text: &str) -> StoreResult<f64> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Ok(NEUTRAL_PRIOR);
        }

        let totals = self.store.group_stat_get(group).await?;
        let grand_total = totals.total();
        if grand_total == 0 {
            return Ok(NEUTRAL_PRIOR);
        }

        let words = self.store.word_stats_for_group(group).await?;
        let vocabulary = words.len() as f64;
        let grand_total = grand_total as f64;

        let mut log_scores = [Label::Relevant, Label::Irrelevant].map(|label| {
            let label_total = totals.get(label) as f64;
            // ln(0) = -inf for a label that was never trained; exp() below turns it into 0.
            let mut acc = (label_total / grand_total).ln();
            let denominator = label_total + vocabulary + 1.0;
            for token in &tokens {
                let count = words.get(token).map(|c| c.get(label)).unwrap_or(0) as f64;
                acc += ((count + 1.0) / denominator).ln();
            }
            acc
        });

        let max = log_scores[0].max(log_scores[1]);
        for s in log_scores.iter_mut() {
            *s = (*s - max).exp();
        }
        Ok(log_scores[0] / (log_scores[0] + log_scores[1]))
    }

    /// True once the group has seen [`MIN_TRAINING_DOCUMENTS`] trained documents.
    pub async fn is_ready(&self, group: &str) -> bool {
        match self.store.group_stat_get(group).await {
            Ok(totals) => totals.total() >= MIN_TRAINING_DOCUMENTS,
            Err(e) => {
                warn!(target: "classifier", group, error = %e, "readiness check failed");
                false
            }
        }
    }
}
