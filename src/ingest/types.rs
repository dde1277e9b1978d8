// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One configured feed, flattened out of its configuration group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedSource {
    pub group: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub important_keywords: Vec<String>,
    #[serde(default)]
    pub ignore_url_signatures: Vec<String>,
    #[serde(default)]
    pub html: Option<HtmlRules>,
    /// Never consult the classifier; only rule matches reach humans.
    #[serde(default)]
    pub keyword_only: bool,
}

impl FeedSource {
    /// `group:name`, or just the name for ungrouped feeds.
    pub fn display_name(&self) -> String {
        if self.group.is_empty() {
            self.name.clone()
        } else {
            format!("{}:{}", self.group, self.name)
        }
    }

    pub fn is_ignored_link(&self, link: &str) -> bool {
        self.ignore_url_signatures
            .iter()
            .any(|sig| !sig.is_empty() && link.contains(sig.as_str()))
    }
}

/// Body inspection for items whose title did not match any keyword.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HtmlRules {
    /// CSS selectors whose text is searched.
    pub selectors: Vec<String>,
    #[serde(default)]
    pub important_keywords: Vec<String>,
    #[serde(default)]
    pub ignore_url_signatures: Vec<String>,
}

impl HtmlRules {
    pub fn is_ignored_link(&self, link: &str) -> bool {
        self.ignore_url_signatures
            .iter()
            .any(|sig| !sig.is_empty() && link.contains(sig.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_includes_group_when_present() {
        let mut s = FeedSource {
            group: "security".into(),
            name: "Example".into(),
            ..Default::default()
        };
        assert_eq!(s.display_name(), "security:Example");
        s.group.clear();
        assert_eq!(s.display_name(), "Example");
    }

    #[test]
    fn ignore_signatures_match_substrings_and_skip_empty() {
        let s = FeedSource {
            ignore_url_signatures: vec!["".into(), "/sponsored/".into()],
            ..Default::default()
        };
        assert!(s.is_ignored_link("https://x.test/sponsored/post"));
        assert!(!s.is_ignored_link("https://x.test/news/post"));
    }
}
