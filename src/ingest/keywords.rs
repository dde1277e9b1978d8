// src/ingest/keywords.rs
//! Whole-word, case-insensitive keyword rules.

use std::ops::Range;

use anyhow::{Context, Result};
use regex::Regex;

/// Compiled alternation of keywords. An empty keyword set never matches.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    re: Option<Regex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordMatch {
    /// Matched text as it appears in the haystack.
    pub text: String,
    pub span: Range<usize>,
}

impl KeywordMatcher {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Result<Self> {
        let alternatives: Vec<String> = keywords
            .iter()
            .map(|k| k.as_ref().trim())
            .filter(|k| !k.is_empty())
            .map(regex::escape)
            .collect();
        if alternatives.is_empty() {
            return Ok(Self { re: None });
        }
        let pattern = format!(r"(?iu)\b(?:{})\b", alternatives.join("|"));
        let re = Regex::new(&pattern).with_context(|| format!("compiling keyword rule {pattern}"))?;
        Ok(Self { re: Some(re) })
    }

    /// Union of several keyword lists, first occurrence kept.
    pub fn union<S: AsRef<str>>(lists: &[&[S]]) -> Result<Self> {
        let mut merged: Vec<&str> = Vec::new();
        for list in lists {
            for k in list.iter() {
                let k = k.as_ref();
                if !merged.iter().any(|m| m.eq_ignore_ascii_case(k)) {
                    merged.push(k);
                }
            }
        }
        Self::new(&merged)
    }

    pub fn is_empty(&self) -> bool {
        self.re.is_none()
    }

    /// Leftmost match in `text`.
    pub fn find(&self, text: &str) -> Option<KeywordMatch> {
        let m = self.re.as_ref()?.find(text)?;
        Some(KeywordMatch {
            text: m.as_str().to_string(),
            span: m.range(),
        })
    }
}

/// Wraps the matched span in emphasis markers.
pub fn highlight(text: &str, m: &KeywordMatch) -> String {
    format!(
        "{}*{}*{}",
        &text[..m.span.start],
        &text[m.span.clone()],
        &text[m.span.end..]
    )
}
