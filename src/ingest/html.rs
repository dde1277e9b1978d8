// src/ingest/html.rs
//! Visible-text extraction from article pages for body keyword rules.

use anyhow::{anyhow, Result};
use scraper::{Html, Selector};

/// Parses the joined selector list once so invalid config fails early.
pub fn compile_selectors<S: AsRef<str>>(selectors: &[S]) -> Result<Selector> {
    let joined = selectors
        .iter()
        .map(|s| s.as_ref().trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    if joined.is_empty() {
        return Err(anyhow!("no HTML content selectors given"));
    }
    Selector::parse(&joined).map_err(|e| anyhow!("invalid HTML selector `{joined}`: {e:?}"))
}

/// Text of every element matching `selector`, whitespace-collapsed.
pub fn extract_text(html: &str, selector: &Selector) -> String {
    let doc = Html::parse_document(html);
    let mut out = String::new();
    for el in doc.select(selector) {
        for chunk in el.text() {
            let chunk = chunk.trim();
            if chunk.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(chunk);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title>ignored</title></head>
<body>
  <nav>Menu npm</nav>
  <article>
    <p>First paragraph.</p>
    <p>Mentions <a href="/x">supply chain</a> risk.</p>
  </article>
  <div class="summary">Short summary</div>
</body></html>"#;

    #[test]
    fn extracts_text_from_all_selectors() {
        let sel = compile_selectors(&["article p", ".summary"]).unwrap();
        let text = extract_text(PAGE, &sel);
        assert_eq!(
            text,
            "First paragraph. Mentions supply chain risk. Short summary"
        );
        assert!(!text.contains("Menu"));
    }

    #[test]
    fn no_match_yields_empty_text() {
        let sel = compile_selectors(&["section.body"]).unwrap();
        assert!(extract_text(PAGE, &sel).is_empty());
    }

    #[test]
    fn invalid_or_empty_selectors_are_errors() {
        assert!(compile_selectors(&["p[["]).is_err());
        assert!(compile_selectors::<&str>(&[]).is_err());
    }
}
