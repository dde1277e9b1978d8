// src/ingest/feed.rs
//! RSS 2.0 / RSS 1.0 (RDF) / Atom parsing into [`FeedItem`]s.
//!
//! Streams the document with the quick-xml pull reader and only looks at unprefixed
//! direct children of each `<item>`/`<entry>`. Extension elements (`media:title`,
//! `atom:link`, ...) never shadow the core fields, and HTML entities are decoded with
//! `html_escape` so documents using `&eacute;` and friends still parse.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::Reader;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::ingest::normalize_text;
use crate::ingest::types::FeedItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedKind {
    Rss,
    Rdf,
    Atom,
}

impl FeedKind {
    fn from_root(local: &[u8]) -> Result<Self> {
        match local {
            b"rss" => Ok(Self::Rss),
            b"RDF" => Ok(Self::Rdf),
            b"feed" => Ok(Self::Atom),
            other => bail!(
                "unrecognized feed root element <{}>",
                String::from_utf8_lossy(other)
            ),
        }
    }

    fn entry_tag(self) -> &'static [u8] {
        match self {
            Self::Rss | Self::Rdf => b"item",
            Self::Atom => b"entry",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Published,
    Updated,
}

fn field_for(name: QName<'_>) -> Option<Field> {
    match (name.prefix().map(|p| p.into_inner()), name.local_name().into_inner()) {
        (None, b"title") => Some(Field::Title),
        (None, b"link") => Some(Field::Link),
        (None, b"pubDate" | b"published") => Some(Field::Published),
        (None, b"updated") | (Some(b"dc"), b"date") => Some(Field::Updated),
        _ => None,
    }
}

fn decode_entities(raw: &str) -> String {
    html_escape::decode_html_entities(raw).into_owned()
}

/// `<link>` is plain text in RSS and an `href` attribute in Atom.
#[derive(Debug)]
struct LinkCandidate {
    url: String,
    rel: Option<String>,
}

fn pick_link(links: &[LinkCandidate]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.url.clone())
}

fn link_attributes(e: &BytesStart<'_>) -> (Option<String>, Option<String>) {
    let mut href = None;
    let mut rel = None;
    for attr in e.attributes().flatten() {
        let value = decode_entities(&String::from_utf8_lossy(&attr.value));
        match attr.key.as_ref() {
            b"href" => href = Some(value.trim().to_string()).filter(|h| !h.is_empty()),
            b"rel" => rel = Some(value),
            _ => {}
        }
    }
    (href, rel)
}

struct Capture {
    field: Field,
    depth: usize,
    raw: String,
}

/// One `<item>`/`<entry>` being read.
struct Entry {
    depth: usize,
    title: Option<String>,
    links: Vec<LinkCandidate>,
    published: Option<String>,
    updated: Option<String>,
    capture: Option<Capture>,
}

impl Entry {
    fn new(depth: usize) -> Self {
        Self {
            depth,
            title: None,
            links: Vec::new(),
            published: None,
            updated: None,
            capture: None,
        }
    }

    fn open(&mut self, e: &BytesStart<'_>, depth: usize, empty: bool) {
        if self.capture.is_some() || depth != self.depth + 1 {
            return;
        }
        let Some(field) = field_for(e.name()) else {
            return;
        };
        if field == Field::Link {
            let (href, rel) = link_attributes(e);
            if let Some(url) = href {
                self.links.push(LinkCandidate { url, rel });
                return;
            }
        }
        if !empty {
            self.capture = Some(Capture {
                field,
                depth,
                raw: String::new(),
            });
        }
    }

    fn text(&mut self, chunk: &str) {
        if let Some(capture) = self.capture.as_mut() {
            capture.raw.push_str(chunk);
        }
    }

    /// Returns true when `depth` closed the entry element itself.
    fn close(&mut self, depth: usize) -> bool {
        match self.capture.take() {
            Some(capture) if capture.depth == depth => {
                self.finish(capture);
                false
            }
            Some(capture) => {
                self.capture = Some(capture);
                false
            }
            None => depth == self.depth,
        }
    }

    // First occurrence wins.
    fn finish(&mut self, capture: Capture) {
        match capture.field {
            // titles keep their entities; normalize_text decodes them once
            Field::Title => {
                self.title.get_or_insert(capture.raw);
            }
            Field::Link => {
                let url = decode_entities(capture.raw.trim());
                if !url.is_empty() {
                    self.links.push(LinkCandidate { url, rel: None });
                }
            }
            Field::Published => {
                self.published.get_or_insert(decode_entities(&capture.raw));
            }
            Field::Updated => {
                self.updated.get_or_insert(decode_entities(&capture.raw));
            }
        }
    }

    fn into_item(self) -> Option<FeedItem> {
        let link = pick_link(&self.links)?;
        let published = self.published.or(self.updated);
        Some(FeedItem {
            title: normalize_text(self.title.as_deref().unwrap_or_default()),
            link,
            published: published.as_deref().and_then(parse_timestamp),
        })
    }
}

#[derive(Default)]
struct FeedParser {
    kind: Option<FeedKind>,
    depth: usize,
    entry: Option<Entry>,
    items: Vec<FeedItem>,
}

impl FeedParser {
    fn open(&mut self, e: &BytesStart<'_>, empty: bool) -> Result<()> {
        let depth = self.depth + 1;
        if !empty {
            self.depth = depth;
        }
        let name = e.name();
        let Some(kind) = self.kind else {
            self.kind = Some(FeedKind::from_root(name.local_name().into_inner())?);
            return Ok(());
        };
        match self.entry.as_mut() {
            Some(entry) => entry.open(e, depth, empty),
            None => {
                let is_entry =
                    name.prefix().is_none() && name.local_name().into_inner() == kind.entry_tag();
                if is_entry && !empty {
                    self.entry = Some(Entry::new(depth));
                }
            }
        }
        Ok(())
    }

    fn text(&mut self, chunk: &str) {
        if let Some(entry) = self.entry.as_mut() {
            entry.text(chunk);
        }
    }

    fn close(&mut self) {
        let depth = self.depth;
        self.depth = depth.saturating_sub(1);
        let closes_entry = self
            .entry
            .as_mut()
            .is_some_and(|entry| entry.close(depth));
        if closes_entry {
            if let Some(item) = self.entry.take().and_then(Entry::into_item) {
                self.items.push(item);
            }
        }
    }

    fn finish(self) -> Result<Vec<FeedItem>> {
        if self.kind.is_none() {
            bail!("feed body has no root element");
        }
        if self.depth != 0 {
            bail!("feed document ends inside an open element");
        }
        Ok(self.items)
    }
}

/// Accepts RFC 2822 (RSS) and RFC 3339 (Atom) timestamps.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    OffsetDateTime::parse(raw, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(raw, &Rfc3339))
        .ok()
        .and_then(|dt| DateTime::from_timestamp(dt.unix_timestamp(), 0))
        // obsolete zone names ("GMT", "EST") that the strict parser rejects
        .or_else(|| {
            DateTime::parse_from_rfc2822(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
}

/// Parses a feed document, keeping document order. Entries without a link are dropped.
pub fn parse_feed(body: &str) -> Result<Vec<FeedItem>> {
    let mut reader = Reader::from_str(body);
    let mut parser = FeedParser::default();
    loop {
        match reader.read_event().context("reading feed xml")? {
            Event::Start(e) => parser.open(&e, false)?,
            Event::Empty(e) => parser.open(&e, true)?,
            Event::End(_) => parser.close(),
            Event::Text(t) => parser.text(&String::from_utf8_lossy(&t)),
            Event::CData(c) => parser.text(&String::from_utf8_lossy(&c)),
            Event::Eof => break,
            _ => {}
        }
    }
    parser.finish()
}
