use chrono::{DateTime, SubsecRound, Utc};
use feed_rs::parser;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Feed could not be parsed: {0}")]
pub struct ParseError(#[from] parser::ParseFeedError);

/// One item of a remote feed, normalized from RSS or Atom.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: String,
    pub title: String,
    /// HTML body: the summary, or the full content when there is no summary.
    pub description: String,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

/// A parsed feed document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub title: Option<String>,
    /// Document-level `updated`, falling back to `published`. Truncated to
    /// whole seconds so it compares exactly against a stored watermark.
    pub freshness: Option<DateTime<Utc>>,
    /// Entries in document order (newest first for well-behaved feeds).
    pub entries: Vec<Entry>,
}

pub fn parse_document(bytes: &[u8]) -> Result<Document, ParseError> {
    let feed = parser::parse(bytes)?;

    let freshness = feed.updated.or(feed.published).map(|dt| dt.trunc_subsecs(0));
    let title = feed.title.map(|t| t.content);

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry.links.first().map(|l| l.href.clone());
            let published = entry.published.or(entry.updated);
            let description = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .unwrap_or_default();
            let title = entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string());

            Entry {
                id: entry.id,
                title,
                description,
                link,
                published,
            }
        })
        .collect();

    Ok(Document {
        title,
        freshness,
        entries,
    })
}
