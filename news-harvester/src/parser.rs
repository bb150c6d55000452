use crate::types::{HarvesterError, ParsedEntry, ParsedFeed, Result};
use feed_rs::parser;
use tracing::{debug, warn};

/// Turns raw RSS/Atom bytes into entries, preserving document order.
pub struct FeedParser;

impl FeedParser {
    pub fn parse_feed(content: &[u8]) -> Result<ParsedFeed> {
        debug!("Parsing feed content ({} bytes)", content.len());

        let feed = parser::parse(content)
            .map_err(|e| HarvesterError::Parse(format!("Failed to parse feed: {}", e)))?;

        let title = feed.title.map(|t| t.content);
        let mut entries = Vec::with_capacity(feed.entries.len());
        let mut skipped = 0;

        for entry in feed.entries {
            match Self::parse_entry(entry) {
                Some(parsed) => entries.push(parsed),
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!(skipped, "Skipped feed entries without a publication date");
        }
        debug!("Parsed feed with {} entries", entries.len());

        Ok(ParsedFeed {
            title,
            entries,
            skipped,
        })
    }

    fn parse_entry(entry: feed_rs::model::Entry) -> Option<ParsedEntry> {
        // Atom entries may only carry <updated>.
        let Some(published_at) = entry.published.or(entry.updated) else {
            debug!("Dropping entry {} without a timestamp", entry.id);
            return None;
        };

        let title = entry.title.map(|t| t.content).and_then(non_empty);
        let link = entry.links.first().map(|l| l.href.clone()).and_then(non_empty);
        let description = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body))
            .and_then(non_empty);

        // Only the first category is modelled.
        let category = entry
            .categories
            .into_iter()
            .next()
            .map(|c| c.label.unwrap_or(c.term))
            .and_then(non_empty);

        Some(ParsedEntry {
            title,
            link,
            description,
            published_at,
            category,
        })
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
