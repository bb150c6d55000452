use crate::types::ParsedEntry;
use chrono::{DateTime, Utc};

/// Newest publication timestamp already stored for a source.
///
/// Never persisted on its own: it is re-read from the news table at the start
/// of every run, so a rolled back run leaves it where it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Watermark(Option<DateTime<Utc>>);

impl Watermark {
    pub fn new(value: Option<DateTime<Utc>>) -> Self {
        Self(value)
    }

    pub fn value(&self) -> Option<DateTime<Utc>> {
        self.0
    }

    /// Whether an entry published at `published_at` is unseen.
    pub fn admits(&self, published_at: DateTime<Utc>) -> bool {
        match self.0 {
            None => true,
            Some(mark) => published_at > mark,
        }
    }

    /// Early-stop scan over the feed.
    ///
    /// Entries are ordered newest first before scanning, since feeds do not
    /// reliably list them that way; the sort is stable so entries sharing a
    /// timestamp keep their feed order. Scanning stops at the first entry not
    /// newer than the watermark.
    pub fn select_new(&self, mut entries: Vec<ParsedEntry>) -> Vec<ParsedEntry> {
        entries.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        entries
            .into_iter()
            .take_while(|entry| self.admits(entry.published_at))
            .collect()
    }
}
