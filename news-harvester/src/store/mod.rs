pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::summary::SourceColumn;
use crate::types::{IngestBatch, Result, Source, UnmatchedLabel};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Persistence for sources, categories, news items and the summary view.
///
/// Each method is one logical unit: it either applies fully or leaves the
/// store as it found it.
#[async_trait]
pub trait NewsStore: Send + Sync {
    /// Creates any missing category group rows.
    async fn ensure_category_groups(&self, names: &[String]) -> Result<()>;

    /// Returns the source registered for `url`, registering it under `name`
    /// if it is new. An existing source keeps its name.
    async fn resolve_source(&self, url: &str, name: &str) -> Result<Source>;

    async fn list_sources(&self) -> Result<Vec<Source>>;

    /// Newest `published_at` stored for the source.
    async fn watermark(&self, source_id: i64) -> Result<Option<DateTime<Utc>>>;

    /// Creates unseen categories, appends the items and records unmatched
    /// labels, all in one transaction. Returns the number of items written.
    async fn commit_batch(&self, batch: &IngestBatch) -> Result<usize>;

    /// Deletes all but the lowest-id row of every (link, published_at) pair.
    async fn sweep_duplicates(&self) -> Result<u64>;

    /// Column names of the summary view, or `None` if it does not exist.
    async fn summary_view_columns(&self, view: &str) -> Result<Option<Vec<String>>>;

    /// Replaces the summary view with one built for `columns`. The old view
    /// stays in place if building the new one fails.
    async fn rebuild_summary_view(&self, view: &str, columns: &[SourceColumn]) -> Result<()>;

    async fn refresh_summary_view(&self, view: &str) -> Result<()>;

    async fn unmatched_labels(&self) -> Result<Vec<UnmatchedLabel>>;

    /// Items stored for one source, or for all sources.
    async fn count_items(&self, source_id: Option<i64>) -> Result<i64>;
}

/// Distinct (category, group) pairs of a batch, ordered by category name.
/// Concurrent batches touching the same rows lock them in this order.
pub fn category_plan(batch: &IngestBatch) -> Vec<(&str, &str)> {
    let mut plan: BTreeMap<&str, &str> = BTreeMap::new();
    for item in &batch.items {
        plan.entry(item.category.as_str()).or_insert(item.group.as_str());
    }
    plan.into_iter().collect()
}

/// Unmatched labels of a batch with their occurrence counts, ordered by label.
pub fn unmatched_counts(batch: &IngestBatch) -> Vec<(&str, i64)> {
    let mut counts: BTreeMap<&str, i64> = BTreeMap::new();
    for label in &batch.unmatched_labels {
        *counts.entry(label.as_str()).or_default() += 1;
    }
    counts.into_iter().collect()
}
