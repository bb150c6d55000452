use crate::classifier::CategoryClassifier;
use crate::fetcher::FeedFetcher;
use crate::parser::FeedParser;
use crate::store::NewsStore;
use crate::summary::{assess_staleness, source_columns};
use crate::types::{
    HarvesterError, IngestBatch, IngestReport, LiveSourceSpec, NewItem, NewsEngine, Result, Source, SummaryAction,
    UnmatchedLabel,
};
use crate::watermark::Watermark;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct SourceStats {
    pub source: Source,
    pub items: i64,
}

/// The ingestion and aggregation engine.
///
/// Holds no state of its own between calls: the watermark is re-read from the
/// store on each run, so any number of sources may be ingested concurrently.
pub struct Harvester<S, F> {
    store: Arc<S>,
    fetcher: Arc<F>,
    classifier: CategoryClassifier,
    summary_view: String,
}

impl<S: NewsStore, F: FeedFetcher> Harvester<S, F> {
    pub fn new(
        store: Arc<S>,
        fetcher: Arc<F>,
        classifier: CategoryClassifier,
        summary_view: impl Into<String>,
    ) -> Self {
        Self {
            store,
            fetcher,
            classifier,
            summary_view: summary_view.into(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn summary_view(&self) -> &str {
        &self.summary_view
    }

    /// Makes sure every group the classifier can emit exists.
    pub async fn prepare(&self) -> Result<()> {
        self.store
            .ensure_category_groups(&self.classifier.group_names())
            .await
    }

    pub async fn ingest_source(&self, spec: &LiveSourceSpec) -> Result<IngestReport> {
        let source = self.store.resolve_source(&spec.uri, &spec.name).await?;
        let watermark = Watermark::new(self.store.watermark(source.id).await?);
        debug!(source = %source.name, watermark = ?watermark.value(), "resolved source");

        let content = self.fetcher.fetch(&source.url).await?;
        let feed = FeedParser::parse_feed(&content)?;
        let entries_found = feed.entries.len();
        debug!(source = %source.name, feed_title = ?feed.title, entries = entries_found, "parsed feed");
        if feed.skipped > 0 {
            warn!(source = %source.name, skipped = feed.skipped, "entries without a timestamp were skipped");
        }

        let fresh = watermark.select_new(feed.entries);
        let mut batch = IngestBatch {
            source_id: source.id,
            ..IngestBatch::default()
        };
        for entry in fresh {
            let (category, group) = match entry.category {
                Some(label) => {
                    let classification = self.classifier.classify(&label);
                    if !classification.matched {
                        batch.unmatched_labels.push(label.clone());
                    }
                    (label, classification.group)
                }
                None => {
                    let fallback = self.classifier.fallback_group().to_string();
                    (fallback.clone(), fallback)
                }
            };
            batch.items.push(NewItem {
                published_at: entry.published_at,
                title: entry.title,
                link: entry.link,
                description: entry.description,
                category,
                group,
            });
        }

        let inserted = self.store.commit_batch(&batch).await?;
        if !batch.unmatched_labels.is_empty() {
            info!(
                source = %source.name,
                labels = ?batch.unmatched_labels,
                "labels filed under the fallback group"
            );
        }
        info!(source = %source.name, inserted, found = entries_found, "ingested source");

        Ok(IngestReport {
            source: source.name,
            source_id: source.id,
            feed_title: feed.title,
            watermark: watermark.value(),
            entries_found,
            skipped: feed.skipped,
            inserted,
            unmatched_labels: batch.unmatched_labels,
        })
    }

    pub async fn sweep(&self) -> Result<u64> {
        let removed = self.store.sweep_duplicates().await?;
        info!(removed, "duplicate sweep finished");
        Ok(removed)
    }

    /// Compares the view's per-source columns with the source registry.
    /// Any failure to tell counts as stale.
    pub async fn summary_action(&self) -> SummaryAction {
        let assessed = async {
            let columns = self.store.summary_view_columns(&self.summary_view).await?;
            let sources = self.store.list_sources().await?;
            Ok::<_, HarvesterError>(assess_staleness(columns.as_deref(), &sources))
        }
        .await;

        match assessed {
            Ok(action) => {
                debug!(view = %self.summary_view, action = action.as_str(), "summary staleness checked");
                action
            }
            Err(e) => {
                warn!(view = %self.summary_view, error = %e, "staleness check failed, assuming stale");
                SummaryAction::Rebuild
            }
        }
    }

    pub async fn rebuild(&self) -> Result<()> {
        let sources = self.store.list_sources().await?;
        let columns = source_columns(&sources);
        self.store
            .rebuild_summary_view(&self.summary_view, &columns)
            .await?;
        info!(view = %self.summary_view, sources = columns.len(), "summary view rebuilt");
        Ok(())
    }

    pub async fn refresh(&self) -> Result<()> {
        self.store.refresh_summary_view(&self.summary_view).await?;
        info!(view = %self.summary_view, "summary view refreshed");
        Ok(())
    }

    pub async fn unmatched_labels(&self) -> Result<Vec<UnmatchedLabel>> {
        self.store.unmatched_labels().await
    }

    pub async fn source_stats(&self) -> Result<Vec<SourceStats>> {
        let sources = self.store.list_sources().await?;
        let mut stats = Vec::with_capacity(sources.len());
        for source in sources {
            let items = self.store.count_items(Some(source.id)).await?;
            stats.push(SourceStats { source, items });
        }
        Ok(stats)
    }
}

impl<S: NewsStore, F: FeedFetcher> NewsEngine for Harvester<S, F> {
    type Error = HarvesterError;

    async fn ingest(&self, source: &LiveSourceSpec) -> Result<usize> {
        self.ingest_source(source).await.map(|report| report.inserted)
    }

    async fn dedupe(&self) -> Result<u64> {
        self.sweep().await
    }

    async fn check_summary_staleness(&self) -> SummaryAction {
        self.summary_action().await
    }

    async fn rebuild_summary(&self) -> Result<()> {
        self.rebuild().await
    }

    async fn refresh_summary(&self) -> Result<()> {
        self.refresh().await
    }
}
