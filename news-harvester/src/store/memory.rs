use crate::dedup::find_duplicates;
use crate::store::NewsStore;
use crate::summary::{compute_summary, view_columns, SourceColumn, SummaryRow};
use crate::types::{
    Category, CategoryGroup, HarvesterError, IngestBatch, NewsItem, Result, Source, UnmatchedLabel,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

struct MaterializedSummary {
    columns: Vec<SourceColumn>,
    rows: Vec<SummaryRow>,
}

#[derive(Default)]
struct MemoryState {
    sources: Vec<Source>,
    groups: Vec<CategoryGroup>,
    categories: Vec<Category>,
    items: Vec<NewsItem>,
    unmatched: BTreeMap<String, UnmatchedLabel>,
    views: HashMap<String, MaterializedSummary>,
    next_source_id: i64,
    next_group_id: i64,
    next_category_id: i64,
    next_item_id: i64,
    fail_commits: bool,
}

impl MemoryState {
    fn summarize(&self, columns: &[SourceColumn]) -> Vec<SummaryRow> {
        compute_summary(&self.items, &self.categories, &self.groups, columns, Utc::now())
    }
}

/// Store kept entirely in process memory.
///
/// Mirrors the transactional behaviour of [`super::PgStore`]: a batch is
/// validated before anything is applied, so a failing commit leaves no trace.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn items(&self) -> Vec<NewsItem> {
        self.state.lock().await.items.clone()
    }

    pub async fn categories(&self) -> Vec<Category> {
        self.state.lock().await.categories.clone()
    }

    pub async fn category_groups(&self) -> Vec<CategoryGroup> {
        self.state.lock().await.groups.clone()
    }

    /// Rows as of the last rebuild or refresh of `view`.
    pub async fn summary_rows(&self, view: &str) -> Option<Vec<SummaryRow>> {
        let state = self.state.lock().await;
        state.views.get(view).map(|v| v.rows.clone())
    }

    /// Appends an item as-is, bypassing the batch path. Returns its id.
    pub async fn insert_raw_item(&self, mut item: NewsItem) -> i64 {
        let mut state = self.state.lock().await;
        state.next_item_id += 1;
        item.id = state.next_item_id;
        state.items.push(item);
        state.next_item_id
    }

    /// Makes every following `commit_batch` fail, as a lost connection would.
    pub async fn fail_commits(&self, fail: bool) {
        self.state.lock().await.fail_commits = fail;
    }
}

#[async_trait]
impl NewsStore for MemoryStore {
    async fn ensure_category_groups(&self, names: &[String]) -> Result<()> {
        let mut state = self.state.lock().await;
        for name in names {
            if !state.groups.iter().any(|g| &g.name == name) {
                state.next_group_id += 1;
                let id = state.next_group_id;
                state.groups.push(CategoryGroup {
                    id,
                    name: name.clone(),
                });
            }
        }
        Ok(())
    }

    async fn resolve_source(&self, url: &str, name: &str) -> Result<Source> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.sources.iter().find(|s| s.url == url) {
            return Ok(existing.clone());
        }
        state.next_source_id += 1;
        let source = Source {
            id: state.next_source_id,
            url: url.to_string(),
            name: name.to_string(),
        };
        state.sources.push(source.clone());
        Ok(source)
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        Ok(self.state.lock().await.sources.clone())
    }

    async fn watermark(&self, source_id: i64) -> Result<Option<DateTime<Utc>>> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .iter()
            .filter(|i| i.source_id == source_id)
            .map(|i| i.published_at)
            .max())
    }

    async fn commit_batch(&self, batch: &IngestBatch) -> Result<usize> {
        let mut state = self.state.lock().await;
        if state.fail_commits {
            return Err(HarvesterError::General("commit rejected".to_string()));
        }
        if !state.sources.iter().any(|s| s.id == batch.source_id) {
            return Err(HarvesterError::General(format!("unknown source id {}", batch.source_id)));
        }

        // Resolve every category up front; nothing is written until all resolve.
        let mut pending: Vec<(String, i64)> = Vec::new();
        for item in &batch.items {
            let known = state.categories.iter().any(|c| c.name == item.category)
                || pending.iter().any(|(name, _)| name == &item.category);
            if known {
                continue;
            }
            let group = state
                .groups
                .iter()
                .find(|g| g.name == item.group)
                .ok_or_else(|| HarvesterError::General(format!("unknown category group '{}'", item.group)))?;
            pending.push((item.category.clone(), group.id));
        }

        for (name, group_id) in pending {
            state.next_category_id += 1;
            let id = state.next_category_id;
            state.categories.push(Category { id, name, group_id });
        }

        for item in &batch.items {
            let category_id = state
                .categories
                .iter()
                .find(|c| c.name == item.category)
                .map(|c| c.id)
                .ok_or_else(|| HarvesterError::General(format!("category '{}' vanished", item.category)))?;
            state.next_item_id += 1;
            let id = state.next_item_id;
            state.items.push(NewsItem {
                id,
                published_at: item.published_at,
                title: item.title.clone(),
                link: item.link.clone(),
                description: item.description.clone(),
                source_id: batch.source_id,
                category_id,
            });
        }

        let now = Utc::now();
        for label in &batch.unmatched_labels {
            state
                .unmatched
                .entry(label.clone())
                .and_modify(|l| {
                    l.occurrences += 1;
                    l.last_seen = now;
                })
                .or_insert_with(|| UnmatchedLabel {
                    label: label.clone(),
                    occurrences: 1,
                    first_seen: now,
                    last_seen: now,
                });
        }

        Ok(batch.items.len())
    }

    async fn sweep_duplicates(&self) -> Result<u64> {
        let mut state = self.state.lock().await;
        let doomed = find_duplicates(&state.items);
        state.items.retain(|item| doomed.binary_search(&item.id).is_err());
        Ok(doomed.len() as u64)
    }

    async fn summary_view_columns(&self, view: &str) -> Result<Option<Vec<String>>> {
        let state = self.state.lock().await;
        Ok(state.views.get(view).map(|v| view_columns(&v.columns)))
    }

    async fn rebuild_summary_view(&self, view: &str, columns: &[SourceColumn]) -> Result<()> {
        let mut state = self.state.lock().await;
        let rows = state.summarize(columns);
        state.views.insert(
            view.to_string(),
            MaterializedSummary {
                columns: columns.to_vec(),
                rows,
            },
        );
        Ok(())
    }

    async fn refresh_summary_view(&self, view: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let columns = match state.views.get(view) {
            Some(existing) => existing.columns.clone(),
            None => {
                return Err(HarvesterError::General(format!(
                    "summary view '{}' does not exist",
                    view
                )))
            }
        };
        let rows = state.summarize(&columns);
        state.views.insert(view.to_string(), MaterializedSummary { columns, rows });
        Ok(())
    }

    async fn unmatched_labels(&self) -> Result<Vec<UnmatchedLabel>> {
        let state = self.state.lock().await;
        let mut labels: Vec<UnmatchedLabel> = state.unmatched.values().cloned().collect();
        labels.sort_by(|a, b| b.occurrences.cmp(&a.occurrences).then_with(|| a.label.cmp(&b.label)));
        Ok(labels)
    }

    async fn count_items(&self, source_id: Option<i64>) -> Result<i64> {
        let state = self.state.lock().await;
        let count = state
            .items
            .iter()
            .filter(|i| source_id.map_or(true, |id| i.source_id == id))
            .count();
        Ok(count as i64)
    }
}
