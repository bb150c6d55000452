use crate::types::NewsItem;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Deletes every row that repeats the (link, published_at) pair of a row with
/// a lower id. Rows without a link never count as duplicates.
pub const DELETE_DUPLICATES_SQL: &str = r#"
    DELETE FROM news_items n0
    WHERE EXISTS (
        SELECT 1
        FROM news_items n
        WHERE n.link = n0.link
          AND n.published_at = n0.published_at
          AND n.id < n0.id
    )
"#;

/// In-memory counterpart of [`DELETE_DUPLICATES_SQL`]: ids that the sweep
/// would remove, ascending.
pub fn find_duplicates(items: &[NewsItem]) -> Vec<i64> {
    let mut keepers: HashMap<(&str, DateTime<Utc>), i64> = HashMap::new();
    for item in items {
        if let Some(link) = item.link.as_deref() {
            keepers
                .entry((link, item.published_at))
                .and_modify(|id| *id = (*id).min(item.id))
                .or_insert(item.id);
        }
    }

    let mut duplicates: Vec<i64> = items
        .iter()
        .filter(|item| match item.link.as_deref() {
            Some(link) => keepers.get(&(link, item.published_at)) != Some(&item.id),
            None => false,
        })
        .map(|item| item.id)
        .collect();
    duplicates.sort_unstable();
    duplicates
}
