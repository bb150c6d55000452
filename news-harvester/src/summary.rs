//! Per-category summary view.
//!
//! The view carries one total and one trailing-24h count column per source,
//! so its structure has to follow the source registry. Column names are
//! rendered from [`SourceColumn`]s; reading them back (`src_<fragment>_count`,
//! `src_<fragment>_count_24`) tells whether the view still matches.

use crate::types::{Category, CategoryGroup, NewsItem, Source, SummaryAction};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

pub const SOURCE_COLUMN_PREFIX: &str = "src_";
pub const COUNT_SUFFIX: &str = "_count";
pub const COUNT_24_SUFFIX: &str = "_count_24";

pub const WEEKDAY_COLUMNS: [&str; 7] = [
    "mon_count",
    "tue_count",
    "wed_count",
    "thu_count",
    "fri_count",
    "sat_count",
    "sun_count",
];

// PostgreSQL truncates identifiers past 63 bytes.
const MAX_IDENTIFIER_LEN: usize = 63;
const MAX_FRAGMENT_LEN: usize =
    MAX_IDENTIFIER_LEN - SOURCE_COLUMN_PREFIX.len() - COUNT_24_SUFFIX.len();
// Leaves room for the `_next` staging name used during rebuilds.
const MAX_VIEW_NAME_LEN: usize = MAX_IDENTIFIER_LEN - 5;

/// Identifier fragment derived from a source name, limited to `[a-z0-9_]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnFragment(String);

impl ColumnFragment {
    pub fn sanitize(name: &str) -> Self {
        let mut out = String::with_capacity(name.len());
        for c in name.chars().flat_map(char::to_lowercase) {
            if c.is_ascii_alphanumeric() {
                out.push(c);
            } else if !out.ends_with('_') {
                out.push('_');
            }
        }
        let mut fragment = out.trim_matches('_').to_string();
        if fragment.is_empty() {
            fragment.push_str("source");
        }
        fragment.truncate(MAX_FRAGMENT_LEN);
        Self(fragment)
    }

    fn with_suffix(&self, suffix: &str) -> Self {
        let mut base = self.0.clone();
        base.truncate(MAX_FRAGMENT_LEN.saturating_sub(suffix.len() + 1));
        let base = base.trim_end_matches('_');
        Self(format!("{}_{}", base, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceColumn {
    pub source_id: i64,
    pub fragment: ColumnFragment,
}

impl SourceColumn {
    pub fn count_column(&self) -> String {
        format!("{}{}{}", SOURCE_COLUMN_PREFIX, self.fragment.as_str(), COUNT_SUFFIX)
    }

    pub fn count_24_column(&self) -> String {
        format!("{}{}{}", SOURCE_COLUMN_PREFIX, self.fragment.as_str(), COUNT_24_SUFFIX)
    }
}

/// Column plan for the current registry, ordered by source id. Sources whose
/// names sanitize to the same fragment get their id appended.
pub fn source_columns(sources: &[Source]) -> Vec<SourceColumn> {
    let mut ordered: Vec<&Source> = sources.iter().collect();
    ordered.sort_by_key(|s| s.id);

    let mut used: HashSet<ColumnFragment> = HashSet::new();
    let mut columns = Vec::with_capacity(ordered.len());
    for source in ordered {
        let natural = ColumnFragment::sanitize(&source.name);
        let mut fragment = natural.clone();
        let mut attempt = 0;
        while used.contains(&fragment) {
            let suffix = if attempt == 0 {
                source.id.to_string()
            } else {
                format!("{}_{}", source.id, attempt)
            };
            fragment = natural.with_suffix(&suffix);
            attempt += 1;
        }
        used.insert(fragment.clone());
        columns.push(SourceColumn {
            source_id: source.id,
            fragment,
        });
    }
    columns
}

/// Full column list of a view built from `columns`, in definition order.
pub fn view_columns(columns: &[SourceColumn]) -> Vec<String> {
    let mut names = vec!["category_name".to_string(), "total_count".to_string()];
    names.extend(columns.iter().map(SourceColumn::count_column));
    names.push("total_count_24".to_string());
    names.extend(columns.iter().map(SourceColumn::count_24_column));
    names.push("avg_count".to_string());
    names.push("max_date".to_string());
    names.extend(WEEKDAY_COLUMNS.iter().map(|c| c.to_string()));
    names
}

/// Source fragments encoded in a view's column names.
pub fn fragments_in_view<S: AsRef<str>>(column_names: &[S]) -> BTreeSet<String> {
    column_names
        .iter()
        .filter_map(|name| {
            let rest = name.as_ref().strip_prefix(SOURCE_COLUMN_PREFIX)?;
            rest.strip_suffix(COUNT_24_SUFFIX)
                .or_else(|| rest.strip_suffix(COUNT_SUFFIX))
                .map(str::to_string)
        })
        .collect()
}

/// `view_column_names` is `None` when the view does not exist.
pub fn assess_staleness(view_column_names: Option<&[String]>, sources: &[Source]) -> SummaryAction {
    let Some(names) = view_column_names else {
        return SummaryAction::Rebuild;
    };
    let in_view = fragments_in_view(names);
    let expected: BTreeSet<String> = source_columns(sources)
        .into_iter()
        .map(|c| c.fragment.as_str().to_string())
        .collect();

    if in_view == expected {
        SummaryAction::Refresh
    } else {
        SummaryAction::Rebuild
    }
}

pub fn is_safe_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= MAX_VIEW_NAME_LEN
        && (first.is_ascii_lowercase() || first == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

const VIEW_TEMPLATE: &str = r#"
CREATE MATERIALIZED VIEW __VIEW__ AS
WITH counts AS (
    SELECT
        cg.name AS category_name,
        count(*) AS total_count,
__SOURCE_COUNTS__
        count(*) FILTER (WHERE n.published_at > current_timestamp - interval '1 day') AS total_count_24,
__SOURCE_COUNTS_24__
        count(*) / count(DISTINCT CAST(n.published_at AS date)) AS avg_count
    FROM news_items n
    JOIN categories c ON n.category_id = c.id
    JOIN category_groups cg ON c.group_id = cg.id
    GROUP BY cg.name
),
daily AS (
    SELECT
        cg.name AS category_name,
        CAST(n.published_at AS date) AS day,
        count(*) AS day_count
    FROM news_items n
    JOIN categories c ON n.category_id = c.id
    JOIN category_groups cg ON c.group_id = cg.id
    GROUP BY cg.name, CAST(n.published_at AS date)
),
max_day AS (
    -- busiest day per category; the latest one wins a tie
    SELECT DISTINCT ON (category_name) category_name, day AS max_date
    FROM daily
    ORDER BY category_name, day_count DESC, day DESC
),
week_days AS (
    SELECT
        cg.name AS category_name,
        count(*) FILTER (WHERE extract(isodow FROM n.published_at) = 1) AS mon_count,
        count(*) FILTER (WHERE extract(isodow FROM n.published_at) = 2) AS tue_count,
        count(*) FILTER (WHERE extract(isodow FROM n.published_at) = 3) AS wed_count,
        count(*) FILTER (WHERE extract(isodow FROM n.published_at) = 4) AS thu_count,
        count(*) FILTER (WHERE extract(isodow FROM n.published_at) = 5) AS fri_count,
        count(*) FILTER (WHERE extract(isodow FROM n.published_at) = 6) AS sat_count,
        count(*) FILTER (WHERE extract(isodow FROM n.published_at) = 7) AS sun_count
    FROM news_items n
    JOIN categories c ON n.category_id = c.id
    JOIN category_groups cg ON c.group_id = cg.id
    GROUP BY cg.name
)
SELECT
    c.*,
    md.max_date,
    wd.mon_count, wd.tue_count, wd.wed_count, wd.thu_count,
    wd.fri_count, wd.sat_count, wd.sun_count
FROM counts c
LEFT JOIN max_day md ON c.category_name = md.category_name
LEFT JOIN week_days wd ON c.category_name = wd.category_name
"#;

/// Renders the `CREATE MATERIALIZED VIEW` statement.
///
/// `view_name` must pass [`is_safe_identifier`]; source names only reach the
/// SQL as sanitized fragments and ids are integers.
pub fn render_view_sql(view_name: &str, columns: &[SourceColumn]) -> String {
    let source_counts: String = columns
        .iter()
        .map(|c| {
            format!(
                "        count(*) FILTER (WHERE n.source_id = {}) AS \"{}\",\n",
                c.source_id,
                c.count_column()
            )
        })
        .collect();
    let source_counts_24: String = columns
        .iter()
        .map(|c| {
            format!(
                "        count(*) FILTER (WHERE n.source_id = {} AND n.published_at > current_timestamp - interval '1 day') AS \"{}\",\n",
                c.source_id,
                c.count_24_column()
            )
        })
        .collect();

    VIEW_TEMPLATE
        .replace("__VIEW__", view_name)
        .replace("__SOURCE_COUNTS__\n", &source_counts)
        .replace("__SOURCE_COUNTS_24__\n", &source_counts_24)
}

/// One row of the summary, as the view would hold it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryRow {
    pub category_name: String,
    pub total_count: i64,
    pub total_count_24: i64,
    /// Keyed by per-source column name.
    pub source_counts: BTreeMap<String, i64>,
    pub avg_count: i64,
    pub max_date: NaiveDate,
    /// ISO weekdays, Monday first.
    pub weekday_counts: [i64; 7],
}

#[derive(Default)]
struct RowAccumulator {
    total: i64,
    total_24: i64,
    per_source: HashMap<i64, (i64, i64)>,
    per_day: BTreeMap<NaiveDate, i64>,
    weekdays: [i64; 7],
}

/// Computes the summary contents the view query produces, with UTC dates.
pub fn compute_summary(
    items: &[NewsItem],
    categories: &[Category],
    groups: &[CategoryGroup],
    columns: &[SourceColumn],
    now: DateTime<Utc>,
) -> Vec<SummaryRow> {
    let group_names: HashMap<i64, &str> = groups.iter().map(|g| (g.id, g.name.as_str())).collect();
    let category_groups: HashMap<i64, &str> = categories
        .iter()
        .filter_map(|c| group_names.get(&c.group_id).map(|name| (c.id, *name)))
        .collect();
    let window_start = now - Duration::days(1);

    let mut rows: BTreeMap<&str, RowAccumulator> = BTreeMap::new();
    for item in items {
        let Some(group) = category_groups.get(&item.category_id) else {
            continue;
        };
        let recent = item.published_at > window_start;
        let acc = rows.entry(*group).or_default();
        acc.total += 1;
        let per_source = acc.per_source.entry(item.source_id).or_default();
        per_source.0 += 1;
        if recent {
            acc.total_24 += 1;
            per_source.1 += 1;
        }
        *acc.per_day.entry(item.published_at.date_naive()).or_default() += 1;
        acc.weekdays[item.published_at.weekday().num_days_from_monday() as usize] += 1;
    }

    rows.into_iter()
        .filter_map(|(name, acc)| {
            // Dates ascend, so replacing on equal counts keeps the latest busiest day.
            let (max_date, _) = acc
                .per_day
                .iter()
                .fold(None, |best: Option<(NaiveDate, i64)>, (day, count)| match best {
                    Some((_, best_count)) if best_count > *count => best,
                    _ => Some((*day, *count)),
                })?;

            let mut source_counts = BTreeMap::new();
            for column in columns {
                let (total, recent) = acc.per_source.get(&column.source_id).copied().unwrap_or_default();
                source_counts.insert(column.count_column(), total);
                source_counts.insert(column.count_24_column(), recent);
            }

            Some(SummaryRow {
                category_name: name.to_string(),
                total_count: acc.total,
                total_count_24: acc.total_24,
                source_counts,
                avg_count: acc.total / acc.per_day.len() as i64,
                max_date,
                weekday_counts: acc.weekdays,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src(id: i64, name: &str) -> Source {
        Source {
            id,
            url: format!("https://{}.example/rss", id),
            name: name.to_string(),
        }
    }

    #[test]
    fn sanitize_limits_charset_and_length() {
        assert_eq!(ColumnFragment::sanitize("RIA Novosti!").as_str(), "ria_novosti");
        assert_eq!(ColumnFragment::sanitize("Лента").as_str(), "source");
        let long = ColumnFragment::sanitize(&"x".repeat(200));
        assert!(long.as_str().len() <= MAX_FRAGMENT_LEN);
        let column = SourceColumn {
            source_id: 1,
            fragment: long,
        };
        assert!(column.count_24_column().len() <= MAX_IDENTIFIER_LEN);
    }

    #[test]
    fn colliding_fragments_get_source_id() {
        let columns = source_columns(&[src(4, "ria"), src(2, "RIA"), src(9, "ria_4")]);
        let fragments: Vec<&str> = columns.iter().map(|c| c.fragment.as_str()).collect();
        assert_eq!(fragments, vec!["ria", "ria_4", "ria_4_9"]);
    }

    #[test]
    fn rendered_view_has_one_filter_per_source_column() {
        let columns = source_columns(&[src(1, "lenta"), src(2, "ria")]);
        let sql = render_view_sql("news_summary", &columns);
        assert!(sql.contains("CREATE MATERIALIZED VIEW news_summary AS"));
        assert!(sql.contains("count(*) FILTER (WHERE n.source_id = 1) AS \"src_lenta_count\""));
        assert!(sql.contains("AS \"src_ria_count_24\""));
        assert!(!sql.contains("__SOURCE_COUNTS"));
    }

    #[test]
    fn unsafe_identifiers_are_refused() {
        assert!(is_safe_identifier("news_summary"));
        assert!(!is_safe_identifier("News"));
        assert!(!is_safe_identifier("x; drop table sources"));
        assert!(!is_safe_identifier(""));
    }
}
