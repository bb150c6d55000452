use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use interfaces::defs::{LiveSourceSpec, NewsEngine, SummaryAction};

/// A registered feed. Created the first time its URL is ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub url: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryGroup {
    pub id: i64,
    pub name: String,
}

/// A raw label as it appeared in some feed, pinned to one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub group_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    pub id: i64,
    pub published_at: DateTime<Utc>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub source_id: i64,
    pub category_id: i64,
}

#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<ParsedEntry>,
    /// Entries dropped because they carried no usable timestamp.
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub published_at: DateTime<Utc>,
    pub category: Option<String>,
}

/// An entry that passed the watermark and has been classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub published_at: DateTime<Utc>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    /// Raw category label; becomes a `categories` row if unseen.
    pub category: String,
    /// Group the label maps to when its category row has to be created.
    pub group: String,
}

/// Everything one source run writes. Stores apply it all or nothing.
#[derive(Debug, Clone, Default)]
pub struct IngestBatch {
    pub source_id: i64,
    pub items: Vec<NewItem>,
    pub unmatched_labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmatchedLabel {
    pub label: String,
    pub occurrences: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub source: String,
    pub source_id: i64,
    pub feed_title: Option<String>,
    pub watermark: Option<DateTime<Utc>>,
    pub entries_found: usize,
    pub skipped: usize,
    pub inserted: usize,
    pub unmatched_labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    pub source: String,
    pub inserted: Option<usize>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceOutcome>,
    pub removed_duplicates: Option<u64>,
    pub summary_action: Option<String>,
    pub errors: Vec<String>,
}

impl CycleReport {
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty() && self.sources.iter().all(|s| s.error.is_none())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_feed_size_mb: usize,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "news-harvester/0.1".to_string(),
            timeout_seconds: 30,
            max_feed_size_mb: 10,
            max_redirects: 5,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HarvesterError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} when fetching {url}")]
    Status { url: String, status: u16 },

    #[error("Feed size exceeds limit: {size_mb}MB")]
    FeedTooLarge { size_mb: usize },

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, HarvesterError>;
