#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use news_harvester::types::*;
use news_harvester::{CategoryClassifier, FeedFetcher, Harvester, MemoryStore, NewsStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const VIEW: &str = "news_summary";

/// Serves canned feed documents by URL; unknown URLs answer 503.
#[derive(Default)]
pub struct FixtureFetcher {
    feeds: Mutex<HashMap<String, Vec<u8>>>,
}

impl FixtureFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, body: Vec<u8>) {
        self.feeds.lock().unwrap().insert(url.to_string(), body);
    }

    pub fn remove(&self, url: &str) {
        self.feeds.lock().unwrap().remove(url);
    }
}

#[async_trait]
impl FeedFetcher for FixtureFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.feeds
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| HarvesterError::Status {
                url: url.to_string(),
                status: 503,
            })
    }
}

pub struct FeedItem {
    pub title: String,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub category: Option<String>,
}

impl FeedItem {
    pub fn new(title: &str, published: DateTime<Utc>) -> Self {
        Self {
            title: title.to_string(),
            link: Some(format!("https://news.example/{}", title.to_lowercase().replace(' ', "-"))),
            published: Some(published),
            category: None,
        }
    }

    pub fn category(mut self, label: &str) -> Self {
        self.category = Some(label.to_string());
        self
    }

    pub fn undated(mut self) -> Self {
        self.published = None;
        self
    }
}

pub fn rss(items: &[FeedItem]) -> Vec<u8> {
    let mut body = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
<channel>
<title>Fixture feed</title>
<link>https://news.example/</link>
<description>Test fixture</description>
"#,
    );
    for item in items {
        body.push_str("<item>\n");
        body.push_str(&format!("<title>{}</title>\n", item.title));
        if let Some(link) = &item.link {
            body.push_str(&format!("<link>{}</link>\n", link));
        }
        body.push_str(&format!("<description>About {}</description>\n", item.title));
        if let Some(published) = item.published {
            body.push_str(&format!("<pubDate>{}</pubDate>\n", published.to_rfc2822()));
        }
        if let Some(category) = &item.category {
            body.push_str(&format!("<category>{}</category>\n", category));
        }
        body.push_str("</item>\n");
    }
    body.push_str("</channel>\n</rss>\n");
    body.into_bytes()
}

/// 2024-03-04 (a Monday) plus `hours`.
pub fn at(hours: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap() + Duration::hours(hours)
}

pub fn source(name: &str) -> LiveSourceSpec {
    LiveSourceSpec {
        uri: format!("https://{}.example/rss", name),
        name: name.to_string(),
    }
}

pub type TestHarvester = Harvester<MemoryStore, FixtureFetcher>;

pub async fn harvester() -> (TestHarvester, Arc<MemoryStore>, Arc<FixtureFetcher>) {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(FixtureFetcher::new());
    let harvester = Harvester::new(
        store.clone(),
        fetcher.clone(),
        CategoryClassifier::default(),
        VIEW,
    );
    harvester.prepare().await.unwrap();
    (harvester, store, fetcher)
}

pub async fn titles_for(store: &MemoryStore, source_id: i64) -> Vec<String> {
    let mut items = store.items().await;
    items.retain(|i| i.source_id == source_id);
    items.sort_by_key(|i| i.id);
    items.into_iter().filter_map(|i| i.title).collect()
}

pub async fn group_of(store: &MemoryStore, item: &NewsItem) -> String {
    let categories = store.categories().await;
    let groups = store.category_groups().await;
    let category = categories.iter().find(|c| c.id == item.category_id).unwrap();
    groups
        .iter()
        .find(|g| g.id == category.group_id)
        .unwrap()
        .name
        .clone()
}

pub async fn source_id(store: &MemoryStore, spec: &LiveSourceSpec) -> i64 {
    store.resolve_source(&spec.uri, &spec.name).await.unwrap().id
}
