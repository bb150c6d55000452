pub mod types;
pub mod config;
pub mod fetcher;
pub mod parser;
pub mod classifier;
pub mod watermark;
pub mod dedup;
pub mod summary;
pub mod store;
pub mod harvester;
pub mod cycle;

pub use types::*;
pub use config::HarvesterConfig;
pub use fetcher::{FeedFetcher, Fetcher};
pub use parser::FeedParser;
pub use classifier::{CategoryClassifier, CategoryRule};
pub use watermark::Watermark;
pub use store::{MemoryStore, NewsStore, PgStore};
pub use harvester::{Harvester, SourceStats};
pub use cycle::run_cycle;
