mod common;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use common::*;
use news_harvester::summary::{source_columns, view_columns, SourceColumn};
use news_harvester::types::*;
use news_harvester::{run_cycle, CategoryClassifier, Harvester, MemoryStore, NewsEngine, NewsStore};
use std::sync::Arc;

fn ingest_feeds(fetcher: &FixtureFetcher, names: &[&str]) -> Vec<LiveSourceSpec> {
    names
        .iter()
        .map(|name| {
            let spec = source(name);
            fetcher.serve(&spec.uri, rss(&[FeedItem::new(&format!("{} story", name), at(1))]));
            spec
        })
        .collect()
}

#[tokio::test]
async fn test_missing_view_is_stale() -> Result<()> {
    let (harvester, _store, _fetcher) = harvester().await;
    assert_eq!(harvester.check_summary_staleness().await, SummaryAction::Rebuild);
    Ok(())
}

#[tokio::test]
async fn test_new_source_makes_view_stale() -> Result<()> {
    let (harvester, _store, fetcher) = harvester().await;
    let specs = ingest_feeds(&fetcher, &["alpha", "beta", "gamma"]);

    harvester.ingest_source(&specs[0]).await?;
    harvester.ingest_source(&specs[1]).await?;
    harvester.rebuild_summary().await?;
    assert_eq!(harvester.check_summary_staleness().await, SummaryAction::Refresh);

    harvester.ingest_source(&specs[2]).await?;
    assert_eq!(harvester.check_summary_staleness().await, SummaryAction::Rebuild);

    harvester.rebuild_summary().await?;
    assert_eq!(harvester.check_summary_staleness().await, SummaryAction::Refresh);
    Ok(())
}

#[tokio::test]
async fn test_rebuild_exposes_two_columns_per_source() -> Result<()> {
    let (harvester, store, fetcher) = harvester().await;
    for spec in ingest_feeds(&fetcher, &["alpha", "beta", "gamma"]) {
        harvester.ingest_source(&spec).await?;
    }
    harvester.rebuild_summary().await?;

    let columns = store.summary_view_columns(VIEW).await?.unwrap();
    for name in ["alpha", "beta", "gamma"] {
        assert!(columns.contains(&format!("src_{}_count", name)));
        assert!(columns.contains(&format!("src_{}_count_24", name)));
    }
    let per_source = columns.iter().filter(|c| c.starts_with("src_")).count();
    assert_eq!(per_source, 6);
    for fixed in ["category_name", "total_count", "total_count_24", "avg_count", "max_date", "mon_count", "sun_count"] {
        assert!(columns.iter().any(|c| c == fixed), "missing {}", fixed);
    }
    Ok(())
}

#[test]
fn test_view_built_for_removed_source_is_stale() {
    let registry = |names: &[&str]| -> Vec<Source> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| Source {
                id: i as i64 + 1,
                url: format!("https://{}.example/rss", name),
                name: name.to_string(),
            })
            .collect()
    };
    let built = view_columns(&source_columns(&registry(&["alpha", "beta", "gamma"])));

    let shrunk = registry(&["alpha", "beta"]);
    assert_eq!(
        news_harvester::summary::assess_staleness(Some(&built), &shrunk),
        SummaryAction::Rebuild
    );
    let same = registry(&["alpha", "beta", "gamma"]);
    assert_eq!(
        news_harvester::summary::assess_staleness(Some(&built), &same),
        SummaryAction::Refresh
    );
}

#[tokio::test]
async fn test_summary_rows_match_stored_items() -> Result<()> {
    let (harvester, store, fetcher) = harvester().await;
    let lenta = source("lenta");
    let ria = source("ria");
    let day = |d: u32, h: i64| -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2024, 3, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            + Duration::hours(h)
    };
    fetcher.serve(
        &lenta.uri,
        rss(&[
            FeedItem::new("Cup final", day(5, 18)).category("Спорт"),
            FeedItem::new("Kremlin", day(5, 12)).category("Москва"),
            FeedItem::new("Match", day(4, 15)).category("Спорт"),
            FeedItem::new("Derby", day(4, 9)).category("Спорт"),
        ]),
    );
    fetcher.serve(
        &ria.uri,
        rss(&[FeedItem::new("Summit", Utc::now() - Duration::hours(1)).category("Мир")]),
    );
    harvester.ingest_source(&lenta).await?;
    harvester.ingest_source(&ria).await?;
    harvester.rebuild_summary().await?;

    let rows = store.summary_rows(VIEW).await.unwrap();
    let names: Vec<&str> = rows.iter().map(|r| r.category_name.as_str()).collect();
    assert_eq!(names, vec!["Мир", "Россия и СНГ", "Спорт"]);

    let sport = &rows[2];
    assert_eq!(sport.total_count, 3);
    assert_eq!(sport.total_count_24, 0);
    assert_eq!(sport.avg_count, 1);
    assert_eq!(sport.max_date, NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
    assert_eq!(sport.weekday_counts, [2, 1, 0, 0, 0, 0, 0]);
    assert_eq!(sport.source_counts["src_lenta_count"], 3);
    assert_eq!(sport.source_counts["src_ria_count"], 0);

    let world = &rows[0];
    assert_eq!(world.total_count_24, 1);
    assert_eq!(world.source_counts["src_ria_count_24"], 1);
    assert_eq!(world.source_counts["src_lenta_count"], 0);
    Ok(())
}

#[tokio::test]
async fn test_busiest_day_tie_goes_to_latest_date() -> Result<()> {
    let (harvester, store, fetcher) = harvester().await;
    let lenta = source("lenta");
    fetcher.serve(
        &lenta.uri,
        rss(&[
            FeedItem::new("Tuesday", at(30)).category("Спорт"),
            FeedItem::new("Monday", at(3)).category("Спорт"),
        ]),
    );
    harvester.ingest_source(&lenta).await?;
    harvester.rebuild_summary().await?;

    let rows = store.summary_rows(VIEW).await.unwrap();
    assert_eq!(rows[0].max_date, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
    Ok(())
}

#[tokio::test]
async fn test_refresh_picks_up_new_items_without_changing_columns() -> Result<()> {
    let (harvester, store, fetcher) = harvester().await;
    let lenta = source("lenta");
    fetcher.serve(&lenta.uri, rss(&[FeedItem::new("One", at(1)).category("Спорт")]));
    harvester.ingest_source(&lenta).await?;
    harvester.rebuild_summary().await?;
    let columns_before = store.summary_view_columns(VIEW).await?;

    fetcher.serve(&lenta.uri, rss(&[FeedItem::new("Two", at(2)).category("Спорт")]));
    harvester.ingest_source(&lenta).await?;
    assert_eq!(store.summary_rows(VIEW).await.unwrap()[0].total_count, 1);

    harvester.refresh_summary().await?;
    assert_eq!(store.summary_rows(VIEW).await.unwrap()[0].total_count, 2);
    assert_eq!(store.summary_view_columns(VIEW).await?, columns_before);
    Ok(())
}

#[tokio::test]
async fn test_refresh_without_view_fails() -> Result<()> {
    let (harvester, _store, _fetcher) = harvester().await;
    assert!(harvester.refresh_summary().await.is_err());
    Ok(())
}

/// Store whose view introspection always fails.
struct BlindStore(MemoryStore);

#[async_trait]
impl NewsStore for BlindStore {
    async fn ensure_category_groups(&self, names: &[String]) -> Result<()> {
        self.0.ensure_category_groups(names).await
    }
    async fn resolve_source(&self, url: &str, name: &str) -> Result<Source> {
        self.0.resolve_source(url, name).await
    }
    async fn list_sources(&self) -> Result<Vec<Source>> {
        self.0.list_sources().await
    }
    async fn watermark(&self, source_id: i64) -> Result<Option<DateTime<Utc>>> {
        self.0.watermark(source_id).await
    }
    async fn commit_batch(&self, batch: &IngestBatch) -> Result<usize> {
        self.0.commit_batch(batch).await
    }
    async fn sweep_duplicates(&self) -> Result<u64> {
        self.0.sweep_duplicates().await
    }
    async fn summary_view_columns(&self, _view: &str) -> Result<Option<Vec<String>>> {
        Err(HarvesterError::General("catalog unavailable".to_string()))
    }
    async fn rebuild_summary_view(&self, view: &str, columns: &[SourceColumn]) -> Result<()> {
        self.0.rebuild_summary_view(view, columns).await
    }
    async fn refresh_summary_view(&self, view: &str) -> Result<()> {
        self.0.refresh_summary_view(view).await
    }
    async fn unmatched_labels(&self) -> Result<Vec<UnmatchedLabel>> {
        self.0.unmatched_labels().await
    }
    async fn count_items(&self, source_id: Option<i64>) -> Result<i64> {
        self.0.count_items(source_id).await
    }
}

#[tokio::test]
async fn test_failed_staleness_check_means_rebuild() -> Result<()> {
    let store = Arc::new(BlindStore(MemoryStore::new()));
    let harvester = Harvester::new(
        store.clone(),
        Arc::new(FixtureFetcher::new()),
        CategoryClassifier::default(),
        VIEW,
    );
    harvester.rebuild_summary().await?;
    assert_eq!(harvester.check_summary_staleness().await, SummaryAction::Rebuild);
    Ok(())
}

#[tokio::test]
async fn test_cycle_runs_every_step_and_reports_failures() -> Result<()> {
    let (harvester, store, fetcher) = harvester().await;
    let mut specs = ingest_feeds(&fetcher, &["alpha", "beta"]);
    specs.push(source("offline"));

    let first = run_cycle(&harvester, &specs).await;
    assert!(!first.succeeded());
    assert_eq!(first.sources.len(), 3);
    assert_eq!(first.sources[0].inserted, Some(1));
    assert_eq!(first.sources[1].inserted, Some(1));
    assert!(first.sources[2].error.is_some());
    assert_eq!(first.removed_duplicates, Some(0));
    assert_eq!(first.summary_action.as_deref(), Some("rebuild"));
    assert!(first.errors.is_empty());

    // The failed source got registered, so the view built above already
    // carries its columns.
    let second = run_cycle(&harvester, &specs[..2]).await;
    assert!(second.succeeded());
    assert_eq!(second.sources[0].inserted, Some(0));
    assert_eq!(second.summary_action.as_deref(), Some("refresh"));
    assert_ne!(first.run_id, second.run_id);

    assert_eq!(store.count_items(None).await?, 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cycle_runs_on_a_spawned_task() -> Result<()> {
    let (harvester, store, fetcher) = harvester().await;
    let specs = ingest_feeds(&fetcher, &["alpha", "beta"]);
    let engine = Arc::new(harvester);

    let report = tokio::spawn(async move { run_cycle(&*engine, &specs).await })
        .await
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(report.summary_action.as_deref(), Some("rebuild"));
    assert_eq!(store.count_items(None).await?, 2);
    Ok(())
}
