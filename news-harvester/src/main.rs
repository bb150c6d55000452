use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use news_harvester::config::load_sources;
use news_harvester::{
    run_cycle, CategoryClassifier, Fetcher, Harvester, HarvesterConfig, NewsEngine, PgStore,
    SummaryAction,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Incremental RSS harvester with a per-category summary view.
#[derive(Parser)]
#[command(name = "news-harvester", version)]
struct Cli {
    /// TOML config file. Defaults to ./harvester.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Whitespace separated list of feed URLs.
    #[arg(long, global = true)]
    sources_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest all sources, sweep duplicates, then rebuild or refresh the summary.
    Cycle {
        /// Feed URLs, added to those from --sources-file and NEWS_SOURCES.
        urls: Vec<String>,
    },
    /// Ingest sources only.
    Ingest { urls: Vec<String> },
    /// Remove duplicate news items.
    Dedupe,
    /// Rebuild the summary view if its source columns are stale, else refresh it.
    Summary {
        #[arg(long)]
        force_rebuild: bool,
    },
    /// Apply pending database migrations.
    Migrate,
    /// List category labels that fell through to the fallback group.
    Labels,
    /// Item counts per source.
    Stats,
}

type PgHarvester = Harvester<PgStore, Fetcher>;

async fn build_harvester(config: &HarvesterConfig) -> Result<PgHarvester> {
    info!("Connecting to database: {}", config.masked_database_url());
    let store = PgStore::connect(&config.database_url, config.max_connections)
        .await
        .with_context(|| format!("connecting to {}", config.masked_database_url()))?;
    let fetcher = Fetcher::new(config.fetch.clone())?;
    let classifier = CategoryClassifier::new(config.categories.clone(), config.fallback_group.clone());
    Ok(Harvester::new(
        Arc::new(store),
        Arc::new(fetcher),
        classifier,
        config.summary_view.clone(),
    ))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = HarvesterConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let harvester = build_harvester(&config).await?;

    match cli.command {
        Command::Migrate => {
            harvester.store().migrate().await?;
        }
        Command::Cycle { urls } => {
            let sources = load_sources(cli.sources_file.as_deref(), &urls)?;
            if sources.is_empty() {
                bail!("no sources given: use --sources-file, NEWS_SOURCES or positional URLs");
            }
            harvester.store().migrate().await?;
            harvester.prepare().await?;
            let report = run_cycle(&harvester, &sources).await;
            print_json(&report)?;
            if !report.succeeded() {
                bail!("cycle {} finished with errors", report.run_id);
            }
        }
        Command::Ingest { urls } => {
            let sources = load_sources(cli.sources_file.as_deref(), &urls)?;
            if sources.is_empty() {
                bail!("no sources given: use --sources-file, NEWS_SOURCES or positional URLs");
            }
            harvester.prepare().await?;
            let mut failed = 0;
            for source in &sources {
                match harvester.ingest_source(source).await {
                    Ok(report) => print_json(&report)?,
                    Err(e) => {
                        error!(source = %source.name, url = %source.uri, error = %e, "ingestion failed");
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                bail!("{} of {} sources failed", failed, sources.len());
            }
        }
        Command::Dedupe => {
            let removed = harvester.dedupe().await?;
            println!("{}", removed);
        }
        Command::Summary { force_rebuild } => {
            let action = if force_rebuild {
                SummaryAction::Rebuild
            } else {
                harvester.check_summary_staleness().await
            };
            match action {
                SummaryAction::Rebuild => harvester.rebuild_summary().await?,
                SummaryAction::Refresh => harvester.refresh_summary().await?,
            }
            println!("{}", action.as_str());
        }
        Command::Labels => {
            print_json(&harvester.unmatched_labels().await?)?;
        }
        Command::Stats => {
            print_json(&harvester.source_stats().await?)?;
        }
    }

    Ok(())
}
