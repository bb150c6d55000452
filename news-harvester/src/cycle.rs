use crate::types::{CycleReport, LiveSourceSpec, NewsEngine, SourceOutcome, SummaryAction};
use chrono::Utc;
use futures::future::join_all;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Runs one scheduler cycle: every source in parallel, then the duplicate
/// sweep, then the summary step chosen by the staleness check.
///
/// Source failures are recorded and do not stop the cycle. A failed sweep
/// skips the summary step, since the view would be built over rows the next
/// sweep removes.
pub async fn run_cycle<E: NewsEngine + Sync>(engine: &E, sources: &[LiveSourceSpec]) -> CycleReport {
    let run_id = Uuid::new_v4();
    let span = info_span!("cycle", %run_id);
    async move {
        let started_at = Utc::now();
        info!(sources = sources.len(), "cycle started");

        let results = join_all(sources.iter().map(|source| async move {
            let outcome = engine.ingest(source).await;
            (source, outcome)
        }))
        .await;

        let outcomes: Vec<SourceOutcome> = results
            .into_iter()
            .map(|(source, outcome)| match outcome {
                Ok(inserted) => SourceOutcome {
                    source: source.name.clone(),
                    inserted: Some(inserted),
                    error: None,
                },
                Err(e) => {
                    error!(source = %source.name, url = %source.uri, error = %e, "ingestion failed");
                    SourceOutcome {
                        source: source.name.clone(),
                        inserted: None,
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect();

        let mut report = CycleReport {
            run_id,
            started_at,
            finished_at: started_at,
            sources: outcomes,
            removed_duplicates: None,
            summary_action: None,
            errors: Vec::new(),
        };

        match engine.dedupe().await {
            Ok(removed) => report.removed_duplicates = Some(removed),
            Err(e) => {
                error!(error = %e, "duplicate sweep failed");
                report.errors.push(format!("dedupe: {}", e));
            }
        }

        if report.removed_duplicates.is_some() {
            let action = engine.check_summary_staleness().await;
            report.summary_action = Some(action.as_str().to_string());
            let outcome = match action {
                SummaryAction::Rebuild => engine.rebuild_summary().await,
                SummaryAction::Refresh => engine.refresh_summary().await,
            };
            if let Err(e) = outcome {
                error!(action = action.as_str(), error = %e, "summary step failed");
                report.errors.push(format!("summary {}: {}", action.as_str(), e));
            }
        }

        report.finished_at = Utc::now();
        info!(
            succeeded = report.succeeded(),
            removed = report.removed_duplicates.unwrap_or_default(),
            "cycle finished"
        );
        report
    }
    .instrument(span)
    .await
}
