#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveSourceSpec {
    pub uri: String,
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SummaryAction {
    Rebuild,
    Refresh,
}

impl SummaryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryAction::Rebuild => "rebuild",
            SummaryAction::Refresh => "refresh",
        }
    }
}

// Scheduler contract note:
// A scheduler drives one cycle as
//   ingest(source) for every source (independently, may run in parallel)
//   -> dedupe() once
//   -> check_summary_staleness() once, then rebuild_summary() or refresh_summary().
// None of dedupe/rebuild/refresh may overlap with itself. The engine keeps no
// retry loop: a failed step is simply attempted again on the next cycle.

// Every returned future is `Send`, so a cycle can be handed to a
// multi-threaded runtime with `tokio::spawn`. Implementors may still write
// the methods as `async fn`.
pub trait NewsEngine {
    type Error: std::fmt::Display + Send;

    /// Pulls one feed and stores every entry newer than the source's watermark.
    /// Returns the number of stored items.
    fn ingest(&self, source: &LiveSourceSpec) -> impl Future<Output = Result<usize, Self::Error>> + Send;

    /// Removes rows sharing (link, published timestamp), keeping the lowest id.
    fn dedupe(&self) -> impl Future<Output = Result<u64, Self::Error>> + Send;

    /// Never fails: an error while checking means `Rebuild`.
    fn check_summary_staleness(&self) -> impl Future<Output = SummaryAction> + Send;

    fn rebuild_summary(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn refresh_summary(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}
