// src/ingest/types.rs
use thiserror::Error;

/// One normalized content item from a remote source. Produced by exactly one
/// adapter call and never mutated afterward.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct RawItem {
    pub source: String,
    pub title: String,
    pub url: String,
    pub published_at: u64, // unix seconds
    pub body: String,
}

/// Time window passed to adapters: keep items published within the last
/// `days_back` days relative to `now`.
#[derive(Debug, Clone, Copy)]
pub struct FetchWindow {
    pub now: u64,
    pub days_back: u32,
}

impl FetchWindow {
    pub fn last_days(days_back: u32) -> Self {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        Self { now, days_back }
    }

    pub fn at(now: u64, days_back: u32) -> Self {
        Self { now, days_back }
    }

    /// Oldest acceptable publication timestamp.
    pub fn cutoff(&self) -> u64 {
        self.now.saturating_sub(u64::from(self.days_back) * 86_400)
    }

    pub fn contains(&self, published_at: u64) -> bool {
        published_at >= self.cutoff()
    }
}

/// Per-source fetch failure. Non-fatal: recorded in feed health, the run
/// continues with the remaining sources.
#[derive(Debug, Error)]
#[error("fetch failed for '{name}': {cause}")]
pub struct FetchError {
    /// Display name of the failing source.
    pub name: String,
    #[source]
    pub cause: anyhow::Error,
}

impl FetchError {
    pub fn new(name: impl Into<String>, cause: anyhow::Error) -> Self {
        Self {
            name: name.into(),
            cause,
        }
    }
}

/// Side information the collection pool folds into feed health.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    /// Entries seen in the source before windowing/capping.
    pub total_seen: usize,
    /// Transcript-bearing entries skipped because no transcript existed.
    pub missing_transcripts: usize,
    /// Non-fatal oddity worth surfacing (parse fallback, empty window).
    pub warning: Option<String>,
}

#[derive(Debug, Default)]
pub struct FetchOutput {
    pub items: Vec<RawItem>,
    pub report: FetchReport,
}

#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetch and normalize items inside the window. Adapters apply the hard
    /// date cutoff and the per-source `max_items` cap (most recent first).
    async fn fetch(&self, window: FetchWindow) -> Result<FetchOutput, FetchError>;
    fn name(&self) -> &str;
}
