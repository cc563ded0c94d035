// src/orchestrator.rs
//! Drives one run end to end: fetch → filter → batch → summarize → merge →
//! save. Source and batch failures are absorbed at their origin (health
//! records, progress events, annotations); only total failure reaches the
//! run's terminal state.

use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::batch::{self, Batch, CharEstimator, SizeEstimate};
use crate::config::{DistilConfig, SourceConfig, SourceKind};
use crate::filter::{FilterRule, FilteredItem};
use crate::health::HealthTracker;
use crate::history::{DistilResult, HistoryStore};
use crate::ingest::rss::RssAdapter;
use crate::ingest::types::{FetchWindow, SourceAdapter};
use crate::ingest::youtube::TranscriptAdapter;
use crate::ingest::{self, CollectOptions};
use crate::llm::{DynSummarizer, ModelError};
use crate::progress::{ProgressKind, ProgressSink};
use crate::prompts;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("distil_runs_total", "Runs started.");
        describe_counter!(
            "distil_runs_failed_total",
            "Runs that ended in the failed state."
        );
        describe_counter!("distil_batches_total", "Summarization batches submitted.");
        describe_counter!(
            "distil_batches_failed_total",
            "Batches that exhausted retries."
        );
        describe_counter!(
            "distil_model_retries_total",
            "Transient model errors retried."
        );
    });
}

/// Run lifecycle. `Failed` is terminal and reachable from every non-terminal
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Fetching,
    Filtering,
    Batching,
    Summarizing,
    Merging,
    Done,
    Failed,
}

/// Total-failure conditions. Anything less severe degrades the run instead.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("no items matched across {sources} configured sources")]
    NoItems { sources: usize },
    #[error("all {batches} summarization batches failed")]
    AllBatchesFailed { batches: usize },
    #[error("failed to persist distil: {0}")]
    Persist(String),
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub days_back: u32,
    pub fetch_timeout: Duration,
    pub concurrency: usize,
    pub batch_budget: usize,
    pub reading_time: u32,
    pub model_timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            days_back: 7,
            fetch_timeout: Duration::from_secs(30),
            concurrency: 4,
            batch_budget: 3000,
            reading_time: 5,
            model_timeout: Duration::from_secs(900),
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

impl RunOptions {
    pub fn from_config(cfg: &DistilConfig) -> Self {
        Self {
            days_back: cfg.fetch.days_back,
            fetch_timeout: Duration::from_secs(cfg.fetch.timeout_secs),
            concurrency: cfg.fetch.concurrency,
            batch_budget: cfg.fetch.batch_budget,
            reading_time: cfg.output.reading_time_minutes,
            ..Default::default()
        }
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub path: PathBuf,
    pub result: DistilResult,
    /// Indices of batches whose summaries are missing from the document.
    pub failed_batches: Vec<usize>,
}

pub struct Orchestrator {
    sources: Vec<SourceConfig>,
    adapters: Vec<Box<dyn SourceAdapter>>,
    backend: DynSummarizer,
    estimator: Arc<dyn SizeEstimate>,
    history: HistoryStore,
    domain: String,
    opts: RunOptions,
}

impl Orchestrator {
    /// Full constructor; adapters must be in the same order as `sources`.
    pub fn new(
        sources: Vec<SourceConfig>,
        adapters: Vec<Box<dyn SourceAdapter>>,
        backend: DynSummarizer,
        estimator: Arc<dyn SizeEstimate>,
        history: HistoryStore,
        domain: String,
        opts: RunOptions,
    ) -> Self {
        Self {
            sources,
            adapters,
            backend,
            estimator,
            history,
            domain,
            opts,
        }
    }

    /// Build with default adapters per source kind and the default estimator.
    pub fn from_config(
        cfg: &DistilConfig,
        backend: DynSummarizer,
        history: HistoryStore,
        transcript_dir: PathBuf,
    ) -> Self {
        let opts = RunOptions::from_config(cfg);
        let adapters: Vec<Box<dyn SourceAdapter>> = cfg
            .feeds
            .iter()
            .map(|src| -> Box<dyn SourceAdapter> {
                match src.kind {
                    SourceKind::Rss => {
                        Box::new(RssAdapter::from_config(src.clone(), opts.fetch_timeout))
                    }
                    SourceKind::Youtube => Box::new(TranscriptAdapter::from_config(
                        src.clone(),
                        transcript_dir.clone(),
                        opts.fetch_timeout,
                    )),
                }
            })
            .collect();
        Self::new(
            cfg.feeds.clone(),
            adapters,
            backend,
            Arc::new(CharEstimator::default()),
            history,
            cfg.domain.focus.clone(),
            opts,
        )
    }

    /// Execute one run. The terminal progress event is always emitted here,
    /// success or failure, before this returns.
    pub async fn run(
        mut self,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, RunError> {
        ensure_metrics_described();
        counter!("distil_runs_total").increment(1);

        let adapters = std::mem::take(&mut self.adapters);
        match self.run_inner(adapters, &progress, &cancel).await {
            Ok(outcome) => {
                let doc = outcome
                    .path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(String::from);
                let message = if outcome.failed_batches.is_empty() {
                    format!("distil generated from {} items", outcome.result.item_count)
                } else {
                    format!(
                        "distil generated from {} items ({} batches failed)",
                        outcome.result.item_count,
                        outcome.failed_batches.len()
                    )
                };
                progress.finish(true, doc, message);
                Ok(outcome)
            }
            Err(e) => {
                counter!("distil_runs_failed_total").increment(1);
                info!(target: "run", to = ?RunState::Failed, error = %e, "state transition");
                progress.finish(false, None, e.to_string());
                Err(e)
            }
        }
    }

    async fn run_inner(
        &self,
        adapters: Vec<Box<dyn SourceAdapter>>,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, RunError> {
        let mut state = RunState::Idle;

        // --- FETCHING ---
        transition(&mut state, RunState::Fetching);
        let window = FetchWindow::last_days(self.opts.days_back);
        let health = Arc::new(HealthTracker::new());
        let rules = self.build_rules(progress);

        let collected = ingest::collect_all(
            adapters,
            window,
            CollectOptions {
                timeout: self.opts.fetch_timeout,
                concurrency: self.opts.concurrency,
            },
            cancel.clone(),
            health.clone(),
            progress.clone(),
        )
        .await;
        // Totality: sources never reached get a record too.
        health.finalize(&self.sources);
        info!(target: "run", collected = collected.len(), "fetch phase done");

        // --- FILTERING ---
        transition(&mut state, RunState::Filtering);
        let (collected, duplicates) = ingest::dedup_items(collected);
        if duplicates > 0 {
            info!(target: "run", duplicates, "duplicate items suppressed");
        }
        let match_all = FilterRule::default();
        let mut filtered: Vec<FilteredItem> = Vec::with_capacity(collected.len());
        for item in collected {
            let rule = rules.get(item.source.as_str()).unwrap_or(&match_all);
            if let Some(reason) = rule.evaluate(&item) {
                filtered.push(FilteredItem { item, reason });
            }
        }
        info!(target: "run", kept = filtered.len(), "filter phase done");

        if filtered.is_empty() {
            return Err(RunError::NoItems {
                sources: self.sources.len(),
            });
        }
        let item_count = filtered.len();

        // --- BATCHING ---
        transition(&mut state, RunState::Batching);
        let batches = batch::plan(filtered, self.opts.batch_budget, self.estimator.as_ref());
        info!(target: "run", batches = batches.len(), "batch phase done");

        // --- SUMMARIZING ---
        transition(&mut state, RunState::Summarizing);
        let system = prompts::build_system_prompt(&self.domain);
        let single_batch = batches.len() == 1;
        let mut summaries: Vec<(usize, String)> = Vec::with_capacity(batches.len());
        let mut failed_batches: Vec<usize> = Vec::new();

        for b in &batches {
            // Cancellation stops dispatch of further batch calls; whatever is
            // already summarized still gets merged and saved.
            if cancel.is_cancelled() {
                warn!(target: "run", batch = b.index, "cancelled before batch dispatch");
                failed_batches.extend(b.index..batches.len());
                break;
            }
            progress.emit(ProgressKind::BatchStarted {
                index: b.index,
                items: b.items.len(),
                estimated_size: b.estimated_size,
            });
            counter!("distil_batches_total").increment(1);

            let prompt = if single_batch {
                prompts::build_distil_prompt(&b.items, self.opts.reading_time, &self.domain)
            } else {
                prompts::build_batch_prompt(&b.items)
            };

            match self.summarize_with_retry(&system, &prompt, cancel).await {
                Ok(text) => {
                    summaries.push((b.index, text));
                    progress.emit(ProgressKind::BatchDone {
                        index: b.index,
                        ok: true,
                    });
                }
                Err(e) => {
                    counter!("distil_batches_failed_total").increment(1);
                    warn!(target: "run", batch = b.index, error = %e, "batch failed");
                    failed_batches.push(b.index);
                    progress.emit(ProgressKind::Error {
                        stage: "summarizing".to_string(),
                        message: format!("batch {} failed: {e}", b.index),
                    });
                    progress.emit(ProgressKind::BatchDone {
                        index: b.index,
                        ok: false,
                    });
                }
            }
        }

        if summaries.is_empty() {
            return Err(RunError::AllBatchesFailed {
                batches: batches.len(),
            });
        }

        // --- MERGING ---
        transition(&mut state, RunState::Merging);
        // Deterministic output: merge by batch index, not arrival order.
        summaries.sort_by_key(|(idx, _)| *idx);
        let markdown = self
            .merge_summaries(&summaries, &batches, &failed_batches, &system, cancel)
            .await;

        let result = DistilResult {
            markdown,
            generated_at: chrono::Local::now(),
            item_count,
            health: health.snapshot(),
            model: self.backend.model().to_string(),
        };
        let path = self
            .history
            .save(&result)
            .map_err(|e| RunError::Persist(e.to_string()))?;

        transition(&mut state, RunState::Done);
        Ok(RunOutcome {
            path,
            result,
            failed_batches,
        })
    }

    fn build_rules(&self, progress: &ProgressSink) -> HashMap<String, FilterRule> {
        let mut rules = HashMap::new();
        for src in &self.sources {
            match FilterRule::from_config(src) {
                Ok(rule) => {
                    rules.insert(src.name.clone(), rule);
                }
                // Config validation catches this at startup; a broken rule
                // here degrades to match-all instead of killing the run.
                Err(e) => {
                    warn!(target: "run", source = %src.name, error = %e, "invalid filter rule");
                    progress.emit(ProgressKind::Error {
                        stage: "filtering".to_string(),
                        message: format!("invalid filter rule for '{}'", src.name),
                    });
                }
            }
        }
        rules
    }

    async fn summarize_with_retry(
        &self,
        system: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ModelError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.backend.summarize(system, prompt).await {
                Ok(text) => return Ok(text),
                Err(e)
                    if e.is_transient()
                        && attempt < self.opts.max_attempts
                        && !cancel.is_cancelled() =>
                {
                    counter!("distil_model_retries_total").increment(1);
                    let backoff = self.opts.backoff_base * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        target: "run",
                        attempt,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "transient model error, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Merge per-batch summaries into the final document. One batch passes
    /// through unchanged; several get a condensation call, falling back to
    /// plain concatenation in batch order when that call fails.
    async fn merge_summaries(
        &self,
        summaries: &[(usize, String)],
        batches: &[Batch],
        failed_batches: &[usize],
        system: &str,
        cancel: &CancellationToken,
    ) -> String {
        let mut body = if summaries.len() == 1 {
            summaries[0].1.clone()
        } else {
            let ordered: Vec<String> = summaries.iter().map(|(_, s)| s.clone()).collect();
            let prompt = prompts::build_consolidation_prompt(&ordered, self.opts.reading_time);
            if cancel.is_cancelled() {
                concat_summaries(&ordered)
            } else {
                match self.summarize_with_retry(system, &prompt, cancel).await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(target: "run", error = %e, "consolidation failed, concatenating");
                        concat_summaries(&ordered)
                    }
                }
            }
        };

        if !failed_batches.is_empty() {
            let described: Vec<String> = failed_batches
                .iter()
                .map(|idx| {
                    let items = batches
                        .get(*idx)
                        .map(|b| b.items.len())
                        .unwrap_or_default();
                    format!("batch {} ({} items)", idx + 1, items)
                })
                .collect();
            body.push_str(&format!(
                "\n\n---\n\n> Partial result: {} could not be summarized and are not included.\n",
                described.join(", ")
            ));
        }
        body
    }
}

fn concat_summaries(ordered: &[String]) -> String {
    ordered.join("\n\n---\n\n")
}

fn transition(state: &mut RunState, next: RunState) {
    info!(target: "run", from = ?*state, to = ?next, "state transition");
    *state = next;
}
