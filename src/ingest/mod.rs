// src/ingest/mod.rs
pub mod rss;
pub mod types;
pub mod youtube;

use metrics::{counter, describe_counter, describe_histogram};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::health::{FeedHealth, FeedStatus, HealthTracker};
use crate::ingest::types::{FetchWindow, RawItem, SourceAdapter};
use crate::progress::{ProgressKind, ProgressSink};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("distil_feed_entries_total", "Entries parsed from feeds.");
        describe_counter!(
            "distil_items_collected_total",
            "Items collected after windowing and per-source caps."
        );
        describe_counter!("distil_fetch_errors_total", "Source fetch/timeout errors.");
        describe_counter!(
            "distil_duplicates_total",
            "Items removed by URL/title duplicate suppression."
        );
        describe_histogram!("distil_feed_parse_ms", "Feed parse time in milliseconds.");
    });
}

/// Normalize text: decode HTML entities, strip tags, normalize quotes,
/// collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// Character-boundary-safe prefix cap.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Duplicate suppression across sources: exact canonical-URL matches and
/// near-duplicate titles. First occurrence wins (inputs arrive in source
/// config order, most recent first within a source).
pub fn dedup_items(items: Vec<RawItem>) -> (Vec<RawItem>, usize) {
    const TITLE_SIMILARITY: f64 = 0.93;

    let mut seen_urls: HashSet<String> = HashSet::new();
    let mut kept: Vec<RawItem> = Vec::with_capacity(items.len());
    let mut dropped = 0usize;

    for it in items {
        if !it.url.is_empty() && !seen_urls.insert(url_fingerprint(&it.url)) {
            dropped += 1;
            continue;
        }
        if !it.title.is_empty()
            && kept.iter().any(|k| {
                !k.title.is_empty()
                    && strsim::jaro_winkler(
                        &k.title.to_lowercase(),
                        &it.title.to_lowercase(),
                    ) >= TITLE_SIMILARITY
            })
        {
            dropped += 1;
            continue;
        }
        kept.push(it);
    }

    counter!("distil_duplicates_total").increment(dropped as u64);
    (kept, dropped)
}

fn url_fingerprint(url: &str) -> String {
    let canonical = url.trim().trim_end_matches('/').to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy)]
pub struct CollectOptions {
    pub timeout: Duration,
    pub concurrency: usize,
}

/// Fetch all sources on a bounded worker pool. Each source gets its own
/// timeout, its own health record, and its own progress events; one failing
/// source never aborts the others. Cancellation stops dispatch of sources
/// that have not started yet; in-flight fetches complete or time out.
///
/// Returned items keep source config order, most recent first per source.
pub async fn collect_all(
    adapters: Vec<Box<dyn SourceAdapter>>,
    window: FetchWindow,
    opts: CollectOptions,
    cancel: CancellationToken,
    health: Arc<HealthTracker>,
    progress: ProgressSink,
) -> Vec<RawItem> {
    ensure_metrics_described();

    let sem = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let mut set: JoinSet<(usize, Vec<RawItem>)> = JoinSet::new();

    for (idx, adapter) in adapters.into_iter().enumerate() {
        let sem = sem.clone();
        let cancel = cancel.clone();
        let health = health.clone();
        let progress = progress.clone();

        set.spawn(async move {
            let Ok(_permit) = sem.acquire_owned().await else {
                return (idx, Vec::new());
            };
            // Cancelled before this source started: leave it unrecorded so
            // finalize() marks it "not attempted".
            if cancel.is_cancelled() {
                return (idx, Vec::new());
            }

            let name = adapter.name().to_string();
            progress.emit(ProgressKind::SourceStarted {
                source: name.clone(),
            });

            let (items, record) = match tokio::time::timeout(opts.timeout, adapter.fetch(window))
                .await
            {
                Err(_) => {
                    counter!("distil_fetch_errors_total").increment(1);
                    tracing::warn!(target: "ingest", source = %name, "source fetch timed out");
                    (
                        Vec::new(),
                        FeedHealth::new(
                            &name,
                            FeedStatus::Failed,
                            0,
                            format!("timed out after {}s", opts.timeout.as_secs()),
                        ),
                    )
                }
                Ok(Err(e)) => {
                    counter!("distil_fetch_errors_total").increment(1);
                    tracing::warn!(target: "ingest", source = %name, error = %e, "source fetch failed");
                    (
                        Vec::new(),
                        FeedHealth::new(&name, FeedStatus::Failed, 0, e.cause.to_string()),
                    )
                }
                Ok(Ok(out)) => {
                    let degraded = out.report.warning.is_some()
                        || out.report.missing_transcripts > 0
                        || out.items.is_empty();
                    let status = if degraded {
                        FeedStatus::Degraded
                    } else {
                        FeedStatus::Ok
                    };
                    let message = out
                        .report
                        .warning
                        .clone()
                        .unwrap_or_else(|| {
                            if out.items.is_empty() {
                                "no items".to_string()
                            } else {
                                String::new()
                            }
                        });
                    let record = FeedHealth::new(&name, status, out.items.len(), message);
                    (out.items, record)
                }
            };

            counter!("distil_items_collected_total").increment(items.len() as u64);
            progress.emit(ProgressKind::SourceDone {
                source: name,
                status: record.status,
                items: record.items,
            });
            health.record(record);
            (idx, items)
        });
    }

    let mut by_source: Vec<Option<Vec<RawItem>>> = Vec::new();
    while let Some(res) = set.join_next().await {
        if let Ok((idx, items)) = res {
            if by_source.len() <= idx {
                by_source.resize(idx + 1, None);
            }
            by_source[idx] = Some(items);
        }
    }
    by_source.into_iter().flatten().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str, url: &str) -> RawItem {
        RawItem {
            source: "S".into(),
            title: title.into(),
            url: url.into(),
            published_at: 0,
            body: String::new(),
        }
    }

    #[test]
    fn normalize_text_strips_tags_and_entities() {
        let s = "  <b>Hello&nbsp;&nbsp; world</b> &ldquo;ok&rdquo; ";
        assert_eq!(normalize_text(s), r#"Hello world "ok""#);
    }

    #[test]
    fn dedup_drops_exact_url_match() {
        let items = vec![
            item("First story", "https://example.test/a"),
            item("Something else", "https://example.test/a/"),
            item("Third story entirely", "https://example.test/b"),
        ];
        let (kept, dropped) = dedup_items(items);
        assert_eq!(kept.len(), 2);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn dedup_drops_near_duplicate_titles() {
        let items = vec![
            item("Big Model Released Today", "https://a.test/1"),
            item("Big Model Released Today!", "https://b.test/2"),
            item("Entirely unrelated news", "https://c.test/3"),
        ];
        let (kept, dropped) = dedup_items(items);
        assert_eq!(kept.len(), 2);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn truncate_is_char_safe() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
