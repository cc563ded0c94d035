// tests/collect_pool.rs
//! Bounded fetch pool behavior: timeouts are per source, failures stay
//! isolated, and collected items keep source configuration order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use distil::health::{FeedStatus, HealthTracker};
use distil::ingest::types::{
    FetchError, FetchOutput, FetchWindow, RawItem, SourceAdapter,
};
use distil::ingest::{collect_all, CollectOptions};
use distil::progress::{ProgressKind, ProgressSink};

fn mk_item(source: &str, title: &str) -> RawItem {
    RawItem {
        source: source.to_string(),
        title: title.to_string(),
        url: format!("https://example.test/{source}/{title}"),
        published_at: 1_000_000,
        body: "body".to_string(),
    }
}

struct QuickAdapter {
    name: String,
    items: Vec<RawItem>,
}

#[async_trait]
impl SourceAdapter for QuickAdapter {
    async fn fetch(&self, _window: FetchWindow) -> Result<FetchOutput, FetchError> {
        Ok(FetchOutput {
            items: self.items.clone(),
            report: Default::default(),
        })
    }
    fn name(&self) -> &str {
        &self.name
    }
}

struct SlowAdapter {
    name: String,
}

#[async_trait]
impl SourceAdapter for SlowAdapter {
    async fn fetch(&self, _window: FetchWindow) -> Result<FetchOutput, FetchError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(FetchOutput::default())
    }
    fn name(&self) -> &str {
        &self.name
    }
}

fn options(timeout_ms: u64) -> CollectOptions {
    CollectOptions {
        timeout: Duration::from_millis(timeout_ms),
        concurrency: 4,
    }
}

#[tokio::test]
async fn timed_out_source_does_not_abort_the_others() {
    let adapters: Vec<Box<dyn SourceAdapter>> = vec![
        Box::new(SlowAdapter {
            name: "Stuck".into(),
        }),
        Box::new(QuickAdapter {
            name: "Quick".into(),
            items: vec![mk_item("Quick", "fresh-item")],
        }),
    ];
    let health = Arc::new(HealthTracker::new());
    let (sink, mut rx) = ProgressSink::channel();

    let collected = collect_all(
        adapters,
        FetchWindow::at(1_000_000, 7),
        options(50),
        CancellationToken::new(),
        health.clone(),
        sink,
    )
    .await;

    assert_eq!(collected.len(), 1);
    assert_eq!(collected[0].source, "Quick");

    let stuck = health.get("Stuck").unwrap();
    assert_eq!(stuck.status, FeedStatus::Failed);
    assert!(stuck.message.contains("timed out"));
    assert_eq!(health.get("Quick").unwrap().status, FeedStatus::Ok);

    // Both sources produced started/done events.
    let mut started = 0;
    let mut done = 0;
    while let Ok(ev) = rx.try_recv() {
        match ev.kind {
            ProgressKind::SourceStarted { .. } => started += 1,
            ProgressKind::SourceDone { .. } => done += 1,
            _ => {}
        }
    }
    assert_eq!(started, 2);
    assert_eq!(done, 2);
}

#[tokio::test]
async fn collected_items_keep_source_config_order() {
    let adapters: Vec<Box<dyn SourceAdapter>> = vec![
        Box::new(QuickAdapter {
            name: "First".into(),
            items: vec![mk_item("First", "a1"), mk_item("First", "a2")],
        }),
        Box::new(QuickAdapter {
            name: "Second".into(),
            items: vec![mk_item("Second", "b1")],
        }),
    ];
    let health = Arc::new(HealthTracker::new());
    let (sink, _rx) = ProgressSink::channel();

    let collected = collect_all(
        adapters,
        FetchWindow::at(1_000_000, 7),
        options(5_000),
        CancellationToken::new(),
        health,
        sink,
    )
    .await;

    let order: Vec<(&str, &str)> = collected
        .iter()
        .map(|it| (it.source.as_str(), it.title.as_str()))
        .collect();
    assert_eq!(
        order,
        vec![("First", "a1"), ("First", "a2"), ("Second", "b1")]
    );
}

#[tokio::test]
async fn successful_but_empty_source_is_degraded() {
    let adapters: Vec<Box<dyn SourceAdapter>> = vec![Box::new(QuickAdapter {
        name: "Empty".into(),
        items: Vec::new(),
    })];
    let health = Arc::new(HealthTracker::new());
    let (sink, _rx) = ProgressSink::channel();

    let collected = collect_all(
        adapters,
        FetchWindow::at(1_000_000, 7),
        options(5_000),
        CancellationToken::new(),
        health.clone(),
        sink,
    )
    .await;

    assert!(collected.is_empty());
    let h = health.get("Empty").unwrap();
    assert_eq!(h.status, FeedStatus::Degraded);
}
