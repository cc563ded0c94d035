// tests/rss_adapter.rs
use distil::config::{SourceConfig, SourceKind};
use distil::ingest::rss::RssAdapter;
use distil::ingest::types::{FetchWindow, SourceAdapter};

const RSS_XML: &str = include_str!("fixtures/feed_rss.xml");
const ATOM_XML: &str = include_str!("fixtures/feed_atom.xml");

/// 2025-01-12T00:00:00Z; the fixture has three items inside the prior week
/// and one outside it.
const NOW: u64 = 1_736_640_000;

fn config(max_items: Option<usize>) -> SourceConfig {
    SourceConfig {
        url: "https://example.test/feed".to_string(),
        name: "Example".to_string(),
        kind: SourceKind::Rss,
        keywords: Vec::new(),
        pattern: None,
        max_items,
    }
}

#[tokio::test]
async fn parses_rss_and_applies_date_window() {
    let adapter = RssAdapter::from_fixture(config(None), RSS_XML);
    let out = adapter.fetch(FetchWindow::at(NOW, 7)).await.unwrap();

    assert_eq!(out.report.total_seen, 4);
    assert_eq!(out.items.len(), 3, "the 2025-01-01 item is outside the window");
    assert!(out.items.iter().all(|it| it.title != "Story C: Old news from last year"));

    // Most recent first.
    assert!(out.items[0].title.starts_with("Story A"));
    assert!(out.items[1].title.starts_with("Story D"));
    assert!(out.items[2].title.starts_with("Story B"));

    // Bodies are normalized (tags stripped, entities decoded).
    assert_eq!(
        out.items[0].body,
        "The agency cleared a novel diagnostic assay for early screening."
    );
    assert_eq!(out.items[0].url, "https://example.test/a");
    assert_eq!(out.items[0].source, "Example");
}

#[tokio::test]
async fn max_items_keeps_the_most_recent() {
    let adapter = RssAdapter::from_fixture(config(Some(2)), RSS_XML);
    let out = adapter.fetch(FetchWindow::at(NOW, 7)).await.unwrap();

    assert_eq!(out.items.len(), 2);
    assert!(out.items[0].title.starts_with("Story A"));
    assert!(out.items[1].title.starts_with("Story D"));
}

#[tokio::test]
async fn narrow_window_reports_a_warning() {
    let adapter = RssAdapter::from_fixture(config(None), RSS_XML);
    // One day back from NOW excludes everything in the fixture.
    let out = adapter.fetch(FetchWindow::at(NOW, 1)).await.unwrap();

    assert!(out.items.is_empty());
    let warning = out.report.warning.expect("empty window should warn");
    assert!(warning.contains("no items within the last 1 days"));
}

#[tokio::test]
async fn falls_back_to_atom_with_warning() {
    let adapter = RssAdapter::from_fixture(config(None), ATOM_XML);
    let out = adapter.fetch(FetchWindow::at(NOW, 7)).await.unwrap();

    assert_eq!(out.items.len(), 2);
    assert!(out.items[0].title.starts_with("Atom One"));
    // The alternate link wins over rel="self".
    assert_eq!(out.items[0].url, "https://example.test/atom/one");
    // Entry without <published> uses <updated>.
    assert!(out.items[1].title.starts_with("Atom Two"));
    assert_eq!(out.items[1].body, "Benchmarks across tasks show steady gains.");

    let warning = out.report.warning.expect("atom fallback should warn");
    assert!(warning.contains("Atom"));
}

#[tokio::test]
async fn unparseable_document_is_a_fetch_error() {
    let adapter = RssAdapter::from_fixture(config(None), "this is not xml at all");
    let err = adapter.fetch(FetchWindow::at(NOW, 7)).await.unwrap_err();
    assert_eq!(err.name, "Example");
}
