// src/ingest/rss.rs
//! RSS 2.0 / Atom source adapter. Tries RSS first, falls back to Atom, and
//! reports the fallback as a warning so the feed shows up as degraded rather
//! than silently odd.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use std::time::Duration;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::{OffsetDateTime, UtcOffset};

use crate::config::SourceConfig;
use crate::ingest::types::{
    FetchError, FetchOutput, FetchReport, FetchWindow, RawItem, SourceAdapter,
};
use crate::ingest::{normalize_text, truncate_chars};

/// Body text cap per article, in characters.
const BODY_CAP: usize = 2000;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}
#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<String>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<String>,
    content: Option<String>,
}
#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

/// Parse RFC2822 (RSS) or RFC3339 (Atom) timestamps to unix seconds.
pub(crate) fn parse_timestamp(ts: &str) -> Option<u64> {
    let dt = OffsetDateTime::parse(ts, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(ts, &Rfc3339))
        .ok()?;
    u64::try_from(dt.to_offset(UtcOffset::UTC).unix_timestamp()).ok()
}

pub struct RssAdapter {
    config: SourceConfig,
    mode: Mode,
}

enum Mode {
    Http { client: reqwest::Client },
    Fixture(String),
}

impl RssAdapter {
    pub fn from_config(config: SourceConfig, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("distil/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Self {
            config,
            mode: Mode::Http { client },
        }
    }

    /// Parse from an in-memory document instead of the network.
    pub fn from_fixture(config: SourceConfig, xml: &str) -> Self {
        Self {
            config,
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    fn parse_feed(&self, body: &str, window: FetchWindow) -> Result<FetchOutput> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(body);

        let mut report = FetchReport::default();
        let mut entries: Vec<RawItem> = Vec::new();

        match from_str::<Rss>(&xml_clean) {
            Ok(rss) => {
                report.total_seen = rss.channel.items.len();
                for it in rss.channel.items {
                    entries.push(self.entry_to_item(
                        it.title.as_deref(),
                        it.link.as_deref(),
                        it.description.as_deref(),
                        it.pub_date.as_deref().and_then(parse_timestamp),
                        window,
                    ));
                }
            }
            Err(rss_err) => {
                let atom: AtomFeed = from_str(&xml_clean)
                    .map_err(|e| anyhow!("not RSS ({rss_err}) and not Atom ({e})"))
                    .context("parsing feed xml")?;
                report.total_seen = atom.entries.len();
                report.warning = Some("parsed as Atom after RSS parse failed".to_string());
                for e in atom.entries {
                    let link = pick_atom_link(&e.links);
                    let ts = e
                        .published
                        .as_deref()
                        .or(e.updated.as_deref())
                        .and_then(parse_timestamp);
                    entries.push(self.entry_to_item(
                        e.title.as_deref(),
                        link.as_deref(),
                        e.content.as_deref().or(e.summary.as_deref()),
                        ts,
                        window,
                    ));
                }
            }
        }

        if report.total_seen == 0 {
            report.warning = Some("feed contains no entries".to_string());
        }

        // Hard date cutoff, then keep the most recent N.
        let cutoff = window.cutoff();
        let mut items: Vec<RawItem> = entries
            .into_iter()
            .filter(|it| !it.title.is_empty() || !it.body.is_empty())
            .filter(|it| it.published_at >= cutoff)
            .collect();
        items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        if let Some(max) = self.config.max_items {
            items.truncate(max);
        }

        if items.is_empty() && report.total_seen > 0 {
            report.warning = Some(format!(
                "no items within the last {} days ({} total entries)",
                window.days_back, report.total_seen
            ));
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("distil_feed_parse_ms").record(ms);
        counter!("distil_feed_entries_total").increment(report.total_seen as u64);

        Ok(FetchOutput { items, report })
    }

    fn entry_to_item(
        &self,
        title: Option<&str>,
        link: Option<&str>,
        body: Option<&str>,
        published_at: Option<u64>,
        window: FetchWindow,
    ) -> RawItem {
        RawItem {
            source: self.config.name.clone(),
            title: normalize_text(title.unwrap_or_default()),
            url: link.unwrap_or_default().trim().to_string(),
            // Undated entries are treated as just published, like the window
            // they arrived in.
            published_at: published_at.unwrap_or(window.now),
            body: truncate_chars(&normalize_text(body.unwrap_or_default()), BODY_CAP),
        }
    }
}

#[async_trait]
impl SourceAdapter for RssAdapter {
    async fn fetch(&self, window: FetchWindow) -> Result<FetchOutput, FetchError> {
        let name = self.config.name.clone();
        let body = match &self.mode {
            Mode::Fixture(s) => s.clone(),
            Mode::Http { client } => {
                let resp = client
                    .get(&self.config.url)
                    .send()
                    .await
                    .map_err(|e| FetchError::new(&name, anyhow!(e).context("feed http get")))?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(FetchError::new(&name, anyhow!("feed returned {status}")));
                }
                resp.text()
                    .await
                    .map_err(|e| FetchError::new(&name, anyhow!(e).context("feed http body")))?
            }
        };

        self.parse_feed(&body, window)
            .map_err(|e| FetchError::new(&name, e))
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}

fn pick_atom_link(links: &[AtomLink]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .and_then(|l| l.href.clone())
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
