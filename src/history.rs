// src/history.rs
//! On-disk history of generated distils. Each run writes one immutable
//! markdown file named after its generation timestamp; same-minute runs get a
//! numeric suffix instead of overwriting. `list()` never modifies files.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, TimeZone, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::health::FeedHealth;

/// The final document for one run. Immutable once written.
#[derive(Debug, Clone)]
pub struct DistilResult {
    pub markdown: String,
    pub generated_at: DateTime<Local>,
    pub item_count: usize,
    pub health: Vec<FeedHealth>,
    pub model: String,
}

/// Metadata recovered from a stored file, without re-running anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistilMeta {
    pub file_name: String,
    pub generated_at: u64,
    pub item_count: usize,
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the result under a unique timestamped name and return the path.
    pub fn save(&self, result: &DistilResult) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating history dir {}", self.dir.display()))?;

        let stamp = result.generated_at.format("%Y-%m-%d_%H%M");
        let mut path = self.dir.join(format!("distil-{stamp}.md"));
        let mut n = 2u32;
        while path.exists() {
            path = self.dir.join(format!("distil-{stamp}-{n}.md"));
            n += 1;
        }

        let content = render(result);
        let tmp = path.with_extension("md.tmp");
        {
            let mut f = fs::File::create(&tmp)
                .with_context(|| format!("creating {}", tmp.display()))?;
            f.write_all(content.as_bytes())
                .with_context(|| format!("writing {}", tmp.display()))?;
        }
        fs::rename(&tmp, &path)
            .with_context(|| format!("renaming into {}", path.display()))?;

        tracing::info!(target: "history", path = %path.display(), items = result.item_count, "distil saved");
        Ok(path)
    }

    /// All stored distils, newest first. Files without a metadata header are
    /// skipped.
    pub fn list(&self) -> Result<Vec<DistilMeta>> {
        let mut out = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            // An output dir that was never written to is an empty history.
            Err(_) => return Ok(out),
        };
        for entry in entries {
            let entry = entry.context("history dir entry")?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let content = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            match parse_header(&content) {
                Some((generated_at, item_count)) => out.push(DistilMeta {
                    file_name: file_name.to_string(),
                    generated_at,
                    item_count,
                }),
                None => {
                    tracing::warn!(target: "history", file = file_name, "missing metadata header, skipped");
                }
            }
        }
        out.sort_by(|a, b| {
            b.generated_at
                .cmp(&a.generated_at)
                .then_with(|| b.file_name.cmp(&a.file_name))
        });
        Ok(out)
    }

    /// Read one stored distil by file name. Names with path components are
    /// rejected.
    pub fn load(&self, file_name: &str) -> Result<String> {
        if file_name.contains('/') || file_name.contains("..") || file_name.contains('\\') {
            bail!("invalid history file name");
        }
        fs::read_to_string(self.dir.join(file_name))
            .with_context(|| format!("reading history file {file_name}"))
    }
}

fn render(result: &DistilResult) -> String {
    let mut out = String::with_capacity(result.markdown.len() + 512);
    out.push_str(&format!(
        "<!-- distil generated={} items={} -->\n",
        result.generated_at.timestamp(),
        result.item_count
    ));
    out.push_str(&result.markdown);
    out.push_str("\n\n---\n\n## Sources\n\n");
    for h in &result.health {
        out.push_str(&format!(
            "- **{}** — {} ({} items)",
            h.source,
            h.status.as_str(),
            h.items
        ));
        if !h.message.is_empty() {
            out.push_str(&format!(": {}", h.message));
        }
        out.push('\n');
    }
    let rfc3339 = Utc
        .timestamp_opt(result.generated_at.timestamp(), 0)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default();
    out.push_str(&format!(
        "\n_Generated with `{}` at {}_\n",
        result.model, rfc3339
    ));
    out
}

fn parse_header(content: &str) -> Option<(u64, usize)> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^<!-- distil generated=(\d+) items=(\d+) -->").unwrap()
    });
    let caps = re.captures(content.lines().next()?)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::FeedStatus;

    fn result_at(ts: i64, items: usize) -> DistilResult {
        DistilResult {
            markdown: "# Weekly distil\n\n- something happened".to_string(),
            generated_at: Local.timestamp_opt(ts, 0).single().unwrap(),
            item_count: items,
            health: vec![FeedHealth::new("Example", FeedStatus::Ok, items, "")],
            model: "mock".to_string(),
        }
    }

    #[test]
    fn header_round_trips() {
        let r = result_at(1_700_000_000, 4);
        let rendered = render(&r);
        let (ts, items) = parse_header(&rendered).unwrap();
        assert_eq!(ts, 1_700_000_000);
        assert_eq!(items, 4);
    }

    #[test]
    fn render_includes_sources_section() {
        let rendered = render(&result_at(1_700_000_000, 4));
        assert!(rendered.contains("## Sources"));
        assert!(rendered.contains("**Example** — ok (4 items)"));
        assert!(rendered.contains("`mock`"));
    }

    #[test]
    fn same_minute_saves_do_not_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(tmp.path());
        let r = result_at(1_700_000_000, 2);
        let p1 = store.save(&r).unwrap();
        let p2 = store.save(&r).unwrap();
        let p3 = store.save(&r).unwrap();
        assert_ne!(p1, p2);
        assert_ne!(p2, p3);
        assert!(p1.exists() && p2.exists() && p3.exists());
    }

    #[test]
    fn list_reports_saved_metadata_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(tmp.path());
        store.save(&result_at(1_700_000_000, 2)).unwrap();
        store.save(&result_at(1_700_100_000, 7)).unwrap();
        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].generated_at, 1_700_100_000);
        assert_eq!(listed[0].item_count, 7);
        assert_eq!(listed[1].generated_at, 1_700_000_000);
    }

    #[test]
    fn load_rejects_path_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(tmp.path());
        assert!(store.load("../etc/passwd").is_err());
        assert!(store.load("a/b.md").is_err());
    }
}
