// src/ingest/youtube.rs
//! YouTube transcript adapter. Shells out to `yt-dlp` for subtitle-only
//! downloads, then parses the resulting WebVTT files into plain text items.
//! A video without captions is skipped, not an error; the source is reported
//! as degraded instead.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

use crate::config::SourceConfig;
use crate::ingest::types::{
    FetchError, FetchOutput, FetchReport, FetchWindow, RawItem, SourceAdapter,
};
use crate::ingest::{normalize_text, truncate_chars};

/// Body text cap per transcript, in characters.
const TRANSCRIPT_CAP: usize = 5000;

pub struct TranscriptAdapter {
    config: SourceConfig,
    transcript_dir: PathBuf,
    timeout: Duration,
}

impl TranscriptAdapter {
    pub fn from_config(config: SourceConfig, transcript_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            config,
            transcript_dir,
            timeout,
        }
    }

    /// Subtitle-only download into a per-source directory.
    async fn download_subtitles(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating transcript dir {}", dir.display()))?;

        let mut cmd = Command::new("yt-dlp");
        cmd.arg("--write-subs")
            .arg("--write-auto-sub")
            .arg("--no-overwrites")
            .arg("--skip-download")
            .arg("--sub-format")
            .arg("vtt")
            .arg("--output")
            .arg(format!("{}/%(title)s.%(ext)s", dir.display()))
            .arg("--no-warnings")
            .arg("--ignore-errors")
            .arg(&self.config.url)
            .kill_on_drop(true)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());

        let status = tokio::time::timeout(self.timeout, cmd.status())
            .await
            .map_err(|_| anyhow!("yt-dlp timed out after {:?}", self.timeout))?
            .context("spawning yt-dlp")?;

        // yt-dlp exits non-zero when some playlist entries have no captions;
        // with --ignore-errors that is still a usable partial result.
        if !status.success() && !dir.exists() {
            return Err(anyhow!("yt-dlp failed with {status}"));
        }
        Ok(())
    }

    async fn collect_vtt_items(&self, dir: &Path, window: FetchWindow) -> Result<Vec<RawItem>> {
        let mut items = Vec::new();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("reading transcript dir {}", dir.display()))?;
        while let Some(entry) = entries.next_entry().await.context("transcript dir entry")? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("vtt") {
                continue;
            }
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let text = parse_vtt(&raw);
            if text.is_empty() {
                continue;
            }
            items.push(RawItem {
                source: self.config.name.clone(),
                title: title_from_path(&path),
                url: self.config.url.clone(),
                // Transcripts carry no feed timestamp; they are as fresh as
                // the fetch that produced them.
                published_at: window.now,
                body: truncate_chars(&normalize_text(&text), TRANSCRIPT_CAP),
            });
        }
        Ok(items)
    }
}

#[async_trait]
impl SourceAdapter for TranscriptAdapter {
    async fn fetch(&self, window: FetchWindow) -> Result<FetchOutput, FetchError> {
        let name = self.config.name.clone();
        let dir = self.transcript_dir.join(sanitize_dir_name(&name));

        self.download_subtitles(&dir)
            .await
            .map_err(|e| FetchError::new(&name, e))?;

        let mut items = self
            .collect_vtt_items(&dir, window)
            .await
            .map_err(|e| FetchError::new(&name, e))?;

        let mut report = FetchReport {
            total_seen: items.len(),
            ..Default::default()
        };
        if items.is_empty() {
            report.missing_transcripts = 1;
            report.warning = Some("no transcripts available for this source".to_string());
        }
        if let Some(max) = self.config.max_items {
            items.truncate(max);
        }

        Ok(FetchOutput { items, report })
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}

/// Parse a WebVTT document into plain caption text. Cue ids, timing lines,
/// NOTE/STYLE blocks, and inline tags are dropped; consecutive duplicate
/// lines (typical of auto-generated captions) are collapsed.
pub fn parse_vtt(raw: &str) -> String {
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"<[^>]*>").unwrap());

    let mut out: Vec<String> = Vec::new();
    let mut in_note = false;
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            in_note = false;
            continue;
        }
        if line.starts_with("WEBVTT") || line.starts_with("Kind:") || line.starts_with("Language:")
        {
            continue;
        }
        if line.starts_with("NOTE") || line.starts_with("STYLE") {
            in_note = true;
            continue;
        }
        if in_note || line.contains("-->") || line.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let cleaned = re_tags.replace_all(line, "").trim().to_string();
        if cleaned.is_empty() {
            continue;
        }
        if out.last().map(String::as_str) != Some(cleaned.as_str()) {
            out.push(cleaned);
        }
    }
    out.join(" ")
}

fn title_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    // yt-dlp names files `<title>.<lang>.vtt`; drop the language suffix.
    let stem = stem
        .rsplit_once('.')
        .map(|(head, tail)| if tail.len() <= 7 { head } else { stem })
        .unwrap_or(stem);
    stem.to_string()
}

fn sanitize_dir_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vtt_parsing_drops_cues_and_tags() {
        let vtt = "WEBVTT\nKind: captions\n\n1\n00:00:00.000 --> 00:00:02.000\nHello <c>world</c>\n\n2\n00:00:02.000 --> 00:00:04.000\nHello world\n\nNOTE internal\nskip me\n\n3\n00:00:04.000 --> 00:00:06.000\nnext line";
        assert_eq!(parse_vtt(vtt), "Hello world next line");
    }

    #[test]
    fn title_strips_language_suffix() {
        assert_eq!(
            title_from_path(Path::new("/tmp/My Talk.en.vtt")),
            "My Talk"
        );
        assert_eq!(title_from_path(Path::new("/tmp/Plain.vtt")), "Plain");
    }
}
