// src/config.rs
//! TOML configuration: `[llm]`, `[domain]`, `[output]`, `[fetch]` and repeated
//! `[[feeds]]` blocks. Loaded once per process; validated eagerly so a bad
//! regex or empty feed URL fails at startup, not mid-run.

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_CONFIG_PATH: &str = "DISTIL_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DistilConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub domain: DomainConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub feeds: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
        }
    }
}

fn default_model() -> String {
    "ollama/mistral:latest".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DomainConfig {
    #[serde(default = "default_focus")]
    pub focus: String,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            focus: default_focus(),
        }
    }
}

fn default_focus() -> String {
    "technology".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub directory: String,
    #[serde(default = "default_reading_time")]
    pub reading_time_minutes: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            reading_time_minutes: default_reading_time(),
        }
    }
}

fn default_output_dir() -> String {
    "history".to_string()
}

fn default_reading_time() -> u32 {
    5
}

impl OutputConfig {
    /// Output directory with a leading `~` expanded against `$HOME`.
    pub fn directory_path(&self) -> PathBuf {
        expand_home(&self.directory)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_days_back")]
    pub days_back: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Size budget per summarization batch, in estimator units.
    #[serde(default = "default_batch_budget")]
    pub batch_budget: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            days_back: default_days_back(),
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
            batch_budget: default_batch_budget(),
        }
    }
}

fn default_days_back() -> u32 {
    7
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_concurrency() -> usize {
    4
}
fn default_batch_budget() -> usize {
    3000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Rss,
    Youtube,
}

/// One `[[feeds]]` block. Immutable once loaded for a run.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub max_items: Option<usize>,
}

impl SourceConfig {
    /// Compile the optional regex pattern, reporting which feed is broken.
    pub fn compiled_pattern(&self) -> Result<Option<Regex>> {
        match &self.pattern {
            Some(p) => Regex::new(p)
                .map(Some)
                .with_context(|| format!("invalid pattern for feed '{}'", self.name)),
            None => Ok(None),
        }
    }
}

/// Load configuration from an explicit path.
pub fn load_config_from(path: &Path) -> Result<DistilConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    let cfg: DistilConfig =
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Load configuration using env var + fallback:
/// 1) $DISTIL_CONFIG_PATH
/// 2) config.toml in the working directory
pub fn load_config_default() -> Result<DistilConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            bail!("DISTIL_CONFIG_PATH points to non-existent path");
        }
        return load_config_from(&pb);
    }
    load_config_from(Path::new(DEFAULT_CONFIG_PATH))
}

fn validate(cfg: &DistilConfig) -> Result<()> {
    for feed in &cfg.feeds {
        if feed.url.trim().is_empty() {
            bail!("feed '{}' has an empty url", feed.name);
        }
        if feed.name.trim().is_empty() {
            bail!("feed at {} has an empty name", feed.url);
        }
        if feed.max_items == Some(0) {
            bail!("feed '{}' has max_items = 0", feed.name);
        }
        feed.compiled_pattern()?;
    }
    if cfg.fetch.concurrency == 0 {
        bail!("fetch.concurrency must be at least 1");
    }
    if cfg.fetch.batch_budget == 0 {
        bail!("fetch.batch_budget must be at least 1");
    }
    Ok(())
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SAMPLE: &str = r#"
[llm]
model = "ollama/mistral:latest"

[domain]
focus = "drug discovery"

[output]
directory = "distils"
reading_time_minutes = 7

[fetch]
days_back = 3
concurrency = 2

[[feeds]]
url = "https://example.test/rss"
name = "Example"
keywords = ["trial", "fda"]
max_items = 10

[[feeds]]
url = "https://youtube.com/@channel"
name = "Channel"
kind = "youtube"
pattern = "(?i)phase [123]"
"#;

    #[test]
    fn parses_sections_and_feeds() {
        let cfg: DistilConfig = toml::from_str(SAMPLE).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.llm.model, "ollama/mistral:latest");
        assert_eq!(cfg.domain.focus, "drug discovery");
        assert_eq!(cfg.output.reading_time_minutes, 7);
        assert_eq!(cfg.fetch.days_back, 3);
        assert_eq!(cfg.feeds.len(), 2);
        assert_eq!(cfg.feeds[0].kind, SourceKind::Rss);
        assert_eq!(cfg.feeds[1].kind, SourceKind::Youtube);
        assert!(cfg.feeds[1].compiled_pattern().unwrap().is_some());
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let cfg: DistilConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.llm.model, "ollama/mistral:latest");
        assert_eq!(cfg.fetch.days_back, 7);
        assert_eq!(cfg.fetch.concurrency, 4);
        assert!(cfg.feeds.is_empty());
    }

    #[test]
    fn rejects_bad_pattern_and_empty_url() {
        let bad = r#"
[[feeds]]
url = "https://example.test/rss"
name = "Broken"
pattern = "(unclosed"
"#;
        let cfg: DistilConfig = toml::from_str(bad).unwrap();
        assert!(validate(&cfg).is_err());

        let empty = r#"
[[feeds]]
url = ""
name = "NoUrl"
"#;
        let cfg: DistilConfig = toml::from_str(empty).unwrap();
        assert!(validate(&cfg).is_err());
    }

    #[serial_test::serial]
    #[test]
    fn env_path_takes_precedence() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("custom.toml");
        fs::write(&p, SAMPLE).unwrap();

        std::env::set_var(ENV_CONFIG_PATH, p.display().to_string());
        let cfg = load_config_default().unwrap();
        assert_eq!(cfg.feeds.len(), 2);
        std::env::remove_var(ENV_CONFIG_PATH);
    }
}
