// src/filter.rs
//! Relevance gate for collected items. Matching policy: with no keywords and
//! no pattern configured a rule matches everything; otherwise an item is kept
//! if ANY keyword appears case-insensitively in title or body, OR the regex
//! pattern matches title or body. Keywords and pattern are OR'd, never AND'd.
//! Non-matching items are dropped outright to bound memory on large feeds.

use anyhow::Result;
use regex::Regex;
use serde::Serialize;

use crate::config::SourceConfig;
use crate::ingest::types::RawItem;

#[derive(Debug, Default)]
pub struct FilterRule {
    keywords: Vec<String>,
    pattern: Option<Regex>,
}

impl FilterRule {
    pub fn new(keywords: Vec<String>, pattern: Option<Regex>) -> Self {
        let keywords = keywords
            .into_iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords, pattern }
    }

    pub fn from_config(cfg: &SourceConfig) -> Result<Self> {
        Ok(Self::new(cfg.keywords.clone(), cfg.compiled_pattern()?))
    }

    pub fn is_match_all(&self) -> bool {
        self.keywords.is_empty() && self.pattern.is_none()
    }

    /// First matching condition, or `None` if the item should be dropped.
    pub fn evaluate(&self, item: &RawItem) -> Option<MatchReason> {
        if self.is_match_all() {
            return Some(MatchReason::MatchAll);
        }
        let title = item.title.to_lowercase();
        let body = item.body.to_lowercase();
        for kw in &self.keywords {
            if title.contains(kw.as_str()) || body.contains(kw.as_str()) {
                return Some(MatchReason::Keyword(kw.clone()));
            }
        }
        if let Some(re) = &self.pattern {
            if re.is_match(&item.title) || re.is_match(&item.body) {
                return Some(MatchReason::Pattern);
            }
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "matched_by", rename_all = "snake_case")]
pub enum MatchReason {
    /// No keywords and no pattern configured for the source.
    MatchAll,
    /// This keyword appeared in title or body.
    Keyword(String),
    /// The configured regex matched title or body.
    Pattern,
}

/// A kept item plus why it was kept. Derived, read-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilteredItem {
    pub item: RawItem,
    pub reason: MatchReason,
}

/// Apply one rule to a slice of items, dropping non-matches. Items arrive
/// already inside the date window (the adapters apply the hard cutoff).
pub fn filter_items(items: Vec<RawItem>, rule: &FilterRule) -> Vec<FilteredItem> {
    items
        .into_iter()
        .filter_map(|item| {
            rule.evaluate(&item)
                .map(|reason| FilteredItem { item, reason })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str, body: &str) -> RawItem {
        RawItem {
            source: "S".into(),
            title: title.into(),
            url: "https://example.test/x".into(),
            published_at: 1_000,
            body: body.into(),
        }
    }

    #[test]
    fn empty_rule_matches_everything() {
        let rule = FilterRule::new(Vec::new(), None);
        let out = filter_items(vec![item("anything", "at all")], &rule);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].reason, MatchReason::MatchAll);
    }

    #[test]
    fn keyword_match_is_case_insensitive_substring() {
        let rule = FilterRule::new(vec!["FDA".into()], None);
        let out = filter_items(
            vec![item("fda approves trial", ""), item("unrelated", "")],
            &rule,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].reason, MatchReason::Keyword("fda".into()));
    }

    #[test]
    fn keywords_and_pattern_are_ored() {
        let re = Regex::new(r"phase [123]").unwrap();
        let rule = FilterRule::new(vec!["fda".into()], Some(re));

        // Keyword hit without pattern hit.
        let kw_only = filter_items(vec![item("FDA news", "")], &rule);
        assert_eq!(kw_only.len(), 1);

        // Pattern hit without keyword hit.
        let pat_only = filter_items(vec![item("results", "phase 2 readout")], &rule);
        assert_eq!(pat_only.len(), 1);
        assert_eq!(pat_only[0].reason, MatchReason::Pattern);

        // Neither.
        let neither = filter_items(vec![item("sports", "weather")], &rule);
        assert!(neither.is_empty());
    }

    #[test]
    fn non_matching_items_are_dropped_not_retained() {
        let rule = FilterRule::new(vec!["kept".into()], None);
        let out = filter_items(
            vec![item("kept one", ""), item("dropped one", "")],
            &rule,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].item.title, "kept one");
    }

    #[test]
    fn blank_keywords_do_not_match_all_text() {
        let rule = FilterRule::new(vec!["  ".into()], None);
        assert!(rule.is_match_all());
    }
}
