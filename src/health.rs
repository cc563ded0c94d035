// src/health.rs
//! Per-source fetch health for one run. The tracker is run-scoped and owned
//! by the orchestrator; the fetch pool and progress stream see it only by
//! reference. Each configured source gets exactly one record per run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::config::SourceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    Ok,
    Degraded,
    Failed,
}

impl FeedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedStatus::Ok => "ok",
            FeedStatus::Degraded => "degraded",
            FeedStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedHealth {
    pub source: String,
    pub status: FeedStatus,
    pub items: usize,
    pub message: String,
    pub checked_at: u64,
}

impl FeedHealth {
    pub fn new(source: impl Into<String>, status: FeedStatus, items: usize, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            status,
            items,
            message: message.into(),
            checked_at: chrono::Utc::now().timestamp().max(0) as u64,
        }
    }
}

/// Run-scoped health table. First write per source wins; duplicates are a
/// caller bug and are logged, not merged.
#[derive(Debug, Default)]
pub struct HealthTracker {
    inner: Mutex<BTreeMap<String, FeedHealth>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, health: FeedHealth) {
        let mut map = self.inner.lock().expect("health mutex poisoned");
        if map.contains_key(&health.source) {
            tracing::warn!(source = %health.source, "duplicate health record ignored");
            return;
        }
        map.insert(health.source.clone(), health);
    }

    /// Mark every configured source that was never reached as failed, so
    /// health reporting is total even under cancellation.
    pub fn finalize(&self, sources: &[SourceConfig]) {
        let mut map = self.inner.lock().expect("health mutex poisoned");
        for src in sources {
            map.entry(src.name.clone()).or_insert_with(|| FeedHealth {
                source: src.name.clone(),
                status: FeedStatus::Failed,
                items: 0,
                message: "not attempted".to_string(),
                checked_at: chrono::Utc::now().timestamp().max(0) as u64,
            });
        }
    }

    pub fn get(&self, source: &str) -> Option<FeedHealth> {
        self.inner
            .lock()
            .expect("health mutex poisoned")
            .get(source)
            .cloned()
    }

    /// Records ordered by source name.
    pub fn snapshot(&self) -> Vec<FeedHealth> {
        self.inner
            .lock()
            .expect("health mutex poisoned")
            .values()
            .cloned()
            .collect()
    }
}
