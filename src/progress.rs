// src/progress.rs
//! Ordered progress log for one run: single writer, strictly increasing
//! sequence numbers, `finished` always last. The subscriber side is a plain
//! channel receiver; a dropped subscriber never affects the run.

use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::health::FeedStatus;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressKind {
    SourceStarted {
        source: String,
    },
    SourceDone {
        source: String,
        status: FeedStatus,
        items: usize,
    },
    BatchStarted {
        index: usize,
        items: usize,
        estimated_size: usize,
    },
    BatchDone {
        index: usize,
        ok: bool,
    },
    Error {
        stage: String,
        message: String,
    },
    Finished {
        ok: bool,
        document: Option<String>,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub seq: u64,
    #[serde(flatten)]
    pub kind: ProgressKind,
}

struct SinkState {
    next_seq: u64,
    finished: bool,
}

struct SinkInner {
    tx: UnboundedSender<ProgressEvent>,
    state: Mutex<SinkState>,
}

/// Cloneable writer handle. Sequence assignment and channel send happen under
/// one lock so event order always matches sequence order, no matter which
/// task emits.
#[derive(Clone)]
pub struct ProgressSink {
    inner: Arc<SinkInner>,
}

pub type ProgressReceiver = UnboundedReceiver<ProgressEvent>;

impl ProgressSink {
    pub fn channel() -> (Self, ProgressReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self {
            inner: Arc::new(SinkInner {
                tx,
                state: Mutex::new(SinkState {
                    next_seq: 0,
                    finished: false,
                }),
            }),
        };
        (sink, rx)
    }

    /// Append one event. Dropped silently once the stream is finished; a send
    /// failure (subscriber gone) is also ignored so the run keeps going.
    pub fn emit(&self, kind: ProgressKind) {
        let mut state = self.inner.state.lock().expect("progress mutex poisoned");
        if state.finished {
            tracing::warn!(?kind, "progress event after finished dropped");
            return;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        let _ = self.inner.tx.send(ProgressEvent { seq, kind });
    }

    /// Emit the terminal `finished` event, exactly once.
    pub fn finish(&self, ok: bool, document: Option<String>, message: impl Into<String>) {
        let mut state = self.inner.state.lock().expect("progress mutex poisoned");
        if state.finished {
            return;
        }
        state.finished = true;
        let seq = state.next_seq;
        state.next_seq += 1;
        let _ = self.inner.tx.send(ProgressEvent {
            seq,
            kind: ProgressKind::Finished {
                ok,
                document,
                message: message.into(),
            },
        });
    }
}
