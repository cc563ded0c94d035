// src/api.rs
//! HTTP surface for the live client: trigger/cancel a run, stream its
//! progress events over SSE, browse history. Rendering is the client's
//! problem; everything here is JSON, SSE, or raw markdown.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde_json::json;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::DistilConfig;
use crate::history::HistoryStore;
use crate::llm;
use crate::orchestrator::{Orchestrator, RunOptions};
use crate::progress::{ProgressReceiver, ProgressSink};

struct ActiveRun {
    cancel: CancellationToken,
    /// Taken by the first (and only) live subscriber.
    events: Option<ProgressReceiver>,
}

#[derive(Clone)]
pub struct AppState {
    config: Arc<DistilConfig>,
    history: Arc<HistoryStore>,
    transcript_dir: PathBuf,
    active: Arc<Mutex<Option<ActiveRun>>>,
}

impl AppState {
    pub fn new(config: DistilConfig) -> Self {
        let history = HistoryStore::new(config.output.directory_path());
        Self {
            config: Arc::new(config),
            history: Arc::new(history),
            transcript_dir: PathBuf::from("transcripts"),
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/distil/run", post(start_run))
        .route("/distil/cancel", post(cancel_run))
        .route("/distil/events", get(run_events))
        .route("/history", get(history_list))
        .route("/history/{file}", get(history_file))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn start_run(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let mut guard = state.active.lock().expect("active run mutex poisoned");
    if guard.is_some() {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "error": "a run is already active" })),
        );
    }
    let run_id = Uuid::new_v4();
    let (sink, rx) = ProgressSink::channel();
    let cancel = CancellationToken::new();
    *guard = Some(ActiveRun {
        cancel: cancel.clone(),
        events: Some(rx),
    });
    drop(guard);

    let config = state.config.clone();
    let history = (*state.history).clone();
    let transcript_dir = state.transcript_dir.clone();
    let active = state.active.clone();
    tokio::spawn(async move {
        let opts = RunOptions::from_config(&config);
        let backend = llm::backend_from_model(&config.llm.model, opts.model_timeout);
        let orchestrator = Orchestrator::from_config(&config, backend, history, transcript_dir);
        match orchestrator.run(sink, cancel).await {
            Ok(outcome) => {
                info!(target: "api", %run_id, path = %outcome.path.display(), "run finished");
            }
            Err(e) => {
                warn!(target: "api", %run_id, error = %e, "run failed");
            }
        }
        *active.lock().expect("active run mutex poisoned") = None;
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({ "started": true, "run_id": run_id })),
    )
}

async fn cancel_run(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let guard = state.active.lock().expect("active run mutex poisoned");
    match guard.as_ref() {
        Some(run) => {
            run.cancel.cancel();
            (StatusCode::ACCEPTED, Json(json!({ "cancelling": true })))
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no active run" })),
        ),
    }
}

async fn run_events(
    State(state): State<AppState>,
) -> Result<
    Sse<impl Stream<Item = Result<Event, axum::Error>>>,
    (StatusCode, Json<serde_json::Value>),
> {
    let rx = {
        let mut guard = state.active.lock().expect("active run mutex poisoned");
        match guard.as_mut() {
            None => {
                return Err((
                    StatusCode::NOT_FOUND,
                    Json(json!({ "error": "no active run" })),
                ))
            }
            Some(run) => run.events.take(),
        }
    };
    let Some(rx) = rx else {
        // Single-subscriber contract: the stream was already handed out.
        return Err((
            StatusCode::CONFLICT,
            Json(json!({ "error": "events already subscribed" })),
        ));
    };

    let stream = UnboundedReceiverStream::new(rx).map(|ev| Event::default().json_data(&ev));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn history_list(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match state.history.list() {
        Ok(items) => Ok(Json(json!({ "distils": items }))),
        Err(e) => {
            warn!(target: "api", error = %e, "history list failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "history unavailable" })),
            ))
        }
    }
}

async fn history_file(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> impl IntoResponse {
    match state.history.load(&file) {
        Ok(content) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
            content,
        )
            .into_response(),
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no such distil" })),
        )
            .into_response(),
    }
}
