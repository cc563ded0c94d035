//! Distil Service — Binary Entrypoint
//! Boots the Axum HTTP server, wiring config, routes, shared state, and the
//! Prometheus recorder.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use distil::config;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("distil=info,run=info,ingest=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op in prod environments. This enables
    // DISTIL_CONFIG_PATH / DISTIL_API_KEY / OLLAMA_HOST from .env.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = config::load_config_default().context("loading config")?;
    tracing::info!(
        feeds = cfg.feeds.len(),
        model = %cfg.llm.model,
        "config loaded"
    );

    let metrics = distil::metrics::Metrics::init(cfg.fetch.batch_budget, cfg.fetch.concurrency);

    let state = distil::AppState::new(cfg);
    let router = distil::create_router(state).merge(metrics.router());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5001);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "distil listening");

    axum::serve(listener, router).await.context("serving")?;
    Ok(())
}
