mod api;
mod artifact;
mod config;
mod error;
mod models;
mod progress;
mod queue;
mod registry;
mod ytdlp;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use config::Config;
use queue::ConvertTask;
use registry::JobRegistry;
use tokio::sync::mpsc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: JobRegistry,
    pub queue_tx: mpsc::Sender<ConvertTask>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tube_audio_api=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    artifact::ensure_downloads_root(&config.downloads_dir).await?;

    let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
    let state = AppState {
        config: config.clone(),
        registry: JobRegistry::new(),
        queue_tx,
    };

    queue::spawn_convert_workers(state.clone(), queue_rx);

    let app = Router::new()
        .route("/healthz", get(api::healthz))
        .route("/validate", post(api::validate_url))
        .route("/convert", post(api::convert_video))
        .route("/progress/{progress_id}", get(api::get_progress))
        .route("/download/{progress_id}", get(api::download_file))
        .route("/api/convert", post(api::api_convert))
        .route("/api/info", post(api::api_info))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("tube-audio-api listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
