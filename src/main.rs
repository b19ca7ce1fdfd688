use std::error::Error;
use std::sync::Arc;

use gemma_gateway::config::Settings;
use gemma_gateway::embeddings::{EmbeddingsClient, EMBEDDINGS_TIMEOUT};
use gemma_gateway::inference::{InferenceEngine, LlamaServer};
use gemma_gateway::metrics::Metrics;
use gemma_gateway::routes::configure_routes;
use gemma_gateway::state::AppState;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    let settings = Settings::load()?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| settings.log_filter().unwrap_or("info").into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting gateway v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Model: {}, workers: {}, GPU layers: {}",
        settings.model_name, settings.max_concurrent_requests, settings.model_gpu_layers
    );

    let bind_address = settings.bind_address()?;
    let engine = Arc::new(InferenceEngine::new(settings.max_concurrent_requests));
    let embeddings = EmbeddingsClient::new(
        settings.embeddings_endpoint(),
        settings.embeddings_dimensions,
        EMBEDDINGS_TIMEOUT,
    )?;
    let metrics = Metrics::new(settings.enable_metrics)?;

    // Load in the background so /v1/health answers while the model loads
    let runtime_config = settings.llama_server_config();
    let loader = {
        let engine = engine.clone();
        tokio::task::spawn_blocking(move || match LlamaServer::launch(&runtime_config) {
            Ok(server) => {
                engine.install(Arc::new(server));
                info!("Model loaded successfully");
            }
            Err(err) => error!("Failed to load model: {}", err),
        })
    };

    let state = AppState::new(settings, engine.clone(), embeddings, metrics);
    let routes = configure_routes(state);

    let (address, server) =
        warp::serve(routes).try_bind_with_graceful_shutdown(bind_address, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", err);
            }
        })?;

    info!("Listening on http://{}", address);
    server.await;

    info!("Shutting down");
    tokio::task::spawn_blocking(move || engine.shutdown()).await?;
    if !loader.is_finished() {
        info!("Model is still loading, it will be released once loaded");
    }
    Ok(())
}
