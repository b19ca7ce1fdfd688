//! Shared fixtures: deterministic fake models and a mock embeddings process
#![allow(dead_code)]

use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gemma_gateway::config::Settings;
use gemma_gateway::embeddings::EmbeddingsClient;
use gemma_gateway::inference::{
    Completion, InferenceEngine, ModelError, SamplingParams, TextModel,
};
use gemma_gateway::metrics::Metrics;
use gemma_gateway::state::AppState;
use warp::http::StatusCode;
use warp::Filter;

/// Reply produced by `ScriptedModel`
pub const REPLY: &str = "Вітаю! Чим я можу допомогти?";

/// Answers every prompt with `REPLY`, streamed word by word
pub struct ScriptedModel {
    pub calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TextModel for ScriptedModel {
    fn complete(&self, prompt: &str, _: &SamplingParams) -> Result<Completion, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Completion::new(
            REPLY,
            prompt.split_whitespace().count() as u32,
            REPLY.split_whitespace().count() as u32,
        ))
    }

    fn complete_streaming(
        &self,
        _: &str,
        _: &SamplingParams,
        on_chunk: &mut dyn FnMut(&str) -> ControlFlow<()>,
    ) -> Result<(), ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for piece in REPLY.split_inclusive(' ') {
            if on_chunk(piece).is_break() {
                break;
            }
        }
        Ok(())
    }
}

/// Streams one chunk, then fails; sync calls fail outright
pub struct BrokenModel;

impl TextModel for BrokenModel {
    fn complete(&self, _: &str, _: &SamplingParams) -> Result<Completion, ModelError> {
        Err(ModelError::Http {
            status: 500,
            body: "kv cache exhausted".to_string(),
        })
    }

    fn complete_streaming(
        &self,
        _: &str,
        _: &SamplingParams,
        on_chunk: &mut dyn FnMut(&str) -> ControlFlow<()>,
    ) -> Result<(), ModelError> {
        let _ = on_chunk("Віта");
        Err(ModelError::Request("connection reset".to_string()))
    }
}

pub fn test_settings() -> Settings {
    Settings {
        api_host: "127.0.0.1".to_string(),
        model_name: "mamay-gemma-3-12b".to_string(),
        max_concurrent_requests: 2,
        ..Default::default()
    }
}

/// Build gateway state around `model`; `None` leaves the engine unloaded
pub fn build_state(
    settings: Settings,
    model: Option<Arc<dyn TextModel>>,
    embeddings_addr: SocketAddr,
) -> AppState {
    let engine = Arc::new(InferenceEngine::new(settings.max_concurrent_requests));
    if let Some(model) = model {
        engine.install(model);
    }

    let embeddings = EmbeddingsClient::new(
        format!("http://{}/embed", embeddings_addr),
        settings.embeddings_dimensions,
        Duration::from_secs(5),
    )
    .expect("Failed to create embeddings client");
    let metrics = Metrics::new(settings.enable_metrics).expect("Failed to create metrics");

    AppState::new(settings, engine, embeddings, metrics)
}

/// Serve a mock `/embed` endpoint returning `dimensions` values
pub fn spawn_embeddings_service(dimensions: usize) -> SocketAddr {
    let route = warp::post()
        .and(warp::path("embed"))
        .and(warp::body::json())
        .map(move |body: serde_json::Value| {
            let text = body["text"].as_str().unwrap_or_default();
            // Deterministic, text-dependent and finite
            let seed = text.chars().count() as f32;
            let embedding: Vec<f32> = (0..dimensions)
                .map(|i| ((i as f32 + seed) * 0.01).sin())
                .collect();
            warp::reply::json(&serde_json::json!({
                "embedding": embedding,
                "dimensions": dimensions,
            }))
        });
    let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

/// Serve a mock `/embed` endpoint that always fails with `status`
pub fn spawn_failing_embeddings_service(status: StatusCode, body: &'static str) -> SocketAddr {
    let route = warp::post()
        .and(warp::path("embed"))
        .map(move || warp::reply::with_status(body, status));
    let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

/// An address with nothing listening on it
pub fn unused_address() -> SocketAddr {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind scratch socket")
        .local_addr()
        .expect("Scratch socket has no address")
}

/// Text of each `data:` line of an SSE body, parsed as JSON
pub fn sse_payloads(body: &[u8]) -> Vec<serde_json::Value> {
    std::str::from_utf8(body)
        .expect("SSE body is UTF-8")
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).expect("SSE data is JSON"))
        .collect()
}
