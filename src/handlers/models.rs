// GET /, GET /v1/models and GET /v1/health handlers

use std::collections::BTreeMap;
use std::convert::Infallible;

use crate::models::{HealthResponse, ListModelsResponse, ModelInfo, RootInfo};
use crate::state::AppState;

pub const API_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name under which the embeddings model is listed
pub const EMBEDDINGS_MODEL_NAME: &str = "text-embedding-multilingual";

/// Token limit of the sentence-embedding model
const EMBEDDINGS_INPUT_TOKEN_LIMIT: u32 = 512;

pub async fn list_models_handler(state: AppState) -> Result<impl warp::Reply, Infallible> {
    let settings = &state.settings;

    let models = vec![
        ModelInfo {
            name: settings.model_name.clone(),
            version: "1.0".to_string(),
            display_name: "MamayLM Gemma 3 12B IT".to_string(),
            description: "Ukrainian-optimized Gemma 3 12B Instruct model (Q5_K_M quantization)"
                .to_string(),
            input_token_limit: settings.model_context_size,
            output_token_limit: settings.default_max_tokens,
            supported_generation_methods: vec![
                "generateContent".to_string(),
                "generateContentStream".to_string(),
            ],
        },
        ModelInfo {
            name: EMBEDDINGS_MODEL_NAME.to_string(),
            version: "1.0".to_string(),
            display_name: "Multilingual Embeddings".to_string(),
            description: format!(
                "Multilingual text embeddings ({} dimensions)",
                settings.embeddings_dimensions
            ),
            input_token_limit: EMBEDDINGS_INPUT_TOKEN_LIMIT,
            output_token_limit: 0,
            supported_generation_methods: vec!["embedContent".to_string()],
        },
    ];

    Ok(warp::reply::json(&ListModelsResponse { models }))
}

pub async fn health_handler(state: AppState) -> Result<impl warp::Reply, Infallible> {
    let loaded = state.engine.is_loaded();

    Ok(warp::reply::json(&HealthResponse {
        status: if loaded { "healthy" } else { "model_not_loaded" }.to_string(),
        model_loaded: loaded,
        gpu: state.settings.uses_gpu(),
        version: API_VERSION.to_string(),
    }))
}

pub async fn root_handler(state: AppState) -> Result<impl warp::Reply, Infallible> {
    let endpoints: BTreeMap<String, String> = [
        ("health", "/v1/health"),
        ("models", "/v1/models"),
        ("generate", "/v1/models/{model}/generateContent"),
        ("stream", "/v1/models/{model}/generateContentStream"),
        ("embed", "/v1/models/{model}/embedContent"),
        ("metrics", "/metrics"),
    ]
    .into_iter()
    .map(|(name, path)| (name.to_string(), path.to_string()))
    .collect();

    Ok(warp::reply::json(&RootInfo {
        name: "AI UA".to_string(),
        version: API_VERSION.to_string(),
        description: "Local Gemini-compatible API with Ukrainian MamayLM model".to_string(),
        model: state.settings.model_name.clone(),
        status: if state.engine.is_loaded() { "ready" } else { "loading" }.to_string(),
        endpoints,
    }))
}
