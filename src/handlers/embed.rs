// POST /v1/models/{model}/embedContent handler

use std::convert::Infallible;
use std::time::Instant;

use tracing::info;
use warp::reply::Response;
use warp::Reply;

use crate::error::GatewayError;
use crate::models::{ContentEmbedding, EmbedContentRequest, EmbedContentResponse};
use crate::state::AppState;

use super::log_failure;

pub async fn embed_content_handler(
    model: String,
    request: EmbedContentRequest,
    state: AppState,
) -> Result<Response, Infallible> {
    info!("Embed request for model: {}", model);

    match embed_content(request, &state).await {
        Ok(response) => Ok(response),
        Err(err) => {
            log_failure("Embedding", &err);
            Ok(err.into_response())
        }
    }
}

async fn embed_content(
    request: EmbedContentRequest,
    state: &AppState,
) -> Result<Response, GatewayError> {
    let started = Instant::now();
    let values = state.embeddings.embed(&request.content).await?;
    state
        .metrics
        .observe_inference(&state.settings.embeddings_model, "embed", started.elapsed());

    info!("Generated embedding with {} dimensions", values.len());

    let response = EmbedContentResponse {
        embedding: ContentEmbedding { values },
    };
    Ok(warp::reply::json(&response).into_response())
}
