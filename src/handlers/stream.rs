// POST /v1/models/{model}/generateContentStream handler

use std::convert::Infallible;
use std::time::Instant;

use futures_util::stream::StreamExt;
use tracing::{debug, error, info};
use warp::reply::Response;
use warp::Reply;

use crate::error::GatewayError;
use crate::inference::{format_chat_prompt, SamplingParams};
use crate::models::GenerateContentRequest;
use crate::sse::{create_chunk_event, create_error_event, create_stop_event};
use crate::state::AppState;

use super::log_failure;

pub async fn stream_content_handler(
    model: String,
    request: GenerateContentRequest,
    state: AppState,
) -> Result<Response, Infallible> {
    info!("Stream request for model: {}", model);

    match stream_content(request, &state).await {
        Ok(response) => Ok(response),
        Err(err) => {
            log_failure("Stream setup", &err);
            Ok(err.into_response())
        }
    }
}

/// Failures before the first event become a plain error response; failures
/// afterwards become one terminal error event.
async fn stream_content(
    request: GenerateContentRequest,
    state: &AppState,
) -> Result<Response, GatewayError> {
    request.validate()?;
    if !state.engine.is_loaded() {
        return Err(GatewayError::NotReady("Model not loaded".to_string()));
    }

    let params = SamplingParams::resolve(
        request.generation_config.as_ref(),
        &state.settings.sampling_defaults(),
    );
    let prompt = format_chat_prompt(&request.contents);
    debug!("Prompt length: {} chars", prompt.chars().count());

    let active = state.metrics.track_active();
    let started = Instant::now();
    let mut chunks = state.engine.generate_stream(prompt, params).await?;

    let metrics = state.metrics.clone();
    let model_name = state.settings.model_name.clone();

    let events = async_stream::stream! {
        // Released when the client goes away or the stream ends
        let _active = active;
        let mut count = 0usize;
        let mut failed = false;

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(text) => {
                    count += 1;
                    yield create_chunk_event(&text);
                }
                Err(err) => {
                    error!("Streaming error: {}", err);
                    failed = true;
                    yield create_error_event(err.to_string());
                    break;
                }
            }
        }

        if !failed {
            yield create_stop_event();
        }

        let elapsed = started.elapsed();
        metrics.observe_inference(&model_name, "stream", elapsed);
        info!("Streamed {} chunks in {:.2}s", count, elapsed.as_secs_f64());
    };

    Ok(warp::sse::reply(warp::sse::keep_alive().stream(events)).into_response())
}
