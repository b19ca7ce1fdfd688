// POST /v1/models/{model}/generateContent handler

use std::convert::Infallible;
use std::time::Instant;

use tracing::{debug, info};
use warp::reply::Response;
use warp::Reply;

use crate::error::GatewayError;
use crate::inference::{format_chat_prompt, SamplingParams};
use crate::models::{FinishReason, GenerateContentRequest, GenerateContentResponse, UsageMetadata};
use crate::state::AppState;

use super::log_failure;

pub async fn generate_content_handler(
    model: String,
    request: GenerateContentRequest,
    state: AppState,
) -> Result<Response, Infallible> {
    info!("Generate request for model: {}", model);

    match generate_content(request, &state).await {
        Ok(response) => Ok(response),
        Err(err) => {
            log_failure("Generation", &err);
            Ok(err.into_response())
        }
    }
}

async fn generate_content(
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

    let _active = state.metrics.track_active();
    let started = Instant::now();
    let completion = state.engine.generate(prompt, params).await?;
    let elapsed = started.elapsed();

    state
        .metrics
        .observe_inference(&state.settings.model_name, "generate", elapsed);
    state
        .metrics
        .record_throughput(completion.completion_tokens, elapsed);

    let seconds = elapsed.as_secs_f64();
    info!(
        "Generated {} tokens in {:.2}s ({:.1} tok/s)",
        completion.completion_tokens,
        seconds,
        if seconds > 0.0 {
            f64::from(completion.completion_tokens) / seconds
        } else {
            0.0
        }
    );

    let usage = UsageMetadata {
        prompt_token_count: completion.prompt_tokens,
        candidates_token_count: completion.completion_tokens,
        total_token_count: completion.total_tokens,
        ..Default::default()
    };
    let response =
        GenerateContentResponse::single(completion.text, Some(FinishReason::Stop)).with_usage(usage);

    Ok(warp::reply::json(&response).into_response())
}
