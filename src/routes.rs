// Route definitions

use std::convert::Infallible;

use tracing::info;
use warp::Filter;

use crate::handlers;
use crate::metrics::endpoint_label;
use crate::models::{EmbedContentRequest, GenerateContentRequest};
use crate::state::AppState;

pub fn configure_routes(
    state: AppState,
) -> impl Filter<Extract = impl warp::Reply, Error = Infallible> + Clone {
    // GET /
    let root = warp::path::end()
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::root_handler);

    // GET /v1/models
    let list_models = warp::path!("v1" / "models")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::list_models_handler);

    // GET /v1/health
    let health = warp::path!("v1" / "health")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::health_handler);

    // POST /v1/models/{model}/generateContent
    let generate = warp::path!("v1" / "models" / String / "generateContent")
        .and(warp::post())
        .and(warp::body::json::<GenerateContentRequest>())
        .and(with_state(state.clone()))
        .and_then(handlers::generate_content_handler);

    // POST /v1/models/{model}/generateContentStream
    let stream = warp::path!("v1" / "models" / String / "generateContentStream")
        .and(warp::post())
        .and(warp::body::json::<GenerateContentRequest>())
        .and(with_state(state.clone()))
        .and_then(handlers::stream_content_handler);

    // POST /v1/models/{model}/embedContent
    let embed = warp::path!("v1" / "models" / String / "embedContent")
        .and(warp::post())
        .and(warp::body::json::<EmbedContentRequest>())
        .and(with_state(state.clone()))
        .and_then(handlers::embed_content_handler);

    // GET /metrics
    let metrics = warp::path!("metrics")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::metrics_handler);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_header("content-type");

    let recorder = state.metrics.clone();
    let access_log = warp::log::custom(move |request: warp::log::Info<'_>| {
        let method = request.method().as_str();
        let path = request.path();
        let status = request.status().as_u16();
        let elapsed = request.elapsed();

        info!("{} {} {} {:.3}s", method, path, status, elapsed.as_secs_f64());
        let endpoint = endpoint_label(path);
        if endpoint != "/metrics" {
            recorder.observe_request(method, endpoint, status, elapsed);
        }
    });

    root.or(list_models)
        .or(health)
        .or(generate)
        .or(stream)
        .or(embed)
        .or(metrics)
        .with(cors)
        .recover(handlers::handle_rejection)
        .with(access_log)
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}
