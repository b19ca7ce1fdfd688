// GET /metrics handler

use std::convert::Infallible;

use tracing::error;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::Reply;

use crate::error::error_reply;
use crate::metrics::EXPORT_CONTENT_TYPE;
use crate::state::AppState;

pub async fn metrics_handler(state: AppState) -> Result<Response, Infallible> {
    let response = match state.metrics.export() {
        None => error_reply(StatusCode::NOT_FOUND, "Metrics are disabled"),
        Some(Ok(text)) => {
            warp::reply::with_header(text, "content-type", EXPORT_CONTENT_TYPE).into_response()
        }
        Some(Err(err)) => {
            error!("Failed to export metrics: {}", err);
            error_reply(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    };
    Ok(response)
}
