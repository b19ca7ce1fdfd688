// Maps warp rejections onto the Gemini error envelope

use std::convert::Infallible;

use tracing::{error, warn};
use warp::filters::body::BodyDeserializeError;
use warp::filters::cors::CorsForbidden;
use warp::http::StatusCode;
use warp::reject::{MethodNotAllowed, PayloadTooLarge, UnsupportedMediaType};
use warp::reply::Response;
use warp::Rejection;

use crate::error::{error_reply, GatewayError};

pub async fn handle_rejection(rejection: Rejection) -> Result<Response, Infallible> {
    if rejection.is_not_found() {
        return Ok(error_reply(StatusCode::NOT_FOUND, "Not Found"));
    }

    if let Some(err) = rejection.find::<GatewayError>() {
        return Ok(error_reply(err.status_code(), err.to_string()));
    }

    let response = if let Some(err) = rejection.find::<BodyDeserializeError>() {
        warn!("Rejected request body: {}", err);
        error_reply(StatusCode::BAD_REQUEST, err.to_string())
    } else if let Some(err) = rejection.find::<UnsupportedMediaType>() {
        error_reply(StatusCode::UNSUPPORTED_MEDIA_TYPE, err.to_string())
    } else if let Some(err) = rejection.find::<PayloadTooLarge>() {
        error_reply(StatusCode::PAYLOAD_TOO_LARGE, err.to_string())
    } else if let Some(err) = rejection.find::<CorsForbidden>() {
        error_reply(StatusCode::FORBIDDEN, err.to_string())
    } else if let Some(err) = rejection.find::<MethodNotAllowed>() {
        error_reply(StatusCode::METHOD_NOT_ALLOWED, err.to_string())
    } else {
        error!("Unhandled rejection: {:?}", rejection);
        error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };

    Ok(response)
}
