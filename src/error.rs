//! Gateway-level error type and its mapping onto HTTP responses

use thiserror::Error;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::Reply;

use crate::embeddings::EmbeddingError;
use crate::inference::{EngineError, ModelError};
use crate::models::ErrorResponse;

/// Errors surfaced to API callers
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed or out-of-range request content
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The model has not been loaded (or has been unloaded)
    #[error("{0}")]
    NotReady(String),

    /// A collaborating service cannot be reached
    #[error("{0}")]
    Unavailable(String),

    /// A collaborating service answered with a failure
    #[error("{message}")]
    Upstream { status: Option<u16>, message: String },

    /// Anything else
    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status used when this error is returned to the caller
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotReady(_) | GatewayError::Unavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::Upstream { status, .. } => status
                .and_then(|code| StatusCode::from_u16(code).ok())
                .filter(|code| code.is_client_error() || code.is_server_error())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl warp::reject::Reject for GatewayError {}

impl Reply for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        error_reply(status, self.to_string())
    }
}

/// Build a Gemini-style error envelope with the given status
pub fn error_reply(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorResponse::new(status.as_u16(), message, canonical_status(status));
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

/// Canonical Google API status name for an HTTP status code
pub fn canonical_status(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 | 413 | 415 => "INVALID_ARGUMENT",
        401 => "UNAUTHENTICATED",
        403 => "PERMISSION_DENIED",
        404 => "NOT_FOUND",
        405 => "METHOD_NOT_ALLOWED",
        409 => "ABORTED",
        429 => "RESOURCE_EXHAUSTED",
        499 => "CANCELLED",
        501 => "UNIMPLEMENTED",
        502 | 503 => "UNAVAILABLE",
        504 => "DEADLINE_EXCEEDED",
        code if (400..500).contains(&code) => "FAILED_PRECONDITION",
        _ => "INTERNAL",
    }
}

impl From<EngineError> for GatewayError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotReady(message) => GatewayError::NotReady(message),
            EngineError::Model(model_err) => model_err.into(),
            EngineError::Worker(message) => GatewayError::Internal(message),
        }
    }
}

impl From<ModelError> for GatewayError {
    fn from(err: ModelError) -> Self {
        // The gateway reports backend failures as its own failure, whatever
        // status the runtime used.
        GatewayError::Upstream {
            status: None,
            message: err.to_string(),
        }
    }
}

impl From<EmbeddingError> for GatewayError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::Unavailable(_) => {
                GatewayError::Unavailable("Embeddings service unavailable".to_string())
            }
            EmbeddingError::Upstream { status, body } => GatewayError::Upstream {
                status: Some(status),
                message: format!("Embeddings service error: {}", body),
            },
            EmbeddingError::InvalidVector(reason) => GatewayError::Upstream {
                status: None,
                message: format!("Embeddings service error: {}", reason),
            },
            EmbeddingError::Client(message) => GatewayError::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_maps_to_bad_request() {
        let err = GatewayError::Validation("temperature out of range".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("temperature out of range"));
    }

    #[test]
    fn test_not_ready_maps_to_service_unavailable() {
        let err = GatewayError::NotReady("Model not loaded".to_string());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.to_string(), "Model not loaded");
    }

    #[test]
    fn test_upstream_status_passthrough() {
        let err = GatewayError::Upstream {
            status: Some(422),
            message: "bad input".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_upstream_success_status_is_not_passed_through() {
        let err = GatewayError::Upstream {
            status: Some(200),
            message: "odd".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let err = GatewayError::Upstream {
            status: None,
            message: "generation failed".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_engine_not_ready_conversion() {
        let err: GatewayError = EngineError::NotReady("Model not loaded".to_string()).into();
        assert!(matches!(err, GatewayError::NotReady(_)));
    }

    #[test]
    fn test_embedding_unavailable_conversion() {
        let err: GatewayError =
            EmbeddingError::Unavailable("connection refused".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.to_string(), "Embeddings service unavailable");
    }

    #[test]
    fn test_embedding_upstream_conversion_keeps_body() {
        let err: GatewayError = EmbeddingError::Upstream {
            status: 503,
            body: "Model not loaded".to_string(),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.to_string().contains("Embeddings service error: Model not loaded"));
    }

    #[test]
    fn test_canonical_status_names() {
        assert_eq!(canonical_status(StatusCode::BAD_REQUEST), "INVALID_ARGUMENT");
        assert_eq!(canonical_status(StatusCode::NOT_FOUND), "NOT_FOUND");
        assert_eq!(canonical_status(StatusCode::SERVICE_UNAVAILABLE), "UNAVAILABLE");
        assert_eq!(canonical_status(StatusCode::INTERNAL_SERVER_ERROR), "INTERNAL");
        assert_eq!(canonical_status(StatusCode::IM_A_TEAPOT), "FAILED_PRECONDITION");
    }

    #[tokio::test]
    async fn test_error_reply_envelope() {
        let response = GatewayError::NotReady("Model not loaded".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = warp::hyper::body::to_bytes(response.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], 503);
        assert_eq!(json["error"]["message"], "Model not loaded");
        assert_eq!(json["error"]["status"], "UNAVAILABLE");
    }
}
