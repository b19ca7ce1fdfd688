//! Client for the sentence-embeddings process

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Timeout for one embedding call
pub const EMBEDDINGS_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The embeddings process could not be reached
    #[error("Embeddings service unreachable: {0}")]
    Unavailable(String),

    /// The embeddings process answered with a non-success status
    #[error("Embeddings service returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    /// The returned vector is unusable
    #[error("Invalid embedding vector: {0}")]
    InvalidVector(String),

    #[error("Embeddings client error: {0}")]
    Client(String),
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            EmbeddingError::Unavailable(err.to_string())
        } else if err.is_decode() {
            EmbeddingError::InvalidVector(err.to_string())
        } else {
            EmbeddingError::Client(err.to_string())
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
    #[serde(default)]
    dimensions: Option<usize>,
}

/// Forwards text to the embeddings process' `/embed` endpoint
#[derive(Debug, Clone)]
pub struct EmbeddingsClient {
    http_client: Client,
    endpoint: String,
    dimensions: usize,
}

impl EmbeddingsClient {
    pub fn new(
        endpoint: impl Into<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::Client(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
            dimensions,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed `text` into a vector of the configured dimensionality
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        debug!("Embedding {} chars via {}", text.chars().count(), self.endpoint);

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&EmbedRequest { text })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| String::new());
            return Err(EmbeddingError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let response: EmbedResponse = response.json().await?;
        if let Some(reported) = response.dimensions {
            if reported != response.embedding.len() {
                return Err(EmbeddingError::InvalidVector(format!(
                    "reported {} dimensions but returned {} values",
                    reported,
                    response.embedding.len()
                )));
            }
        }
        validate_vector(&response.embedding, self.dimensions)?;
        Ok(response.embedding)
    }
}

fn validate_vector(values: &[f32], dimensions: usize) -> Result<(), EmbeddingError> {
    if values.len() != dimensions {
        return Err(EmbeddingError::InvalidVector(format!(
            "expected {} dimensions, got {}",
            dimensions,
            values.len()
        )));
    }
    if let Some(position) = values.iter().position(|v| !v.is_finite()) {
        return Err(EmbeddingError::InvalidVector(format!(
            "non-finite value at index {}",
            position
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use warp::Filter;

    async fn spawn_embeddings_mock(vector: Vec<f32>, status: u16) -> SocketAddr {
        let route = warp::post()
            .and(warp::path("embed"))
            .and(warp::body::json())
            .map(move |body: serde_json::Value| {
                assert!(body["text"].is_string());
                let status = warp::http::StatusCode::from_u16(status).unwrap();
                warp::reply::with_status(
                    warp::reply::json(&serde_json::json!({
                        "embedding": vector.clone(),
                        "dimensions": vector.len(),
                    })),
                    status,
                )
            });
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        addr
    }

    fn client_for(addr: SocketAddr, dimensions: usize) -> EmbeddingsClient {
        EmbeddingsClient::new(
            format!("http://{}/embed", addr),
            dimensions,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_validate_vector() {
        assert!(validate_vector(&[0.1, 0.2, 0.3], 3).is_ok());
        assert!(matches!(
            validate_vector(&[0.1, 0.2], 3),
            Err(EmbeddingError::InvalidVector(_))
        ));
        assert!(matches!(
            validate_vector(&[0.1, f32::NAN, 0.3], 3),
            Err(EmbeddingError::InvalidVector(_))
        ));
        assert!(validate_vector(&[f32::INFINITY], 1).is_err());
    }

    #[tokio::test]
    async fn test_embed_returns_vector() {
        let addr = spawn_embeddings_mock(vec![0.25; 768], 200).await;
        let values = client_for(addr, 768).embed("Привіт, світе").await.unwrap();
        assert_eq!(values.len(), 768);
        assert!(values.iter().all(|v| v.is_finite()));
    }

    #[tokio::test]
    async fn test_embed_rejects_wrong_dimensionality() {
        let addr = spawn_embeddings_mock(vec![0.25; 384], 200).await;
        let err = client_for(addr, 768).embed("text").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidVector(_)));
    }

    #[tokio::test]
    async fn test_embed_upstream_error_keeps_status() {
        let addr = spawn_embeddings_mock(vec![], 503).await;
        let err = client_for(addr, 768).embed("text").await.unwrap_err();
        match err {
            EmbeddingError::Upstream { status, .. } => assert_eq!(status, 503),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_embed_unreachable_service() {
        // Bind then drop to get a port nothing listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let client = EmbeddingsClient::new(
            format!("http://127.0.0.1:{}/embed", port),
            768,
            Duration::from_secs(5),
        )
        .unwrap();

        let err = client.embed("text").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Unavailable(_)));
    }
}
