//! Async client for the gateway's Gemini-compatible API
//!
//! ```no_run
//! # async fn run() -> Result<(), gemma_gateway::client::ClientError> {
//! use gemma_gateway::client::GatewayClient;
//! use gemma_gateway::models::{Content, GenerateContentRequest};
//!
//! let client = GatewayClient::new("http://localhost:8000", std::time::Duration::from_secs(300))?;
//! let request = GenerateContentRequest::new(vec![Content::user("Привіт!")]);
//! let response = client.generate_content("mamay-gemma-3-12b", &request).await?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```

mod sse;

pub use sse::{parse_sse_stream, ResponseStream};

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::models::{
    EmbedContentRequest, EmbedContentResponse, GenerateContentRequest, GenerateContentResponse,
    HealthResponse, ListModelsResponse,
};

#[derive(Debug, Error)]
pub enum ClientError {
    /// The gateway answered with a non-success status
    #[error("API error ({status}): {body}")]
    Http { status: u16, body: String },

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The stream broke or carried an error event
    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Client for one gateway instance
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http_client: Client,
    api_url: String,
    /// Applied to every non-streaming call
    timeout: Duration,
}

impl GatewayClient {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            http_client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!("{}/v1/models/{}/{}", self.api_url, model, method)
    }

    pub async fn list_models(&self) -> Result<ListModelsResponse, ClientError> {
        let request = self.http_client.get(format!("{}/v1/models", self.api_url));
        self.send_json(request).await
    }

    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        let request = self.http_client.get(format!("{}/v1/health", self.api_url));
        self.send_json(request).await
    }

    pub async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, ClientError> {
        let request = self
            .http_client
            .post(self.model_url(model, "generateContent"))
            .json(request);
        self.send_json(request).await
    }

    /// Start a streaming generation
    ///
    /// The final item carries empty text and `finishReason: STOP`. No overall
    /// timeout applies to the stream.
    pub async fn generate_content_stream(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<ResponseStream, ClientError> {
        let response = self
            .http_client
            .post(self.model_url(model, "generateContentStream"))
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;

        Ok(parse_sse_stream(Box::pin(response.bytes_stream())))
    }

    pub async fn embed_content(
        &self,
        model: &str,
        text: &str,
    ) -> Result<EmbedContentResponse, ClientError> {
        let request = self
            .http_client
            .post(self.model_url(model, "embedContent"))
            .json(&EmbedContentRequest::new(text));
        self.send_json(request).await
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let response = request.timeout(self.timeout).send().await?;
        let response = check_status(response).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ClientError::Serialization(e.to_string()))
    }
}

async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_else(|_| String::new());
    Err(ClientError::Http {
        status: status.as_u16(),
        body,
    })
}
