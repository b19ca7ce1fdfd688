//! `llama-server` backend
//!
//! The gateway launches llama.cpp's HTTP server as a child process bound to
//! loopback and drives its `/completion` endpoint with a blocking client. All
//! decoding, KV-cache handling and quantized execution happen in that process.

use std::io::{BufRead, BufReader};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::model::{Completion, ModelError, SamplingParams, TextModel};

const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Launch parameters for `llama-server`
#[derive(Debug, Clone)]
pub struct LlamaServerConfig {
    pub binary: String,
    pub model_path: PathBuf,
    pub context_size: u32,
    pub threads: u32,
    pub batch_size: u32,
    pub gpu_layers: u32,
    pub port: u16,
    pub request_timeout: Duration,
    pub load_timeout: Duration,
}

impl LlamaServerConfig {
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Command-line arguments for the child process
    pub fn command_args(&self) -> Vec<String> {
        vec![
            "-m".to_string(),
            self.model_path.display().to_string(),
            "-c".to_string(),
            self.context_size.to_string(),
            "-t".to_string(),
            self.threads.to_string(),
            "-b".to_string(),
            self.batch_size.to_string(),
            "-ngl".to_string(),
            self.gpu_layers.to_string(),
            "--host".to_string(),
            "127.0.0.1".to_string(),
            "--port".to_string(),
            self.port.to_string(),
        ]
    }
}

/// Body of `POST /completion`
#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: u32,
    temperature: f32,
    top_k: u32,
    top_p: f32,
    stop: &'a [String],
    stream: bool,
    cache_prompt: bool,
}

impl<'a> CompletionRequest<'a> {
    fn new(prompt: &'a str, params: &'a SamplingParams, stream: bool) -> Self {
        Self {
            prompt,
            n_predict: params.max_tokens,
            temperature: params.temperature,
            top_k: params.top_k,
            top_p: params.top_p,
            stop: &params.stop,
            stream,
            cache_prompt: true,
        }
    }
}

/// Non-streaming `/completion` response
#[derive(Debug, Deserialize)]
struct CompletionResponse {
    content: String,
    /// Prompt tokens
    #[serde(default)]
    tokens_evaluated: u32,
    /// Generated tokens
    #[serde(default)]
    tokens_predicted: u32,
}

/// One `data:` event of a streaming `/completion` response
#[derive(Debug, Deserialize, PartialEq)]
struct StreamChunk {
    #[serde(default)]
    content: String,
    #[serde(default)]
    stop: bool,
}

#[derive(Debug, Deserialize)]
struct RuntimeErrorEvent {
    error: RuntimeErrorBody,
}

#[derive(Debug, Deserialize)]
struct RuntimeErrorBody {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: String,
}

/// Parse one line of the runtime's SSE stream
///
/// Returns `Ok(None)` for lines that carry no chunk.
fn parse_stream_line(line: &str) -> Result<Option<StreamChunk>, ModelError> {
    let data = match line.trim().strip_prefix("data:") {
        Some(data) => data.trim_start(),
        None => return Ok(None),
    };
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }

    if let Ok(event) = serde_json::from_str::<RuntimeErrorEvent>(data) {
        return Err(ModelError::Http {
            status: event.error.code.unwrap_or(500),
            body: event.error.message,
        });
    }

    Ok(Some(serde_json::from_str(data)?))
}

/// A model served by a `llama-server` process
pub struct LlamaServer {
    http: Client,
    base_url: String,
    child: Mutex<Option<Child>>,
}

impl LlamaServer {
    /// Launch `llama-server` and block until the model is loaded
    pub fn launch(config: &LlamaServerConfig) -> Result<Self, ModelError> {
        if !config.model_path.is_file() {
            return Err(ModelError::ModelFileMissing(config.model_path.clone()));
        }

        info!("Loading model from {}", config.model_path.display());
        info!(
            "Context size: {}, Threads: {}, Batch: {}, GPU layers: {}",
            config.context_size, config.threads, config.batch_size, config.gpu_layers
        );

        let child = Command::new(&config.binary)
            .args(config.command_args())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| ModelError::Launch(format!("{}: {}", config.binary, e)))?;

        let server = Self {
            http: build_client(config.request_timeout)?,
            base_url: config.base_url(),
            child: Mutex::new(Some(child)),
        };

        // Dropping `server` on failure kills the child
        server.wait_until_ready(config.load_timeout)?;
        info!("Model runtime ready at {}", server.base_url);
        Ok(server)
    }

    /// Attach to a runtime that is already running at `base_url`
    pub fn connect(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, ModelError> {
        let server = Self {
            http: build_client(request_timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            child: Mutex::new(None),
        };

        if !server.check_health()? {
            return Err(ModelError::Startup(format!(
                "{} is not healthy",
                server.base_url
            )));
        }
        Ok(server)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn check_health(&self) -> Result<bool, ModelError> {
        let url = format!("{}/health", self.base_url);
        match self.http.get(&url).timeout(HEALTH_CHECK_TIMEOUT).send() {
            // 503 while the model is still loading
            Ok(response) => Ok(response.status().is_success()),
            Err(e) if e.is_connect() || e.is_timeout() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn wait_until_ready(&self, timeout: Duration) -> Result<(), ModelError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child_exit_status()? {
                return Err(ModelError::Startup(format!(
                    "runtime exited during load ({})",
                    status
                )));
            }
            if self.check_health()? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ModelError::Startup(format!(
                    "not healthy after {}s",
                    timeout.as_secs()
                )));
            }
            std::thread::sleep(HEALTH_POLL_INTERVAL);
        }
    }

    fn child_exit_status(&self) -> Result<Option<ExitStatus>, ModelError> {
        match self.child.lock().as_mut() {
            Some(child) => child
                .try_wait()
                .map_err(|e| ModelError::Launch(e.to_string())),
            None => Ok(None),
        }
    }

    fn post_completion(
        &self,
        prompt: &str,
        params: &SamplingParams,
        stream: bool,
    ) -> Result<Response, ModelError> {
        let url = format!("{}/completion", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&CompletionRequest::new(prompt, params, stream))
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ModelError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    fn terminate(&self) {
        if let Some(mut child) = self.child.lock().take() {
            info!("Stopping model runtime (pid {})", child.id());
            if let Err(e) = child.kill() {
                warn!("Failed to stop model runtime: {}", e);
            }
            if let Err(e) = child.wait() {
                warn!("Failed to reap model runtime: {}", e);
            }
        }
    }
}

impl TextModel for LlamaServer {
    fn complete(&self, prompt: &str, params: &SamplingParams) -> Result<Completion, ModelError> {
        let response: CompletionResponse = self.post_completion(prompt, params, false)?.json()?;
        Ok(Completion::new(
            response.content,
            response.tokens_evaluated,
            response.tokens_predicted,
        ))
    }

    fn complete_streaming(
        &self,
        prompt: &str,
        params: &SamplingParams,
        on_chunk: &mut dyn FnMut(&str) -> ControlFlow<()>,
    ) -> Result<(), ModelError> {
        let response = self.post_completion(prompt, params, true)?;

        for line in BufReader::new(response).lines() {
            let line = line.map_err(|e| ModelError::Request(e.to_string()))?;
            let Some(chunk) = parse_stream_line(&line)? else {
                continue;
            };

            if !chunk.content.is_empty() && on_chunk(&chunk.content).is_break() {
                // Dropping the response closes the connection, which aborts
                // the generation in the runtime.
                debug!("Stream consumer stopped, abandoning generation");
                return Ok(());
            }
            if chunk.stop {
                return Ok(());
            }
        }

        Err(ModelError::Protocol(
            "runtime stream ended without a stop event".to_string(),
        ))
    }

    fn shutdown(&self) {
        self.terminate();
    }
}

impl Drop for LlamaServer {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn build_client(timeout: Duration) -> Result<Client, ModelError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(timeout)
        .build()
        .map_err(|e| ModelError::Request(format!("Failed to create HTTP client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LlamaServerConfig {
        LlamaServerConfig {
            binary: "llama-server".to_string(),
            model_path: PathBuf::from("/models/gemma.gguf"),
            context_size: 4096,
            threads: 8,
            batch_size: 256,
            gpu_layers: 0,
            port: 18080,
            request_timeout: Duration::from_secs(30),
            load_timeout: Duration::from_secs(1),
        }
    }

    fn params() -> SamplingParams {
        SamplingParams {
            temperature: 0.3,
            max_tokens: 128,
            top_k: 40,
            top_p: 0.95,
            stop: vec!["<end_of_turn>".to_string()],
        }
    }

    #[test]
    fn test_command_args() {
        let args = config().command_args();
        assert_eq!(
            args,
            vec![
                "-m", "/models/gemma.gguf", "-c", "4096", "-t", "8", "-b", "256", "-ngl", "0",
                "--host", "127.0.0.1", "--port", "18080",
            ]
        );
        assert_eq!(config().base_url(), "http://127.0.0.1:18080");
    }

    #[test]
    fn test_completion_request_body() {
        let params = params();
        let body = CompletionRequest::new("<start_of_turn>model\n", &params, true);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["prompt"], "<start_of_turn>model\n");
        assert_eq!(json["n_predict"], 128);
        assert_eq!(json["top_k"], 40);
        assert_eq!(json["stop"][0], "<end_of_turn>");
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn test_completion_response_parsing() {
        let response: CompletionResponse = serde_json::from_str(
            r#"{"content":"Вітаю!","tokens_evaluated":12,"tokens_predicted":4,"stop":true,"model":"gemma"}"#,
        )
        .unwrap();
        assert_eq!(response.content, "Вітаю!");
        assert_eq!(response.tokens_evaluated, 12);
        assert_eq!(response.tokens_predicted, 4);
    }

    #[test]
    fn test_parse_stream_line_chunk() {
        let chunk = parse_stream_line(r#"data: {"content":"Hel","stop":false}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            chunk,
            StreamChunk {
                content: "Hel".to_string(),
                stop: false
            }
        );

        // No space after the colon
        let chunk = parse_stream_line(r#"data:{"content":"lo","stop":true}"#)
            .unwrap()
            .unwrap();
        assert_eq!(chunk.content, "lo");
        assert!(chunk.stop);
    }

    #[test]
    fn test_parse_stream_line_keeps_chunk_whitespace() {
        let chunk = parse_stream_line(r#"data: {"content":" world ","stop":false}"#)
            .unwrap()
            .unwrap();
        assert_eq!(chunk.content, " world ");
    }

    #[test]
    fn test_parse_stream_line_skips_other_lines() {
        assert!(parse_stream_line("").unwrap().is_none());
        assert!(parse_stream_line(": keep-alive").unwrap().is_none());
        assert!(parse_stream_line("event: message").unwrap().is_none());
        assert!(parse_stream_line("data: [DONE]").unwrap().is_none());
    }

    #[test]
    fn test_parse_stream_line_error_event() {
        let err = parse_stream_line(
            r#"data: {"error":{"code":400,"message":"context size exceeded","type":"invalid_request_error"}}"#,
        )
        .unwrap_err();
        match err {
            ModelError::Http { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "context size exceeded");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_parse_stream_line_invalid_json() {
        assert!(matches!(
            parse_stream_line("data: {not json"),
            Err(ModelError::Protocol(_))
        ));
    }

    #[test]
    fn test_launch_with_missing_model_file() {
        let err = LlamaServer::launch(&config()).err().unwrap();
        assert!(matches!(err, ModelError::ModelFileMissing(_)));
    }

    #[test]
    fn test_launch_with_missing_binary() {
        let config = LlamaServerConfig {
            binary: "/nonexistent/llama-server".to_string(),
            model_path: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml")),
            ..config()
        };
        let err = LlamaServer::launch(&config).err().unwrap();
        assert!(matches!(err, ModelError::Launch(_)));
    }
}
