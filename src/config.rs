//! Process-wide settings
//!
//! Every field is read from a command-line flag or, when the flag is absent,
//! from the upper snake case environment variable of the same name
//! (`--api-port` / `API_PORT`). `main` loads a `.env` file first when one is
//! present.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::Parser;
use thiserror::Error;

use crate::inference::{LlamaServerConfig, SamplingDefaults};

const DEFAULT_API_HOST: &str = "0.0.0.0";
const DEFAULT_API_PORT: u16 = 8000;
const DEFAULT_MODEL_PATH: &str = "/app/models/mamay-gemma-3-12b-q5_k_m.gguf";
const DEFAULT_MODEL_NAME: &str = "mamay-gemma-3-12b";
const DEFAULT_CONTEXT_SIZE: u32 = 128_000;
const DEFAULT_THREADS: u32 = 16;
const DEFAULT_BATCH_SIZE: u32 = 512;
const DEFAULT_TEMPERATURE: f32 = 0.3;
const DEFAULT_MAX_TOKENS: u32 = 8192;
const DEFAULT_TOP_K: u32 = 40;
const DEFAULT_TOP_P: f32 = 0.95;
const DEFAULT_EMBEDDINGS_MODEL: &str =
    "sentence-transformers/paraphrase-multilingual-mpnet-base-v2";
const DEFAULT_EMBEDDINGS_DIMENSIONS: usize = 768;
const DEFAULT_EMBEDDINGS_HOST: &str = "embeddings-service";
const DEFAULT_EMBEDDINGS_PORT: u16 = 8001;
const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 4;
const DEFAULT_REQUEST_TIMEOUT: u64 = 300;
const DEFAULT_LOG_LEVEL: &str = "INFO";
const DEFAULT_LLAMA_SERVER_BIN: &str = "llama-server";
const DEFAULT_LLAMA_SERVER_PORT: u16 = 8080;
const DEFAULT_MODEL_LOAD_TIMEOUT: u64 = 600;

/// Errors raised while loading settings
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A flag or variable cannot be parsed
    #[error(transparent)]
    Parse(#[from] clap::Error),

    /// A value parses but cannot be used
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    /// The API host/port pair does not resolve to a socket address
    #[error("Cannot resolve bind address {0}")]
    BindAddress(String),
}

/// Gateway settings
#[derive(Debug, Clone, Parser)]
#[command(name = "gemma-gateway")]
#[command(about = "Gemini-compatible API gateway for a local llama.cpp model", long_about = None)]
#[command(version)]
pub struct Settings {
    #[arg(long, env = "API_HOST", default_value = DEFAULT_API_HOST)]
    pub api_host: String,

    #[arg(long, env = "API_PORT", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// GGUF model file handed to the runtime
    #[arg(long, env = "MODEL_PATH", default_value = DEFAULT_MODEL_PATH)]
    pub model_path: PathBuf,

    /// Name the model is published under in `/v1/models`
    #[arg(long, env = "MODEL_NAME", default_value = DEFAULT_MODEL_NAME)]
    pub model_name: String,

    #[arg(long, env = "MODEL_CONTEXT_SIZE", default_value_t = DEFAULT_CONTEXT_SIZE)]
    pub model_context_size: u32,

    #[arg(long, env = "MODEL_THREADS", default_value_t = DEFAULT_THREADS)]
    pub model_threads: u32,

    #[arg(long, env = "MODEL_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub model_batch_size: u32,

    /// Layers offloaded to the GPU; 0 means CPU only
    #[arg(long, env = "MODEL_GPU_LAYERS", default_value_t = 0)]
    pub model_gpu_layers: u32,

    #[arg(long, env = "DEFAULT_TEMPERATURE", default_value_t = DEFAULT_TEMPERATURE)]
    pub default_temperature: f32,

    #[arg(long, env = "DEFAULT_MAX_TOKENS", default_value_t = DEFAULT_MAX_TOKENS)]
    pub default_max_tokens: u32,

    #[arg(long, env = "DEFAULT_TOP_K", default_value_t = DEFAULT_TOP_K)]
    pub default_top_k: u32,

    #[arg(long, env = "DEFAULT_TOP_P", default_value_t = DEFAULT_TOP_P)]
    pub default_top_p: f32,

    #[arg(long, env = "EMBEDDINGS_MODEL", default_value = DEFAULT_EMBEDDINGS_MODEL)]
    pub embeddings_model: String,

    #[arg(long, env = "EMBEDDINGS_DIMENSIONS", default_value_t = DEFAULT_EMBEDDINGS_DIMENSIONS)]
    pub embeddings_dimensions: usize,

    #[arg(long, env = "EMBEDDINGS_HOST", default_value = DEFAULT_EMBEDDINGS_HOST)]
    pub embeddings_host: String,

    #[arg(long, env = "EMBEDDINGS_PORT", default_value_t = DEFAULT_EMBEDDINGS_PORT)]
    pub embeddings_port: u16,

    /// Size of the generation worker pool
    #[arg(
        long,
        env = "MAX_CONCURRENT_REQUESTS",
        default_value_t = DEFAULT_MAX_CONCURRENT_REQUESTS
    )]
    pub max_concurrent_requests: usize,

    /// Upper bound for one call into the model runtime, in seconds
    #[arg(long, env = "REQUEST_TIMEOUT", default_value_t = DEFAULT_REQUEST_TIMEOUT)]
    pub request_timeout: u64,

    /// Serve `/metrics` and record request metrics
    #[arg(
        long,
        env = "ENABLE_METRICS",
        default_value_t = true,
        action = clap::ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub enable_metrics: bool,

    #[arg(long, env = "LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    /// `llama-server` executable
    #[arg(long, env = "LLAMA_SERVER_BIN", default_value = DEFAULT_LLAMA_SERVER_BIN)]
    pub llama_server_bin: String,

    /// Loopback port the runtime listens on
    #[arg(long, env = "LLAMA_SERVER_PORT", default_value_t = DEFAULT_LLAMA_SERVER_PORT)]
    pub llama_server_port: u16,

    /// How long to wait for the runtime to finish loading, in seconds
    #[arg(long, env = "MODEL_LOAD_TIMEOUT", default_value_t = DEFAULT_MODEL_LOAD_TIMEOUT)]
    pub model_load_timeout: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_host: DEFAULT_API_HOST.to_string(),
            api_port: DEFAULT_API_PORT,
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            model_context_size: DEFAULT_CONTEXT_SIZE,
            model_threads: DEFAULT_THREADS,
            model_batch_size: DEFAULT_BATCH_SIZE,
            model_gpu_layers: 0,
            default_temperature: DEFAULT_TEMPERATURE,
            default_max_tokens: DEFAULT_MAX_TOKENS,
            default_top_k: DEFAULT_TOP_K,
            default_top_p: DEFAULT_TOP_P,
            embeddings_model: DEFAULT_EMBEDDINGS_MODEL.to_string(),
            embeddings_dimensions: DEFAULT_EMBEDDINGS_DIMENSIONS,
            embeddings_host: DEFAULT_EMBEDDINGS_HOST.to_string(),
            embeddings_port: DEFAULT_EMBEDDINGS_PORT,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            enable_metrics: true,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            llama_server_bin: DEFAULT_LLAMA_SERVER_BIN.to_string(),
            llama_server_port: DEFAULT_LLAMA_SERVER_PORT,
            model_load_timeout: DEFAULT_MODEL_LOAD_TIMEOUT,
        }
    }
}

impl Settings {
    /// Load settings from the command line and the process environment
    ///
    /// Prints usage and exits on `--help`, `--version` or a malformed value.
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Settings::parse();
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from an explicit argument list
    ///
    /// The first item is the program name. Flags missing from `args` still
    /// fall back to the environment.
    pub fn try_load_from<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let settings = Settings::try_parse_from(args)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that parse but cannot be served
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_requests == 0 {
            return Err(invalid(
                "MAX_CONCURRENT_REQUESTS",
                "0",
                "at least one worker is required",
            ));
        }
        if self.embeddings_dimensions == 0 {
            return Err(invalid("EMBEDDINGS_DIMENSIONS", "0", "must be positive"));
        }
        self.log_filter()?;
        Ok(())
    }

    /// `tracing` filter directive for the configured log level
    pub fn log_filter(&self) -> Result<&'static str, ConfigError> {
        match self.log_level.to_ascii_lowercase().as_str() {
            "trace" => Ok("trace"),
            "debug" => Ok("debug"),
            "info" => Ok("info"),
            "warn" | "warning" => Ok("warn"),
            "error" | "critical" => Ok("error"),
            _ => Err(invalid("LOG_LEVEL", &self.log_level, "unknown log level")),
        }
    }

    /// Socket address the HTTP server binds to
    pub fn bind_address(&self) -> Result<SocketAddr, ConfigError> {
        let display = format!("{}:{}", self.api_host, self.api_port);
        (self.api_host.as_str(), self.api_port)
            .to_socket_addrs()
            .map_err(|_| ConfigError::BindAddress(display.clone()))?
            .next()
            .ok_or(ConfigError::BindAddress(display))
    }

    /// URL of the embeddings process' `/embed` endpoint
    pub fn embeddings_endpoint(&self) -> String {
        format!("http://{}:{}/embed", self.embeddings_host, self.embeddings_port)
    }

    /// Whether any model layers run on the GPU
    pub fn uses_gpu(&self) -> bool {
        self.model_gpu_layers > 0
    }

    /// Sampling values used when a request leaves a field unset
    pub fn sampling_defaults(&self) -> SamplingDefaults {
        SamplingDefaults {
            temperature: self.default_temperature,
            max_tokens: self.default_max_tokens,
            top_k: self.default_top_k,
            top_p: self.default_top_p,
        }
    }

    /// Launch parameters for the `llama-server` runtime
    pub fn llama_server_config(&self) -> LlamaServerConfig {
        LlamaServerConfig {
            binary: self.llama_server_bin.clone(),
            model_path: self.model_path.clone(),
            context_size: self.model_context_size,
            threads: self.model_threads,
            batch_size: self.model_batch_size,
            gpu_layers: self.model_gpu_layers,
            port: self.llama_server_port,
            request_timeout: Duration::from_secs(self.request_timeout),
            load_timeout: Duration::from_secs(self.model_load_timeout),
        }
    }
}

fn invalid(key: &str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}
