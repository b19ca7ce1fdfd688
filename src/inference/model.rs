//! Backend trait for the wrapped model runtime

use std::ops::ControlFlow;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::GenerationConfig;

/// Stop marker closing a Gemma turn, used when a request gives no stop list
pub const DEFAULT_STOP_SEQUENCE: &str = "<end_of_turn>";

/// Process-wide sampling values applied when a request leaves a field unset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingDefaults {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_k: u32,
    pub top_p: f32,
}

/// Fully resolved sampling parameters for one generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_k: u32,
    pub top_p: f32,
    pub stop: Vec<String>,
}

impl SamplingParams {
    /// Merge request overrides over the process defaults
    pub fn resolve(config: Option<&GenerationConfig>, defaults: &SamplingDefaults) -> Self {
        let config = config.cloned().unwrap_or_default();
        let stop = match config.stop_sequences {
            Some(stop) if !stop.is_empty() => stop,
            _ => vec![DEFAULT_STOP_SEQUENCE.to_string()],
        };

        Self {
            temperature: config.temperature.unwrap_or(defaults.temperature),
            max_tokens: config.max_output_tokens.unwrap_or(defaults.max_tokens),
            top_k: config.top_k.unwrap_or(defaults.top_k),
            top_p: config.top_p.unwrap_or(defaults.top_p),
            stop,
        }
    }
}

/// Result of a non-streaming generation
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Completion {
    pub fn new(text: impl Into<String>, prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            text: text.into(),
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Errors raised by a model backend
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model file not found: {}", .0.display())]
    ModelFileMissing(PathBuf),

    #[error("Failed to launch model runtime: {0}")]
    Launch(String),

    #[error("Model runtime did not become ready: {0}")]
    Startup(String),

    #[error("Model runtime returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Model runtime request failed: {0}")]
    Request(String),

    #[error("Malformed model runtime response: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => ModelError::Http {
                status: status.as_u16(),
                body: err.to_string(),
            },
            None => ModelError::Request(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Protocol(err.to_string())
    }
}

/// A loaded language model
///
/// Both calls block the current thread until generation finishes, so the
/// engine only ever invokes them from its worker pool.
pub trait TextModel: Send + Sync {
    /// Generate the full completion for `prompt`
    fn complete(&self, prompt: &str, params: &SamplingParams) -> Result<Completion, ModelError>;

    /// Generate `prompt`'s completion, handing each text chunk to `on_chunk`
    /// in production order
    ///
    /// Returning `ControlFlow::Break` from the callback stops generation early;
    /// that is not an error. Output that ends before the model signals
    /// completion is.
    fn complete_streaming(
        &self,
        prompt: &str,
        params: &SamplingParams,
        on_chunk: &mut dyn FnMut(&str) -> ControlFlow<()>,
    ) -> Result<(), ModelError>;

    /// Release runtime resources; called once when the engine shuts down
    fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> SamplingDefaults {
        SamplingDefaults {
            temperature: 0.3,
            max_tokens: 8192,
            top_k: 40,
            top_p: 0.95,
        }
    }

    #[test]
    fn test_resolve_without_config_uses_defaults() {
        let params = SamplingParams::resolve(None, &defaults());
        assert_eq!(params.temperature, 0.3);
        assert_eq!(params.max_tokens, 8192);
        assert_eq!(params.top_k, 40);
        assert_eq!(params.top_p, 0.95);
        assert_eq!(params.stop, vec!["<end_of_turn>".to_string()]);
    }

    #[test]
    fn test_resolve_overrides_individual_fields() {
        let config = GenerationConfig {
            temperature: Some(0.0),
            max_output_tokens: Some(16),
            ..Default::default()
        };
        let params = SamplingParams::resolve(Some(&config), &defaults());
        assert_eq!(params.temperature, 0.0);
        assert_eq!(params.max_tokens, 16);
        assert_eq!(params.top_k, 40);
        assert_eq!(params.top_p, 0.95);
    }

    #[test]
    fn test_resolve_stop_sequences() {
        let config = GenerationConfig {
            stop_sequences: Some(vec!["###".to_string()]),
            ..Default::default()
        };
        let params = SamplingParams::resolve(Some(&config), &defaults());
        assert_eq!(params.stop, vec!["###".to_string()]);

        let config = GenerationConfig {
            stop_sequences: Some(vec![]),
            ..Default::default()
        };
        let params = SamplingParams::resolve(Some(&config), &defaults());
        assert_eq!(params.stop, vec![DEFAULT_STOP_SEQUENCE.to_string()]);
    }

    #[test]
    fn test_completion_total() {
        let completion = Completion::new("hi", 12, 3);
        assert_eq!(completion.total_tokens, 15);
    }

    #[test]
    fn test_model_error_display() {
        let err = ModelError::Http {
            status: 500,
            body: "boom".to_string(),
        };
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("boom"));

        let err = ModelError::ModelFileMissing(PathBuf::from("/models/missing.gguf"));
        assert!(err.to_string().contains("/models/missing.gguf"));
    }
}
