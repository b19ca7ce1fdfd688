//! Local text generation
//!
//! `TextModel` is the seam to the model runtime, `InferenceEngine` owns the
//! loaded model and runs it on a bounded pool of blocking workers.

mod engine;
mod llama;
mod model;
mod prompt;

pub use engine::{EngineError, GenerationStream, InferenceEngine};
pub use llama::{LlamaServer, LlamaServerConfig};
pub use model::{
    Completion, ModelError, SamplingDefaults, SamplingParams, TextModel, DEFAULT_STOP_SEQUENCE,
};
pub use prompt::{format_chat_prompt, END_OF_TURN, START_OF_TURN};
