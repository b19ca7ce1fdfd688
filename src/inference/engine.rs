//! Inference engine: model lifecycle, bounded worker pool, streaming bridge

use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::Stream;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::model::{Completion, ModelError, SamplingParams, TextModel};

/// Chunks buffered between a generation worker and its consumer
const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Errors returned by the engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// No model is installed
    #[error("{0}")]
    NotReady(String),

    /// The backend failed
    #[error(transparent)]
    Model(#[from] ModelError),

    /// A worker panicked or vanished
    #[error("Generation worker failed: {0}")]
    Worker(String),
}

/// Ordered text chunks of one streaming generation
pub type GenerationStream = Pin<Box<dyn Stream<Item = Result<String, EngineError>> + Send>>;

/// Messages sent from a generation worker to the request that owns it
enum StreamMessage {
    Chunk(String),
    Done,
    Failed(ModelError),
}

/// Owns the loaded model and runs generations on a bounded pool of
/// blocking workers
pub struct InferenceEngine {
    model: RwLock<Option<Arc<dyn TextModel>>>,
    workers: Arc<Semaphore>,
    pool_size: usize,
}

impl InferenceEngine {
    /// Create an engine without a model and `pool_size` workers
    pub fn new(pool_size: usize) -> Self {
        Self {
            model: RwLock::new(None),
            workers: Arc::new(Semaphore::new(pool_size)),
            pool_size,
        }
    }

    /// Create an engine with `model` already installed
    pub fn with_model(model: Arc<dyn TextModel>, pool_size: usize) -> Self {
        let engine = Self::new(pool_size);
        engine.install(model);
        engine
    }

    /// Install the loaded model
    ///
    /// A model installed after `shutdown` is shut down right away.
    pub fn install(&self, model: Arc<dyn TextModel>) {
        if self.workers.is_closed() {
            warn!("Engine already shut down, releasing the loaded model");
            model.shutdown();
            return;
        }
        let mut slot = self.model.write();
        if slot.is_some() {
            warn!("Replacing an already loaded model");
        }
        *slot = Some(model);
    }

    pub fn is_loaded(&self) -> bool {
        self.model.read().is_some()
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Unload the model and stop accepting work
    ///
    /// Generations already running keep their handle and finish normally.
    pub fn shutdown(&self) {
        info!("Shutting down inference engine");
        self.workers.close();
        let model = self.model.write().take();
        if let Some(model) = model {
            model.shutdown();
        }
    }

    fn current_model(&self) -> Result<Arc<dyn TextModel>, EngineError> {
        self.model
            .read()
            .clone()
            .ok_or_else(|| EngineError::NotReady("Model not loaded".to_string()))
    }

    async fn acquire_worker(&self) -> Result<OwnedSemaphorePermit, EngineError> {
        self.workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::NotReady("Inference engine is shut down".to_string()))
    }

    /// Run one blocking generation on the worker pool
    pub async fn generate(
        &self,
        prompt: String,
        params: SamplingParams,
    ) -> Result<Completion, EngineError> {
        let model = self.current_model()?;
        let permit = self.acquire_worker().await?;
        debug!(prompt_chars = prompt.len(), "Starting generation");

        let completion = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            model.complete(&prompt, &params)
        })
        .await
        .map_err(|e| EngineError::Worker(e.to_string()))??;

        Ok(completion)
    }

    /// Start a streaming generation on the worker pool
    ///
    /// Waits for a free worker, then returns a stream yielding chunks in
    /// production order. A backend failure ends the stream with one error.
    /// Dropping the stream makes the worker stop at its next chunk.
    pub async fn generate_stream(
        &self,
        prompt: String,
        params: SamplingParams,
    ) -> Result<GenerationStream, EngineError> {
        let model = self.current_model()?;
        let permit = self.acquire_worker().await?;
        debug!(prompt_chars = prompt.len(), "Starting streaming generation");

        let (tx, mut rx) = mpsc::channel::<StreamMessage>(STREAM_CHANNEL_CAPACITY);

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let mut on_chunk = |text: &str| {
                if tx.blocking_send(StreamMessage::Chunk(text.to_string())).is_err() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            };

            let last = match model.complete_streaming(&prompt, &params, &mut on_chunk) {
                Ok(()) => StreamMessage::Done,
                Err(err) => StreamMessage::Failed(err),
            };
            if tx.blocking_send(last).is_err() {
                debug!("Stream consumer went away before generation finished");
            }
        });

        let stream = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Some(StreamMessage::Chunk(text)) => yield Ok(text),
                    Some(StreamMessage::Done) => break,
                    Some(StreamMessage::Failed(err)) => {
                        yield Err(EngineError::Model(err));
                        break;
                    }
                    None => {
                        yield Err(EngineError::Worker(
                            "worker exited without finishing the stream".to_string(),
                        ));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
