//! Shared state injected into every handler

use std::sync::Arc;

use crate::config::Settings;
use crate::embeddings::EmbeddingsClient;
use crate::inference::InferenceEngine;
use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub engine: Arc<InferenceEngine>,
    pub embeddings: Arc<EmbeddingsClient>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        engine: Arc<InferenceEngine>,
        embeddings: EmbeddingsClient,
        metrics: Metrics,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            engine,
            embeddings: Arc::new(embeddings),
            metrics: Arc::new(metrics),
        }
    }
}
