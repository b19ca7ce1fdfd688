// HTTP server modules
pub mod handlers;
pub mod models;
pub mod routes;
pub mod sse;
pub mod state;

// Ambient concerns
pub mod config;
pub mod error;
pub mod metrics;

// Inference and embedding backends
pub mod embeddings;
pub mod inference;

// Typed client for the gateway's own API
pub mod client;
