// Handlers module

pub mod embed;
pub mod generate;
pub mod metrics;
pub mod models;
pub mod rejection;
pub mod stream;

pub use embed::embed_content_handler;
pub use generate::generate_content_handler;
pub use metrics::metrics_handler;
pub use models::{health_handler, list_models_handler, root_handler};
pub use rejection::handle_rejection;
pub use stream::stream_content_handler;

use tracing::{error, warn};

use crate::error::GatewayError;

/// Server-side failures are errors, caller mistakes and unavailability are warnings
fn log_failure(operation: &str, err: &GatewayError) {
    if err.status_code().is_server_error() && !matches!(err, GatewayError::NotReady(_)) {
        error!("{} error: {}", operation, err);
    } else {
        warn!("{} rejected: {}", operation, err);
    }
}
