//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use framegate_core::config::FramegateConfig;
use framegate_pipeline::FrameProcessor;

/// Shared application state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<FramegateConfig>,
    pub processor: Arc<FrameProcessor>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// The processor is shared so background tasks can drive it too.
    pub fn new(config: FramegateConfig, processor: Arc<FrameProcessor>) -> Self {
        Self {
            config: Arc::new(config),
            processor,
            start_time: Instant::now(),
        }
    }
}
