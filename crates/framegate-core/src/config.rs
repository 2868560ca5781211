use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{FramegateError, Result};

/// Top-level configuration for the Framegate pipeline.
///
/// Loaded from `~/.framegate/config.toml` by default. Each section
/// corresponds to one pipeline stage or cross-cutting concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FramegateConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub similarity: SimilarityConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub janitor: JanitorConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
}

impl FramegateConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FramegateConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| FramegateError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values that would make the pipeline misbehave silently.
    pub fn validate(&self) -> Result<()> {
        if self.queue.batch_size == 0 {
            return Err(FramegateError::Config(
                "queue.batch_size must be at least 1".to_string(),
            ));
        }
        if self.queue.trigger_threshold == 0 {
            return Err(FramegateError::Config(
                "queue.trigger_threshold must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity.threshold) {
            return Err(FramegateError::Config(format!(
                "similarity.threshold must be within 0.0..=1.0, got {}",
                self.similarity.threshold
            )));
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory holding the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// HTTP API port.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.framegate/data".to_string(),
            log_level: "info".to_string(),
            port: 3040,
        }
    }
}

/// Result cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Hours a cache entry stays live for lookups.
    pub expiry_hours: u32,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::hours(self.expiry_hours as i64)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { expiry_hours: 24 }
    }
}

/// Near-duplicate filter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Positional-match ratio above which a frame is dropped.
    pub threshold: f64,
    /// How far back completed frames count as recent.
    pub window_minutes: u32,
    /// Maximum number of recent hashes compared per submission.
    pub history_limit: u32,
}

impl SimilarityConfig {
    pub fn window(&self) -> Duration {
        Duration::minutes(self.window_minutes as i64)
    }
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: 0.95,
            window_minutes: 5,
            history_limit: 10,
        }
    }
}

/// Intake queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum frames drained into one batch.
    pub batch_size: u32,
    /// Pending count at which a submission triggers a batch.
    pub trigger_threshold: u32,
    /// Priority used when a submission does not carry one.
    pub default_priority: i64,
    /// Pending frames allowed per camera before new submissions are rejected.
    pub max_pending_per_camera: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            trigger_threshold: 5,
            default_priority: 1,
            max_pending_per_camera: 1000,
        }
    }
}

/// Batch coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Allow at most one batch in flight per camera.
    pub single_flight: bool,
    /// Upper bound on a single analyze call.
    pub analysis_timeout_secs: u64,
}

impl BatchConfig {
    pub fn analysis_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.analysis_timeout_secs)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            single_flight: true,
            analysis_timeout_secs: 60,
        }
    }
}

/// Periodic cleanup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JanitorConfig {
    /// Minutes between janitor runs in the binary.
    pub interval_minutes: u32,
    /// Minutes a completed frame is kept before deletion.
    pub completed_frame_retention_minutes: u32,
    /// Minutes after which a `processing` frame is considered stuck.
    pub processing_timeout_minutes: u32,
}

impl JanitorConfig {
    pub fn completed_frame_retention(&self) -> Duration {
        Duration::minutes(self.completed_frame_retention_minutes as i64)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::minutes(self.processing_timeout_minutes as i64)
    }
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 60,
            completed_frame_retention_minutes: 60,
            processing_timeout_minutes: 30,
        }
    }
}

/// Vision analyzer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Provider: "openrouter" or "mock".
    pub provider: String,
    /// Chat-completions endpoint.
    pub endpoint: String,
    /// Model identifier sent with each request.
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Lines of the reply containing any of these words count as issues.
    pub issue_keywords: Vec<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            provider: "openrouter".to_string(),
            endpoint: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            model: "nvidia/nemotron-nano-12b-v2-vl:free".to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            issue_keywords: [
                "safety", "error", "broken", "damaged", "incorrect", "missing", "leak", "loose",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}
