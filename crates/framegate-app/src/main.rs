//! Framegate application binary - composition root.
//!
//! 1. Parse CLI flags and load configuration from TOML
//! 2. Open the SQLite database
//! 3. Build the analyzer and frame processor
//! 4. Start the janitor loop
//! 5. Start the axum REST API server

mod cli;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use framegate_api::state::AppState;
use framegate_core::clock::SystemClock;
use framegate_core::config::FramegateConfig;
use framegate_pipeline::{FrameProcessor, MockAnalyzer, OpenRouterAnalyzer, VisionAnalyzer};
use framegate_storage::Database;

use cli::CliArgs;

/// Periodically purge expired data and fail frames stuck in processing.
async fn janitor_loop(processor: Arc<FrameProcessor>, interval_minutes: u32) {
    let period = Duration::from_secs(u64::from(interval_minutes.max(1)) * 60);
    tracing::info!(interval_minutes, "Janitor loop started");

    let mut interval = tokio::time::interval(period);
    // The first tick fires immediately; skip it so startup stays quiet.
    interval.tick().await;

    loop {
        interval.tick().await;

        if let Err(e) = processor.cleanup_old_data() {
            tracing::warn!(error = %e, "Cleanup failed");
        }
        match processor.reap_stuck_frames() {
            Ok(result) if result.reaped_frames > 0 => {
                tracing::warn!(
                    reaped_frames = result.reaped_frames,
                    closed_batches = result.closed_batches,
                    "Reaped stuck frames"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Reaper failed"),
        }
    }
}

fn build_analyzer(config: &FramegateConfig) -> Result<Arc<dyn VisionAnalyzer>, Box<dyn std::error::Error>> {
    match config.analyzer.provider.as_str() {
        "mock" => {
            tracing::warn!("Using mock analyzer; frames will not be sent to a vision model");
            Ok(Arc::new(
                MockAnalyzer::new().with_keywords(config.analyzer.issue_keywords.clone()),
            ))
        }
        "openrouter" => {
            let analyzer =
                OpenRouterAnalyzer::new(&config.analyzer, config.batch.analysis_timeout())?;
            if let Err(e) = analyzer.ensure_ready() {
                tracing::warn!(error = %e, "Analyzer not ready; batches will be refused until it is configured");
            }
            Ok(Arc::new(analyzer))
        }
        other => Err(format!("Unknown analyzer provider: {}", other).into()),
    }
}

/// Expand ~ to home directory in a path string.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&data_dir[2..])
    } else {
        PathBuf::from(data_dir)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = FramegateConfig::load_or_default(&config_file);
    config.general.port = args.resolve_port(config.general.port);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }

    // Tracing. RUST_LOG wins over the configured level.
    let default_level = config.general.log_level.clone();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    tracing::info!("Starting Framegate v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");
    config.validate()?;

    // Storage.
    let data_dir = resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let db_path = data_dir.join("framegate.db");
    let db = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    // Pipeline.
    let analyzer = build_analyzer(&config)?;
    tracing::info!(analyzer = analyzer.name(), "Vision analyzer ready");
    let processor = Arc::new(FrameProcessor::new(
        db,
        &config,
        analyzer,
        Arc::new(SystemClock),
    ));

    // === Background tasks ===

    let janitor_processor = Arc::clone(&processor);
    let janitor_interval = config.janitor.interval_minutes;
    tokio::spawn(async move {
        janitor_loop(janitor_processor, janitor_interval).await;
    });

    // === API server ===

    let port = config.general.port;
    let state = AppState::new(config, processor);
    if let Err(e) = framegate_api::start_server(state).await {
        tracing::error!(port, error = %e, "API server stopped");
        tracing::error!("Try: framegate --port {}", port.saturating_add(1));
        return Err(e.into());
    }

    Ok(())
}
