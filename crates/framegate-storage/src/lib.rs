//! Framegate Storage crate - SQLite persistence for the intake pipeline.
//!
//! Provides a WAL-mode SQLite database with migrations, repositories for
//! the analysis cache, frame queue, batches and analyses, a read-only
//! stats reporter, and the janitor that expires old rows.

pub mod analyses;
pub mod batches;
pub mod cache;
pub mod db;
pub mod janitor;
pub mod migrations;
pub mod queue;
pub mod stats;

pub use analyses::AnalysisRepository;
pub use batches::BatchRepository;
pub use cache::CacheRepository;
pub use db::Database;
pub use janitor::{CleanupResult, Janitor, ReapResult};
pub use queue::FrameQueueRepository;
pub use stats::{BatchStats, CacheStats, PipelineStats, QueueStats, StatsReporter};
