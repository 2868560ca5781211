//! Framegate Pipeline crate - dedup, queueing and batch analysis.
//!
//! Wires the storage repositories into the submit path and the batch
//! coordinator, and defines the analyzer seam with its OpenRouter and
//! mock implementations.

pub mod analyzer;
pub mod coordinator;
pub mod guard;
pub mod openrouter;
pub mod processor;
pub mod similarity;

pub use analyzer::{extract_issues, AnalysisError, MockAnalyzer, VisionAnalyzer};
pub use coordinator::{BatchCoordinator, BatchOutcome, BatchPhase, BatchSummary};
pub use guard::CameraGuards;
pub use openrouter::OpenRouterAnalyzer;
pub use processor::{FrameProcessor, SubmitOutcome};
pub use similarity::{positional_match_ratio, SimilarityFilter};
