//! Analysis capability seam.
//!
//! The coordinator only sees [`VisionAnalyzer`]. The HTTP-backed
//! implementation lives in `openrouter`; [`MockAnalyzer`] is deterministic
//! and backs tests and the `mock` provider.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use framegate_core::config::AnalyzerConfig;
use framegate_core::error::FramegateError;
use framegate_core::types::{AnalysisOutput, CameraId};

/// Errors from the analysis capability.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// Per-frame failure. The frame is marked failed and the batch goes on.
    #[error("Analysis failed: {0}")]
    Transient(String),
    #[error("Analysis timed out after {0} seconds")]
    Timeout(u64),
    /// Missing credentials or similar. Fatal to the triggering call.
    #[error("Analyzer not configured: {0}")]
    Config(String),
}

impl From<AnalysisError> for FramegateError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::Config(msg) => FramegateError::Config(msg),
            other => FramegateError::Analysis(other.to_string()),
        }
    }
}

/// Turns a frame payload into analysis text plus detected issues.
#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Check that the analyzer can run at all. Called before a batch drains
    /// anything, so a failure here leaves no partial state.
    fn ensure_ready(&self) -> Result<(), AnalysisError>;

    async fn analyze(
        &self,
        camera_id: &CameraId,
        payload: &[u8],
    ) -> Result<AnalysisOutput, AnalysisError>;
}

/// Every lowercased, trimmed line of `text` that mentions a keyword.
pub fn extract_issues<S: AsRef<str>>(text: &str, keywords: &[S]) -> Vec<String> {
    text.to_lowercase()
        .lines()
        .filter(|line| keywords.iter().any(|k| line.contains(k.as_ref())))
        .map(|line| line.trim().to_string())
        .collect()
}

/// Deterministic analyzer with scripted failures.
pub struct MockAnalyzer {
    reply: String,
    keywords: Vec<String>,
    failing_payloads: Mutex<HashSet<Vec<u8>>>,
    delay: Option<Duration>,
    ready: bool,
    calls: AtomicUsize,
}

impl MockAnalyzer {
    pub fn new() -> Self {
        Self {
            reply: "Scene nominal. No findings.".to_string(),
            keywords: AnalyzerConfig::default().issue_keywords,
            failing_payloads: Mutex::new(HashSet::new()),
            delay: None,
            ready: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// Reply with `text` for every payload.
    pub fn with_reply(mut self, text: impl Into<String>) -> Self {
        self.reply = text.into();
        self
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail `ensure_ready` as if credentials were missing.
    pub fn unconfigured(mut self) -> Self {
        self.ready = false;
        self
    }

    /// Make every analyze call for exactly these bytes fail transiently.
    pub fn fail_on(&self, payload: &[u8]) {
        self.failing_payloads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(payload.to_vec());
    }

    /// Number of analyze calls made so far, failures included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VisionAnalyzer for MockAnalyzer {
    fn name(&self) -> &str {
        "mock"
    }

    fn ensure_ready(&self) -> Result<(), AnalysisError> {
        if self.ready {
            Ok(())
        } else {
            Err(AnalysisError::Config("mock analyzer has no credentials".to_string()))
        }
    }

    async fn analyze(
        &self,
        camera_id: &CameraId,
        payload: &[u8],
    ) -> Result<AnalysisOutput, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let fails = self
            .failing_payloads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(payload);
        if fails {
            return Err(AnalysisError::Transient(format!(
                "scripted failure for camera {}",
                camera_id
            )));
        }

        Ok(AnalysisOutput {
            detected_issues: extract_issues(&self.reply, &self.keywords),
            analysis_text: self.reply.clone(),
        })
    }
}
