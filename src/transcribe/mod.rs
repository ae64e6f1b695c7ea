//! Request, result and collaborator types shared by the orchestrator and the adapters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::error::{ErrorKind, FailureCode, ProviderError};
use crate::providers::CapabilityKind;

/// Depth of processing the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Quick,
    Deep,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Quick => "quick",
            Tier::Deep => "deep",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooperative cancellation shared between a caller and the work it started.
///
/// Cloning yields a handle to the same signal. Cancellation is sticky.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Number of tasks currently waiting in `cancelled`
    pub fn waiters(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Resolves once `cancel` has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender lives as long as `self`; unreachable in practice.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// One user action asking for a transcript. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct AcquisitionRequest {
    /// URL as supplied by the caller
    pub raw_url: String,

    /// Normalized form used for dispatch and single-flight
    pub url: String,

    /// Stable identifier used by persistence
    pub video_id: String,

    pub tier: Tier,

    pub cancel: CancellationHandle,
}

/// A transcript as produced by one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub language: Option<String>,
}

impl Transcript {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: None,
        }
    }
}

/// How one provider fared during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAttempt {
    pub provider: String,
    pub capability: CapabilityKind,
    /// Number of attempts made against this provider
    pub attempts: u32,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed {
        kind: ErrorKind,
        code: Option<FailureCode>,
        detail: String,
    },
}

impl AttemptOutcome {
    pub fn failed(error: &ProviderError) -> Self {
        AttemptOutcome::Failed {
            kind: error.kind,
            code: error.code,
            detail: error.message.clone(),
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            AttemptOutcome::Succeeded => None,
            AttemptOutcome::Failed { kind, .. } => Some(*kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSuccess {
    pub text: String,
    pub language: String,
    pub provider: String,
    pub elapsed_ms: u64,
    pub attempts: Vec<ProviderAttempt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptFailure {
    pub kind: ErrorKind,
    pub detail: String,
    pub attempts: Vec<ProviderAttempt>,
}

impl TranscriptFailure {
    /// Sentence suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self.kind {
            ErrorKind::NoTranscript => {
                "This video has no captions or subtitles, so no transcript can be produced.".to_string()
            }
            ErrorKind::Validation => {
                "The link does not look like a supported video URL. Check it and try again.".to_string()
            }
            ErrorKind::Auth => "A transcription service rejected our credentials. Update the provider token.".to_string(),
            ErrorKind::InsufficientCredits => {
                "Not enough credits left for this transcription. Top up and retry.".to_string()
            }
            ErrorKind::ChallengeDetected => {
                "The transcript site asked for a human check. Try again later.".to_string()
            }
            ErrorKind::Timeout => "Transcription took too long and was abandoned. Try again later.".to_string(),
            ErrorKind::NoProvidersAvailable => {
                "No transcription provider is configured and enabled for this tier.".to_string()
            }
            ErrorKind::Cancelled => "Transcription was cancelled.".to_string(),
            ErrorKind::AllProvidersFailed => {
                let tried: Vec<String> = self
                    .attempts
                    .iter()
                    .filter_map(|a| a.outcome.kind().map(|k| format!("{} ({})", a.provider, k)))
                    .collect();
                format!("Every transcription provider failed: {}.", tried.join(", "))
            }
            ErrorKind::Transport | ErrorKind::Server | ErrorKind::RateLimited | ErrorKind::Unknown => {
                "The transcription service is having trouble right now. Try again in a few minutes.".to_string()
            }
        }
    }
}

/// The orchestrator's sole output for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TranscriptResult {
    Success(TranscriptSuccess),
    Failure(TranscriptFailure),
}

impl TranscriptResult {
    pub fn failure(kind: ErrorKind, detail: impl Into<String>, attempts: Vec<ProviderAttempt>) -> Self {
        TranscriptResult::Failure(TranscriptFailure {
            kind,
            detail: detail.into(),
            attempts,
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TranscriptResult::Success(_))
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            TranscriptResult::Success(_) => None,
            TranscriptResult::Failure(f) => Some(f.kind),
        }
    }

    pub fn attempts(&self) -> &[ProviderAttempt] {
        match self {
            TranscriptResult::Success(s) => &s.attempts,
            TranscriptResult::Failure(f) => &f.attempts,
        }
    }
}

/// Progress notifications for a UI. Fire-and-forget.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    ProviderStarted { provider: String, attempt: u32 },
    RetryScheduled { provider: String, attempt: u32, delay_ms: u64 },
    ProviderFailed { provider: String, kind: ErrorKind },
    Queued { provider: String, queue_position: Option<u32>, eta_seconds: Option<u32> },
    Phase { provider: String, phase: String },
    StillWaiting { provider: String, inflight: u32 },
    Joined { url: String },
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

impl ProgressSink for mpsc::UnboundedSender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        // Receiver gone means nobody is watching; progress is best effort.
        let _ = self.send(event);
    }
}

/// Everything an adapter needs for one attempt.
#[derive(Clone)]
pub struct AttemptContext {
    pub request: Arc<AcquisitionRequest>,
    pub provider_id: String,
    pub credential: Option<String>,
    pub attempt: u32,
    pub progress: Arc<dyn ProgressSink>,
}

impl AttemptContext {
    pub fn cancel(&self) -> &CancellationHandle {
        &self.request.cancel
    }

    pub fn emit(&self, event: ProgressEvent) {
        self.progress.emit(event);
    }
}

/// One transcription backend, as seen by the orchestrator.
#[async_trait]
pub trait TranscriptProvider: Send + Sync {
    fn capability(&self) -> CapabilityKind;

    /// Run a single attempt. Retrying is the caller's business.
    async fn attempt(&self, ctx: &AttemptContext) -> Result<Transcript, ProviderError>;
}

/// Persistence collaborator. Called once per terminal outcome, never mid-retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn save_transcript(&self, video_id: &str, text: &str, language: &str) -> anyhow::Result<()>;

    async fn mark_url_valid(&self, video_id: &str) -> anyhow::Result<()>;

    async fn mark_url_invalid(&self, video_id: &str, reason: &str) -> anyhow::Result<()>;
}

/// Sink that only records outcomes in the log.
pub struct LogSink;

#[async_trait]
impl TranscriptSink for LogSink {
    async fn save_transcript(&self, video_id: &str, text: &str, language: &str) -> anyhow::Result<()> {
        tracing::info!(video_id, language, chars = text.len(), "transcript_saved");
        Ok(())
    }

    async fn mark_url_valid(&self, video_id: &str) -> anyhow::Result<()> {
        tracing::debug!(video_id, "url_valid");
        Ok(())
    }

    async fn mark_url_invalid(&self, video_id: &str, reason: &str) -> anyhow::Result<()> {
        tracing::info!(video_id, reason, "url_invalid");
        Ok(())
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancellation_handle_is_shared_and_sticky() {
        let handle = CancellationHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_cancelled());

        let waiter = tokio::spawn(async move { clone.cancelled().await });
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();

        assert!(handle.is_cancelled());
        // Already cancelled resolves immediately
        handle.cancelled().await;
    }

    #[test]
    fn test_all_failed_message_lists_providers() {
        let failure = TranscriptFailure {
            kind: ErrorKind::AllProvidersFailed,
            detail: String::new(),
            attempts: vec![ProviderAttempt {
                provider: "p1".into(),
                capability: CapabilityKind::Api,
                attempts: 1,
                outcome: AttemptOutcome::Failed {
                    kind: ErrorKind::Auth,
                    code: None,
                    detail: "HTTP 401".into(),
                },
            }],
        };
        assert_eq!(failure.user_message(), "Every transcription provider failed: p1 (AUTH).");
    }

    #[test]
    fn test_result_serializes_kind_in_screaming_case() {
        let result = TranscriptResult::failure(ErrorKind::NoTranscript, "Subtitles Not Available", vec![]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["result"], "failure");
        assert_eq!(json["kind"], "NO_TRANSCRIPT");
    }
}
