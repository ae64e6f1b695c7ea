//! Adapter for providers that expose a submit/poll HTTP API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod http;

pub use http::HttpApiClient;

use crate::error::{ErrorKind, FailureCode, ProviderError};
use crate::providers::CapabilityKind;
use crate::retry::{Classification, RetryPolicy};
use crate::transcribe::{AttemptContext, ProgressEvent, Tier, Transcript, TranscriptProvider};

/// Where an API provider lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEndpoint {
    pub base_url: String,

    #[serde(default = "default_submit_path")]
    pub submit_path: String,

    /// `{job_id}` is substituted with the URL-encoded job id
    #[serde(default = "default_status_path")]
    pub status_path: String,

    /// Probed before submitting when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_path: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_submit_path() -> String {
    "/ttt/transcribe".to_string()
}

fn default_status_path() -> String {
    "/ttt/status/{job_id}".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl ApiEndpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            submit_path: default_submit_path(),
            status_path: default_status_path(),
            health_path: None,
            timeout_secs: default_request_timeout(),
        }
    }
}

/// Status polling cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
    pub max_polls: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            max_polls: 90,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// What gets submitted for one attempt
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub url: String,
    pub tier: Tier,
    pub credential: Option<String>,
}

/// Backend-assigned job reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: String,
    pub queue_position: Option<u32>,
    pub eta_seconds: Option<u32>,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            queue_position: None,
            eta_seconds: None,
        }
    }
}

/// One status answer from the backend
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    Pending {
        queue_position: Option<u32>,
        eta_seconds: Option<u32>,
    },
    Succeeded(Transcript),
    /// Backend-reported failure reason
    Failed(String),
}

/// Wire-level operations of an API provider
#[async_trait]
pub trait ApiBackend: Send + Sync {
    async fn health(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<JobHandle, ProviderError>;

    async fn poll(&self, job: &JobHandle, credential: Option<&str>) -> Result<PollStatus, ProviderError>;
}

/// Result of feeding one poll answer to the poller
#[derive(Debug, Clone, PartialEq)]
pub enum PollStep {
    /// Wait one interval and poll again
    Continue,
    Finished(Transcript),
    Failed(ProviderError),
}

/// Status waiting as an explicit state machine, one step per tick.
///
/// Counts polls independently from the submit attempt budget.
#[derive(Debug, Clone)]
pub struct StatusPoller {
    polls: u32,
    max_polls: u32,
    done: bool,
}

impl StatusPoller {
    pub fn new(config: &PollingConfig) -> Self {
        Self {
            polls: 0,
            max_polls: config.max_polls.max(1),
            done: false,
        }
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn step(&mut self, outcome: Result<PollStatus, ProviderError>, policy: &RetryPolicy) -> PollStep {
        if self.done {
            return PollStep::Failed(ProviderError::new(ErrorKind::Unknown, "poller already finished"));
        }
        self.polls += 1;

        let step = match outcome {
            Ok(PollStatus::Succeeded(transcript)) => PollStep::Finished(transcript),
            Ok(PollStatus::Failed(reason)) => {
                PollStep::Failed(ProviderError::new(ErrorKind::from_message(&reason), reason))
            }
            Ok(PollStatus::Pending { .. }) => self.continue_or_ceiling(),
            Err(err) => match policy.classify(&err) {
                Classification::Terminal => PollStep::Failed(err),
                // A flaky status call costs one tick, it does not fail the job
                Classification::Retryable => {
                    debug!(polls = self.polls, error = %err, "poll_error_retry");
                    self.continue_or_ceiling()
                }
            },
        };
        if !matches!(step, PollStep::Continue) {
            self.done = true;
        }
        step
    }

    fn continue_or_ceiling(&self) -> PollStep {
        if self.polls >= self.max_polls {
            PollStep::Failed(
                ProviderError::new(
                    ErrorKind::Timeout,
                    format!("job still pending after {} polls", self.polls),
                )
                .with_code(FailureCode::PollCeiling),
            )
        } else {
            PollStep::Continue
        }
    }
}

/// `TranscriptProvider` over any `ApiBackend`
pub struct ApiAdapter {
    backend: Arc<dyn ApiBackend>,
    polling: PollingConfig,
    policy: Arc<RetryPolicy>,
    check_health: bool,
}

impl ApiAdapter {
    pub fn new(backend: Arc<dyn ApiBackend>, polling: PollingConfig, policy: Arc<RetryPolicy>) -> Self {
        Self {
            backend,
            polling,
            policy,
            check_health: false,
        }
    }

    /// Probe backend health before each submit
    pub fn with_health_check(mut self, enabled: bool) -> Self {
        self.check_health = enabled;
        self
    }

    async fn run(&self, ctx: &AttemptContext) -> Result<Transcript, ProviderError> {
        if self.check_health && !self.backend.health().await? {
            return Err(ProviderError::new(ErrorKind::Server, "health probe reported unhealthy")
                .with_code(FailureCode::UnhealthyBackend));
        }

        let request = SubmitRequest {
            url: ctx.request.url.clone(),
            tier: ctx.request.tier,
            credential: ctx.credential.clone(),
        };
        let job = self.backend.submit(&request).await?;
        if job.job_id.trim().is_empty() {
            return Err(ProviderError::new(ErrorKind::Unknown, "submit response carried no job id")
                .with_code(FailureCode::MissingJobId));
        }
        info!(provider = %ctx.provider_id, job_id = %job.job_id, "job_submitted");
        ctx.emit(ProgressEvent::Queued {
            provider: ctx.provider_id.clone(),
            queue_position: job.queue_position,
            eta_seconds: job.eta_seconds,
        });

        let mut poller = StatusPoller::new(&self.polling);
        let mut ticker = tokio::time::interval(self.polling.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let outcome = self.backend.poll(&job, ctx.credential.as_deref()).await;
            if let Ok(PollStatus::Pending {
                queue_position,
                eta_seconds,
            }) = &outcome
            {
                debug!(
                    provider = %ctx.provider_id,
                    job_id = %job.job_id,
                    polls = poller.polls() + 1,
                    queue_position = ?queue_position,
                    eta_seconds = ?eta_seconds,
                    "job_pending"
                );
                ctx.emit(ProgressEvent::Queued {
                    provider: ctx.provider_id.clone(),
                    queue_position: *queue_position,
                    eta_seconds: *eta_seconds,
                });
            }

            match poller.step(outcome, &self.policy) {
                PollStep::Continue => continue,
                PollStep::Finished(transcript) => {
                    info!(provider = %ctx.provider_id, job_id = %job.job_id, polls = poller.polls(), "job_completed");
                    return Ok(transcript);
                }
                PollStep::Failed(err) => {
                    warn!(provider = %ctx.provider_id, job_id = %job.job_id, polls = poller.polls(), error = %err, "job_failed");
                    return Err(err);
                }
            }
        }
    }
}

#[async_trait]
impl TranscriptProvider for ApiAdapter {
    fn capability(&self) -> CapabilityKind {
        CapabilityKind::Api
    }

    async fn attempt(&self, ctx: &AttemptContext) -> Result<Transcript, ProviderError> {
        let cancel = ctx.cancel().clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::cancelled()),
            result = self.run(ctx) => result,
        }
    }
}
