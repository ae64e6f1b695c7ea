//! Runs one acquisition request across the configured providers.
//!
//! Providers are tried strictly one after another in selector order, each under its own
//! [`RetryState`]. The first transcript wins. A `NO_TRANSCRIPT` answer ends the run because it
//! describes the video rather than the provider. Duplicate requests for the same normalized URL
//! join the run already in flight instead of starting another one.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

pub mod job;
pub mod single_flight;

pub use job::{IllegalTransition, Job, JobState};
pub use single_flight::{Flight, FlightGuard, SingleFlight};

use crate::api::{ApiAdapter, HttpApiClient};
use crate::automation::{AutomationController, ChromiumSurfaceFactory, SurfaceFactory, SurfaceLease};
use crate::config::Config;
use crate::error::{ErrorKind, FailureCode, ProviderError};
use crate::providers::{CapabilityKind, CredentialSource, EnvCredentials, ProviderRegistry, SelectedProvider};
use crate::retry::{RetryDecision, RetryPolicy, RetryState};
use crate::transcribe::{
    millis, AcquisitionRequest, AttemptContext, AttemptOutcome, CancellationHandle, NoopProgress, ProgressEvent,
    ProgressSink, ProviderAttempt, Tier, Transcript, TranscriptProvider, TranscriptResult, TranscriptSink,
    TranscriptSuccess,
};
use crate::utils::{extract_domain, normalize_url, video_id};

/// Language reported when a provider does not name one
pub const UNDETERMINED_LANGUAGE: &str = "und";

/// Run-wide limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Ceiling for a whole run across every provider; 0 disables it
    pub overall_ceiling_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            overall_ceiling_secs: 600,
        }
    }
}

impl OrchestratorConfig {
    pub fn overall_ceiling(&self) -> Option<Duration> {
        (self.overall_ceiling_secs > 0).then(|| Duration::from_secs(self.overall_ceiling_secs))
    }
}

/// Entry point for transcript acquisition
pub struct Orchestrator {
    registry: ProviderRegistry,
    credentials: Arc<dyn CredentialSource>,
    adapters: HashMap<String, Arc<dyn TranscriptProvider>>,
    policy: Arc<RetryPolicy>,
    sink: Arc<dyn TranscriptSink>,
    progress: Arc<dyn ProgressSink>,
    flights: Arc<SingleFlight>,
    overall_ceiling: Option<Duration>,
}

impl Orchestrator {
    pub fn new(registry: ProviderRegistry, credentials: Arc<dyn CredentialSource>, sink: Arc<dyn TranscriptSink>) -> Self {
        Self {
            registry,
            credentials,
            adapters: HashMap::new(),
            policy: Arc::new(RetryPolicy::new()),
            sink,
            progress: Arc::new(NoopProgress),
            flights: SingleFlight::new(),
            overall_ceiling: None,
        }
    }

    /// Bind the adapter that serves provider `id`
    pub fn with_adapter(mut self, id: impl Into<String>, adapter: Arc<dyn TranscriptProvider>) -> Self {
        self.adapters.insert(id.into(), adapter);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_policy(mut self, policy: Arc<RetryPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_overall_ceiling(mut self, ceiling: Option<Duration>) -> Self {
        self.overall_ceiling = ceiling;
        self
    }

    /// Wire real adapters for every configured provider.
    ///
    /// API providers get an HTTP client each. Automation providers share one Chromium
    /// factory and one surface lease, so at most one session drives the browser at a time.
    pub fn from_config(config: &Config, sink: Arc<dyn TranscriptSink>, progress: Arc<dyn ProgressSink>) -> Result<Self> {
        let policy = Arc::new(RetryPolicy::new());
        let factory: Arc<dyn SurfaceFactory> = Arc::new(ChromiumSurfaceFactory::new(config.automation.clone()));
        let lease = SurfaceLease::default();

        let mut orchestrator = Self::new(config.registry(), Arc::new(EnvCredentials), sink)
            .with_policy(Arc::clone(&policy))
            .with_progress(progress)
            .with_overall_ceiling(config.orchestrator.overall_ceiling());

        for descriptor in &config.providers {
            let adapter: Arc<dyn TranscriptProvider> = match descriptor.kind {
                CapabilityKind::Api => {
                    let endpoint = descriptor
                        .api
                        .clone()
                        .with_context(|| format!("API provider '{}' has no api block", descriptor.id))?;
                    let check_health = endpoint.health_path.is_some();
                    let client = HttpApiClient::new(endpoint)
                        .with_context(|| format!("Failed to build HTTP client for '{}'", descriptor.id))?;
                    Arc::new(
                        ApiAdapter::new(Arc::new(client), config.polling.clone(), Arc::clone(&policy))
                            .with_health_check(check_health),
                    )
                }
                CapabilityKind::BrowserAutomation => Arc::new(AutomationController::new(
                    Arc::clone(&factory),
                    lease.clone(),
                    config.automation.clone(),
                )),
            };
            orchestrator = orchestrator.with_adapter(descriptor.id.clone(), adapter);
        }
        Ok(orchestrator)
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Acquire a transcript for `url`. Always yields exactly one result.
    pub async fn acquire_transcript(&self, url: &str, tier: Tier, cancel: CancellationHandle) -> TranscriptResult {
        let normalized = match normalize_url(url) {
            Ok(normalized) => normalized,
            Err(err) => {
                warn!(url, error = %err, "url_rejected");
                let result = TranscriptResult::failure(ErrorKind::Validation, err.message, vec![]);
                self.persist(url.trim(), &result).await;
                return result;
            }
        };

        let guard = match self.flights.join(&normalized) {
            Flight::Leader(guard) => guard,
            Flight::Follower(follower) => {
                info!(url = %normalized, "joined_inflight");
                self.progress.emit(ProgressEvent::Joined { url: normalized });
                return follower.wait(&cancel).await;
            }
        };

        let request = AcquisitionRequest {
            raw_url: url.trim().to_string(),
            video_id: video_id(&normalized),
            url: normalized,
            tier,
            cancel: CancellationHandle::new(),
        };
        let key = request.video_id.clone();
        let result = self.lead(request, cancel).await;
        self.persist(&key, &result).await;
        guard.complete(&result);
        result
    }

    /// Run the request as the single-flight leader.
    ///
    /// Adapters see a run-scoped cancellation handle. A watchdog trips it when the caller
    /// cancels or when the overall ceiling passes, so adapters only ever observe one signal.
    async fn lead(&self, request: AcquisitionRequest, caller: CancellationHandle) -> TranscriptResult {
        let run_cancel = request.cancel.clone();
        let timed_out = Arc::new(AtomicBool::new(false));
        let watchdog = {
            let run_cancel = run_cancel.clone();
            let timed_out = Arc::clone(&timed_out);
            let ceiling = self.overall_ceiling;
            AbortOnDrop(tokio::spawn(async move {
                let deadline = async {
                    match ceiling {
                        Some(ceiling) => tokio::time::sleep(ceiling).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    biased;
                    _ = caller.cancelled() => {}
                    _ = deadline => timed_out.store(true, Ordering::SeqCst),
                }
                run_cancel.cancel();
            }))
        };

        let mut job = Job::new(request.url.clone(), request.video_id.clone(), request.tier);
        info!(
            job_id = %job.id,
            url = %job.url,
            domain = extract_domain(&job.url).unwrap_or_default(),
            video_id = %job.video_id,
            tier = %job.tier,
            "job_started"
        );

        let result = self.run(&mut job, Arc::new(request), &timed_out).await;
        drop(watchdog);

        info!(
            job_id = %job.id,
            state = %job.state(),
            kind = result.kind().map(|k| k.as_str()).unwrap_or("SUCCESS"),
            providers = result.attempts().len(),
            "job_finished"
        );
        result
    }

    async fn run(&self, job: &mut Job, request: Arc<AcquisitionRequest>, timed_out: &AtomicBool) -> TranscriptResult {
        let started = Instant::now();
        let selected = self.registry.select_ordered(request.tier, self.credentials.as_ref());
        if selected.is_empty() {
            warn!(job_id = %job.id, tier = %request.tier, "no_providers_available");
            advance(job, JobState::Aborted);
            return TranscriptResult::failure(
                ErrorKind::NoProvidersAvailable,
                format!("no enabled provider with credentials serves the {} tier", request.tier),
                vec![],
            );
        }

        for provider in &selected {
            if request.cancel.is_cancelled() {
                return stopped(job, timed_out);
            }

            let id = provider.descriptor.id.clone();
            advance(job, JobState::Dispatched { provider: id.clone() });

            let Some(adapter) = self.adapters.get(&id) else {
                warn!(job_id = %job.id, provider = %id, "adapter_missing");
                let err = ProviderError::new(ErrorKind::Unknown, "no adapter bound for provider")
                    .with_code(FailureCode::NoAdapter);
                job.record(ProviderAttempt {
                    provider: id.clone(),
                    capability: provider.descriptor.kind,
                    attempts: 0,
                    outcome: AttemptOutcome::failed(&err),
                });
                advance(job, JobState::ProviderExhausted { provider: id });
                continue;
            };

            let (count, outcome) = self.run_provider(job, adapter.as_ref(), provider, &request).await;
            match outcome {
                Ok(transcript) => {
                    job.record(ProviderAttempt {
                        provider: id.clone(),
                        capability: adapter.capability(),
                        attempts: count,
                        outcome: AttemptOutcome::Succeeded,
                    });
                    advance(job, JobState::Succeeded);
                    return TranscriptResult::Success(TranscriptSuccess {
                        text: transcript.text,
                        language: transcript.language.unwrap_or_else(|| UNDETERMINED_LANGUAGE.to_string()),
                        provider: id,
                        elapsed_ms: millis(started.elapsed()),
                        attempts: job.attempts().to_vec(),
                    });
                }
                Err(err) if err.kind == ErrorKind::Cancelled => {
                    let err = if timed_out.load(Ordering::SeqCst) { ceiling_error() } else { err };
                    job.record(ProviderAttempt {
                        provider: id,
                        capability: adapter.capability(),
                        attempts: count,
                        outcome: AttemptOutcome::failed(&err),
                    });
                    return stopped(job, timed_out);
                }
                Err(err) => {
                    self.progress.emit(ProgressEvent::ProviderFailed {
                        provider: id.clone(),
                        kind: err.kind,
                    });
                    job.record(ProviderAttempt {
                        provider: id.clone(),
                        capability: adapter.capability(),
                        attempts: count,
                        outcome: AttemptOutcome::failed(&err),
                    });
                    advance(job, JobState::ProviderExhausted { provider: id.clone() });

                    if err.kind == ErrorKind::NoTranscript {
                        info!(job_id = %job.id, provider = %id, "no_transcript_short_circuit");
                        advance(job, JobState::Aborted);
                        return TranscriptResult::failure(ErrorKind::NoTranscript, err.message, job.attempts().to_vec());
                    }
                }
            }
        }

        advance(job, JobState::AllProvidersFailed);
        let detail = format!("{} provider(s) tried without a transcript", job.attempts().len());
        TranscriptResult::failure(ErrorKind::AllProvidersFailed, detail, job.attempts().to_vec())
    }

    /// Drive one provider until it succeeds or its retry state freezes
    async fn run_provider(
        &self,
        job: &mut Job,
        adapter: &dyn TranscriptProvider,
        provider: &SelectedProvider,
        request: &Arc<AcquisitionRequest>,
    ) -> (u32, Result<Transcript, ProviderError>) {
        let id = &provider.descriptor.id;
        let retry = &provider.descriptor.retry;
        let mut state = RetryState::new(retry);

        loop {
            let attempt = state.attempt();
            advance(
                job,
                JobState::Running {
                    provider: id.clone(),
                    attempt,
                },
            );
            info!(job_id = %job.id, provider = %id, attempt, capability = %adapter.capability(), "provider_attempt");
            self.progress.emit(ProgressEvent::ProviderStarted {
                provider: id.clone(),
                attempt,
            });

            let ctx = AttemptContext {
                request: Arc::clone(request),
                provider_id: id.clone(),
                credential: provider.credential.clone(),
                attempt,
                progress: Arc::clone(&self.progress),
            };
            let err = match adapter.attempt(&ctx).await {
                Ok(transcript) => {
                    info!(job_id = %job.id, provider = %id, attempt, chars = transcript.text.len(), "provider_succeeded");
                    return (attempt, Ok(transcript));
                }
                Err(err) => err,
            };
            if err.kind == ErrorKind::Cancelled {
                return (attempt, Err(err));
            }

            match state.record(&err, &self.policy, retry) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        job_id = %job.id,
                        provider = %id,
                        attempt,
                        error = %err,
                        delay_ms = millis(delay),
                        "retry_scheduled"
                    );
                    self.progress.emit(ProgressEvent::RetryScheduled {
                        provider: id.clone(),
                        attempt: state.attempt(),
                        delay_ms: millis(delay),
                    });
                    tokio::select! {
                        biased;
                        _ = request.cancel.cancelled() => return (attempt, Err(ProviderError::cancelled())),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::Terminal => {
                    warn!(job_id = %job.id, provider = %id, attempt, error = %err, "provider_terminal");
                    return (attempt, Err(err));
                }
                RetryDecision::Exhausted => {
                    warn!(job_id = %job.id, provider = %id, attempt, error = %err, "provider_exhausted");
                    return (attempt, Err(err));
                }
            }
        }
    }

    /// Report the outcome once. Cancelled runs leave no trace in persistence.
    async fn persist(&self, key: &str, result: &TranscriptResult) {
        let outcome = match result {
            TranscriptResult::Success(success) => {
                let saved = self
                    .sink
                    .save_transcript(key, &success.text, &success.language)
                    .await;
                match saved {
                    Ok(()) => self.sink.mark_url_valid(key).await,
                    Err(err) => Err(err),
                }
            }
            TranscriptResult::Failure(failure) if failure.kind == ErrorKind::Cancelled => return,
            TranscriptResult::Failure(failure) => self.sink.mark_url_invalid(key, failure.kind.as_str()).await,
        };
        if let Err(err) = outcome {
            warn!(video_id = key, error = %err, "persistence_failed");
        }
    }
}

fn ceiling_error() -> ProviderError {
    ProviderError::new(ErrorKind::Timeout, "overall ceiling reached").with_code(FailureCode::OverallCeiling)
}

fn stopped(job: &mut Job, timed_out: &AtomicBool) -> TranscriptResult {
    advance(job, JobState::Cancelled);
    let attempts = job.attempts().to_vec();
    if timed_out.load(Ordering::SeqCst) {
        TranscriptResult::failure(ErrorKind::Timeout, "run exceeded its overall ceiling", attempts)
    } else {
        TranscriptResult::failure(ErrorKind::Cancelled, "cancelled by caller", attempts)
    }
}

/// Aborts the wrapped task when dropped, including when the owning future is dropped mid-run
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn advance(job: &mut Job, next: JobState) {
    if let Err(err) = job.transition(next) {
        warn!(job_id = %job.id, error = %err, "job_transition_rejected");
    }
}
