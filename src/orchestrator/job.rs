use chrono::{DateTime, Utc};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

use crate::transcribe::{ProviderAttempt, Tier};

/// Lifecycle of one acquisition run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    /// Provider picked, not yet attempted
    Dispatched { provider: String },
    Running { provider: String, attempt: u32 },
    /// Provider abandoned; the next one may be dispatched
    ProviderExhausted { provider: String },
    Succeeded,
    AllProvidersFailed,
    /// Run ended early without trying every provider
    Aborted,
    Cancelled,
}

impl JobState {
    pub fn name(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Dispatched { .. } => "dispatched",
            JobState::Running { .. } => "running",
            JobState::ProviderExhausted { .. } => "provider_exhausted",
            JobState::Succeeded => "succeeded",
            JobState::AllProvidersFailed => "all_providers_failed",
            JobState::Aborted => "aborted",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::AllProvidersFailed | JobState::Aborted | JobState::Cancelled
        )
    }

    fn allows(&self, next: &JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (_, Cancelled) | (_, Aborted) => !self.is_terminal(),
            (Pending, Dispatched { .. }) => true,
            (Dispatched { provider: a }, Running { provider: b, .. }) => a == b,
            (Dispatched { provider: a }, ProviderExhausted { provider: b }) => a == b,
            (Running { provider: a, .. }, Running { provider: b, .. }) => a == b,
            (Running { provider: a, .. }, ProviderExhausted { provider: b }) => a == b,
            (Running { .. }, Succeeded) => true,
            (ProviderExhausted { .. }, Dispatched { .. }) => true,
            (ProviderExhausted { .. }, AllProvidersFailed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Dispatched { provider } | JobState::ProviderExhausted { provider } => {
                write!(f, "{}({})", self.name(), provider)
            }
            JobState::Running { provider, attempt } => write!(f, "running({provider}#{attempt})"),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("illegal job transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: String,
    pub to: String,
}

/// One acquisition run for a request
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub url: String,
    pub video_id: String,
    pub tier: Tier,
    pub started_at: DateTime<Utc>,
    state: JobState,
    /// One entry per provider tried, in dispatch order
    attempts: Vec<ProviderAttempt>,
}

impl Job {
    pub fn new(url: impl Into<String>, video_id: impl Into<String>, tier: Tier) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            video_id: video_id.into(),
            tier,
            started_at: Utc::now(),
            state: JobState::Pending,
            attempts: Vec::new(),
        }
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn attempts(&self) -> &[ProviderAttempt] {
        &self.attempts
    }

    /// Close out the provider currently dispatched
    pub fn record(&mut self, attempt: ProviderAttempt) {
        debug!(
            job_id = %self.id,
            provider = %attempt.provider,
            attempts = attempt.attempts,
            outcome = ?attempt.outcome,
            "provider_recorded"
        );
        self.attempts.push(attempt);
    }

    pub fn transition(&mut self, next: JobState) -> Result<(), IllegalTransition> {
        if !self.state.allows(&next) {
            return Err(IllegalTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!(job_id = %self.id, from = %self.state, to = %next, "job_transition");
        self.state = next;
        Ok(())
    }
}
