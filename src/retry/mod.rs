//! Retry and backoff policy shared by every provider path.
//!
//! One `RetryPolicy` instance is built by the orchestrator and handed to each adapter that
//! needs to classify errors. Tuning lives in `RetryConfig`, carried per provider.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ErrorKind, ProviderError};

/// Whether retrying the same provider can help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Retryable,
    Terminal,
}

/// Per-provider retry tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the second attempt, in milliseconds
    pub base_delay_ms: u64,

    /// Growth factor applied per attempt
    pub multiplier: f64,

    /// Upper bound for any single delay, in milliseconds
    pub max_delay_ms: u64,

    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Uniform jitter ratio applied around the computed delay (0.1 = ±10%)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 10_000,
            max_attempts: 3,
            jitter: 0.1,
        }
    }
}

/// Stateless classification and delay computation.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy;

impl RetryPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Decide whether an error is worth another attempt against the same provider.
    ///
    /// Rules apply in order, first match wins: transport, server, rate limit are retryable;
    /// auth, validation, payment are terminal; anything unclassified is retryable. Outcomes that
    /// describe the video or the run are terminal whatever HTTP status came with them.
    pub fn classify(&self, error: &ProviderError) -> Classification {
        use Classification::*;

        match error.kind {
            ErrorKind::Transport => return Retryable,
            ErrorKind::Server => return Retryable,
            ErrorKind::RateLimited => return Retryable,
            ErrorKind::NoTranscript
            | ErrorKind::ChallengeDetected
            | ErrorKind::Timeout
            | ErrorKind::Cancelled
            | ErrorKind::NoProvidersAvailable
            | ErrorKind::AllProvidersFailed => return Terminal,
            _ => {}
        }
        if let Some(status) = error.status {
            match status {
                500..=599 | 408 | 429 => return Retryable,
                _ => {}
            }
        }
        match error.kind {
            ErrorKind::Auth
            | ErrorKind::Validation
            | ErrorKind::InsufficientCredits
            | ErrorKind::NoTranscript
            | ErrorKind::ChallengeDetected
            | ErrorKind::Timeout
            | ErrorKind::Cancelled
            | ErrorKind::NoProvidersAvailable
            | ErrorKind::AllProvidersFailed => Terminal,
            ErrorKind::Transport | ErrorKind::Server | ErrorKind::RateLimited | ErrorKind::Unknown => Retryable,
        }
    }

    /// Delay before attempt `attempt + 1`, without jitter.
    ///
    /// `min(base * multiplier^(attempt-1), max)`; attempt numbering starts at 1.
    pub fn base_delay(&self, attempt: u32, config: &RetryConfig) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = config.base_delay_ms as f64 * config.multiplier.powi(exponent);
        let capped = raw.min(config.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Delay before attempt `attempt + 1`, widened by uniform jitter.
    pub fn next_delay(&self, attempt: u32, config: &RetryConfig) -> Duration {
        let base = self.base_delay(attempt, config);
        let ratio = config.jitter.clamp(0.0, 1.0);
        if ratio == 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::thread_rng().gen_range((1.0 - ratio)..=(1.0 + ratio));
        base.mul_f64(factor)
    }
}

/// Outcome of recording a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the delay, then run the next attempt
    Retry(Duration),
    /// Non-retryable error; provider abandoned for this request
    Terminal,
    /// Retryable error but the attempt budget is spent
    Exhausted,
}

/// Retry bookkeeping for one (provider, request) pair.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempt: u32,
    max_attempts: u32,
    next_delay: Option<Duration>,
    history: Vec<(ErrorKind, Classification)>,
    frozen: bool,
}

impl RetryState {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            attempt: 1,
            max_attempts: config.max_attempts.max(1),
            next_delay: None,
            history: Vec::new(),
            frozen: false,
        }
    }

    /// Current attempt number (1-based).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn next_delay(&self) -> Option<Duration> {
        self.next_delay
    }

    pub fn history(&self) -> &[(ErrorKind, Classification)] {
        &self.history
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Record the failure of the current attempt and decide what happens next.
    ///
    /// Once a terminal classification is seen, or the budget is spent, the state is frozen
    /// and every further call reports the same abandonment.
    pub fn record(
        &mut self,
        error: &ProviderError,
        policy: &RetryPolicy,
        config: &RetryConfig,
    ) -> RetryDecision {
        if self.frozen {
            return match self.history.last() {
                Some((_, Classification::Terminal)) => RetryDecision::Terminal,
                _ => RetryDecision::Exhausted,
            };
        }

        let classification = policy.classify(error);
        self.history.push((error.kind, classification));

        if classification == Classification::Terminal {
            self.frozen = true;
            self.next_delay = None;
            return RetryDecision::Terminal;
        }
        if self.attempt >= self.max_attempts {
            self.frozen = true;
            self.next_delay = None;
            return RetryDecision::Exhausted;
        }

        let delay = policy.next_delay(self.attempt, config);
        self.attempt += 1;
        self.next_delay = Some(delay);
        RetryDecision::Retry(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureCode;

    fn err(kind: ErrorKind) -> ProviderError {
        ProviderError::new(kind, "test")
    }

    #[test]
    fn test_classification_rules() {
        let policy = RetryPolicy::new();
        assert_eq!(policy.classify(&err(ErrorKind::Transport)), Classification::Retryable);
        assert_eq!(policy.classify(&err(ErrorKind::Server)), Classification::Retryable);
        assert_eq!(policy.classify(&err(ErrorKind::RateLimited)), Classification::Retryable);
        assert_eq!(policy.classify(&err(ErrorKind::Auth)), Classification::Terminal);
        assert_eq!(policy.classify(&err(ErrorKind::Validation)), Classification::Terminal);
        assert_eq!(policy.classify(&err(ErrorKind::InsufficientCredits)), Classification::Terminal);
        assert_eq!(policy.classify(&err(ErrorKind::NoTranscript)), Classification::Terminal);
        assert_eq!(policy.classify(&err(ErrorKind::ChallengeDetected)), Classification::Terminal);
        assert_eq!(policy.classify(&err(ErrorKind::Unknown)), Classification::Retryable);
    }

    #[test]
    fn test_server_status_wins_over_unknown_kind() {
        let policy = RetryPolicy::new();
        let mut error = err(ErrorKind::Unknown);
        error.status = Some(503);
        assert_eq!(policy.classify(&error), Classification::Retryable);

        // 5xx precedes the auth rule
        let mut error = err(ErrorKind::Auth);
        error.status = Some(502);
        assert_eq!(policy.classify(&error), Classification::Retryable);
    }

    #[test]
    fn test_server_status_never_revives_run_outcomes() {
        let policy = RetryPolicy::new();
        for kind in [ErrorKind::NoTranscript, ErrorKind::ChallengeDetected, ErrorKind::Cancelled] {
            let mut error = err(kind);
            error.status = Some(503);
            assert_eq!(policy.classify(&error), Classification::Terminal, "{kind}");
        }
    }

    #[test]
    fn test_page_load_timeout_is_retryable() {
        let policy = RetryPolicy::new();
        let error = err(ErrorKind::Transport).with_code(FailureCode::PageLoadTimeout);
        assert_eq!(policy.classify(&error), Classification::Retryable);
    }

    #[test]
    fn test_backoff_monotonic_with_cap() {
        let policy = RetryPolicy::new();
        let config = RetryConfig {
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 10_000,
            ..RetryConfig::default()
        };
        let delays: Vec<u64> = (1..=6)
            .map(|attempt| policy.base_delay(attempt, &config).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10_000, 10_000]);
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let policy = RetryPolicy::new();
        let config = RetryConfig::default();
        for attempt in 1..=5 {
            let base = policy.base_delay(attempt, &config).as_secs_f64();
            for _ in 0..50 {
                let jittered = policy.next_delay(attempt, &config).as_secs_f64();
                assert!(jittered >= base * 0.9 - 1e-9, "{jittered} below {base}");
                assert!(jittered <= base * 1.1 + 1e-9, "{jittered} above {base}");
            }
        }
    }

    #[test]
    fn test_retry_budget_exhaustion() {
        let policy = RetryPolicy::new();
        let config = RetryConfig {
            max_attempts: 3,
            ..RetryConfig::default()
        };
        let mut state = RetryState::new(&config);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match state.record(&err(ErrorKind::Transport), &policy, &config) {
                RetryDecision::Retry(_) => continue,
                RetryDecision::Exhausted => break,
                RetryDecision::Terminal => panic!("transport errors are retryable"),
            }
        }
        assert_eq!(attempts, 3);
        assert!(state.is_frozen());
        assert_eq!(state.attempt(), 3);
        // Frozen state never grants another attempt
        assert_eq!(
            state.record(&err(ErrorKind::Transport), &policy, &config),
            RetryDecision::Exhausted
        );
    }

    #[test]
    fn test_terminal_short_circuit() {
        let policy = RetryPolicy::new();
        let config = RetryConfig::default();
        let mut state = RetryState::new(&config);
        assert_eq!(
            state.record(&err(ErrorKind::Auth), &policy, &config),
            RetryDecision::Terminal
        );
        assert_eq!(state.attempt(), 1);
        assert_eq!(state.next_delay(), None);
        assert!(state.is_frozen());
        assert_eq!(state.history(), &[(ErrorKind::Auth, Classification::Terminal)]);
    }
}
