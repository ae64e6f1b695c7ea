use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure taxonomy shared by every provider path and the orchestrator result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Timeout, DNS/connect failure, generic I/O
    Transport,
    /// 5xx or "service unavailable"
    Server,
    RateLimited,
    Auth,
    /// Bad URL or malformed input
    Validation,
    InsufficientCredits,
    /// The video has no captions. A valid negative result, not a provider fault.
    NoTranscript,
    ChallengeDetected,
    /// Polling or phase ceiling exceeded
    Timeout,
    NoProvidersAvailable,
    AllProvidersFailed,
    Cancelled,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "TRANSPORT",
            ErrorKind::Server => "SERVER",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::Auth => "AUTH",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::InsufficientCredits => "INSUFFICIENT_CREDITS",
            ErrorKind::NoTranscript => "NO_TRANSCRIPT",
            ErrorKind::ChallengeDetected => "CHALLENGE_DETECTED",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::NoProvidersAvailable => "NO_PROVIDERS_AVAILABLE",
            ErrorKind::AllProvidersFailed => "ALL_PROVIDERS_FAILED",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }

    /// Map an HTTP status code to a kind. Success codes have no kind.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            400 | 404 | 405 | 415 | 422 => Some(ErrorKind::Validation),
            401 | 403 => Some(ErrorKind::Auth),
            402 => Some(ErrorKind::InsufficientCredits),
            408 => Some(ErrorKind::Transport),
            429 => Some(ErrorKind::RateLimited),
            500..=599 => Some(ErrorKind::Server),
            200..=399 => None,
            _ => Some(ErrorKind::Unknown),
        }
    }

    /// Classify free-form error text by marker substrings.
    ///
    /// Used for backends that only report a message (failed job reasons, page banners).
    /// Markers are checked in the same precedence as the retry rules.
    pub fn from_message(message: &str) -> Self {
        let text = message.to_lowercase();
        let has = |markers: &[&str]| markers.iter().any(|m| text.contains(m));

        if has(&["timed out", "timeout", "connection", "network", "dns"]) {
            ErrorKind::Transport
        } else if has(&["500", "502", "503", "504", "server error", "service unavailable", "bad gateway"]) {
            ErrorKind::Server
        } else if has(&["429", "rate limit", "too many requests"]) {
            ErrorKind::RateLimited
        } else if has(&["401", "403", "unauthorized", "forbidden", "authentication"]) {
            ErrorKind::Auth
        } else if has(&["402", "insufficient", "payment", "credits"]) {
            ErrorKind::InsufficientCredits
        } else if has(&["no subtitles", "subtitles not available", "no captions", "no transcript"]) {
            ErrorKind::NoTranscript
        } else if has(&["400", "invalid", "validation", "malformed"]) {
            ErrorKind::Validation
        } else {
            ErrorKind::Unknown
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finer-grained reason attached to a provider error, mostly from the automation phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    PageLoadTimeout,
    InputNotFound,
    InputNotSettable,
    InvalidUrl,
    ServiceUnavailable,
    DetectionCeiling,
    PollCeiling,
    SurfaceUnavailable,
    UnhealthyBackend,
    MissingJobId,
    OverallCeiling,
    NoAdapter,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::PageLoadTimeout => "PAGE_LOAD_TIMEOUT",
            FailureCode::InputNotFound => "INPUT_NOT_FOUND",
            FailureCode::InputNotSettable => "INPUT_NOT_SETTABLE",
            FailureCode::InvalidUrl => "INVALID_URL",
            FailureCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            FailureCode::DetectionCeiling => "DETECTION_CEILING",
            FailureCode::PollCeiling => "POLL_CEILING",
            FailureCode::SurfaceUnavailable => "SURFACE_UNAVAILABLE",
            FailureCode::UnhealthyBackend => "UNHEALTHY_BACKEND",
            FailureCode::MissingJobId => "MISSING_JOB_ID",
            FailureCode::OverallCeiling => "OVERALL_CEILING",
            FailureCode::NoAdapter => "NO_ADAPTER",
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error produced by a provider adapter for one attempt.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{kind}{}: {message}", .code.map(|c| format!("/{c}")).unwrap_or_default())]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub code: Option<FailureCode>,
    pub status: Option<u16>,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            status: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: FailureCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Build from a non-success HTTP response.
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match ErrorKind::from_status(status) {
            // Some backends answer 400 for exhausted balance; trust the body in that case.
            Some(ErrorKind::Validation) if ErrorKind::from_message(body) == ErrorKind::InsufficientCredits => {
                ErrorKind::InsufficientCredits
            }
            Some(kind) => kind,
            None => ErrorKind::Unknown,
        };
        let snippet: String = body.chars().take(200).collect();
        Self {
            kind,
            code: None,
            status: Some(status),
            message: format!("HTTP {status}: {snippet}"),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "cancelled by caller")
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), &err.to_string());
        }
        let kind = if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            ErrorKind::Transport
        } else if err.is_decode() {
            ErrorKind::Unknown
        } else {
            ErrorKind::from_message(&err.to_string())
        };
        Self::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_status() {
        assert_eq!(ErrorKind::from_status(200), None);
        assert_eq!(ErrorKind::from_status(400), Some(ErrorKind::Validation));
        assert_eq!(ErrorKind::from_status(401), Some(ErrorKind::Auth));
        assert_eq!(ErrorKind::from_status(403), Some(ErrorKind::Auth));
        assert_eq!(ErrorKind::from_status(402), Some(ErrorKind::InsufficientCredits));
        assert_eq!(ErrorKind::from_status(429), Some(ErrorKind::RateLimited));
        assert_eq!(ErrorKind::from_status(503), Some(ErrorKind::Server));
    }

    #[test]
    fn test_kind_from_message() {
        assert_eq!(ErrorKind::from_message("Connection reset by peer"), ErrorKind::Transport);
        assert_eq!(ErrorKind::from_message("Service Unavailable"), ErrorKind::Server);
        assert_eq!(ErrorKind::from_message("rate limit exceeded"), ErrorKind::RateLimited);
        assert_eq!(ErrorKind::from_message("Unauthorized"), ErrorKind::Auth);
        assert_eq!(ErrorKind::from_message("Insufficient balance"), ErrorKind::InsufficientCredits);
        assert_eq!(ErrorKind::from_message("Subtitles Not Available"), ErrorKind::NoTranscript);
        assert_eq!(ErrorKind::from_message("Invalid URL"), ErrorKind::Validation);
        assert_eq!(ErrorKind::from_message("something odd"), ErrorKind::Unknown);
    }

    #[test]
    fn test_body_overrides_bad_request_for_credits() {
        let err = ProviderError::from_status(400, r#"{"error":"insufficient credits"}"#);
        assert_eq!(err.kind, ErrorKind::InsufficientCredits);
        assert_eq!(err.status, Some(400));
    }

    #[test]
    fn test_display_includes_code() {
        let err = ProviderError::new(ErrorKind::Transport, "page never loaded")
            .with_code(FailureCode::PageLoadTimeout);
        assert_eq!(err.to_string(), "TRANSPORT/PAGE_LOAD_TIMEOUT: page never loaded");
    }
}
