//! Shortform Transcriptor - transcript acquisition for short-form video URLs
//!
//! This library tries a prioritized set of transcription providers for one video: HTTP APIs
//! that are submitted and polled, and transcript sites without an API that are driven through
//! a headless browser. Retries, provider fallback, cancellation and duplicate-request
//! coalescing are handled by the [`Orchestrator`].

pub mod api;
pub mod automation;
pub mod cli;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod providers;
pub mod retry;
pub mod transcribe;
pub mod utils;

pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use error::{ErrorKind, FailureCode, ProviderError};
pub use orchestrator::Orchestrator;
pub use providers::{CapabilityKind, ProviderDescriptor, ProviderRegistry};
pub use transcribe::{CancellationHandle, Tier, TranscriptResult};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error types specific to the transcriptor binary
#[derive(thiserror::Error, Debug)]
pub enum TranscriptorError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Transcript acquisition failed: {0}")]
    AcquisitionFailed(ErrorKind),

    #[error("File operation failed: {0}")]
    FileError(String),
}
