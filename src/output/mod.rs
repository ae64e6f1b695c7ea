use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::OutputFormat;
use crate::transcribe::{AttemptOutcome, ProgressEvent, ProgressSink, TranscriptResult};
use crate::utils::{format_elapsed, generate_unique_filename};

/// Render a result in the requested format
pub fn render(result: &TranscriptResult, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(result).context("Failed to serialize result"),
        OutputFormat::Text => Ok(match result {
            TranscriptResult::Success(success) => success.text.clone(),
            TranscriptResult::Failure(failure) => failure.user_message(),
        }),
    }
}

/// Output target for `--output`: a directory gets a generated, unique file name inside it
pub fn resolve_output_path(path: PathBuf, label: &str, format: &OutputFormat) -> PathBuf {
    if path.is_dir() {
        path.join(generate_unique_filename(label, format.extension()))
    } else {
        path
    }
}

/// Save result to file
pub fn save_to_file(result: &TranscriptResult, path: &Path, format: &OutputFormat) -> Result<()> {
    let content = render(result, format)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs_err::create_dir_all(parent)?;
    }
    fs_err::write(path, content)?;
    Ok(())
}

/// Print result to console
pub fn print_to_console(result: &TranscriptResult, format: &OutputFormat) -> Result<()> {
    let content = render(result, format)?;
    println!("{}", content);
    Ok(())
}

/// Per-provider summary on stderr, styled for a terminal
pub fn print_summary(result: &TranscriptResult) {
    match result {
        TranscriptResult::Success(success) => {
            eprintln!(
                "{} via {} in {}",
                style("Transcript acquired").green().bold(),
                style(&success.provider).cyan(),
                format_elapsed(success.elapsed_ms)
            );
        }
        TranscriptResult::Failure(failure) => {
            eprintln!("{} {}", style("Failed:").red().bold(), style(failure.kind).red());
            eprintln!("  {}", failure.user_message());
        }
    }
    for attempt in result.attempts() {
        let outcome = match &attempt.outcome {
            AttemptOutcome::Succeeded => style("succeeded".to_string()).green(),
            AttemptOutcome::Failed { kind, code, detail } => {
                let code = code.map(|c| format!("/{c}")).unwrap_or_default();
                style(format!("{kind}{code}: {detail}")).yellow()
            }
        };
        eprintln!(
            "  • {} ({}, {} attempt{}) {}",
            attempt.provider,
            attempt.capability,
            attempt.attempts,
            if attempt.attempts == 1 { "" } else { "s" },
            outcome
        );
    }
}

/// Spinner fed by orchestrator progress events
pub struct SpinnerProgress {
    bar: ProgressBar,
}

impl SpinnerProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_message("Starting transcription...");
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for SpinnerProgress {
    fn default() -> Self {
        Self::new()
    }
}

pub fn describe_event(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::ProviderStarted { provider, attempt } => {
            format!("{provider}: attempt {attempt}")
        }
        ProgressEvent::RetryScheduled {
            provider,
            attempt,
            delay_ms,
        } => format!("{provider}: retrying (attempt {attempt}) in {}", format_elapsed(*delay_ms)),
        ProgressEvent::ProviderFailed { provider, kind } => format!("{provider}: failed ({kind})"),
        ProgressEvent::Queued {
            provider,
            queue_position,
            eta_seconds,
        } => {
            let mut message = format!("{provider}: queued");
            if let Some(position) = queue_position {
                message.push_str(&format!(" at position {position}"));
            }
            if let Some(eta) = eta_seconds {
                message.push_str(&format!(", ~{eta}s left"));
            }
            message
        }
        ProgressEvent::Phase { provider, phase } => format!("{provider}: {}", phase.replace('_', " ")),
        ProgressEvent::StillWaiting { provider, inflight } => {
            format!("{provider}: still waiting ({inflight} requests in flight)")
        }
        ProgressEvent::Joined { url } => format!("joined in-flight request for {url}"),
    }
}

impl ProgressSink for SpinnerProgress {
    fn emit(&self, event: ProgressEvent) {
        self.bar.set_message(describe_event(&event));
    }
}
