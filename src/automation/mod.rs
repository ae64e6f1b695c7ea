//! Scripted-browser provider for single-page transcript sites.
//!
//! A session walks a fixed phase sequence against one page surface: load, dismiss modals, fill
//! the URL field, submit, monitor network activity, then poll the page until a terminal phrase
//! or a transcript-looking element shows up. Delivery goes through a [`CompletionLatch`] so the
//! caller sees exactly one outcome per session, whether it comes from the phases, the
//! cancellation watchdog or the session ceiling.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub mod chromium;
pub mod detection;
pub mod latch;
pub mod surface;

pub use chromium::ChromiumSurfaceFactory;
pub use detection::{select_candidate, Candidate, PagePhrase};
pub use latch::CompletionLatch;
pub use surface::{
    Clipboard, DomOp, LeaseGuard, MemoryClipboard, PageSurface, SurfaceFactory, SurfaceLease, SystemClipboard,
};

use crate::error::{ErrorKind, FailureCode, ProviderError};
use crate::providers::CapabilityKind;
use crate::transcribe::{AttemptContext, ProgressEvent, Transcript, TranscriptProvider};
use detection::RawCandidate;

/// Target page and timing for the automation protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Page that hosts the transcript form
    pub entry_url: String,

    pub page_load_timeout_ms: u64,

    /// Pause after modal dismissal
    pub settle_delay_ms: u64,

    /// Selectors for overlays and dialogs
    pub modal_patterns: Vec<String>,

    /// Labels of close controls inside overlays
    pub close_labels: Vec<String>,

    /// Attribute substrings that identify the URL field, by priority
    pub input_hints: Vec<String>,

    /// Submit control labels, by priority
    pub submit_labels: Vec<String>,

    /// Class/id substrings that mark result containers
    pub candidate_hints: Vec<String>,

    pub set_value_retries: u32,

    /// Delay between synthetic keystrokes
    pub type_delay_ms: u64,

    pub detection_interval_ms: u64,

    pub detection_ceiling_ms: u64,

    pub min_candidate_length: usize,

    /// Resubmits with a trailing-slash toggle after an "invalid URL" notice
    pub invalid_url_retries: u32,

    /// Resubmits after a transient service notice
    pub service_retries: u32,

    pub service_retry_delay_ms: u64,

    /// How long to wait for a notice to leave the page after a resubmit
    pub banner_clear_ms: u64,

    /// Emit a still-waiting diagnostic every N detection ticks
    pub still_waiting_every: u32,

    /// Hard ceiling for one whole session
    pub session_ceiling_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chromium_path: Option<PathBuf>,

    pub headless: bool,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            entry_url: "https://script.tokaudit.io/".to_string(),
            page_load_timeout_ms: 30_000,
            settle_delay_ms: 1_500,
            modal_patterns: strings(&[
                "[role=\"dialog\"]",
                "[aria-modal=\"true\"]",
                ".modal",
                ".modal-backdrop",
                ".popup",
                ".overlay",
                "[class*=\"overlay\"]",
                "[class*=\"modal\"]",
                "[id*=\"modal\"]",
            ]),
            close_labels: strings(&["close", "×", "✕", "dismiss", "no thanks", "got it", "skip"]),
            input_hints: strings(&["video url", "url", "video", "tiktok", "link", "paste"]),
            submit_labels: strings(&["start", "analyze", "go", "submit", "get transcript"]),
            candidate_hints: strings(&["transcript", "result", "subtitle", "output", "caption"]),
            set_value_retries: 3,
            type_delay_ms: 30,
            detection_interval_ms: 1_000,
            detection_ceiling_ms: 180_000,
            min_candidate_length: detection::MIN_CANDIDATE_LENGTH,
            invalid_url_retries: 1,
            service_retries: 2,
            service_retry_delay_ms: 3_000,
            banner_clear_ms: 10_000,
            still_waiting_every: 10,
            session_ceiling_ms: 300_000,
            chromium_path: None,
            headless: true,
        }
    }
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

/// Automation protocol phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    PageLoad,
    ModalDismissal,
    FormFill,
    Submit,
    AjaxMonitor,
    ResultDetection,
    Extraction,
    Completed,
    Failed,
    Cancelled,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::PageLoad => "page_load",
            Phase::ModalDismissal => "modal_dismissal",
            Phase::FormFill => "form_fill",
            Phase::Submit => "submit",
            Phase::AjaxMonitor => "ajax_monitor",
            Phase::ResultDetection => "result_detection",
            Phase::Extraction => "extraction",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
            Phase::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed | Phase::Cancelled)
    }

    /// Legal forward edges. Terminal edges are handled by `AutomationSession::finish`.
    pub fn can_advance_to(&self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Idle, PageLoad)
                | (PageLoad, ModalDismissal)
                | (ModalDismissal, FormFill)
                | (FormFill, Submit)
                | (Submit, AjaxMonitor)
                | (AjaxMonitor, ResultDetection)
                | (ResultDetection, FormFill)
                | (ResultDetection, Submit)
                | (ResultDetection, Extraction)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-session state, owned by the controller for the life of one attempt
#[derive(Debug)]
pub struct AutomationSession {
    pub provider: String,
    phase: Phase,
    history: Vec<Phase>,
    /// Last observed in-flight request count
    pub inflight: u32,
    /// URL as the caller supplied it
    pub target_url: String,
    pub normalized_url: String,
    /// URL currently typed into the form; toggled on an invalid-URL retry
    pub submitted_url: String,
    started: Instant,
}

impl AutomationSession {
    pub fn new(provider: impl Into<String>, target_url: impl Into<String>, normalized_url: impl Into<String>) -> Self {
        let normalized_url = normalized_url.into();
        Self {
            provider: provider.into(),
            phase: Phase::Idle,
            history: vec![Phase::Idle],
            inflight: 0,
            target_url: target_url.into(),
            submitted_url: normalized_url.clone(),
            normalized_url,
            started: Instant::now(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn history(&self) -> &[Phase] {
        &self.history
    }

    pub fn advance(&mut self, next: Phase) -> Result<(), ProviderError> {
        if !self.phase.can_advance_to(next) {
            return Err(ProviderError::new(
                ErrorKind::Unknown,
                format!("illegal phase transition {} -> {}", self.phase, next),
            ));
        }
        info!(
            provider = %self.provider,
            from = %self.phase,
            phase = %next,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "phase_transition"
        );
        self.phase = next;
        self.history.push(next);
        Ok(())
    }

    /// Move to the terminal phase matching `outcome`. No-op once terminal.
    pub fn finish(&mut self, outcome: &Result<Transcript, ProviderError>) -> Phase {
        if self.phase.is_terminal() {
            return self.phase;
        }
        let next = match outcome {
            Ok(_) => Phase::Completed,
            Err(err) if err.kind == ErrorKind::Cancelled => Phase::Cancelled,
            Err(_) => Phase::Failed,
        };
        info!(
            provider = %self.provider,
            from = %self.phase,
            phase = %next,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "phase_transition"
        );
        self.phase = next;
        self.history.push(next);
        next
    }
}

/// Add or remove a single trailing slash
pub fn toggle_trailing_slash(url: &str) -> String {
    match url.strip_suffix('/') {
        Some(stripped) => stripped.to_string(),
        None => format!("{url}/"),
    }
}

fn bool_field(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn u32_field(value: &Value, key: &str) -> u32 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0).min(u32::MAX as u64) as u32
}

/// Outcome of the extraction clipboard round-trip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardCheck {
    Verified,
    /// Read-back differs from what was written; lengths in bytes
    Mismatch { expected: usize, got: usize },
    Unavailable,
}

/// `TranscriptProvider` that drives a page surface through the automation phases
pub struct AutomationController {
    factory: Arc<dyn SurfaceFactory>,
    lease: SurfaceLease,
    config: AutomationConfig,
}

impl AutomationController {
    pub fn new(factory: Arc<dyn SurfaceFactory>, lease: SurfaceLease, config: AutomationConfig) -> Self {
        Self { factory, lease, config }
    }

    pub fn config(&self) -> &AutomationConfig {
        &self.config
    }

    /// Run one session. Exactly one outcome is delivered through the latch.
    pub async fn run_session(&self, ctx: &AttemptContext) -> Result<Transcript, ProviderError> {
        let (latch, delivered) = CompletionLatch::new();
        let cancel = ctx.cancel().clone();

        let guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::cancelled()),
            guard = self.lease.acquire() => guard,
        };
        let mut surface = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::cancelled()),
            surface = self.factory.open() => surface?,
        };

        let mut session = AutomationSession::new(ctx.provider_id.clone(), ctx.request.raw_url.clone(), ctx.request.url.clone());
        let ceiling = ms(self.config.session_ceiling_ms);

        {
            let phases = async {
                let outcome = self.drive(&mut session, surface.as_mut(), &guard, ctx).await;
                if !latch.fire(outcome) {
                    debug!(provider = %ctx.provider_id, "late_delivery_suppressed");
                }
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    latch.fire(Err(ProviderError::cancelled()));
                }
                _ = tokio::time::sleep(ceiling) => {
                    latch.fire(Err(ProviderError::new(
                        ErrorKind::Timeout,
                        format!("automation session exceeded {}ms", ceiling.as_millis()),
                    )
                    .with_code(FailureCode::OverallCeiling)));
                }
                _ = phases => {}
            }
        }

        let outcome = delivered.await.unwrap_or_else(|_| {
            Err(ProviderError::new(ErrorKind::Unknown, "automation session ended without an outcome"))
        });
        let terminal = session.finish(&outcome);

        surface.close().await;
        drop(guard);
        info!(provider = %ctx.provider_id, phase = %terminal, "session_released");
        outcome
    }

    async fn drive(
        &self,
        session: &mut AutomationSession,
        surface: &mut dyn PageSurface,
        guard: &LeaseGuard,
        ctx: &AttemptContext,
    ) -> Result<Transcript, ProviderError> {
        self.enter(session, Phase::PageLoad, ctx)?;
        surface
            .navigate(&self.config.entry_url, ms(self.config.page_load_timeout_ms))
            .await?;

        self.enter(session, Phase::ModalDismissal, ctx)?;
        self.dismiss_modals(session, surface).await;

        self.enter(session, Phase::FormFill, ctx)?;
        let selector = self.fill_form(session, surface).await?;

        self.enter(session, Phase::Submit, ctx)?;
        self.install_monitor(session, surface).await;
        self.submit(session, surface, &selector).await?;

        self.enter(session, Phase::AjaxMonitor, ctx)?;
        self.observe_activity(session, surface).await;

        self.enter(session, Phase::ResultDetection, ctx)?;
        let text = self.detect_result(session, surface, &selector, ctx).await?;

        self.enter(session, Phase::Extraction, ctx)?;
        self.verify_clipboard(session, guard.clipboard(), &text).await;

        Ok(Transcript { text, language: None })
    }

    fn enter(&self, session: &mut AutomationSession, phase: Phase, ctx: &AttemptContext) -> Result<(), ProviderError> {
        session.advance(phase)?;
        ctx.emit(ProgressEvent::Phase {
            provider: session.provider.clone(),
            phase: phase.as_str().to_string(),
        });
        Ok(())
    }

    async fn dismiss_modals(&self, session: &AutomationSession, surface: &mut dyn PageSurface) {
        let op = DomOp::DismissModals {
            patterns: self.config.modal_patterns.clone(),
            close_labels: self.config.close_labels.clone(),
        };
        match surface.run(&op).await {
            Ok(report) => {
                let found = report.get("found").and_then(Value::as_array);
                match found {
                    Some(items) if !items.is_empty() => {
                        for item in items {
                            let actions = item.get("actions").cloned().unwrap_or(serde_json::Value::Null);
                            info!(
                                provider = %session.provider,
                                pattern = str_field(item, "pattern").unwrap_or_default(),
                                tag = str_field(item, "tag").unwrap_or_default(),
                                actions = %actions,
                                "modal_dismissed"
                            );
                        }
                    }
                    _ => info!(provider = %session.provider, "no_modal"),
                }
            }
            Err(err) => warn!(provider = %session.provider, error = %err, "modal_scan_failed"),
        }
        tokio::time::sleep(ms(self.config.settle_delay_ms)).await;
    }

    /// Locate the URL field and make its value stick. Returns the field selector.
    async fn fill_form(&self, session: &AutomationSession, surface: &mut dyn PageSurface) -> Result<String, ProviderError> {
        let found = surface
            .run(&DomOp::FindInput {
                hints: self.config.input_hints.clone(),
            })
            .await?;
        let selector = match str_field(&found, "selector") {
            Some(selector) if bool_field(&found, "found") => selector.to_string(),
            _ => {
                warn!(provider = %session.provider, candidates = u32_field(&found, "candidates"), "input_not_found");
                return Err(ProviderError::new(ErrorKind::Unknown, "no visible URL input on page")
                    .with_code(FailureCode::InputNotFound));
            }
        };
        info!(
            provider = %session.provider,
            selector = %selector,
            hint = str_field(&found, "hint").unwrap_or_default(),
            "input_found"
        );

        self.set_value(session, surface, &selector).await?;
        Ok(selector)
    }

    async fn set_value(
        &self,
        session: &AutomationSession,
        surface: &mut dyn PageSurface,
        selector: &str,
    ) -> Result<(), ProviderError> {
        let value = session.submitted_url.clone();

        for attempt in 1..=self.config.set_value_retries.max(1) {
            let set = surface
                .run(&DomOp::SetValue {
                    selector: selector.to_string(),
                    value: value.clone(),
                })
                .await?;
            if bool_field(&set, "ok") && self.read_value(surface, selector).await? == value {
                info!(provider = %session.provider, attempt, method = "native_setter", "input_set");
                return Ok(());
            }
            debug!(
                provider = %session.provider,
                attempt,
                observed = str_field(&set, "value").unwrap_or_default(),
                "input_set_unverified"
            );
        }

        // Last resort: synthetic typing
        surface
            .run(&DomOp::ClearValue {
                selector: selector.to_string(),
            })
            .await?;
        for ch in value.chars() {
            surface
                .run(&DomOp::TypeChar {
                    selector: selector.to_string(),
                    ch,
                })
                .await?;
            tokio::time::sleep(ms(self.config.type_delay_ms)).await;
        }
        if self.read_value(surface, selector).await? == value {
            info!(provider = %session.provider, method = "typing", "input_set");
            return Ok(());
        }

        warn!(provider = %session.provider, "input_not_settable");
        Err(ProviderError::new(ErrorKind::Unknown, "URL field rejected every way of setting its value")
            .with_code(FailureCode::InputNotSettable))
    }

    async fn read_value(&self, surface: &mut dyn PageSurface, selector: &str) -> Result<String, ProviderError> {
        let read = surface
            .run(&DomOp::ReadValue {
                selector: selector.to_string(),
            })
            .await?;
        Ok(str_field(&read, "value").unwrap_or_default().to_string())
    }

    async fn submit(
        &self,
        session: &AutomationSession,
        surface: &mut dyn PageSurface,
        selector: &str,
    ) -> Result<(), ProviderError> {
        let result = surface
            .run(&DomOp::Submit {
                selector: selector.to_string(),
                labels: self.config.submit_labels.clone(),
            })
            .await?;
        let method = str_field(&result, "method").unwrap_or("none");
        if method == "none" {
            warn!(provider = %session.provider, "submit_control_not_found");
        } else {
            info!(
                provider = %session.provider,
                method,
                label = str_field(&result, "label").unwrap_or_default(),
                "submitted"
            );
        }
        Ok(())
    }

    /// Wrap fetch/XHR before submitting so the requests the submit triggers are counted
    async fn install_monitor(&self, session: &mut AutomationSession, surface: &mut dyn PageSurface) {
        match surface.run(&DomOp::InstallNetworkMonitor).await {
            Ok(result) => {
                session.inflight = u32_field(&result, "inflight");
                debug!(
                    provider = %session.provider,
                    installed = bool_field(&result, "installed"),
                    inflight = session.inflight,
                    "network_monitor"
                );
            }
            Err(err) => warn!(provider = %session.provider, error = %err, "network_monitor_failed"),
        }
    }

    async fn observe_activity(&self, session: &mut AutomationSession, surface: &mut dyn PageSurface) {
        match surface.run(&DomOp::ReadActivity).await {
            Ok(activity) => {
                session.inflight = u32_field(&activity, "inflight");
                debug!(
                    provider = %session.provider,
                    inflight = session.inflight,
                    total = u32_field(&activity, "total"),
                    nodes = u32_field(&activity, "nodes"),
                    "network_activity"
                );
            }
            Err(err) => warn!(provider = %session.provider, error = %err, "network_activity_failed"),
        }
    }

    /// Poll until `phrase` is gone from the page or the wait runs out.
    ///
    /// A notice from the previous submit can linger for a few ticks; reading it again would be
    /// taken as the page rejecting the new submit.
    async fn await_phrase_cleared(
        &self,
        session: &AutomationSession,
        surface: &mut dyn PageSurface,
        phrase: PagePhrase,
        deadline: Instant,
    ) -> Result<bool, ProviderError> {
        let until = deadline.min(Instant::now() + ms(self.config.banner_clear_ms));
        loop {
            let page_text = surface.run(&DomOp::PageText).await?;
            let still_shown = detection::detect_phrase(page_text.as_str().unwrap_or_default())
                .is_some_and(|(seen, _)| seen == phrase);
            if !still_shown {
                debug!(provider = %session.provider, phrase = phrase.as_str(), "notice_cleared");
                return Ok(true);
            }
            if Instant::now() >= until {
                debug!(provider = %session.provider, phrase = phrase.as_str(), "notice_persisted");
                return Ok(false);
            }
            tokio::time::sleep(ms(self.config.detection_interval_ms.max(1))).await;
        }
    }

    async fn detect_result(
        &self,
        session: &mut AutomationSession,
        surface: &mut dyn PageSurface,
        selector: &str,
        ctx: &AttemptContext,
    ) -> Result<String, ProviderError> {
        let deadline = Instant::now() + ms(self.config.detection_ceiling_ms);
        let mut ticker = tokio::time::interval(ms(self.config.detection_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut invalid_retries = self.config.invalid_url_retries;
        let mut service_retries = self.config.service_retries;
        let mut ticks: u32 = 0;

        loop {
            ticker.tick().await;
            if Instant::now() >= deadline {
                warn!(provider = %session.provider, ticks, "detection_ceiling");
                return Err(ProviderError::new(
                    ErrorKind::Timeout,
                    format!("no result after {}ms", self.config.detection_ceiling_ms),
                )
                .with_code(FailureCode::DetectionCeiling));
            }
            ticks += 1;

            let page_text = surface.run(&DomOp::PageText).await?;
            let page_text = page_text.as_str().unwrap_or_default();

            if let Some((phrase, marker)) = detection::detect_phrase(page_text) {
                info!(provider = %session.provider, phrase = phrase.as_str(), marker, "phrase_detected");
                match phrase {
                    PagePhrase::NoTranscript => {
                        return Err(ProviderError::new(ErrorKind::NoTranscript, format!("page reported '{marker}'")));
                    }
                    PagePhrase::Challenge => {
                        return Err(ProviderError::new(
                            ErrorKind::ChallengeDetected,
                            format!("page showed a challenge ('{marker}')"),
                        ));
                    }
                    PagePhrase::InvalidUrl if invalid_retries > 0 => {
                        invalid_retries -= 1;
                        session.submitted_url = toggle_trailing_slash(&session.submitted_url);
                        info!(provider = %session.provider, url = %session.submitted_url, "resubmit_toggled_url");
                        self.enter(session, Phase::FormFill, ctx)?;
                        self.set_value(session, surface, selector).await?;
                        self.resubmit(session, surface, selector, ctx).await?;
                        self.await_phrase_cleared(session, surface, phrase, deadline).await?;
                        continue;
                    }
                    PagePhrase::InvalidUrl => {
                        return Err(ProviderError::new(ErrorKind::Validation, "page rejected the video URL")
                            .with_code(FailureCode::InvalidUrl));
                    }
                    PagePhrase::ServiceUnavailable if service_retries > 0 => {
                        service_retries -= 1;
                        info!(provider = %session.provider, remaining = service_retries, "resubmit_after_service_error");
                        tokio::time::sleep(ms(self.config.service_retry_delay_ms)).await;
                        self.resubmit(session, surface, selector, ctx).await?;
                        self.await_phrase_cleared(session, surface, phrase, deadline).await?;
                        continue;
                    }
                    PagePhrase::ServiceUnavailable => {
                        return Err(ProviderError::new(ErrorKind::Server, format!("page reported '{marker}'"))
                            .with_code(FailureCode::ServiceUnavailable));
                    }
                }
            }

            let raw = surface
                .run(&DomOp::CollectCandidates {
                    hints: self.config.candidate_hints.clone(),
                })
                .await?;
            let raw: Vec<RawCandidate> = serde_json::from_value(raw).unwrap_or_default();
            let candidates: Vec<Candidate> = raw.into_iter().map(Candidate::from_raw).collect();
            for candidate in &candidates {
                debug!(
                    provider = %session.provider,
                    tag = %candidate.tag,
                    selector = %candidate.selector,
                    len = candidate.text_length,
                    score = candidate.score(),
                    head = %candidate.text.chars().take(60).collect::<String>(),
                    "candidate"
                );
            }
            if let Some(chosen) = select_candidate(&candidates, self.config.min_candidate_length) {
                info!(
                    provider = %session.provider,
                    selector = %chosen.selector,
                    len = chosen.text_length,
                    score = chosen.score(),
                    ticks,
                    "candidate_selected"
                );
                return Ok(chosen.text.clone());
            }

            if self.config.still_waiting_every > 0 && ticks % self.config.still_waiting_every == 0 {
                let activity = surface.run(&DomOp::ReadActivity).await.unwrap_or(Value::Null);
                session.inflight = u32_field(&activity, "inflight");
                info!(
                    provider = %session.provider,
                    inflight = session.inflight,
                    nodes = u32_field(&activity, "nodes"),
                    ticks,
                    "still_waiting"
                );
                ctx.emit(ProgressEvent::StillWaiting {
                    provider: session.provider.clone(),
                    inflight: session.inflight,
                });
            }
        }
    }

    async fn resubmit(
        &self,
        session: &mut AutomationSession,
        surface: &mut dyn PageSurface,
        selector: &str,
        ctx: &AttemptContext,
    ) -> Result<(), ProviderError> {
        self.enter(session, Phase::Submit, ctx)?;
        self.install_monitor(session, surface).await;
        self.submit(session, surface, selector).await?;
        self.enter(session, Phase::AjaxMonitor, ctx)?;
        self.observe_activity(session, surface).await;
        self.enter(session, Phase::ResultDetection, ctx)
    }

    /// Copy the text through the clipboard and read it back. Never blocks delivery.
    async fn verify_clipboard(&self, session: &AutomationSession, clipboard: &dyn Clipboard, text: &str) -> ClipboardCheck {
        let round_trip = async {
            clipboard.write(text).await?;
            clipboard.read().await
        };
        match round_trip.await {
            Ok(read) if read == text => {
                info!(provider = %session.provider, len = text.len(), "clipboard_verified");
                ClipboardCheck::Verified
            }
            Ok(read) => {
                warn!(
                    provider = %session.provider,
                    expected = text.len(),
                    got = read.len(),
                    "clipboard_mismatch"
                );
                ClipboardCheck::Mismatch {
                    expected: text.len(),
                    got: read.len(),
                }
            }
            Err(err) => {
                warn!(provider = %session.provider, error = %err, "clipboard_unavailable");
                ClipboardCheck::Unavailable
            }
        }
    }
}

#[async_trait]
impl TranscriptProvider for AutomationController {
    fn capability(&self) -> CapabilityKind {
        CapabilityKind::BrowserAutomation
    }

    async fn attempt(&self, ctx: &AttemptContext) -> Result<Transcript, ProviderError> {
        self.run_session(ctx).await
    }
}
