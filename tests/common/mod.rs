//! In-process fakes shared by the integration tests. No network, no browser.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shortform_transcriptor::api::{ApiBackend, JobHandle, PollStatus, PollingConfig, SubmitRequest};
use shortform_transcriptor::automation::{
    AutomationConfig, DomOp, MemoryClipboard, PageSurface, SurfaceFactory, SurfaceLease,
};
use shortform_transcriptor::transcribe::{
    AttemptContext, ProgressEvent, ProgressSink, Transcript, TranscriptProvider, TranscriptSink,
};
use shortform_transcriptor::{CapabilityKind, ProviderError};

pub const URL: &str = "https://vm.tiktok.com/ABC123/";

/// API backend answering from a fixed script
pub struct ScriptedBackend {
    submit: Mutex<Option<Result<JobHandle, ProviderError>>>,
    polls: Mutex<VecDeque<Result<PollStatus, ProviderError>>>,
    pub submits: AtomicU32,
    pub poll_calls: AtomicU32,
}

impl ScriptedBackend {
    pub fn new(submit: Result<JobHandle, ProviderError>, polls: Vec<Result<PollStatus, ProviderError>>) -> Self {
        Self {
            submit: Mutex::new(Some(submit)),
            polls: Mutex::new(polls.into()),
            submits: AtomicU32::new(0),
            poll_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ApiBackend for ScriptedBackend {
    async fn submit(&self, _request: &SubmitRequest) -> Result<JobHandle, ProviderError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        self.submit
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Ok(JobHandle::new("j1")))
    }

    async fn poll(&self, _job: &JobHandle, _credential: Option<&str>) -> Result<PollStatus, ProviderError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        self.polls.lock().unwrap().pop_front().unwrap_or(Ok(PollStatus::Pending {
            queue_position: None,
            eta_seconds: None,
        }))
    }
}

pub fn fast_polling() -> PollingConfig {
    PollingConfig {
        interval_ms: 5,
        max_polls: 20,
    }
}

/// Page that shows `texts` in turn, then offers `candidates`
#[derive(Clone, Default)]
pub struct FakePage {
    pub state: Arc<Mutex<PageState>>,
}

#[derive(Default)]
pub struct PageState {
    pub texts: Vec<String>,
    pub reads: usize,
    pub candidates: Value,
    pub field: String,
    pub submits: usize,
    pub closed: bool,
}

impl FakePage {
    pub fn new(texts: &[&str], candidates: Value) -> Self {
        let page = Self::default();
        {
            let mut state = page.state.lock().unwrap();
            state.texts = texts.iter().map(|t| t.to_string()).collect();
            state.candidates = candidates;
        }
        page
    }
}

#[async_trait]
impl PageSurface for FakePage {
    async fn navigate(&mut self, _url: &str, _timeout: Duration) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn run(&mut self, op: &DomOp) -> Result<Value, ProviderError> {
        let mut state = self.state.lock().unwrap();
        Ok(match op {
            DomOp::DismissModals { .. } => json!({ "count": 0, "found": [] }),
            DomOp::FindInput { .. } => json!({ "found": true, "selector": "input#url", "hint": "url" }),
            DomOp::SetValue { value, .. } => {
                state.field = value.clone();
                json!({ "ok": true, "value": state.field })
            }
            DomOp::ClearValue { .. } => {
                state.field.clear();
                json!({ "ok": true })
            }
            DomOp::TypeChar { ch, .. } => {
                state.field.push(*ch);
                json!({ "ok": true })
            }
            DomOp::ReadValue { .. } => json!({ "ok": true, "value": state.field }),
            DomOp::Submit { .. } => {
                state.submits += 1;
                json!({ "method": "button", "label": "start" })
            }
            DomOp::InstallNetworkMonitor => json!({ "installed": true, "inflight": 1 }),
            DomOp::ReadActivity => json!({ "inflight": 1, "nodes": 120 }),
            DomOp::PageText => {
                let idx = state.reads.min(state.texts.len().saturating_sub(1));
                state.reads += 1;
                json!(state.texts.get(idx).cloned().unwrap_or_default())
            }
            DomOp::CollectCandidates { .. } => {
                if state.reads >= state.texts.len() {
                    state.candidates.clone()
                } else {
                    json!([])
                }
            }
        })
    }

    async fn close(self: Box<Self>) {
        self.state.lock().unwrap().closed = true;
    }
}

pub struct FakeFactory(pub FakePage);

#[async_trait]
impl SurfaceFactory for FakeFactory {
    async fn open(&self) -> Result<Box<dyn PageSurface>, ProviderError> {
        Ok(Box::new(self.0.clone()))
    }
}

pub fn fast_automation() -> AutomationConfig {
    AutomationConfig {
        settle_delay_ms: 1,
        type_delay_ms: 0,
        detection_interval_ms: 5,
        detection_ceiling_ms: 2_000,
        service_retry_delay_ms: 1,
        banner_clear_ms: 30,
        session_ceiling_ms: 5_000,
        ..AutomationConfig::default()
    }
}

/// Lease over an in-process clipboard so tests never touch the desktop one
pub fn memory_lease() -> SurfaceLease {
    SurfaceLease::new(Arc::new(MemoryClipboard::default()))
}

/// Provider that counts calls and answers the same way every time
pub struct CountingProvider {
    pub calls: AtomicU32,
    delay: Duration,
    outcome: Result<Transcript, ProviderError>,
}

impl CountingProvider {
    pub fn new(outcome: Result<Transcript, ProviderError>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            delay,
            outcome,
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptProvider for CountingProvider {
    fn capability(&self) -> CapabilityKind {
        CapabilityKind::Api
    }

    async fn attempt(&self, ctx: &AttemptContext) -> Result<Transcript, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            biased;
            _ = ctx.cancel().cancelled() => return Err(ProviderError::cancelled()),
            _ = tokio::time::sleep(self.delay) => {}
        }
        self.outcome.clone()
    }
}

/// Persistence double that records every call
#[derive(Default)]
pub struct RecordingSink {
    pub calls: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranscriptSink for RecordingSink {
    async fn save_transcript(&self, video_id: &str, text: &str, language: &str) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("save:{video_id}:{language}:{text}"));
        Ok(())
    }

    async fn mark_url_valid(&self, video_id: &str) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(format!("valid:{video_id}"));
        Ok(())
    }

    async fn mark_url_invalid(&self, video_id: &str, reason: &str) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(format!("invalid:{video_id}:{reason}"));
        Ok(())
    }
}

/// Progress sink that keeps every event
#[derive(Default)]
pub struct CollectedProgress {
    pub events: Mutex<Vec<ProgressEvent>>,
}

impl CollectedProgress {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for CollectedProgress {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}
