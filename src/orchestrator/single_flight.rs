use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

use crate::error::ErrorKind;
use crate::transcribe::{CancellationHandle, TranscriptResult};

type Slot = watch::Receiver<Option<TranscriptResult>>;

/// At most one live run per key; later callers wait for the leader's result
#[derive(Default)]
pub struct SingleFlight {
    inflight: Mutex<HashMap<String, Slot>>,
}

/// Role of a caller for one key
pub enum Flight {
    /// Runs the work and must publish through the guard
    Leader(FlightGuard),
    /// Waits for the leader
    Follower(Follower),
}

impl SingleFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.inflight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn join(self: &Arc<Self>, key: &str) -> Flight {
        let mut map = self.map();
        if let Some(rx) = map.get(key) {
            return Flight::Follower(Follower { rx: rx.clone() });
        }
        let (tx, rx) = watch::channel(None);
        map.insert(key.to_string(), rx);
        Flight::Leader(FlightGuard {
            key: key.to_string(),
            tx,
            owner: Arc::clone(self),
        })
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.map().contains_key(key)
    }

    pub fn active(&self) -> usize {
        self.map().len()
    }
}

/// Leader's handle. Dropping it without `complete` releases followers with `CANCELLED`.
pub struct FlightGuard {
    key: String,
    tx: watch::Sender<Option<TranscriptResult>>,
    owner: Arc<SingleFlight>,
}

impl FlightGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Publish the result to every follower and release the key
    pub fn complete(self, result: &TranscriptResult) {
        self.tx.send_replace(Some(result.clone()));
        // Drop removes the key
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.owner.map().remove(&self.key);
    }
}

pub struct Follower {
    rx: Slot,
}

impl Follower {
    /// Wait for the leader's result, or stop early on our own cancellation
    pub async fn wait(mut self, cancel: &CancellationHandle) -> TranscriptResult {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                TranscriptResult::failure(ErrorKind::Cancelled, "caller stopped waiting for the in-flight request", vec![])
            }
            published = self.rx.wait_for(Option::is_some) => match published {
                Ok(value) => match value.as_ref() {
                    Some(result) => result.clone(),
                    None => Self::abandoned(),
                },
                Err(_) => Self::abandoned(),
            },
        }
    }

    fn abandoned() -> TranscriptResult {
        TranscriptResult::failure(ErrorKind::Cancelled, "in-flight request ended without a result", vec![])
    }
}
