use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Single-assignment result cell.
///
/// Any number of clones may race to `fire`; exactly one value reaches the receiver and every
/// later call is a no-op returning `false`.
pub struct CompletionLatch<T> {
    slot: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for CompletionLatch<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> CompletionLatch<T> {
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                slot: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Deliver `value` if nothing was delivered yet. Returns whether this call won.
    pub fn fire(&self, value: T) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match sender {
            Some(tx) => {
                // A dropped receiver still consumes the latch
                let _ = tx.send(value);
                true
            }
            None => false,
        }
    }

    pub fn is_fired(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_second_fire_is_noop() {
        let (latch, rx) = CompletionLatch::new();
        assert!(!latch.is_fired());
        assert!(latch.fire("first"));
        assert!(!latch.fire("second"));
        assert!(latch.is_fired());
        assert_eq!(rx.await.unwrap(), "first");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_fire_delivers_once() {
        for _ in 0..50 {
            let (latch, rx) = CompletionLatch::new();
            let wins = Arc::new(AtomicUsize::new(0));
            let tasks: Vec<_> = (0..16)
                .map(|i| {
                    let latch = latch.clone();
                    let wins = wins.clone();
                    tokio::spawn(async move {
                        if latch.fire(i) {
                            wins.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();
            for task in tasks {
                task.await.unwrap();
            }
            assert_eq!(wins.load(Ordering::SeqCst), 1);
            let delivered = rx.await.unwrap();
            assert!(delivered < 16);
        }
    }
}
