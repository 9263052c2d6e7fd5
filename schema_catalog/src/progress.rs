//! Progress events emitted during a discovery run

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Running counts attached to every event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressCounts {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    TableStarted { table: String, counts: ProgressCounts },
    TableCompleted { table: String, counts: ProgressCounts },
    TableFailed { table: String, reason: String, counts: ProgressCounts },
    RunCompleted { counts: ProgressCounts },
    RunCancelled { counts: ProgressCounts },
}

/// Receives progress events. Called from worker tasks, so it must not block.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Forwards events to a broadcast channel; lagging receivers lose events
pub struct BroadcastProgress {
    sender: broadcast::Sender<ProgressEvent>,
}

impl BroadcastProgress {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<ProgressEvent>) {
        let (sender, receiver) = broadcast::channel(capacity);
        (Self { sender }, receiver)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl ProgressSink for BroadcastProgress {
    fn emit(&self, event: ProgressEvent) {
        // No receivers is not an error
        let _ = self.sender.send(event);
    }
}

/// Keeps every event in memory
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<ProgressEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ProgressSink for RecordingProgress {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// The per-run progress counter shared by workers
#[derive(Debug, Default)]
pub struct ProgressTracker {
    total: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

impl ProgressTracker {
    pub fn new(total: usize, skipped: usize) -> Self {
        Self {
            total: AtomicUsize::new(total),
            skipped: AtomicUsize::new(skipped),
            ..Self::default()
        }
    }

    pub fn counts(&self) -> ProgressCounts {
        ProgressCounts {
            total: self.total.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
        }
    }

    pub fn record_completed(&self) -> ProgressCounts {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.counts()
    }

    pub fn record_failed(&self) -> ProgressCounts {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.counts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_counts() {
        let tracker = ProgressTracker::new(5, 2);
        tracker.record_completed();
        let counts = tracker.record_failed();
        assert_eq!(
            counts,
            ProgressCounts { total: 5, completed: 1, failed: 1, skipped: 2 }
        );
    }

    #[tokio::test]
    async fn test_broadcast_sink() {
        let (sink, mut receiver) = BroadcastProgress::new(8);
        sink.emit(ProgressEvent::RunCompleted { counts: ProgressCounts::default() });
        let event = receiver.recv().await.unwrap();
        assert!(matches!(event, ProgressEvent::RunCompleted { .. }));
    }

    #[test]
    fn test_event_serialization() {
        let event = ProgressEvent::TableFailed {
            table: "db.public.orders".into(),
            reason: "permission denied".into(),
            counts: ProgressCounts::default(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "table_failed");
        assert_eq!(json["reason"], "permission denied");
    }
}
