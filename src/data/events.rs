/// Record change events
///
/// Every committed mutation produces one [`RecordChangeEvent`]. Emission is
/// non-blocking: the bus hands the event to a bounded queue feeding the
/// workflow dispatcher and to a broadcast channel for external subscribers.
/// When the queue is full a background task waits up to the overflow wait for
/// room (such events may reach the dispatcher after later ones). Only an event
/// that still cannot be queued, or a closed queue, goes to the
/// [`DeadLetterHandler`]; the write path is never back-pressured.

use crate::errors::EmitError;
use crate::table::types::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordOperation {
    Insert,
    Update,
    Delete,
}

impl RecordOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordChangeEvent {
    pub id: Uuid,
    pub table_id: Uuid,
    pub table_name: String,
    pub operation: RecordOperation,
    pub record_id: i64,
    pub before: Option<Record>,
    pub after: Option<Record>,
    pub actor: Option<String>,
    /// 0 for user writes, parent depth + 1 for writes made by workflow actions
    pub depth: u32,
    pub occurred_at: DateTime<Utc>,
}

impl RecordChangeEvent {
    /// The record as it stands after the change (the last image for deletes)
    pub fn current(&self) -> Option<&Record> {
        self.after.as_ref().or(self.before.as_ref())
    }
}

/// Receiver of change events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RecordChangeEvent) -> Result<(), EmitError>;
}

/// Hook for events that could not be delivered
pub trait DeadLetterHandler: Send + Sync {
    fn handle(&self, event: &RecordChangeEvent, error: &EmitError);
}

/// Dead-letter handler that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDeadLetter;

impl DeadLetterHandler for LoggingDeadLetter {
    fn handle(&self, event: &RecordChangeEvent, error: &EmitError) {
        tracing::error!(
            "💀 Dropped {} event for {}#{} ({}): {}",
            event.operation.as_str(),
            event.table_name,
            event.record_id,
            event.id,
            error
        );
    }
}

pub type SharedEvent = Arc<RecordChangeEvent>;

/// Live subscribers lag after this many unread events at the least
const MIN_LIVE_CAPACITY: usize = 64;

/// How long an overflowing event waits for queue room by default
pub const DEFAULT_OVERFLOW_WAIT: Duration = Duration::from_secs(1);

/// Fan-out of change events to the dispatcher queue and live subscribers
pub struct EventBus {
    queue: mpsc::Sender<SharedEvent>,
    live: broadcast::Sender<SharedEvent>,
    dead_letter: Arc<dyn DeadLetterHandler>,
    overflow_wait: Duration,
}

impl EventBus {
    /// Create a bus and the receiving end of its dispatcher queue
    pub fn new(capacity: usize, dead_letter: Arc<dyn DeadLetterHandler>) -> (Self, mpsc::Receiver<SharedEvent>) {
        let capacity = capacity.max(1);
        let (queue, receiver) = mpsc::channel(capacity);
        let (live, _) = broadcast::channel(capacity.max(MIN_LIVE_CAPACITY));
        (
            Self {
                queue,
                live,
                dead_letter,
                overflow_wait: DEFAULT_OVERFLOW_WAIT,
            },
            receiver,
        )
    }

    pub fn with_overflow_wait(mut self, wait: Duration) -> Self {
        self.overflow_wait = wait;
        self
    }

    /// Queue `event` once room frees up, dead-lettering it after the overflow wait
    fn send_later(&self, runtime: Handle, event: SharedEvent) {
        let queue = self.queue.clone();
        let dead_letter = Arc::clone(&self.dead_letter);
        let wait = self.overflow_wait;
        tracing::debug!(
            "⏳ Event queue full, {} event for {}#{} waits for room",
            event.operation.as_str(),
            event.table_name,
            event.record_id
        );

        runtime.spawn(async move {
            let error = match queue.send_timeout(Arc::clone(&event), wait).await {
                Ok(()) => return,
                Err(mpsc::error::SendTimeoutError::Timeout(_)) => EmitError::Full,
                Err(mpsc::error::SendTimeoutError::Closed(_)) => EmitError::Closed,
            };
            dead_letter.handle(&event, &error);
        });
    }

    /// Subscribe to every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SharedEvent> {
        self.live.subscribe()
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: RecordChangeEvent) -> Result<(), EmitError> {
        let event = Arc::new(event);

        // no live subscribers is not an error
        let _ = self.live.send(Arc::clone(&event));

        let error = match self.queue.try_send(Arc::clone(&event)) {
            Ok(()) => return Ok(()),
            Err(mpsc::error::TrySendError::Full(event)) => match Handle::try_current() {
                Ok(runtime) => {
                    self.send_later(runtime, event);
                    return Ok(());
                }
                // no runtime to wait on
                Err(_) => EmitError::Full,
            },
            Err(mpsc::error::TrySendError::Closed(_)) => EmitError::Closed,
        };
        self.dead_letter.handle(&event, &error);
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collecting(Mutex<Vec<(i64, EmitError)>>);

    impl DeadLetterHandler for Collecting {
        fn handle(&self, event: &RecordChangeEvent, error: &EmitError) {
            self.0.lock().unwrap().push((event.record_id, error.clone()));
        }
    }

    fn event(record_id: i64) -> RecordChangeEvent {
        RecordChangeEvent {
            id: Uuid::new_v4(),
            table_id: Uuid::new_v4(),
            table_name: "items".to_string(),
            operation: RecordOperation::Insert,
            record_id,
            before: None,
            after: Some(Record::new()),
            actor: None,
            depth: 0,
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn overflow_waits_for_queue_room() {
        let dead = Arc::new(Collecting::default());
        let (bus, mut rx) = EventBus::new(1, dead.clone());
        let mut live = bus.subscribe();

        bus.emit(event(1)).unwrap();
        bus.emit(event(2)).unwrap();

        assert_eq!(rx.recv().await.unwrap().record_id, 1);
        assert_eq!(rx.recv().await.unwrap().record_id, 2);
        assert!(dead.0.lock().unwrap().is_empty());
        // subscribers see every event straight away
        assert_eq!(live.recv().await.unwrap().record_id, 1);
        assert_eq!(live.recv().await.unwrap().record_id, 2);
    }

    #[tokio::test]
    async fn overflow_goes_to_dead_letter_after_the_wait() {
        let dead = Arc::new(Collecting::default());
        let (bus, mut rx) = EventBus::new(1, dead.clone());
        let bus = bus.with_overflow_wait(Duration::from_millis(20));

        bus.emit(event(1)).unwrap();
        bus.emit(event(2)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(dead.0.lock().unwrap().as_slice(), &[(2, EmitError::Full)]);

        assert_eq!(rx.recv().await.unwrap().record_id, 1);
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert_eq!(bus.emit(event(3)), Err(EmitError::Closed));
        assert_eq!(dead.0.lock().unwrap().len(), 2);
    }
}
