//! Per-conversation typed pub/sub: assigns sequence numbers, fans events out
//! to a bounded broadcast channel and to registered observers (the JSONL
//! sink, the manifest tracker), and keeps a small ring buffer for late
//! subscribers.
//!
//! Grounded on the parent lineage's `EventBus` (broadcast channel +
//! `Mutex`-guarded observer list + atomic sequence counter), narrowed to one
//! bus per conversation — there is no cross-conversation routing here.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::event::{Event, EventKind};

const CHANNEL_CAPACITY: usize = 1024;
const DEFAULT_RECENT_CAPACITY: usize = 1000;

#[async_trait]
pub trait EventObserver: Send + Sync {
    async fn on_event(&self, event: &Event);
}

pub struct EventBus {
    conversation_id: String,
    sender: broadcast::Sender<Event>,
    observers: Arc<Mutex<Vec<Arc<dyn EventObserver>>>>,
    sequence: AtomicU64,
    recent: Arc<Mutex<VecDeque<Event>>>,
    recent_capacity: usize,
}

impl EventBus {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self::with_recent_capacity(conversation_id, DEFAULT_RECENT_CAPACITY)
    }

    pub fn with_recent_capacity(conversation_id: impl Into<String>, recent_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            conversation_id: conversation_id.into(),
            sender,
            observers: Arc::new(Mutex::new(Vec::new())),
            sequence: AtomicU64::new(0),
            recent: Arc::new(Mutex::new(VecDeque::with_capacity(recent_capacity))),
            recent_capacity,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn add_observer(&self, observer: Arc<dyn EventObserver>) {
        self.observers.lock().push(observer);
    }

    /// The last K events retained in memory, oldest first.
    pub fn recent(&self) -> Vec<Event> {
        self.recent.lock().iter().cloned().collect()
    }

    /// Assign a sequence number and timestamp, then dispatch.
    pub async fn emit(&self, kind: EventKind) -> Event {
        let event = Event {
            conversation_id: self.conversation_id.clone(),
            timestamp: chrono::Utc::now(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            kind,
        };
        self.dispatch(event.clone()).await;
        event
    }

    async fn dispatch(&self, event: Event) {
        {
            let mut recent = self.recent.lock();
            if recent.len() >= self.recent_capacity {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }
        let _ = self.sender.send(event.clone());

        let observers: Vec<_> = self.observers.lock().iter().cloned().collect();
        for observer in observers {
            observer.on_event(&event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex as TokioMutex;

    struct RecordingObserver {
        events: Arc<TokioMutex<Vec<Event>>>,
    }

    #[async_trait]
    impl EventObserver for RecordingObserver {
        async fn on_event(&self, event: &Event) {
            self.events.lock().await.push(event.clone());
        }
    }

    #[tokio::test]
    async fn sequence_numbers_start_at_zero_and_increase() {
        let bus = EventBus::new("conv_1");
        let e1 = bus.emit(EventKind::ConversationStart).await;
        let e2 = bus.emit(EventKind::TurnStart { turn: 1 }).await;
        assert_eq!(e1.sequence, 0);
        assert_eq!(e2.sequence, 1);
    }

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new("conv_1");
        let mut rx = bus.subscribe();
        bus.emit(EventKind::ConversationStart).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.conversation_id, "conv_1");
    }

    #[tokio::test]
    async fn observers_are_notified_in_registration_order() {
        let bus = EventBus::new("conv_1");
        let events = Arc::new(TokioMutex::new(Vec::new()));
        bus.add_observer(Arc::new(RecordingObserver {
            events: events.clone(),
        }));

        bus.emit(EventKind::ConversationStart).await;
        bus.emit(EventKind::TurnStart { turn: 1 }).await;

        let recorded = events.lock().await;
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].sequence, 0);
        assert_eq!(recorded[1].sequence, 1);
    }

    #[tokio::test]
    async fn recent_ring_buffer_is_bounded() {
        let bus = EventBus::with_recent_capacity("conv_1", 2);
        bus.emit(EventKind::ConversationStart).await;
        bus.emit(EventKind::TurnStart { turn: 1 }).await;
        bus.emit(EventKind::TurnStart { turn: 2 }).await;
        let recent = bus.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].sequence, 1);
        assert_eq!(recent[1].sequence, 2);
    }
}
