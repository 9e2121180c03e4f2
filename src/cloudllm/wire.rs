//! Typed pub/sub broadcast bus decoupling agent activity from UI consumption.
//!
//! Grounded on `original_source/reagent/session/wire.py`, expressed through
//! the teacher's `event.rs` enum-of-variants convention. Per SPEC_FULL §9
//! decision (i), each subscriber gets an unbounded `tokio::sync::mpsc`
//! channel, matching the source's unbounded-queue choice.

use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value as Json;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// The exhaustive set of wire event types (SPEC_FULL §4.4/§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    TurnBegin,
    TurnEnd,
    StepBegin,
    Text,
    Thinking,
    ToolCall,
    ToolResult,
    Observation,
    Hypothesis,
    Finding,
    TargetInfo,
    SubagentBegin,
    SubagentEnd,
    Compaction,
    Dmail,
    Error,
    Status,
    PtyExit,
}

/// One event plus its payload, or the terminal sentinel closing a subscriber.
#[derive(Debug, Clone)]
pub enum WireEvent {
    Event { event_type: EventType, data: Json },
    /// Delivered exactly once to each subscriber when the wire closes
    /// (SPEC_FULL §8 property 6).
    Closed,
}

impl WireEvent {
    pub fn new(event_type: EventType, data: Json) -> Self {
        WireEvent::Event { event_type, data }
    }
}

struct Subscriber {
    id: u64,
    sender: UnboundedSender<WireEvent>,
}

/// A single-producer, multi-consumer broadcast bus.
///
/// `send` enqueues non-blockingly to every live subscriber (FIFO per
/// subscriber, SPEC_FULL §8 property 5). After `close()`, every later send is
/// a no-op (property 6) and each subscriber has already received exactly one
/// [`WireEvent::Closed`].
pub struct Wire {
    subscribers: Mutex<Vec<Subscriber>>,
    next_subscriber_id: Mutex<u64>,
    closed: Mutex<bool>,
}

/// Handle returned by [`Wire::subscribe`]; also accepted by [`Wire::unsubscribe`].
pub struct Subscription {
    id: u64,
    pub receiver: UnboundedReceiver<WireEvent>,
}

impl Default for Wire {
    fn default() -> Self {
        Self::new()
    }
}

impl Wire {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_subscriber_id: Mutex::new(0),
            closed: Mutex::new(false),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut id_guard = self.next_subscriber_id.lock().unwrap();
        let id = *id_guard;
        *id_guard += 1;
        drop(id_guard);

        if *self.closed.lock().unwrap() {
            // A subscriber joining a closed wire still gets its one terminal
            // sentinel, never a live stream.
            let _ = tx.send(WireEvent::Closed);
        } else {
            self.subscribers.lock().unwrap().push(Subscriber { id, sender: tx });
        }
        Subscription { id, receiver: rx }
    }

    /// Safe even for a subscription that is not (or no longer) a member.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.subscribers.lock().unwrap().retain(|s| s.id != subscription.id);
    }

    pub fn send(&self, event_type: EventType, data: Json) {
        if *self.closed.lock().unwrap() {
            return;
        }
        let event = WireEvent::new(event_type, data);
        let subscribers = self.subscribers.lock().unwrap();
        for sub in subscribers.iter() {
            // An unbounded channel send only fails if the receiver was
            // dropped; that subscriber simply misses subsequent events.
            let _ = sub.sender.send(event.clone());
        }
    }

    /// Idempotent in effect: the first call sends the terminal sentinel to
    /// every current subscriber and marks the wire closed; later calls are
    /// no-ops.
    pub fn close(&self) {
        let mut closed = self.closed.lock().unwrap();
        if *closed {
            return;
        }
        *closed = true;
        let subscribers = self.subscribers.lock().unwrap();
        for sub in subscribers.iter() {
            let _ = sub.sender.send(WireEvent::Closed);
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn events_are_fifo_per_subscriber() {
        let wire = Wire::new();
        let mut sub = wire.subscribe();
        wire.send(EventType::Text, json!({"text": "a"}));
        wire.send(EventType::Text, json!({"text": "b"}));

        let first = sub.receiver.recv().await.unwrap();
        let second = sub.receiver.recv().await.unwrap();
        match (first, second) {
            (WireEvent::Event { data: d1, .. }, WireEvent::Event { data: d2, .. }) => {
                assert_eq!(d1["text"], "a");
                assert_eq!(d2["text"], "b");
            }
            _ => panic!("expected events"),
        }
    }

    #[tokio::test]
    async fn close_drops_sends_and_delivers_sentinel_once() {
        let wire = Wire::new();
        let mut sub = wire.subscribe();
        wire.close();
        wire.send(EventType::Status, json!({}));

        let first = sub.receiver.recv().await.unwrap();
        assert!(matches!(first, WireEvent::Closed));
        // no further events, channel now empty (sender dropped isn't required;
        // a second recv should simply find nothing buffered).
        assert!(sub.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_is_safe_for_non_member() {
        let wire = Wire::new();
        let sub = wire.subscribe();
        wire.unsubscribe(&sub);
        wire.unsubscribe(&sub);
    }
}
