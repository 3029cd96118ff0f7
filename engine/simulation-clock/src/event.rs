//! Clock lifecycle events

use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Kind of lifecycle event published by a clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClockEventType {
    Started,
    Stopped,
    SwitchToRealTime,
    SwitchToSimTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockEvent {
    pub event_type: ClockEventType,

    /// Simulated time when the event was published
    pub time: i64,

    pub wall_clock: DateTime<Utc>,
}

struct Subscriber {
    filter: Option<Vec<ClockEventType>>,
    sender: Sender<ClockEvent>,
}

impl Subscriber {
    fn wants(&self, event_type: ClockEventType) -> bool {
        self.filter.as_ref().map_or(true, |types| types.contains(&event_type))
    }
}

/// Fan-out of clock events to any number of channel subscribers.
///
/// Subscribers whose receiver has been dropped are removed on the next publish.
#[derive(Default)]
pub struct EventDispatcher {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event
    pub fn subscribe(&self) -> Receiver<ClockEvent> {
        self.add_subscriber(None)
    }

    /// Receive only the given event types
    pub fn subscribe_to(&self, types: &[ClockEventType]) -> Receiver<ClockEvent> {
        self.add_subscriber(Some(types.to_vec()))
    }

    fn add_subscriber(&self, filter: Option<Vec<ClockEventType>>) -> Receiver<ClockEvent> {
        let (sender, receiver) = channel::unbounded();
        self.subscribers.lock().push(Subscriber { filter, sender });
        receiver
    }

    pub fn publish(&self, event_type: ClockEventType, time: i64) {
        let event = ClockEvent { event_type, time, wall_clock: Utc::now() };
        tracing::debug!(event = ?event_type, time, "Publishing clock event");

        self.subscribers.lock().retain(|subscriber| {
            if !subscriber.wants(event_type) {
                return true;
            }
            subscriber.sender.send(event.clone()).is_ok()
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
