//! Topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Connection`] | Supervisor lifecycle changes, reconnect exhaustion |
//! | [`Topic::Relay`] | Relay-board changes, device errors, relay sessions |
//! | [`Topic::Transit`] | Transit progress and terminal failures |
//! | [`Topic::Alerts`] | Operator-facing alerts |
//!
//! Components normally call [`EventBus::emit`], which delivers the event to
//! its topic lane *and* to the global channel that the gateway streams to
//! dashboards.

use std::fmt;
use std::str::FromStr;

use liftlink_types::{Event, LiftError};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// First-class routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Connection,
    Relay,
    Transit,
    Alerts,
}

impl Topic {
    pub const ALL: [Topic; 4] = [Topic::Connection, Topic::Relay, Topic::Transit, Topic::Alerts];

    pub fn as_str(self) -> &'static str {
        match self {
            Topic::Connection => "connection",
            Topic::Relay => "relay",
            Topic::Transit => "transit",
            Topic::Alerts => "alerts",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = LiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| LiftError::Channel(format!("unknown topic '{s}'")))
    }
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    global: broadcast::Sender<Event>,
    connection: broadcast::Sender<Event>,
    relay: broadcast::Sender<Event>,
    transit: broadcast::Sender<Event>,
    alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus; `capacity` applies to every channel independently.
    pub fn new(capacity: usize) -> Self {
        let (global, _) = broadcast::channel(capacity);
        let (connection, _) = broadcast::channel(capacity);
        let (relay, _) = broadcast::channel(capacity);
        let (transit, _) = broadcast::channel(capacity);
        let (alerts, _) = broadcast::channel(capacity);
        Self {
            global,
            connection,
            relay,
            transit,
            alerts,
        }
    }

    /// Publish `event` to its topic lane and to the global channel.
    ///
    /// Having nobody listening is normal, so delivery failures are ignored.
    /// Returns the total number of receivers handed the event.
    pub fn emit(&self, topic: Topic, event: Event) -> usize {
        let on_topic = self.publish_to(topic, event.clone()).unwrap_or(0);
        let on_global = self.publish(event).unwrap_or(0);
        on_topic + on_global
    }

    // -----------------------------------------------------------------------
    // Topic-based API
    // -----------------------------------------------------------------------

    /// Publish `event` to one [`Topic`] channel.
    ///
    /// Returns [`LiftError::Channel`] when the topic has no subscribers.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, LiftError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| LiftError::Channel(format!("no subscribers for topic {topic}")))
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    // -----------------------------------------------------------------------
    // Global API
    // -----------------------------------------------------------------------

    /// Publish an event to the global channel only.
    pub fn publish(&self, event: Event) -> Result<usize, LiftError> {
        self.global
            .send(event)
            .map_err(|e| LiftError::Channel(format!("event bus send error: {e}")))
    }

    /// Subscribe to every event emitted on any topic.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.global.subscribe()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Connection => &self.connection,
            Topic::Relay => &self.relay,
            Topic::Transit => &self.transit,
            Topic::Alerts => &self.alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`] channel.
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// `Lagged(n)` means the subscriber fell behind and `n` events were
    /// dropped; `Closed` means the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}
