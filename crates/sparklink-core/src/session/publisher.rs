//! Event publishing for dashboards and other observers

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use super::SessionState;
use crate::map::IgnitionMap;
use crate::telemetry::TelemetrySample;

/// Something observers care about
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Session moved to a new state
    StateChanged(SessionState),
    /// A new live sample was decoded
    TelemetryUpdated(TelemetrySample),
    /// A complete map is available (after a transfer or a refresh request)
    MapUpdated(Box<IgnitionMap>),
}

/// Fan-out of session events
///
/// Slow subscribers lag and lose the oldest events instead of holding up
/// the session.
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: broadcast::Sender<SessionEvent>,
}

impl Publisher {
    /// Create a publisher buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Push an event to every subscriber
    pub fn publish(&self, event: SessionEvent) {
        // No subscribers is not an error
        if self.tx.send(event).is_err() {
            trace!("Event dropped, no subscribers");
        }
    }
}
