//! Append-only log of completed comparisons.

use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;

/// A browser that took part in a comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparedBrowser {
    /// Browser name
    pub name: String,
    /// Timestamp (epoch ms) the browser attached to its snapshot
    pub sent_snapshot_timestamp: i64,
}

/// Record of one successful comparison of an identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonEvent {
    /// Snapshot identifier
    pub id: String,
    /// Event type reported with the snapshot
    pub event_type: String,
    /// Event name reported with the snapshot
    pub event_name: String,
    /// When the comparison finished (epoch ms)
    pub comparison_timestamp: i64,
    /// Participating browsers, baseline first
    pub browsers: Vec<ComparedBrowser>,
}

/// Append-only, shareable event log
#[derive(Debug)]
pub struct EventLog {
    events: RwLock<Vec<ComparisonEvent>>,
    notify: broadcast::Sender<ComparisonEvent>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(64);
        Self {
            events: RwLock::new(Vec::new()),
            notify,
        }
    }

    /// Append an event and notify subscribers
    pub fn append(&self, event: ComparisonEvent) {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        // No subscribers is fine
        let _ = self.notify.send(event);
    }

    /// Copy of every event, in completion order
    #[must_use]
    pub fn all(&self) -> Vec<ComparisonEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded events
    #[must_use]
    pub fn len(&self) -> usize {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been recorded yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receive every event appended from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ComparisonEvent> {
        self.notify.subscribe()
    }
}
