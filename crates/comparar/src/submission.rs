//! Snapshot submissions as received from browsers.

use crate::artifacts::ArtifactLayout;
use crate::result::CompararResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application event a snapshot was taken around
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEvent {
    /// Kind of event (e.g. `click`)
    pub event_type: String,
    /// Name of the event target
    pub event_name: String,
}

impl SnapshotEvent {
    /// Create an event
    #[must_use]
    pub fn new(event_type: impl Into<String>, event_name: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            event_name: event_name.into(),
        }
    }
}

/// One browser's snapshot set for an identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Identifier grouping one snapshot set per browser
    pub identifier: String,
    /// Submitting browser
    pub browser: String,
    /// Event the snapshots belong to
    pub event: SnapshotEvent,
    /// Client timestamp (epoch ms); the coordinator's clock is used when absent
    pub timestamp: Option<i64>,
    /// Snapshot files, one per stage, relative to the run's snapshots dir
    pub file_names: Vec<String>,
    /// Run date string scoping artifact paths
    pub date_string: Option<String>,
}

impl Submission {
    /// Create a submission
    #[must_use]
    pub fn new(
        identifier: impl Into<String>,
        browser: impl Into<String>,
        file_names: Vec<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            browser: browser.into(),
            event: SnapshotEvent::default(),
            timestamp: None,
            file_names,
            date_string: None,
        }
    }

    /// Set the event
    #[must_use]
    pub fn with_event(mut self, event: SnapshotEvent) -> Self {
        self.event = event;
        self
    }

    /// Set the client timestamp
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the run date string
    #[must_use]
    pub fn with_date_string(mut self, date: impl Into<String>) -> Self {
        self.date_string = Some(date.into());
        self
    }

    /// Check that every name used to build artifact paths stays inside
    /// the artifact root
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` naming the first offending field.
    pub fn validate(&self) -> CompararResult<()> {
        ArtifactLayout::check_component("id", &self.identifier)?;
        ArtifactLayout::check_component("browser", &self.browser)?;
        if let Some(date) = &self.date_string {
            ArtifactLayout::check_component("dateString", date)?;
        }
        for file in &self.file_names {
            ArtifactLayout::check_relative("fileNames", Path::new(file))?;
        }
        Ok(())
    }
}

/// What the coordinator keeps per `(identifier, browser)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    /// Submitting browser
    pub browser: String,
    /// Snapshot timestamp (epoch ms)
    pub timestamp: i64,
    /// Snapshot files, one per stage
    pub file_names: Vec<String>,
    /// Event reported with the snapshots
    pub event: SnapshotEvent,
    /// Run date string the files were stored under
    pub date_string: String,
}
