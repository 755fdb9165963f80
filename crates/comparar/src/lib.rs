//! Comparar: cross-browser snapshot synchronization and visual comparison
//!
//! Comparar (Spanish: "to compare") waits until every active browser has
//! reported its snapshots for an interaction, then diffs each browser
//! against a baseline browser, stage by stage, and records the outcome.
//! Browsers that stop reporting are dropped after a timeout so the rest of
//! the session keeps making progress.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    COMPARAR Architecture                        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌────────────┐    ┌────────────┐            │
//! │   │ Submission │    │ Snapshot   │    │ Comparison │            │
//! │   │ (browser,  │───►│ Coordinator│───►│ Engine     │            │
//! │   │  id, files)│    │ (barrier)  │    │ (fan-out)  │            │
//! │   └────────────┘    └─────┬──────┘    └─────┬──────┘            │
//! │                           │                 │                   │
//! │                     ┌─────▼──────┐    ┌─────▼──────┐            │
//! │                     │ Deactivation│   │ ImageDiffer│            │
//! │                     │ Timers     │    │ + Artifact │            │
//! │                     └────────────┘    │   Store    │            │
//! │                                       └─────┬──────┘            │
//! │                                       ┌─────▼──────┐            │
//! │                                       │ Event Log  │            │
//! │                                       └────────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use comparar::{
//!     FsArtifactStore, PixelDiffer, SessionConfig, SnapshotCoordinator, Submission,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> comparar::CompararResult<()> {
//! let config = SessionConfig::new().with_browsers(["chrome", "firefox"]);
//! let store = Arc::new(FsArtifactStore::new(&config.snapshot_destination_dir));
//! let coordinator = SnapshotCoordinator::start(config, Arc::new(PixelDiffer), store)?;
//!
//! coordinator
//!     .submit(Submission::new("login", "chrome", vec!["login/chrome_before.png".into()]))
//!     .await?;
//! let outcome = coordinator
//!     .submit(Submission::new("login", "firefox", vec!["login/firefox_before.png".into()]))
//!     .await?;
//! if let Some(comparison) = outcome.comparison {
//!     let event = comparison.wait().await?;
//!     println!("compared {} browsers", event.browsers.len());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod artifacts;
mod config;
mod coordinator;
mod diff;
mod engine;
mod event_log;
mod registry;
mod result;
mod submission;
mod timers;

pub use artifacts::{ArtifactLayout, ArtifactStore, FsArtifactStore, MemoryArtifactStore};
pub use config::{
    SessionConfig, DEFAULT_CONFIG_PATH, DEFAULT_STARTUP_WAITING_MS, DEFAULT_WAITING_RESPONSE_MS,
};
pub use coordinator::{
    barrier_satisfied, ArmedTimerStatus, ComparisonHandle, SessionStatus, SnapshotCoordinator,
    SubmitOutcome,
};
pub use diff::{
    DiffBounds, DiffOptions, DiffOutcome, DiffReport, DimensionDifference, ErrorColor,
    ImageDiffer, PixelDiffer,
};
pub use engine::{ComparisonEngine, ComparisonJob, ComparisonRecord, PairReport};
pub use event_log::{ComparedBrowser, ComparisonEvent, EventLog};
pub use registry::BrowserRegistry;
pub use result::{CompararError, CompararResult};
pub use submission::{SnapshotEvent, Submission, SubmissionRecord};
pub use timers::DeactivationTimers;
