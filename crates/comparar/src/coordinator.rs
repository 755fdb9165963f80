//! Snapshot coordinator: the completion barrier across browsers.
//!
//! ## Architecture
//!
//! ```text
//!  submit() ──┐                          ┌──► ComparisonEngine (spawned)
//!             ├──► Command queue ──► Session turn ──┤        │
//!  timer  ────┘      (mpsc)          (no .await)    │        ▼
//!                                                   │   EventLog::append
//!  ComparisonFinished ◄─────────────────────────────┴────────┘
//! ```
//!
//! One task owns the registry, the timers and every identifier's
//! submissions. Each command is handled as a single synchronous turn, so
//! barrier evaluation and state mutation never interleave with another
//! submission or timeout. Only comparisons run outside the turn.

use crate::artifacts::ArtifactStore;
use crate::config::SessionConfig;
use crate::diff::ImageDiffer;
use crate::engine::{ComparisonEngine, ComparisonJob};
use crate::event_log::{ComparisonEvent, EventLog};
use crate::registry::BrowserRegistry;
use crate::result::{CompararError, CompararResult};
use crate::submission::{SnapshotEvent, Submission, SubmissionRecord};
use crate::timers::DeactivationTimers;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Whether an identifier with `submitted` browser records can be compared
/// while `active` browsers remain
///
/// A single active browser has nothing to compare against.
#[must_use]
pub const fn barrier_satisfied(submitted: usize, active: usize) -> bool {
    active > 1 && submitted == active
}

/// Milliseconds since the Unix epoch
fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

enum Command {
    Submit {
        submission: Submission,
        reply: oneshot::Sender<CompararResult<SubmitOutcome>>,
    },
    Timeout {
        browser: String,
        generation: u64,
        last_event: Option<SnapshotEvent>,
    },
    ComparisonFinished {
        identifier: String,
        succeeded: bool,
    },
    IsActive {
        browser: String,
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    Shutdown,
}

/// A comparison started by a submission
#[derive(Debug)]
pub struct ComparisonHandle {
    identifier: String,
    task: JoinHandle<CompararResult<ComparisonEvent>>,
}

impl ComparisonHandle {
    /// Identifier being compared
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Wait for the comparison to finish
    ///
    /// Dropping the handle instead lets the comparison run to completion
    /// in the background.
    ///
    /// # Errors
    ///
    /// Returns the comparison's error, or `ComparisonFailure` if the task
    /// itself died.
    pub async fn wait(self) -> CompararResult<ComparisonEvent> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(CompararError::ComparisonFailure {
                identifier: self.identifier,
                failed: 0,
                total: 0,
                message: format!("comparison task aborted: {e}"),
            }),
        }
    }
}

/// Result of an accepted submission
#[derive(Debug)]
pub struct SubmitOutcome {
    /// Set when this submission completed the identifier's barrier
    pub comparison: Option<ComparisonHandle>,
}

impl SubmitOutcome {
    /// Whether the submission triggered a comparison
    #[must_use]
    pub const fn triggered_comparison(&self) -> bool {
        self.comparison.is_some()
    }
}

/// Remaining time of an armed deactivation timer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmedTimerStatus {
    /// Browser the timer belongs to
    pub browser: String,
    /// Milliseconds until the browser is deactivated
    pub remaining_ms: u64,
}

/// Snapshot of the session state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// Baseline browser
    pub baseline: String,
    /// Browsers still active
    pub active_browsers: Vec<String>,
    /// Armed deactivation timers
    pub armed_timers: Vec<ArmedTimerStatus>,
    /// Identifiers without a successful comparison, with the browsers that submitted
    pub pending_identifiers: BTreeMap<String, Vec<String>>,
    /// Identifiers compared successfully at least once
    pub completed_identifiers: Vec<String>,
}

#[derive(Debug, Default)]
struct IdentifierState {
    records: BTreeMap<String, SubmissionRecord>,
    last_event: SnapshotEvent,
    completed: bool,
}

struct Session {
    config: SessionConfig,
    registry: BrowserRegistry,
    timers: DeactivationTimers,
    identifiers: HashMap<String, IdentifierState>,
    engine: ComparisonEngine,
    events: Arc<EventLog>,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl Session {
    fn arm_timer(&mut self, browser: &str, window: Duration, last_event: Option<SnapshotEvent>) {
        let commands = self.commands.clone();
        let name = browser.to_string();
        self.timers.arm(browser, window, move |generation| {
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::Timeout {
                    browser: name,
                    generation,
                    last_event,
                });
            }
        });
    }

    fn arm_startup_timers(&mut self) {
        let window = self.config.startup_waiting();
        let browsers: Vec<String> = self.registry.active_browsers().iter().cloned().collect();
        for browser in browsers {
            self.arm_timer(&browser, window, None);
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!(
            baseline = %self.registry.baseline(),
            browsers = ?self.registry.active_browsers(),
            "snapshot coordinator started"
        );

        while let Some(command) = commands.recv().await {
            match command {
                Command::Submit { submission, reply } => {
                    let _ = reply.send(self.submit(submission));
                }
                Command::Timeout {
                    browser,
                    generation,
                    last_event,
                } => {
                    if self.timers.take_fired(&browser, generation) {
                        self.on_browser_timeout(&browser, last_event.as_ref());
                    } else {
                        debug!(browser = %browser, generation, "ignoring superseded timer");
                    }
                }
                Command::ComparisonFinished {
                    identifier,
                    succeeded,
                } => self.on_comparison_finished(&identifier, succeeded),
                Command::IsActive { browser, reply } => {
                    let _ = reply.send(self.registry.is_active(&browser));
                }
                Command::Status { reply } => {
                    let _ = reply.send(self.status());
                }
                Command::Shutdown => break,
            }
        }

        self.timers.cancel_all();
        info!("snapshot coordinator stopped");
    }

    fn submit(&mut self, submission: Submission) -> CompararResult<SubmitOutcome> {
        submission.validate()?;
        if self.registry.is_empty() {
            warn!("there are no browsers to compare");
        }

        let Submission {
            identifier,
            browser,
            event,
            timestamp,
            file_names,
            date_string,
        } = submission;

        if !self.registry.is_active(&browser) {
            warn!(browser = %browser, identifier = %identifier, "inactive browser requested");
            return Err(CompararError::InactiveBrowser { browser });
        }

        self.arm_timer(&browser, self.config.waiting_response(), Some(event.clone()));

        let record = SubmissionRecord {
            browser: browser.clone(),
            timestamp: timestamp.unwrap_or_else(now_millis),
            file_names,
            event: event.clone(),
            date_string: self.config.resolve_date(date_string),
        };
        debug!(
            browser = %browser,
            identifier = %identifier,
            stages = record.file_names.len(),
            "snapshot received"
        );

        let state = self.identifiers.entry(identifier.clone()).or_default();
        state.records.insert(browser, record);
        state.last_event = event;

        Ok(SubmitOutcome {
            comparison: self.evaluate(&identifier),
        })
    }

    /// Start a comparison of `identifier` if its barrier is satisfied
    fn evaluate(&self, identifier: &str) -> Option<ComparisonHandle> {
        let state = self.identifiers.get(identifier)?;
        let active = self.registry.len();

        if !barrier_satisfied(state.records.len(), active) {
            debug!(
                identifier,
                submitted = state.records.len(),
                active,
                "waiting for more browsers"
            );
            return None;
        }

        let job = ComparisonJob {
            identifier: identifier.to_string(),
            baseline: self.registry.baseline().to_string(),
            event: state.last_event.clone(),
            records: state.records.values().cloned().collect(),
        };
        Some(self.spawn_comparison(job))
    }

    fn spawn_comparison(&self, job: ComparisonJob) -> ComparisonHandle {
        info!(
            identifier = %job.identifier,
            browsers = job.records.len(),
            "all active browsers submitted, comparing"
        );

        let engine = self.engine.clone();
        let events = Arc::clone(&self.events);
        let commands = self.commands.clone();
        let identifier = job.identifier.clone();

        let task = tokio::spawn(async move {
            let result = match engine.compare(&job).await {
                Ok(reports) => {
                    let event = job.to_event(now_millis());
                    events.append(event.clone());
                    info!(identifier = %job.identifier, pairs = reports.len(), "comparison recorded");
                    Ok(event)
                }
                Err(e) => {
                    warn!(identifier = %job.identifier, error = %e, "comparison abandoned");
                    Err(e)
                }
            };

            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::ComparisonFinished {
                    identifier: job.identifier.clone(),
                    succeeded: result.is_ok(),
                });
            }
            result
        });

        ComparisonHandle { identifier, task }
    }

    fn on_browser_timeout(&mut self, browser: &str, last_event: Option<&SnapshotEvent>) {
        match last_event {
            Some(event) => info!(
                browser,
                event_type = %event.event_type,
                event_name = %event.event_name,
                "browser stopped sending snapshots, deactivating"
            ),
            None => info!(browser, "browser sent no snapshot during startup, deactivating"),
        }

        self.registry.deactivate(browser);
        if self.registry.is_empty() {
            self.timers.cancel_all();
            info!("no comparable browsers left, pending identifiers abandoned");
        } else if self.registry.len() == 1 {
            info!("a single browser is left, nothing to compare against");
        }

        let identifiers: Vec<String> = self.identifiers.keys().cloned().collect();
        for identifier in identifiers {
            let Some(state) = self.identifiers.get_mut(&identifier) else {
                continue;
            };
            state.records.remove(browser);
            if state.completed {
                continue;
            }
            // Runs detached; the event log records the outcome
            drop(self.evaluate(&identifier));
        }
    }

    fn on_comparison_finished(&mut self, identifier: &str, succeeded: bool) {
        if !succeeded {
            return;
        }
        if let Some(state) = self.identifiers.get_mut(identifier) {
            state.completed = true;
        }
    }

    fn status(&self) -> SessionStatus {
        let now = tokio::time::Instant::now();
        let mut pending_identifiers = BTreeMap::new();
        let mut completed_identifiers = Vec::new();

        for (identifier, state) in &self.identifiers {
            if state.completed {
                completed_identifiers.push(identifier.clone());
            } else {
                pending_identifiers.insert(
                    identifier.clone(),
                    state.records.keys().cloned().collect(),
                );
            }
        }
        completed_identifiers.sort();

        SessionStatus {
            baseline: self.registry.baseline().to_string(),
            active_browsers: self.registry.active_browsers().iter().cloned().collect(),
            armed_timers: self
                .timers
                .deadlines()
                .into_iter()
                .map(|(browser, deadline)| ArmedTimerStatus {
                    browser,
                    remaining_ms: deadline.saturating_duration_since(now).as_millis() as u64,
                })
                .collect(),
            pending_identifiers,
            completed_identifiers,
        }
    }
}

/// Handle to a running comparison session
///
/// Cheap to clone; every clone talks to the same session task. The
/// session stops when [`SnapshotCoordinator::shutdown`] is called or the
/// last handle is dropped.
#[derive(Debug, Clone)]
pub struct SnapshotCoordinator {
    commands: mpsc::UnboundedSender<Command>,
    events: Arc<EventLog>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submit { submission, .. } => f
                .debug_struct("Submit")
                .field("identifier", &submission.identifier)
                .field("browser", &submission.browser)
                .finish(),
            Self::Timeout {
                browser,
                generation,
                ..
            } => f
                .debug_struct("Timeout")
                .field("browser", browser)
                .field("generation", generation)
                .finish(),
            Self::ComparisonFinished {
                identifier,
                succeeded,
            } => f
                .debug_struct("ComparisonFinished")
                .field("identifier", identifier)
                .field("succeeded", succeeded)
                .finish(),
            Self::IsActive { browser, .. } => {
                f.debug_struct("IsActive").field("browser", browser).finish()
            }
            Self::Status { .. } => f.write_str("Status"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl SnapshotCoordinator {
    /// Start a session and arm the startup grace timer of every browser
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub fn start(
        config: SessionConfig,
        differ: Arc<dyn ImageDiffer>,
        store: Arc<dyn ArtifactStore>,
    ) -> CompararResult<Self> {
        config.validate()?;

        let (commands, receiver) = mpsc::unbounded_channel();
        let events = Arc::new(EventLog::new());
        let mut session = Session {
            registry: BrowserRegistry::new(config.base_browser.clone(), config.browsers.clone()),
            timers: DeactivationTimers::new(),
            identifiers: HashMap::new(),
            engine: ComparisonEngine::new(differ, store, config.diff.clone()),
            events: Arc::clone(&events),
            commands: commands.downgrade(),
            config,
        };
        session.arm_startup_timers();
        tokio::spawn(session.run(receiver));

        Ok(Self { commands, events })
    }

    /// Record a browser's snapshots for an identifier
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` if a name in the submission could leave the
    /// artifact root, `InactiveBrowser` if the browser was deactivated (or
    /// never configured), or `CoordinatorClosed` if the session has stopped.
    pub async fn submit(&self, submission: Submission) -> CompararResult<SubmitOutcome> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Submit { submission, reply })
            .map_err(|_| CompararError::CoordinatorClosed)?;
        response
            .await
            .map_err(|_| CompararError::CoordinatorClosed)?
    }

    /// Whether `browser` may still submit
    ///
    /// The answer can change before a following [`submit`](Self::submit)
    /// is handled, which still rejects a browser deactivated in between.
    ///
    /// # Errors
    ///
    /// Returns `CoordinatorClosed` if the session has stopped.
    pub async fn is_active(&self, browser: &str) -> CompararResult<bool> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::IsActive {
                browser: browser.to_string(),
                reply,
            })
            .map_err(|_| CompararError::CoordinatorClosed)?;
        response.await.map_err(|_| CompararError::CoordinatorClosed)
    }

    /// Current session state
    ///
    /// # Errors
    ///
    /// Returns `CoordinatorClosed` if the session has stopped.
    pub async fn status(&self) -> CompararResult<SessionStatus> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Status { reply })
            .map_err(|_| CompararError::CoordinatorClosed)?;
        response.await.map_err(|_| CompararError::CoordinatorClosed)
    }

    /// The session's event log
    #[must_use]
    pub fn events(&self) -> Arc<EventLog> {
        Arc::clone(&self.events)
    }

    /// Every completed comparison, in completion order
    #[must_use]
    pub fn all_events(&self) -> Vec<ComparisonEvent> {
        self.events.all()
    }

    /// Stop the session and cancel all timers
    ///
    /// Comparisons already running still complete.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::artifacts::{ArtifactLayout, MemoryArtifactStore};
    use crate::diff::{DiffOptions, DiffOutcome};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use tokio::sync::watch;

    const DATE: &str = "2024-06-01";

    /// Differ that records the snapshot pairs it was handed
    ///
    /// Snapshot "files" contain their own name, so calls read as file pairs.
    #[derive(Default)]
    struct RecordingDiffer {
        calls: Mutex<Vec<(String, String)>>,
        fail_on: Option<String>,
    }

    impl RecordingDiffer {
        fn failing_on(file: &str) -> Self {
            Self {
                calls: Mutex::default(),
                fail_on: Some(file.to_string()),
            }
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ImageDiffer for RecordingDiffer {
        fn diff(
            &self,
            baseline: &[u8],
            compared: &[u8],
            _options: &DiffOptions,
        ) -> CompararResult<DiffOutcome> {
            let baseline = String::from_utf8_lossy(baseline).into_owned();
            let compared = String::from_utf8_lossy(compared).into_owned();
            if self.fail_on.as_deref() == Some(compared.as_str()) {
                return Err(CompararError::image(format!("cannot decode {compared}")));
            }
            self.calls.lock().unwrap().push((baseline, compared));
            Ok(DiffOutcome {
                score: 0.0,
                diff_image: vec![0],
                raw: serde_json::json!({}),
            })
        }
    }

    struct Harness {
        coordinator: SnapshotCoordinator,
        differ: Arc<RecordingDiffer>,
        store: Arc<MemoryArtifactStore>,
    }

    impl Harness {
        fn start(config: SessionConfig) -> Self {
            Self::with_differ(config, RecordingDiffer::default())
        }

        fn with_differ(config: SessionConfig, differ: RecordingDiffer) -> Self {
            let differ = Arc::new(differ);
            let store = Arc::new(MemoryArtifactStore::new());
            for file in ["a.png", "b.png", "c.png", "d.png", "bad.png"] {
                store.insert(
                    ArtifactLayout::snapshot_path(DATE, file),
                    file.as_bytes().to_vec(),
                );
            }
            let coordinator = SnapshotCoordinator::start(
                config.with_run_date(DATE),
                Arc::clone(&differ) as Arc<dyn ImageDiffer>,
                Arc::clone(&store) as Arc<dyn ArtifactStore>,
            )
            .unwrap();
            Self {
                coordinator,
                differ,
                store,
            }
        }

        async fn submit(
            &self,
            identifier: &str,
            browser: &str,
            files: &[&str],
        ) -> CompararResult<SubmitOutcome> {
            let submission = Submission::new(
                identifier,
                browser,
                files.iter().map(|f| (*f).to_string()).collect(),
            )
            .with_event(SnapshotEvent::new("click", format!("{identifier}-button")));
            self.coordinator.submit(submission).await
        }
    }

    fn config(browsers: &[&str]) -> SessionConfig {
        SessionConfig::new()
            .with_base_browser("chrome")
            .with_browsers(browsers.iter().copied())
            .with_waiting_response(Duration::from_secs(30))
    }

    #[test]
    fn test_barrier_rule() {
        assert!(barrier_satisfied(2, 2));
        assert!(barrier_satisfied(3, 3));
        assert!(!barrier_satisfied(1, 1));
        assert!(!barrier_satisfied(0, 0));
        assert!(!barrier_satisfied(1, 2));
        assert!(!barrier_satisfied(3, 2));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_barrier_needs_every_active_browser(submitted in 0usize..8, active in 0usize..8) {
                let satisfied = barrier_satisfied(submitted, active);
                prop_assert_eq!(satisfied, active >= 2 && submitted == active);
                if active < 2 {
                    prop_assert!(!satisfied);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_two_browsers_compare_once() {
        let h = Harness::start(config(&["chrome", "firefox"]));

        let first = h.submit("id1", "chrome", &["a.png"]).await.unwrap();
        assert!(!first.triggered_comparison());

        let second = h
            .coordinator
            .submit(
                Submission::new("id1", "firefox", vec!["b.png".to_string()])
                    .with_event(SnapshotEvent::new("click", "id1-button"))
                    .with_timestamp(1234),
            )
            .await
            .unwrap();
        let handle = second.comparison.expect("barrier should be satisfied");
        assert_eq!(handle.identifier(), "id1");
        let event = handle.wait().await.unwrap();

        assert_eq!(
            h.differ.calls(),
            vec![("a.png".to_string(), "b.png".to_string())]
        );
        assert_eq!(event.id, "id1");
        assert_eq!(event.event_type, "click");
        let names: Vec<_> = event.browsers.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["chrome", "firefox"]);
        assert_eq!(event.browsers[1].sent_snapshot_timestamp, 1234);
        assert_eq!(h.coordinator.all_events(), vec![event]);

        let status = h.coordinator.status().await.unwrap();
        assert_eq!(status.completed_identifiers, vec!["id1"]);
        assert!(status.pending_identifiers.is_empty());

        let record = Path::new(DATE).join("snapshots/id1/comparison_stage0_firefox.json");
        assert!(h.store.get(&record).is_some());
    }

    #[tokio::test]
    async fn test_single_browser_never_compares() {
        let h = Harness::start(config(&["chrome"]));

        let outcome = h.submit("id2", "chrome", &["a.png"]).await.unwrap();
        assert!(!outcome.triggered_comparison());
        let outcome = h.submit("id2", "chrome", &["b.png"]).await.unwrap();
        assert!(!outcome.triggered_comparison());

        let status = h.coordinator.status().await.unwrap();
        assert_eq!(status.pending_identifiers["id2"], vec!["chrome"]);
        assert!(h.coordinator.all_events().is_empty());
        assert!(h.differ.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_browser_rejected() {
        let h = Harness::start(config(&["chrome", "firefox"]));
        let err = h.submit("id1", "opera", &["a.png"]).await.unwrap_err();
        assert!(matches!(err, CompararError::InactiveBrowser { ref browser } if browser == "opera"));

        let status = h.coordinator.status().await.unwrap();
        assert!(status.pending_identifiers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_shrinks_requirement() {
        let h = Harness::start(
            config(&["chrome", "firefox", "safari"])
                .with_waiting_response(Duration::from_secs(120))
                .with_startup_waiting(Duration::from_secs(60)),
        );
        let mut events = h.coordinator.events().subscribe();

        let a = h.submit("x", "chrome", &["a.png"]).await.unwrap();
        let b = h.submit("x", "firefox", &["b.png"]).await.unwrap();
        assert!(!a.triggered_comparison());
        assert!(!b.triggered_comparison());

        // safari never submits; its startup grace window expires at 60s
        tokio::time::sleep(Duration::from_secs(61)).await;
        let event = events.recv().await.unwrap();

        assert_eq!(event.id, "x");
        assert_eq!(event.event_name, "x-button");
        assert_eq!(event.browsers.len(), 2);
        assert_eq!(
            h.differ.calls(),
            vec![("a.png".to_string(), "b.png".to_string())]
        );
    }

    #[tokio::test]
    async fn test_is_active_query() {
        let h = Harness::start(config(&["chrome", "firefox"]));
        assert!(h.coordinator.is_active("chrome").await.unwrap());
        assert!(h.coordinator.is_active("firefox").await.unwrap());
        assert!(!h.coordinator.is_active("opera").await.unwrap());

        h.coordinator.shutdown();
        assert!(h.coordinator.is_active("chrome").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_leaving_artifact_root_rejected() {
        let h = Harness::start(config(&["chrome", "firefox"]));

        let err = h.submit("../../escaped", "chrome", &["a.png"]).await.unwrap_err();
        assert!(matches!(err, CompararError::InvalidPath { ref field, .. } if field == "id"));
        let err = h.submit("x", "chrome", &["../../a.png"]).await.unwrap_err();
        assert!(matches!(err, CompararError::InvalidPath { ref field, .. } if field == "fileNames"));

        let status = h.coordinator.status().await.unwrap();
        assert!(status.pending_identifiers.is_empty());
        assert!(status
            .armed_timers
            .iter()
            .all(|t| t.remaining_ms == crate::config::DEFAULT_STARTUP_WAITING_MS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactive_browser_rejected_without_mutation() {
        let h = Harness::start(
            config(&["chrome", "firefox", "safari"])
                .with_waiting_response(Duration::from_secs(120))
                .with_startup_waiting(Duration::from_secs(60)),
        );
        h.submit("x", "chrome", &["a.png"]).await.unwrap();
        h.submit("w", "firefox", &["b.png"]).await.unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;

        let before = h.coordinator.status().await.unwrap();
        assert_eq!(before.active_browsers, vec!["chrome", "firefox"]);

        let err = h.submit("y", "safari", &["c.png"]).await.unwrap_err();
        assert!(err.is_inactive_browser());

        let after = h.coordinator.status().await.unwrap();
        assert_eq!(after, before);
        assert!(!after.pending_identifiers.contains_key("y"));
        assert!(after.armed_timers.iter().all(|t| t.browser != "safari"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_baseline_loss_is_terminal() {
        let h = Harness::start(
            config(&["chrome", "firefox", "safari"])
                .with_waiting_response(Duration::from_secs(120))
                .with_startup_waiting(Duration::from_secs(60)),
        );

        h.submit("x", "firefox", &["b.png"]).await.unwrap();
        h.submit("x", "safari", &["c.png"]).await.unwrap();

        // chrome (the baseline) never shows up
        tokio::time::sleep(Duration::from_secs(61)).await;

        let status = h.coordinator.status().await.unwrap();
        assert!(status.active_browsers.is_empty());
        assert!(status.armed_timers.is_empty());
        assert!(status.pending_identifiers.contains_key("x"));

        for browser in ["chrome", "firefox", "safari"] {
            let err = h.submit("x", browser, &["a.png"]).await.unwrap_err();
            assert!(err.is_inactive_browser());
        }

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(h.coordinator.all_events().is_empty());
        assert!(h.differ.calls().is_empty());
    }

    /// Store whose writes wait until the gate opens
    struct GatedStore {
        inner: MemoryArtifactStore,
        open: watch::Receiver<bool>,
    }

    #[async_trait]
    impl ArtifactStore for GatedStore {
        async fn read(&self, path: &Path) -> CompararResult<Vec<u8>> {
            self.inner.read(path).await
        }

        async fn write(&self, path: &Path, bytes: &[u8]) -> CompararResult<()> {
            let mut open = self.open.clone();
            let _ = open.wait_for(|open| *open).await;
            self.inner.write(path, bytes).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_comparison_in_flight_survives_baseline_loss() {
        let (gate, open) = watch::channel(false);
        let store = Arc::new(GatedStore {
            inner: MemoryArtifactStore::new(),
            open,
        });
        for file in ["a.png", "b.png"] {
            store.inner.insert(
                ArtifactLayout::snapshot_path(DATE, file),
                file.as_bytes().to_vec(),
            );
        }
        let coordinator = SnapshotCoordinator::start(
            config(&["chrome", "firefox"])
                .with_waiting_response(Duration::from_secs(30))
                .with_run_date(DATE),
            Arc::new(RecordingDiffer::default()),
            Arc::clone(&store) as Arc<dyn ArtifactStore>,
        )
        .unwrap();

        coordinator
            .submit(Submission::new("x", "chrome", vec!["a.png".to_string()]))
            .await
            .unwrap();
        let outcome = coordinator
            .submit(Submission::new("x", "firefox", vec!["b.png".to_string()]))
            .await
            .unwrap();
        let handle = outcome.comparison.expect("barrier should be satisfied");

        // Nobody submits again: chrome, the baseline, times out mid-comparison
        tokio::time::sleep(Duration::from_secs(31)).await;
        let status = coordinator.status().await.unwrap();
        assert!(status.active_browsers.is_empty());
        assert!(coordinator.all_events().is_empty());

        gate.send(true).unwrap();
        let event = handle.wait().await.unwrap();

        assert_eq!(event.id, "x");
        assert_eq!(coordinator.all_events(), vec![event]);
        let status = coordinator.status().await.unwrap();
        assert!(status.active_browsers.is_empty());
        assert!(status.armed_timers.is_empty());
        assert!(store
            .inner
            .get(&Path::new(DATE).join("snapshots/x/comparison_stage0_firefox.json"))
            .is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_keeps_one_timer_with_later_deadline() {
        let h = Harness::start(config(&["chrome", "firefox"]));

        h.submit("a", "chrome", &["a.png"]).await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;
        h.submit("b", "chrome", &["a.png"]).await.unwrap();

        let status = h.coordinator.status().await.unwrap();
        let chrome: Vec<_> = status
            .armed_timers
            .iter()
            .filter(|t| t.browser == "chrome")
            .collect();
        assert_eq!(chrome.len(), 1);
        assert_eq!(chrome[0].remaining_ms, 30_000);

        // The first deadline (30s) passes without deactivating chrome
        tokio::time::sleep(Duration::from_secs(15)).await;
        let status = h.coordinator.status().await.unwrap();
        assert!(status.active_browsers.contains(&"chrome".to_string()));

        // The second deadline (50s) does
        tokio::time::sleep(Duration::from_secs(16)).await;
        let status = h.coordinator.status().await.unwrap();
        assert!(!status.active_browsers.contains(&"chrome".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_timers_armed_for_every_browser() {
        let h = Harness::start(config(&["chrome", "firefox"]));
        let status = h.coordinator.status().await.unwrap();

        assert_eq!(status.armed_timers.len(), 2);
        assert!(status
            .armed_timers
            .iter()
            .all(|t| t.remaining_ms == crate::config::DEFAULT_STARTUP_WAITING_MS));

        h.submit("a", "firefox", &["a.png"]).await.unwrap();
        let status = h.coordinator.status().await.unwrap();
        let firefox = status
            .armed_timers
            .iter()
            .find(|t| t.browser == "firefox")
            .unwrap();
        assert_eq!(firefox.remaining_ms, 30_000);
    }

    #[tokio::test]
    async fn test_failed_comparison_stays_pending_and_can_retrigger() {
        let h = Harness::with_differ(
            config(&["chrome", "firefox"]),
            RecordingDiffer::failing_on("bad.png"),
        );

        h.submit("id1", "chrome", &["a.png"]).await.unwrap();
        let outcome = h.submit("id1", "firefox", &["bad.png"]).await.unwrap();
        let err = outcome.comparison.unwrap().wait().await.unwrap_err();
        assert!(matches!(err, CompararError::ComparisonFailure { .. }));

        let status = h.coordinator.status().await.unwrap();
        assert!(status.pending_identifiers.contains_key("id1"));
        assert!(h.coordinator.all_events().is_empty());

        // A corrected submission re-triggers the comparison
        let outcome = h.submit("id1", "firefox", &["b.png"]).await.unwrap();
        outcome.comparison.unwrap().wait().await.unwrap();

        let status = h.coordinator.status().await.unwrap();
        assert_eq!(status.completed_identifiers, vec!["id1"]);
        assert_eq!(h.coordinator.all_events().len(), 1);
    }

    #[tokio::test]
    async fn test_stage_count_mismatch_fails_identifier() {
        let h = Harness::start(config(&["chrome", "firefox"]));

        h.submit("id1", "chrome", &["a.png", "c.png"]).await.unwrap();
        let outcome = h.submit("id1", "firefox", &["b.png"]).await.unwrap();
        let err = outcome.comparison.unwrap().wait().await.unwrap_err();

        assert!(matches!(err, CompararError::StageCountMismatch { .. }));
        assert!(h.differ.calls().is_empty());
    }

    #[tokio::test]
    async fn test_multi_stage_multi_browser_fan_out() {
        let h = Harness::start(config(&["chrome", "firefox", "safari"]));

        h.submit("id1", "chrome", &["a.png", "b.png"]).await.unwrap();
        h.submit("id1", "firefox", &["c.png", "d.png"]).await.unwrap();
        let outcome = h.submit("id1", "safari", &["d.png", "c.png"]).await.unwrap();
        outcome.comparison.unwrap().wait().await.unwrap();

        let mut calls = h.differ.calls();
        calls.sort();
        let expected: Vec<(String, String)> = [
            ("a.png", "c.png"),
            ("a.png", "d.png"),
            ("b.png", "c.png"),
            ("b.png", "d.png"),
        ]
        .iter()
        .map(|(a, b)| ((*a).to_string(), (*b).to_string()))
        .collect();
        assert_eq!(calls, expected);
    }

    #[tokio::test]
    async fn test_event_log_counts_successful_comparisons_in_order() {
        let h = Harness::start(config(&["chrome", "firefox"]));

        for id in ["first", "second", "third"] {
            h.submit(id, "chrome", &["a.png"]).await.unwrap();
            let outcome = h.submit(id, "firefox", &["b.png"]).await.unwrap();
            outcome.comparison.unwrap().wait().await.unwrap();
        }

        let ids: Vec<_> = h.coordinator.all_events().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_identifier_not_recompared_on_timeout() {
        let h = Harness::start(
            config(&["chrome", "firefox", "safari"])
                .with_waiting_response(Duration::from_secs(120))
                .with_startup_waiting(Duration::from_secs(300)),
        );

        h.submit("done", "chrome", &["a.png"]).await.unwrap();
        h.submit("done", "firefox", &["b.png"]).await.unwrap();
        let outcome = h.submit("done", "safari", &["c.png"]).await.unwrap();
        outcome.comparison.unwrap().wait().await.unwrap();

        h.submit("open", "chrome", &["a.png"]).await.unwrap();
        h.submit("open", "firefox", &["b.png"]).await.unwrap();

        // Keep chrome and firefox alive while safari goes silent
        tokio::time::advance(Duration::from_secs(100)).await;
        h.submit("keepalive", "chrome", &["a.png"]).await.unwrap();
        h.submit("keepalive", "firefox", &["b.png"]).await.unwrap();

        let mut events = h.coordinator.events().subscribe();
        tokio::time::sleep(Duration::from_secs(25)).await;
        let mut compared = vec![events.recv().await.unwrap().id];
        compared.push(events.recv().await.unwrap().id);
        compared.sort();

        assert_eq!(compared, vec!["keepalive", "open"]);
        assert_eq!(h.coordinator.all_events().len(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_closes_session() {
        let h = Harness::start(config(&["chrome", "firefox"]));
        h.coordinator.shutdown();

        let err = h.submit("id1", "chrome", &["a.png"]).await.unwrap_err();
        assert!(matches!(err, CompararError::CoordinatorClosed));
        assert!(h.coordinator.status().await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let result = SnapshotCoordinator::start(
            SessionConfig::new().with_base_browser("edge"),
            Arc::new(RecordingDiffer::default()),
            Arc::new(MemoryArtifactStore::new()),
        );
        assert!(result.is_err());
    }
}
