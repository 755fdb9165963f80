//! Session configuration

use crate::artifacts::ArtifactLayout;
use crate::diff::DiffOptions;
use crate::result::{CompararError, CompararResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings file consulted when no explicit path is given
pub const DEFAULT_CONFIG_PATH: &str = "/tmp/config/settings.json";

/// Default steady-state window a browser has to send its next snapshot
pub const DEFAULT_WAITING_RESPONSE_MS: u64 = 30_000;

/// Grace window before the first snapshot of each browser (cold start)
pub const DEFAULT_STARTUP_WAITING_MS: u64 = 5 * 60 * 1000;

/// Configuration of one comparison session
///
/// Settings files may also carry the differ options under `resemble` and
/// the artifact root under `container.snapshotDestinationDir`; see
/// [`SessionConfig::from_json`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Browser every other browser is compared against
    pub base_browser: String,
    /// Browsers taking part in the session
    pub browsers: Vec<String>,
    /// Steady-state waiting window in milliseconds
    #[serde(deserialize_with = "serde_millis::deserialize")]
    pub browser_waiting_response_time: u64,
    /// Startup grace window in milliseconds
    #[serde(deserialize_with = "serde_millis::deserialize")]
    pub startup_waiting_time: u64,
    /// Root directory for snapshots and comparison artifacts
    pub snapshot_destination_dir: PathBuf,
    /// Date string used to scope artifact paths when a submission has none
    pub run_date: Option<String>,
    /// Options handed to the image differ
    #[serde(alias = "resemble")]
    pub diff: DiffOptions,
}

/// Millisecond windows written either as numbers or as numeric strings
mod serde_millis {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(d: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match serde_json::Value::deserialize(d)? {
            serde_json::Value::Number(num) => num.as_u64().ok_or_else(|| {
                serde::de::Error::custom(format!("window must be a non-negative integer, got {num}"))
            }),
            serde_json::Value::String(s) => s.trim().parse::<u64>().map_err(|e| {
                serde::de::Error::custom(format!("window {s:?} is not a number: {e}"))
            }),
            other => Err(serde::de::Error::custom(format!(
                "window must be a number or numeric string, got: {other}"
            ))),
        }
    }
}

/// `container` block of a settings file
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ContainerSettings {
    snapshot_destination_dir: Option<PathBuf>,
}

/// The parts of a settings file that live outside [`SessionConfig`]
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SettingsExtras {
    container: ContainerSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_browser: "chrome".to_string(),
            browsers: vec!["chrome".to_string(), "firefox".to_string()],
            browser_waiting_response_time: DEFAULT_WAITING_RESPONSE_MS,
            startup_waiting_time: DEFAULT_STARTUP_WAITING_MS,
            snapshot_destination_dir: PathBuf::from("/tmp/runs"),
            run_date: None,
            diff: DiffOptions::default(),
        }
    }
}

impl SessionConfig {
    /// Create new default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the baseline browser
    #[must_use]
    pub fn with_base_browser(mut self, browser: impl Into<String>) -> Self {
        self.base_browser = browser.into();
        self
    }

    /// Set the participating browsers
    #[must_use]
    pub fn with_browsers<I, S>(mut self, browsers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.browsers = browsers.into_iter().map(Into::into).collect();
        self
    }

    /// Set the steady-state waiting window
    #[must_use]
    pub fn with_waiting_response(mut self, window: Duration) -> Self {
        self.browser_waiting_response_time = window.as_millis() as u64;
        self
    }

    /// Set the startup grace window
    #[must_use]
    pub fn with_startup_waiting(mut self, window: Duration) -> Self {
        self.startup_waiting_time = window.as_millis() as u64;
        self
    }

    /// Set the artifact root directory
    #[must_use]
    pub fn with_snapshot_destination_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_destination_dir = dir.into();
        self
    }

    /// Set the run date string
    #[must_use]
    pub fn with_run_date(mut self, date: impl Into<String>) -> Self {
        self.run_date = Some(date.into());
        self
    }

    /// Set the differ options
    #[must_use]
    pub fn with_diff_options(mut self, diff: DiffOptions) -> Self {
        self.diff = diff;
        self
    }

    /// Steady-state waiting window
    #[must_use]
    pub const fn waiting_response(&self) -> Duration {
        Duration::from_millis(self.browser_waiting_response_time)
    }

    /// Startup grace window
    #[must_use]
    pub const fn startup_waiting(&self) -> Duration {
        Duration::from_millis(self.startup_waiting_time)
    }

    /// Date string for a submission that did not carry one
    #[must_use]
    pub fn resolve_date(&self, submitted: Option<String>) -> String {
        submitted
            .or_else(|| self.run_date.clone())
            .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string())
    }

    /// Check the configuration for values the session cannot run with
    ///
    /// # Errors
    ///
    /// Returns error if no browsers are configured, the baseline is not
    /// among them, the run date is not a plain path component, or the
    /// waiting window is zero.
    pub fn validate(&self) -> CompararResult<()> {
        if self.browsers.is_empty() {
            return Err(CompararError::config("at least one browser is required"));
        }
        if !self.browsers.contains(&self.base_browser) {
            return Err(CompararError::config(format!(
                "base browser {} is not in the browser list",
                self.base_browser
            )));
        }
        if let Some(date) = &self.run_date {
            ArtifactLayout::check_component("runDate", date)?;
        }
        if self.browser_waiting_response_time == 0 {
            return Err(CompararError::config(
                "browserWaitingResponseTime must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Parse a JSON settings document
    ///
    /// Waiting windows may be numbers or numeric strings. A
    /// `container.snapshotDestinationDir` overrides a top-level
    /// `snapshotDestinationDir`.
    ///
    /// # Errors
    ///
    /// Returns error on malformed JSON or an invalid configuration.
    pub fn from_json(json: &str) -> CompararResult<Self> {
        let mut config: Self = serde_json::from_str(json)?;
        let extras: SettingsExtras = serde_json::from_str(json)?;
        if let Some(dir) = extras.container.snapshot_destination_dir {
            config.snapshot_destination_dir = dir;
        }
        config.validate()?;
        Ok(config)
    }

    /// Load configuration
    ///
    /// An explicit path must exist. Without one, [`DEFAULT_CONFIG_PATH`] is
    /// used when present, otherwise the defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> CompararResult<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_PATH);
                if !fallback.exists() {
                    tracing::info!("no settings file found, using default configuration");
                    return Ok(Self::default());
                }
                fallback
            }
        };

        let content = std::fs::read_to_string(&path).map_err(|e| {
            CompararError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_json(&content)?;
        tracing::info!(path = %path.display(), "loaded settings file");
        Ok(config)
    }
}
