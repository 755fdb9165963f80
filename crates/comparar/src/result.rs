//! Result and error types for Comparar.

use thiserror::Error;

/// Result type for Comparar operations
pub type CompararResult<T> = Result<T, CompararError>;

/// Errors that can occur in Comparar
#[derive(Debug, Error)]
pub enum CompararError {
    /// Submission from a browser that is no longer part of the session
    #[error("Inactive browser requested: {browser}")]
    InactiveBrowser {
        /// Browser name
        browser: String,
    },

    /// One or more snapshot pairs of an identifier could not be compared
    #[error("Comparison for {identifier} failed ({failed}/{total} pairs): {message}")]
    ComparisonFailure {
        /// Identifier whose comparison was abandoned
        identifier: String,
        /// Number of failed pairs
        failed: usize,
        /// Number of pairs attempted
        total: usize,
        /// First failure message
        message: String,
    },

    /// A browser submitted a different number of stages than the baseline
    #[error(
        "Stage count mismatch for {identifier}: {browser} sent {actual} snapshot(s), baseline sent {expected}"
    )]
    StageCountMismatch {
        /// Identifier being compared
        identifier: String,
        /// Offending browser
        browser: String,
        /// Stage count of the baseline browser
        expected: usize,
        /// Stage count of the offending browser
        actual: usize,
    },

    /// Comparison job lacks the baseline browser's submission
    #[error("No {baseline} submission recorded for {identifier}")]
    MissingBaseline {
        /// Identifier being compared
        identifier: String,
        /// Baseline browser name
        baseline: String,
    },

    /// Image decoding, scaling or encoding error
    #[error("Image comparison failed: {message}")]
    ImageComparison {
        /// Error message
        message: String,
    },

    /// A submitted name would resolve outside the artifact root
    #[error("Invalid {field} {value:?}: must be a plain name inside the artifact root")]
    InvalidPath {
        /// Submission field holding the name
        field: String,
        /// Offending value
        value: String,
    },

    /// Invalid session configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// The coordinator task has stopped
    #[error("Snapshot coordinator is no longer running")]
    CoordinatorClosed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CompararError {
    /// Create an image comparison error
    #[must_use]
    pub fn image(message: impl Into<String>) -> Self {
        Self::ImageComparison {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid path error
    #[must_use]
    pub fn invalid_path(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidPath {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Whether this error was caused by the submitting browser being inactive
    #[must_use]
    pub const fn is_inactive_browser(&self) -> bool {
        matches!(self, Self::InactiveBrowser { .. })
    }
}
