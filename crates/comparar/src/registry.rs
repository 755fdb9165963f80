//! Active browser bookkeeping for a session.

use std::collections::BTreeSet;

/// Set of browsers still taking part in a session, plus the baseline
///
/// The set only ever shrinks. Losing the baseline empties it, since no
/// comparison is meaningful without a reference.
#[derive(Debug, Clone)]
pub struct BrowserRegistry {
    baseline: String,
    active: BTreeSet<String>,
}

impl BrowserRegistry {
    /// Create a registry from the configured browsers
    #[must_use]
    pub fn new<I, S>(baseline: impl Into<String>, browsers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            baseline: baseline.into(),
            active: browsers.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `browser` is still active
    #[must_use]
    pub fn is_active(&self, browser: &str) -> bool {
        self.active.contains(browser)
    }

    /// Remove `browser` from the session
    ///
    /// Returns `true` if the active set changed.
    pub fn deactivate(&mut self, browser: &str) -> bool {
        if !self.active.remove(browser) {
            return false;
        }
        tracing::debug!(browser, "deactivating browser");

        if browser == self.baseline {
            tracing::warn!(browser, "base browser deactivated, nothing more to compare");
            self.active.clear();
        }
        true
    }

    /// Browsers currently active, in name order
    #[must_use]
    pub const fn active_browsers(&self) -> &BTreeSet<String> {
        &self.active
    }

    /// The baseline browser
    #[must_use]
    pub fn baseline(&self) -> &str {
        &self.baseline
    }

    /// Number of active browsers
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether no browser is active
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
