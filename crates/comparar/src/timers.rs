//! Per-browser deactivation timers.
//!
//! At most one timer is armed per browser. Re-arming aborts the previous
//! task and bumps a generation counter; a timer that already fired and is
//! waiting in the coordinator's queue is recognised as stale by its
//! generation and dropped.

use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug)]
struct ArmedTimer {
    generation: u64,
    deadline: Instant,
    task: JoinHandle<()>,
}

/// Armed deactivation timers, keyed by browser
#[derive(Debug, Default)]
pub struct DeactivationTimers {
    armed: HashMap<String, ArmedTimer>,
    next_generation: u64,
}

impl DeactivationTimers {
    /// Create an empty timer set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the timer of `browser`
    ///
    /// `fire` runs on expiry with the generation returned here.
    pub fn arm<F>(&mut self, browser: &str, window: Duration, fire: F) -> u64
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel(browser);
        self.next_generation += 1;
        let generation = self.next_generation;
        let deadline = Instant::now() + window;

        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            fire(generation);
        });
        self.armed.insert(
            browser.to_string(),
            ArmedTimer {
                generation,
                deadline,
                task,
            },
        );
        generation
    }

    /// Cancel the timer of `browser`, returning whether one was armed
    pub fn cancel(&mut self, browser: &str) -> bool {
        self.armed.remove(browser).map_or(false, |timer| {
            timer.task.abort();
            true
        })
    }

    /// Cancel every armed timer
    pub fn cancel_all(&mut self) {
        for (_, timer) in self.armed.drain() {
            timer.task.abort();
        }
    }

    /// Accept an expiry if `generation` is still the armed timer of `browser`
    ///
    /// Returns `false` for stale expiries, which must be ignored.
    pub fn take_fired(&mut self, browser: &str, generation: u64) -> bool {
        match self.armed.get(browser) {
            Some(timer) if timer.generation == generation => {
                self.armed.remove(browser);
                true
            }
            _ => false,
        }
    }

    /// Armed timers as `(browser, deadline)`, in browser order
    #[must_use]
    pub fn deadlines(&self) -> Vec<(String, Instant)> {
        let mut deadlines: Vec<_> = self
            .armed
            .iter()
            .map(|(browser, timer)| (browser.clone(), timer.deadline))
            .collect();
        deadlines.sort();
        deadlines
    }

    /// Number of armed timers
    #[must_use]
    pub fn len(&self) -> usize {
        self.armed.len()
    }

    /// Whether no timer is armed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}

impl Drop for DeactivationTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
