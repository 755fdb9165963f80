//! Pairwise comparison of one identifier's snapshots against the baseline.
//!
//! Every `(browser, stage)` pair is diffed concurrently; the identifier is
//! done when all pairs are. A single failing pair fails the identifier.

use crate::artifacts::{ArtifactLayout, ArtifactStore};
use crate::diff::{DiffOptions, ImageDiffer};
use crate::event_log::{ComparedBrowser, ComparisonEvent};
use crate::result::{CompararError, CompararResult};
use crate::submission::{SnapshotEvent, SubmissionRecord};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Everything needed to compare one identifier, detached from session state
#[derive(Debug, Clone)]
pub struct ComparisonJob {
    /// Identifier being compared
    pub identifier: String,
    /// Baseline browser
    pub baseline: String,
    /// Event reported with the most recent submission
    pub event: SnapshotEvent,
    /// One record per participating browser, baseline included
    pub records: Vec<SubmissionRecord>,
}

impl ComparisonJob {
    /// The baseline browser's record
    #[must_use]
    pub fn baseline_record(&self) -> Option<&SubmissionRecord> {
        self.records.iter().find(|r| r.browser == self.baseline)
    }

    /// Event-log entry for this job, baseline first
    #[must_use]
    pub fn to_event(&self, comparison_timestamp: i64) -> ComparisonEvent {
        let mut browsers: Vec<_> = self
            .records
            .iter()
            .map(|r| ComparedBrowser {
                name: r.browser.clone(),
                sent_snapshot_timestamp: r.timestamp,
            })
            .collect();
        browsers.sort_by(|a, b| {
            (a.name != self.baseline)
                .cmp(&(b.name != self.baseline))
                .then_with(|| a.name.cmp(&b.name))
        });

        ComparisonEvent {
            id: self.identifier.clone(),
            event_type: self.event.event_type.clone(),
            event_name: self.event.event_name.clone(),
            comparison_timestamp,
            browsers,
        }
    }
}

/// Persisted result of one compared pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonRecord {
    /// Identifier
    pub identifier: String,
    /// Stage label (`before`, `after` or `stage{i}`)
    pub stage: String,
    /// Baseline browser
    pub baseline_browser: String,
    /// Browser compared against the baseline
    pub browser: String,
    /// Baseline snapshot file
    pub baseline_file: String,
    /// Compared snapshot file
    pub compared_file: String,
    /// Score reported by the differ
    pub score: f64,
    /// Raw differ metadata
    pub diff: serde_json::Value,
}

/// Where the artifacts of one compared pair ended up
#[derive(Debug, Clone, PartialEq)]
pub struct PairReport {
    /// Compared browser
    pub browser: String,
    /// Stage index
    pub stage_index: usize,
    /// Stage label
    pub stage: String,
    /// Score reported by the differ
    pub score: f64,
    /// Root-relative path of the result record
    pub result_path: PathBuf,
    /// Root-relative path of the diff image
    pub diff_image_path: PathBuf,
}

#[derive(Debug)]
struct PairTask<'a> {
    baseline: &'a SubmissionRecord,
    compared: &'a SubmissionRecord,
    index: usize,
    stage: String,
}

/// Runs comparisons through the diff and storage ports
#[derive(Clone)]
pub struct ComparisonEngine {
    differ: Arc<dyn ImageDiffer>,
    store: Arc<dyn ArtifactStore>,
    options: Arc<DiffOptions>,
}

impl std::fmt::Debug for ComparisonEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComparisonEngine")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ComparisonEngine {
    /// Create an engine
    #[must_use]
    pub fn new(
        differ: Arc<dyn ImageDiffer>,
        store: Arc<dyn ArtifactStore>,
        options: DiffOptions,
    ) -> Self {
        Self {
            differ,
            store,
            options: Arc::new(options),
        }
    }

    /// Compare every non-baseline browser against the baseline, stage by stage
    ///
    /// # Errors
    ///
    /// Returns `MissingBaseline` or `StageCountMismatch` before any diff
    /// runs, and `ComparisonFailure` if any pair fails.
    pub async fn compare(&self, job: &ComparisonJob) -> CompararResult<Vec<PairReport>> {
        let tasks = Self::plan(job)?;
        let total = tasks.len();

        let results = join_all(
            tasks
                .into_iter()
                .map(|task| self.compare_pair(&job.identifier, task)),
        )
        .await;

        let mut reports = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::warn!(identifier = %job.identifier, error = %e, "image comparison failed");
                    failures.push(e);
                }
            }
        }

        if let Some(first) = failures.first() {
            return Err(CompararError::ComparisonFailure {
                identifier: job.identifier.clone(),
                failed: failures.len(),
                total,
                message: first.to_string(),
            });
        }
        Ok(reports)
    }

    fn plan(job: &ComparisonJob) -> CompararResult<Vec<PairTask<'_>>> {
        let baseline = job
            .baseline_record()
            .ok_or_else(|| CompararError::MissingBaseline {
                identifier: job.identifier.clone(),
                baseline: job.baseline.clone(),
            })?;
        let expected = baseline.file_names.len();
        let stages = ArtifactLayout::stage_labels(&baseline.file_names);

        let mut tasks = Vec::new();
        for compared in job.records.iter().filter(|r| r.browser != job.baseline) {
            if compared.file_names.len() != expected {
                return Err(CompararError::StageCountMismatch {
                    identifier: job.identifier.clone(),
                    browser: compared.browser.clone(),
                    expected,
                    actual: compared.file_names.len(),
                });
            }
            tasks.extend(stages.iter().enumerate().map(|(index, stage)| PairTask {
                baseline,
                compared,
                index,
                stage: stage.clone(),
            }));
        }
        Ok(tasks)
    }

    async fn compare_pair(
        &self,
        identifier: &str,
        task: PairTask<'_>,
    ) -> CompararResult<PairReport> {
        let baseline_file = &task.baseline.file_names[task.index];
        let compared_file = &task.compared.file_names[task.index];
        let date = task.baseline.date_string.as_str();

        let baseline_bytes = self
            .store
            .read(&ArtifactLayout::snapshot_path(date, baseline_file))
            .await?;
        let compared_bytes = self
            .store
            .read(&ArtifactLayout::snapshot_path(
                &task.compared.date_string,
                compared_file,
            ))
            .await?;

        let differ = Arc::clone(&self.differ);
        let options = Arc::clone(&self.options);
        let outcome = tokio::task::spawn_blocking(move || {
            differ.diff(&baseline_bytes, &compared_bytes, &options)
        })
        .await
        .map_err(|e| CompararError::image(format!("diff task aborted: {e}")))??;

        let stage = task.stage;
        let record = ComparisonRecord {
            identifier: identifier.to_string(),
            stage: stage.clone(),
            baseline_browser: task.baseline.browser.clone(),
            browser: task.compared.browser.clone(),
            baseline_file: baseline_file.clone(),
            compared_file: compared_file.clone(),
            score: outcome.score,
            diff: outcome.raw,
        };

        let result_path =
            ArtifactLayout::result_path(date, identifier, &stage, &task.compared.browser);
        self.store
            .write(&result_path, &serde_json::to_vec_pretty(&record)?)
            .await?;

        let diff_image_path = ArtifactLayout::diff_image_path(
            date,
            identifier,
            &task.baseline.browser,
            &task.compared.browser,
            &stage,
        );
        self.store
            .write(&diff_image_path, &outcome.diff_image)
            .await?;

        tracing::info!(
            identifier,
            stage = %stage,
            browser = %task.compared.browser,
            score = outcome.score,
            path = %diff_image_path.display(),
            "comparison saved"
        );

        Ok(PairReport {
            browser: task.compared.browser.clone(),
            stage_index: task.index,
            stage,
            score: outcome.score,
            result_path,
            diff_image_path,
        })
    }
}
