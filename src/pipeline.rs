// 🚦 Pipeline Driver - orchestrates the run and decides pass/fail
// Strictly sequential: Idle → Validating → Cleaning → Aggregating →
// Logging → {Succeeded, Failed}. Only structural schema violations, the
// quarantine threshold, and artifact write failures reach Failed; every
// row-level issue routes through the quarantine sink.

use crate::aggregate::Aggregator;
use crate::changelog::{ChangelogEntry, ChangelogWriter, DiffSummary};
use crate::cleaner::RecordCleaner;
use crate::error::PipelineError;
use crate::quarantine::QuarantineSink;
use crate::schema::{SchemaValidator, TableSchema};
use crate::source::read_snapshot;
use crate::store::ArtifactStore;
use chrono::{NaiveDate, Utc};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

// ============================================================================
// RUN STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Idle,
    Validating,
    Cleaning,
    Aggregating,
    Logging,
    Succeeded,
    Failed,
}

impl RunStage {
    pub fn name(&self) -> &'static str {
        match self {
            RunStage::Idle => "idle",
            RunStage::Validating => "validating",
            RunStage::Cleaning => "cleaning",
            RunStage::Aggregating => "aggregating",
            RunStage::Logging => "logging",
            RunStage::Succeeded => "succeeded",
            RunStage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A fatal error annotated with the stage it happened in. This is the
/// single human-readable failure a run produces.
#[derive(Debug, Error)]
#[error("run failed during {stage} stage: {error}")]
pub struct RunFailure {
    pub stage: RunStage,
    #[source]
    pub error: PipelineError,
}

// ============================================================================
// CONFIG & REPORT
// ============================================================================

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Raw snapshot database
    pub source_path: PathBuf,
    /// Directory holding the aggregated database and the changelog
    pub output_dir: PathBuf,
    /// Run fails when quarantined / input rows exceeds this
    pub max_quarantine_ratio: f64,
    /// Reference date for derived fields; identical input + identical
    /// as-of date means identical output
    pub as_of: NaiveDate,
}

impl PipelineConfig {
    pub const DEFAULT_MAX_QUARANTINE_RATIO: f64 = 0.2;

    pub fn new(source_path: PathBuf, output_dir: PathBuf) -> Self {
        PipelineConfig {
            source_path,
            output_dir,
            max_quarantine_ratio: Self::DEFAULT_MAX_QUARANTINE_RATIO,
            as_of: Utc::now().date_naive(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// New artifacts committed under this changelog version - the
    /// "completed successfully with version V" promotion signal
    Committed { version: u64 },
    /// Nothing changed: artifacts untouched, no version allocated.
    /// `version` is the latest existing version (0 before the first run).
    Unchanged { version: u64 },
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    pub aggregated: usize,
    pub quarantined: usize,
    pub diff: DiffSummary,
}

impl RunReport {
    pub fn version(&self) -> u64 {
        match self.outcome {
            RunOutcome::Committed { version } | RunOutcome::Unchanged { version } => version,
        }
    }

    pub fn summary(&self) -> String {
        match self.outcome {
            RunOutcome::Committed { version } => format!(
                "committed v{}: {} aggregated, +{} added, ~{} changed, -{} removed, {} quarantined",
                version,
                self.aggregated,
                self.diff.added,
                self.diff.changed,
                self.diff.removed,
                self.quarantined
            ),
            RunOutcome::Unchanged { version } => format!(
                "no changes since v{}: {} aggregated, artifacts left untouched",
                version, self.aggregated
            ),
        }
    }
}

// ============================================================================
// DRIVER
// ============================================================================

pub struct Pipeline {
    config: PipelineConfig,
    stage: RunStage,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Pipeline {
            config,
            stage: RunStage::Idle,
        }
    }

    pub fn stage(&self) -> RunStage {
        self.stage
    }

    fn fail(&mut self, error: PipelineError) -> RunFailure {
        let stage = self.stage;
        self.stage = RunStage::Failed;
        RunFailure { stage, error }
    }

    /// Execute one full run. On failure the previously committed artifacts
    /// are untouched.
    pub fn run(&mut self) -> Result<RunReport, RunFailure> {
        let run_id = Uuid::new_v4();
        info!(%run_id, source = %self.config.source_path.display(), "starting pipeline run");

        // ------------------------------------------------------------------
        // Validating
        // ------------------------------------------------------------------
        self.stage = RunStage::Validating;
        let snapshot =
            read_snapshot(&self.config.source_path).map_err(|e| self.fail(e))?;
        let input_rows = snapshot.input_rows();

        let validator = SchemaValidator::new();
        let mut sink = QuarantineSink::new();

        let subscribers = validator
            .validate_table(&TableSchema::subscribers(), &snapshot.subscribers)
            .map_err(|e| self.fail(e))?;
        let courses = validator
            .validate_table(&TableSchema::courses(), &snapshot.courses)
            .map_err(|e| self.fail(e))?;
        let job_history = validator
            .validate_table(&TableSchema::job_history(), &snapshot.job_history)
            .map_err(|e| self.fail(e))?;

        let row_rejects =
            subscribers.quarantined.len() + courses.quarantined.len() + job_history.quarantined.len();
        sink.extend(subscribers.quarantined);
        sink.extend(courses.quarantined);
        sink.extend(job_history.quarantined);
        info!(input_rows, row_rejects, "schema validation done");

        // ------------------------------------------------------------------
        // Cleaning
        // ------------------------------------------------------------------
        self.stage = RunStage::Cleaning;
        let cleaner = RecordCleaner::new();
        let clean_subscribers = cleaner.clean_subscribers(&subscribers.valid, &mut sink);
        let clean_courses = cleaner.clean_courses(&courses.valid, &mut sink);
        let clean_jobs = cleaner.clean_jobs(&job_history.valid, &mut sink);
        info!(
            subscribers = clean_subscribers.len(),
            courses = clean_courses.len(),
            jobs = clean_jobs.len(),
            "cleaning done"
        );

        // ------------------------------------------------------------------
        // Aggregating
        // ------------------------------------------------------------------
        self.stage = RunStage::Aggregating;
        let aggregator = Aggregator::new(self.config.as_of);
        let aggregated =
            aggregator.aggregate(&clean_subscribers, &clean_courses, &clean_jobs, &mut sink);

        if sink.exceeds(input_rows, self.config.max_quarantine_ratio) {
            let error = PipelineError::ThresholdExceeded {
                quarantined: sink.len(),
                total: input_rows,
                ratio: sink.ratio(input_rows) * 100.0,
                max: self.config.max_quarantine_ratio * 100.0,
            };
            return Err(self.fail(error));
        }
        if !sink.is_empty() {
            warn!(
                quarantined = sink.len(),
                input_rows, "run continues with quarantined rows"
            );
        }

        // ------------------------------------------------------------------
        // Logging
        // ------------------------------------------------------------------
        self.stage = RunStage::Logging;
        fs::create_dir_all(&self.config.output_dir)
            .map_err(|e| self.fail(e.into()))?;
        let store = ArtifactStore::new(&self.config.output_dir);

        let previous = store.load_previous().map_err(|e| self.fail(e))?;
        let mut prior_entries =
            ChangelogWriter::load(&store.changelog_path).map_err(|e| self.fail(e))?;
        if store
            .reconcile_changelog(&mut prior_entries)
            .map_err(|e| self.fail(e))?
        {
            warn!("changelog was behind the committed database, appended the missing entry");
        }
        let diff = ChangelogWriter::diff(&previous, &aggregated);

        // Re-run guard: identical output and identical quarantine set mean
        // there is nothing to version - skip the append entirely
        let previous_quarantine =
            store.load_previous_quarantine().map_err(|e| self.fail(e))?;
        if diff.is_empty() && sink.signature() == previous_quarantine {
            let version = prior_entries.last().map(|e| e.version).unwrap_or(0);
            self.stage = RunStage::Succeeded;
            info!(version, "no changes detected, artifacts left untouched");
            return Ok(RunReport {
                run_id,
                outcome: RunOutcome::Unchanged { version },
                aggregated: aggregated.len(),
                quarantined: sink.len(),
                diff,
            });
        }

        let version = ChangelogWriter::next_version(&prior_entries);
        let entry = ChangelogEntry {
            version,
            timestamp: Utc::now(),
            run_id,
            added: diff.added,
            changed: diff.changed,
            removed: diff.removed,
            quarantined: sink.len(),
        };
        store
            .commit(&aggregated, sink.records(), &prior_entries, &entry)
            .map_err(|e| self.fail(e))?;

        self.stage = RunStage::Succeeded;
        info!(
            version,
            added = diff.added,
            changed = diff.changed,
            removed = diff.removed,
            quarantined = sink.len(),
            "run committed"
        );

        Ok(RunReport {
            run_id,
            outcome: RunOutcome::Committed { version },
            aggregated: aggregated.len(),
            quarantined: sink.len(),
            diff,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
