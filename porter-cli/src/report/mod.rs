//! Run reports: per-record outcomes folded into unit and run summaries

mod excel;

pub use excel::export_report_to_excel;

use crate::import::{Action, ImportError, ImportMode, Outcome};
use crate::resolver::ResolutionReport;

/// Result of one record
#[derive(Debug, Clone)]
pub struct RecordReport {
    /// Position of the record within its unit
    pub index: usize,
    /// Identifier the record was supplied with, if any
    pub identifier: Option<String>,
    pub result: Result<Outcome, ImportError>,
}

impl RecordReport {
    pub fn status(&self) -> &'static str {
        match &self.result {
            Ok(outcome) => outcome.action.label(),
            Err(_) => "failed",
        }
    }

    pub fn error(&self) -> Option<&ImportError> {
        self.result.as_ref().err()
    }
}

/// Result of one unit
#[derive(Debug, Clone)]
pub struct UnitReport {
    pub locator: String,
    pub entity: String,
    /// Structural failure; when set no record was attempted
    pub error: Option<ImportError>,
    pub records: Vec<RecordReport>,
}

impl UnitReport {
    pub fn new(locator: String, entity: String) -> Self {
        Self {
            locator,
            entity,
            error: None,
            records: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.records.iter().all(|r| r.result.is_ok())
    }

    pub fn failed_records(&self) -> impl Iterator<Item = &RecordReport> {
        self.records.iter().filter(|r| r.result.is_err())
    }
}

/// Aggregated counts over a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub units: usize,
    pub units_failed: usize,
    pub parse_failures: usize,
    pub records: usize,
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Overall verdict of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    /// Some units or records failed, others were applied
    Partial,
    /// Nothing was applied
    Failed,
    /// The run stopped before any unit was attempted
    Aborted,
}

impl RunStatus {
    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partially successful",
            RunStatus::Failed => "failed",
            RunStatus::Aborted => "aborted",
        }
    }
}

/// One failure with enough context to act on it
#[derive(Debug, Clone)]
pub struct FailureEntry {
    pub locator: String,
    pub entity: String,
    pub index: Option<usize>,
    pub identifier: Option<String>,
    pub kind: &'static str,
    pub reason: String,
}

/// Everything that happened during an import run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub mode: ImportMode,
    pub dry_run: bool,
    pub started_at: chrono::DateTime<chrono::Local>,
    pub resolution: ResolutionReport,
    pub units: Vec<UnitReport>,
    /// Run-level failure (dependency cycle)
    pub aborted: Option<ImportError>,
    /// Number of identifier remaps recorded during the run
    pub remapped: usize,
}

impl RunReport {
    pub fn new(mode: ImportMode, dry_run: bool, resolution: ResolutionReport) -> Self {
        Self {
            mode,
            dry_run,
            started_at: chrono::Local::now(),
            resolution,
            units: Vec::new(),
            aborted: None,
            remapped: 0,
        }
    }

    /// Fold all unit and record results into counts
    pub fn summary(&self) -> RunSummary {
        let parse_failures = self.resolution.parse_failures.len();

        self.units.iter().fold(
            RunSummary {
                parse_failures,
                ..RunSummary::default()
            },
            |mut summary, unit| {
                summary.units += 1;
                if !unit.is_success() {
                    summary.units_failed += 1;
                }
                for record in &unit.records {
                    summary.records += 1;
                    match &record.result {
                        Ok(outcome) => match outcome.action {
                            Action::Created => summary.created += 1,
                            Action::Updated => summary.updated += 1,
                            Action::Replaced => summary.replaced += 1,
                            Action::Skipped => summary.skipped += 1,
                        },
                        Err(_) => summary.failed += 1,
                    }
                }
                summary
            },
        )
    }

    pub fn status(&self) -> RunStatus {
        if self.aborted.is_some() {
            return RunStatus::Aborted;
        }

        let summary = self.summary();
        let applied = summary.records - summary.failed;
        let nothing_found = self.units.is_empty();

        if nothing_found {
            RunStatus::Failed
        } else if summary.units_failed == 0 && summary.parse_failures == 0 {
            RunStatus::Success
        } else if applied > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Failed
        }
    }

    /// True only when every unit and record succeeded
    pub fn is_success(&self) -> bool {
        self.status() == RunStatus::Success
    }

    /// 0 on full success, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }

    /// Every failure of the run, in order
    pub fn failures(&self) -> Vec<FailureEntry> {
        let mut failures: Vec<FailureEntry> = self
            .resolution
            .parse_failures
            .iter()
            .map(|failure| FailureEntry {
                locator: failure.locator.display().to_string(),
                entity: String::new(),
                index: None,
                identifier: None,
                kind: "structural",
                reason: failure.reason.clone(),
            })
            .collect();

        if let Some(err) = &self.aborted {
            failures.push(FailureEntry {
                locator: String::new(),
                entity: String::new(),
                index: None,
                identifier: None,
                kind: err.kind(),
                reason: err.to_string(),
            });
        }

        for unit in &self.units {
            if let Some(err) = &unit.error {
                failures.push(FailureEntry {
                    locator: unit.locator.clone(),
                    entity: unit.entity.clone(),
                    index: None,
                    identifier: None,
                    kind: err.kind(),
                    reason: err.to_string(),
                });
            }
            for record in unit.failed_records() {
                if let Some(err) = record.error() {
                    failures.push(FailureEntry {
                        locator: unit.locator.clone(),
                        entity: unit.entity.clone(),
                        index: Some(record.index),
                        identifier: record.identifier.clone(),
                        kind: err.kind(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        failures
    }
}
