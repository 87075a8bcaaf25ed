//! Report aggregation
//!
//! Merges the event reports of every run directory under the output root
//! into one HTML report at a fixed location.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, info};

use super::event_report::{list_run_directories, EventReport, ReportEvent};
use super::report::{render, ReportFormat};
use crate::error::{HarnessError, HarnessResult};
use crate::models::TestStatus;

/// Final state of one unit across all aggregated runs
#[derive(Clone, Debug, PartialEq)]
pub struct UnitOutcome {
    pub unit_id: String,
    pub name: String,
    pub status: TestStatus,
    pub attempts: u32,
    pub total_duration_ms: u64,
    pub executor: String,
    pub message: Option<String>,
}

impl UnitOutcome {
    pub fn is_flaky(&self) -> bool {
        self.status.is_success() && self.attempts > 1
    }
}

/// The merge of an ordered set of event reports
#[derive(Clone, Debug, Default)]
pub struct AggregatedReport {
    /// Inputs in run order
    pub runs: Vec<EventReport>,
    /// Run directories that held no event report
    pub skipped: Vec<String>,
}

impl AggregatedReport {
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn event_count(&self) -> usize {
        self.runs.iter().map(|r| r.events.len()).sum()
    }

    /// Per-unit outcome, ordered by first appearance. The latest finished
    /// event of a unit decides its status.
    pub fn unit_outcomes(&self) -> Vec<UnitOutcome> {
        let mut order: Vec<String> = Vec::new();
        let mut outcomes: HashMap<String, UnitOutcome> = HashMap::new();

        for run in &self.runs {
            for event in &run.events {
                let unit_id = event.unit_id();
                let outcome = outcomes.entry(unit_id.to_string()).or_insert_with(|| {
                    order.push(unit_id.to_string());
                    UnitOutcome {
                        unit_id: unit_id.to_string(),
                        name: unit_id.to_string(),
                        status: TestStatus::Error,
                        attempts: 0,
                        total_duration_ms: 0,
                        executor: String::new(),
                        message: None,
                    }
                });

                match event {
                    ReportEvent::Started { name, .. } => outcome.name = name.clone(),
                    ReportEvent::Finished {
                        status,
                        duration_ms,
                        executor,
                        message,
                        ..
                    } => {
                        outcome.status = *status;
                        outcome.attempts += 1;
                        outcome.total_duration_ms += duration_ms;
                        outcome.executor = executor.clone();
                        outcome.message = message.clone();
                    }
                }
            }
        }

        order
            .into_iter()
            .filter_map(|id| outcomes.remove(&id))
            .collect()
    }

    /// Counts of (passed, failed, skipped, errored) final outcomes
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        let outcomes = self.unit_outcomes();
        let count = |status: TestStatus| outcomes.iter().filter(|o| o.status == status).count();
        (
            count(TestStatus::Pass),
            count(TestStatus::Fail),
            count(TestStatus::Skip),
            count(TestStatus::Error),
        )
    }
}

/// Report aggregator
#[derive(Clone, Debug)]
pub struct ReportAggregator {
    output_root: PathBuf,
    output_path: PathBuf,
    mandatory: Vec<PathBuf>,
    quiet: bool,
}

impl ReportAggregator {
    pub fn new(output_root: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            output_path: output_path.into(),
            mandatory: Vec::new(),
            quiet: false,
        }
    }

    /// Run directories that must contribute a report
    pub fn with_mandatory(mut self, dirs: Vec<PathBuf>) -> Self {
        self.mandatory = dirs;
        self
    }

    /// Suppress the console summary
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Read every run directory's event report, in run order
    pub fn collect(&self) -> HarnessResult<AggregatedReport> {
        let mut aggregated = AggregatedReport::default();
        let mut read_dirs = Vec::new();

        for dir in list_run_directories(&self.output_root)? {
            match EventReport::read(&dir.report_path()) {
                Ok(report) => {
                    read_dirs.push(dir.path.clone());
                    aggregated.runs.push(report);
                }
                Err(HarnessError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                    debug!("{} has no event report, skipped", dir.name);
                    aggregated.skipped.push(dir.name);
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(missing) = self.mandatory.iter().find(|m| !read_dirs.contains(m)) {
            return Err(HarnessError::MissingMandatoryInput(missing.clone()));
        }

        Ok(aggregated)
    }

    /// Merge all inputs and overwrite the HTML report
    pub fn aggregate(&self) -> HarnessResult<AggregatedReport> {
        let aggregated = self.collect()?;
        let html = render(&aggregated, ReportFormat::Html);

        if let Some(parent) = self.output_path.parent() {
            fs::create_dir_all(parent).map_err(|e| HarnessError::io(parent, e))?;
        }
        fs::write(&self.output_path, html).map_err(|e| HarnessError::io(&self.output_path, e))?;

        if aggregated.is_empty() {
            info!(
                "No event reports under {}, wrote an empty report to {}",
                self.output_root.display(),
                self.output_path.display()
            );
        } else {
            info!(
                "Aggregated {} reports ({} events) into {}",
                aggregated.runs.len(),
                aggregated.event_count(),
                self.output_path.display()
            );
        }
        if !self.quiet {
            let (passed, failed, skipped, errors) = aggregated.counts();
            println!(
                "Test report: {} ({} passed, {} failed, {} skipped, {} errors)",
                self.output_path.display(),
                passed,
                failed,
                skipped,
                errors
            );
        }

        Ok(aggregated)
    }
}
