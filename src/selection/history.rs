//! Selection history storage
//!
//! Per-unit outcome history persisted as JSON under the build directory,
//! together with the set of units the previous predictive run selected.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::models::{RunSummary, TestStatus, TestUnit};

const HISTORY_VERSION: u32 = 1;

/// History of a single unit
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitHistory {
    /// Number of runs the unit took part in
    pub runs: u32,

    /// Runs that ended in a final failure
    pub failures: u32,

    /// Runs that only passed after a retry
    pub flaky: u32,

    pub last_status: TestStatus,

    pub last_run_at: DateTime<Utc>,

    /// Source prefixes the unit declared at its last run
    #[serde(default)]
    pub sources: Vec<String>,
}

impl UnitHistory {
    pub fn failure_rate(&self) -> f64 {
        if self.runs == 0 {
            0.0
        } else {
            self.failures as f64 / self.runs as f64
        }
    }
}

/// Persisted selection history
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SelectionHistory {
    pub version: u32,

    pub updated_at: Option<DateTime<Utc>>,

    pub units: BTreeMap<String, UnitHistory>,

    /// Unit ids selected by the last predictive run
    #[serde(default)]
    pub last_selection: Option<BTreeSet<String>>,

    #[serde(default)]
    pub last_run_id: Option<String>,
}

impl Default for SelectionHistory {
    fn default() -> Self {
        Self {
            version: HISTORY_VERSION,
            updated_at: None,
            units: BTreeMap::new(),
            last_selection: None,
            last_run_id: None,
        }
    }
}

impl SelectionHistory {
    pub fn is_empty(&self) -> bool {
        self.units.is_empty() && self.last_selection.is_none()
    }

    /// Fold the final verdicts of a run into the history.
    ///
    /// `selection` is the predictive selection of that run, or `None` when
    /// every unit ran; it replaces the stored previous selection either way.
    pub fn record(
        &mut self,
        summary: &RunSummary,
        units: &[TestUnit],
        selection: Option<BTreeSet<String>>,
    ) {
        let now = Utc::now();
        let sources: BTreeMap<&str, &Vec<String>> =
            units.iter().map(|u| (u.id.as_str(), &u.sources)).collect();

        for verdict in &summary.verdicts {
            let entry = self
                .units
                .entry(verdict.unit_id.clone())
                .or_insert_with(|| UnitHistory {
                    runs: 0,
                    failures: 0,
                    flaky: 0,
                    last_status: verdict.status,
                    last_run_at: now,
                    sources: Vec::new(),
                });

            entry.runs += 1;
            if verdict.status.is_failure() {
                entry.failures += 1;
            }
            if verdict.is_flaky() {
                entry.flaky += 1;
            }
            entry.last_status = verdict.status;
            entry.last_run_at = now;
            if let Some(unit_sources) = sources.get(verdict.unit_id.as_str()) {
                entry.sources = unit_sources.to_vec();
            }
        }

        self.last_selection = selection;
        self.last_run_id = Some(generate_run_id());
        self.updated_at = Some(now);
    }

    /// Units that needed a retry to pass at least once, most frequent first
    pub fn flaky_units(&self) -> Vec<(&str, &UnitHistory)> {
        let mut flaky: Vec<_> = self
            .units
            .iter()
            .filter(|(_, h)| h.flaky > 0)
            .map(|(id, h)| (id.as_str(), h))
            .collect();
        flaky.sort_by(|a, b| b.1.flaky.cmp(&a.1.flaky).then_with(|| a.0.cmp(b.0)));
        flaky
    }
}

/// Generate unique run ID
fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}

/// History file manager
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load history; a missing file is an empty history
    pub fn load(&self) -> Result<SelectionHistory> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No history at {}", self.path.display());
                return Ok(SelectionHistory::default());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to open history: {}", self.path.display()))
            }
        };

        let history: SelectionHistory = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse history: {}", self.path.display()))?;
        if history.version != HISTORY_VERSION {
            anyhow::bail!("Unsupported history version: {}", history.version);
        }

        debug!(
            "Loaded history for {} units from {}",
            history.units.len(),
            self.path.display()
        );
        Ok(history)
    }

    pub fn save(&self, history: &SelectionHistory) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let file = File::create(&self.path).context("Failed to create history file")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, history).context("Failed to write history")?;
        writer.flush()?;

        info!("Saved selection history to {}", self.path.display());
        Ok(())
    }

    /// Export per-unit history as CSV
    pub fn export_csv(&self, history: &SelectionHistory, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        writer.write_record([
            "unit_id",
            "runs",
            "failures",
            "flaky",
            "failure_rate",
            "last_status",
            "last_run_at",
        ])?;

        for (id, unit) in &history.units {
            writer.write_record([
                id.clone(),
                unit.runs.to_string(),
                unit.failures.to_string(),
                unit.flaky.to_string(),
                format!("{:.3}", unit.failure_rate()),
                unit.last_status.to_string(),
                unit.last_run_at.to_rfc3339(),
            ])?;
        }
        writer.flush()?;

        info!("Exported history to {}", path.display());
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Deleted history: {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to delete history"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttemptResult, UnitVerdict};
    use tempfile::tempdir;

    fn summary() -> RunSummary {
        RunSummary::new(vec![
            UnitVerdict::from_attempts("A", vec![AttemptResult::pass("A", 3)]),
            UnitVerdict::from_attempts(
                "B",
                vec![
                    AttemptResult::fail("B", 3, "boom"),
                    AttemptResult::pass("B", 4).with_attempt(2),
                ],
            ),
            UnitVerdict::from_attempts("C", vec![AttemptResult::fail("C", 3, "boom")]),
        ])
    }

    #[test]
    fn test_record() {
        let units = vec![TestUnit::new("A", vec![]).with_sources(&["src/a/"])];
        let mut history = SelectionHistory::default();
        history.record(&summary(), &units, None);
        history.record(&summary(), &units, None);

        let a = &history.units["A"];
        assert_eq!(a.runs, 2);
        assert_eq!(a.failures, 0);
        assert_eq!(a.sources, vec!["src/a/"]);

        assert_eq!(history.units["B"].flaky, 2);
        assert_eq!(history.units["C"].failures, 2);
        assert_eq!(history.units["C"].failure_rate(), 1.0);
        assert!(history.last_run_id.is_some());
        assert_eq!(history.flaky_units()[0].0, "B");
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("nested/history.json"));
        let history = store.load().unwrap();
        assert!(history.is_empty());
        assert!(store.clear().is_ok());
    }

    #[test]
    fn test_save_load_and_export() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("testrun/history.json"));

        let mut history = SelectionHistory::default();
        let selection: BTreeSet<String> = ["A".to_string()].into_iter().collect();
        history.record(&summary(), &[], Some(selection.clone()));
        store.save(&history).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.units.len(), 3);
        assert_eq!(loaded.last_selection, Some(selection));

        let csv_path = dir.path().join("history.csv");
        store.export_csv(&loaded, &csv_path).unwrap();
        let content = fs::read_to_string(&csv_path).unwrap();
        assert!(content.starts_with("unit_id,runs,failures"));
        assert_eq!(content.lines().count(), 4);
    }
}
