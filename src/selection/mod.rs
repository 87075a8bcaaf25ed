//! Predictive test selection
//!
//! Narrows the unit set using the persisted [`SelectionHistory`] and the
//! paths changed since the last run.

pub mod history;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info};

use crate::models::{TestStatus, TestUnit};

pub use history::{HistoryStore, SelectionHistory};

/// How units are selected for a run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    /// Selector disabled; every unit runs
    #[default]
    All,
    /// Only units predicted to be relevant run
    Relevant,
    /// Only units the previous predictive run left out
    Remaining,
}

impl SelectionMode {
    pub fn name(&self) -> &'static str {
        match self {
            SelectionMode::All => "all",
            SelectionMode::Relevant => "relevant",
            SelectionMode::Remaining => "remaining",
        }
    }
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Outcome of a selection pass
#[derive(Clone, Debug, Default)]
pub struct Selection {
    pub selected: Vec<TestUnit>,
    pub deselected: Vec<String>,
    /// The mode could not be honored and every unit was selected
    pub degraded: bool,
}

impl Selection {
    fn everything(units: Vec<TestUnit>, degraded: bool) -> Self {
        Self {
            selected: units,
            deselected: Vec::new(),
            degraded,
        }
    }

    pub fn selected_ids(&self) -> BTreeSet<String> {
        self.selected.iter().map(|u| u.id.clone()).collect()
    }
}

/// Predictive selector
#[derive(Clone, Debug, Default)]
pub struct PredictiveSelector {
    mode: SelectionMode,
    changed_paths: Vec<String>,
}

impl PredictiveSelector {
    pub fn new(mode: SelectionMode) -> Self {
        Self {
            mode,
            changed_paths: Vec::new(),
        }
    }

    pub fn with_changed_paths(mut self, paths: Vec<String>) -> Self {
        self.changed_paths = paths;
        self
    }

    /// Select units for this run. A missing history degrades to all units.
    pub fn select(&self, units: Vec<TestUnit>, history: Option<&SelectionHistory>) -> Selection {
        let history = match (self.mode, history) {
            (SelectionMode::All, _) => return Selection::everything(units, false),
            (_, Some(history)) if !history.is_empty() => history,
            _ => {
                info!(
                    "No selection history available, {} mode selects all {} units",
                    self.mode,
                    units.len()
                );
                return Selection::everything(units, true);
            }
        };

        let previous = match self.mode {
            SelectionMode::Remaining => match &history.last_selection {
                Some(previous) => Some(previous),
                None => {
                    info!("No previous selection recorded, remaining mode selects all units");
                    return Selection::everything(units, true);
                }
            },
            _ => None,
        };

        let (selected, deselected): (Vec<TestUnit>, Vec<TestUnit>) =
            units.into_iter().partition(|unit| match previous {
                Some(previous) => !previous.contains(&unit.id),
                None => self.is_relevant(unit, history),
            });
        let deselected: Vec<String> = deselected.into_iter().map(|u| u.id).collect();

        info!(
            "Predictive selection ({}): {} selected, {} deselected",
            self.mode,
            selected.len(),
            deselected.len()
        );

        Selection {
            selected,
            deselected,
            degraded: false,
        }
    }

    fn is_relevant(&self, unit: &TestUnit, history: &SelectionHistory) -> bool {
        let Some(record) = history.units.get(&unit.id) else {
            debug!("{} selected: no history", unit.id);
            return true;
        };

        if record.last_status != TestStatus::Pass && record.last_status != TestStatus::Skip {
            debug!("{} selected: last status {}", unit.id, record.last_status);
            return true;
        }

        if record.failures > 0 || record.flaky > 0 {
            debug!("{} selected: failure history", unit.id);
            return true;
        }

        if self.changed_paths.iter().any(|path| unit.covers(path)) {
            debug!("{} selected: covers a changed path", unit.id);
            return true;
        }

        false
    }
}
