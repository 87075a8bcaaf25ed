//! Run pipeline
//!
//! Drives one test run: clean, select, execute with retries, then aggregate
//! whatever was produced. Aggregation runs whether or not execution
//! succeeded.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cleanup::{CleanupSweeper, SweepStats};
use crate::config::TestRunConfiguration;
use crate::distribution::DistributionCoordinator;
use crate::error::HarnessResult;
use crate::executor::{
    AttemptRunner, ParallelExecutor, ProcessExecutor, RetryCoordinator, TestRunner, UnitExecutor,
};
use crate::models::{RunSummary, TestUnit};
use crate::results::{AggregatedReport, ReportAggregator, RunDirAllocator};
use crate::selection::{HistoryStore, PredictiveSelector, SelectionHistory, SelectionMode};
use crate::utils::timer::{format_duration, PhaseTimer};

/// Lifecycle of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Cleaning,
    Executing,
    Retrying(u32),
    Aggregating,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Pending => write!(f, "PENDING"),
            RunState::Cleaning => write!(f, "CLEANING"),
            RunState::Executing => write!(f, "EXECUTING"),
            RunState::Retrying(round) => write!(f, "RETRYING({round})"),
            RunState::Aggregating => write!(f, "AGGREGATING"),
            RunState::Done => write!(f, "DONE"),
            RunState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Result of a completed run
#[derive(Debug)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub report: AggregatedReport,
    pub cleanup: SweepStats,
    /// Units left out by predictive selection
    pub deselected: Vec<String>,
    pub states: Vec<RunState>,
}

/// Test run pipeline
pub struct RunPipeline {
    config: Arc<TestRunConfiguration>,
    runner: Arc<dyn AttemptRunner>,
    changed_paths: Vec<String>,
    states: Vec<RunState>,
}

impl RunPipeline {
    pub fn new(config: Arc<TestRunConfiguration>, runner: Arc<dyn AttemptRunner>) -> Self {
        Self {
            config,
            runner,
            changed_paths: Vec::new(),
            states: vec![RunState::Pending],
        }
    }

    /// Assemble the process executor, distribution plan and runner
    pub fn from_config(config: Arc<TestRunConfiguration>) -> anyhow::Result<Self> {
        let local: Arc<dyn UnitExecutor> = Arc::new(ProcessExecutor::from_config(&config));
        let distributor = DistributionCoordinator::from_config(&config, local)?;
        let runner = TestRunner::new(
            ParallelExecutor::new(config.max_workers),
            Arc::new(RunDirAllocator::new(config.output_root())),
            Arc::new(distributor),
        );
        Ok(Self::new(config, Arc::new(runner)))
    }

    /// Paths changed since the last run, for predictive selection
    pub fn with_changed_paths(mut self, paths: Vec<String>) -> Self {
        self.changed_paths = paths;
        self
    }

    fn transition(&mut self, state: RunState) {
        info!("Run state -> {state}");
        self.states.push(state);
    }

    fn aggregator(&self) -> ReportAggregator {
        ReportAggregator::new(self.config.output_root(), self.config.report_path())
            .quiet(self.config.hide_report_generator_output)
    }

    pub async fn run(mut self, units: Vec<TestUnit>) -> HarnessResult<RunOutcome> {
        let mut timer = PhaseTimer::new();

        self.transition(RunState::Cleaning);
        timer.enter("clean");
        let cleanup = match CleanupSweeper::new(self.config.output_root()).sweep() {
            Ok(stats) => stats,
            Err(e) => {
                error!("Cleanup failed, run aborted: {e}");
                self.transition(RunState::Failed);
                self.transition(RunState::Aggregating);
                if let Err(agg) = self.aggregator().aggregate() {
                    error!("Aggregation failed: {agg}");
                }
                return Err(e);
            }
        };
        timer.enter("select");
        let store = HistoryStore::new(self.config.history_path());
        let mode = self.config.selection_mode;
        let mut history = if mode == SelectionMode::All {
            None
        } else {
            match store.load() {
                Ok(history) => Some(history),
                Err(e) => {
                    warn!("Ignoring unreadable selection history: {e:#}");
                    None
                }
            }
        };
        let selection = PredictiveSelector::new(mode)
            .with_changed_paths(self.changed_paths.clone())
            .select(units.clone(), history.as_ref());

        self.transition(RunState::Executing);
        timer.enter("execute");
        let retry = RetryCoordinator::new(self.config.retry_limit);
        let states = &mut self.states;
        let outcome = retry
            .run(self.runner.as_ref(), &selection.selected, |round| {
                info!("Run state -> {}", RunState::Retrying(round));
                states.push(RunState::Retrying(round));
            })
            .await;

        if outcome.retry_rounds > 0 {
            info!("Finished after {} retry rounds", outcome.retry_rounds);
        }
        let execution_error = outcome.error;
        if let Some(e) = &execution_error {
            error!("Execution failed: {e}");
            self.transition(RunState::Failed);
        }

        self.transition(RunState::Aggregating);
        timer.enter("aggregate");
        let aggregation = self
            .aggregator()
            .with_mandatory(outcome.run_dirs.clone())
            .aggregate();
        timer.finish();

        let summary = RunSummary::new(outcome.verdicts);

        let last_selection = match mode {
            _ if selection.degraded => None,
            SelectionMode::All => None,
            SelectionMode::Relevant => Some(selection.selected_ids()),
            SelectionMode::Remaining => {
                let mut ran: BTreeSet<String> = history
                    .as_ref()
                    .and_then(|h| h.last_selection.clone())
                    .unwrap_or_default();
                ran.extend(selection.selected_ids());
                Some(ran)
            }
        };
        let mut updated = match history.take() {
            Some(history) => history,
            None => store.load().unwrap_or_else(|e| {
                warn!("Replacing unreadable selection history: {e:#}");
                SelectionHistory::default()
            }),
        };
        updated.record(&summary, &units, last_selection);
        if let Err(e) = store.save(&updated) {
            warn!("Failed to save selection history: {e:#}");
        }

        debug!("Phase timings: {}", timer.summary());

        if let Some(e) = execution_error {
            if let Err(agg) = &aggregation {
                error!("Aggregation failed: {agg}");
            }
            return Err(e);
        }

        let report = match aggregation {
            Ok(report) => report,
            Err(e) => {
                error!("Aggregation failed: {e}");
                self.transition(RunState::Failed);
                return Err(e);
            }
        };
        self.transition(RunState::Done);

        info!("{} in {}", summary_line(&summary), format_duration(timer.elapsed()));

        Ok(RunOutcome {
            summary,
            report,
            cleanup,
            deselected: selection.deselected,
            states: self.states,
        })
    }
}

fn summary_line(summary: &RunSummary) -> String {
    format!(
        "{} units: {} passed, {} failed, {} skipped, {} errors, {} flaky",
        summary.total, summary.passed, summary.failed, summary.skipped, summary.errors, summary.flaky
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, BuildParameters};
    use crate::error::HarnessError;
    use crate::executor::testing::ScriptedExecutor;
    use crate::executor::AttemptRun;
    use crate::models::{AttemptResult, TestStatus};
    use crate::results::list_run_directories;
    use async_trait::async_trait;
    use std::fs;
    use std::io::Write;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn config(build_dir: &Path, retries: u32) -> Arc<TestRunConfiguration> {
        let mut params = BuildParameters::default();
        params.build_dir = build_dir.to_path_buf();
        params.testing.retries = Some(retries);
        params.testing.hide_report_generator_output = true;
        Arc::new(resolve(&params, None))
    }

    fn runner(config: &TestRunConfiguration, executor: ScriptedExecutor) -> Arc<dyn AttemptRunner> {
        let executor: Arc<dyn UnitExecutor> = Arc::new(executor);
        Arc::new(TestRunner::new(
            ParallelExecutor::new(2),
            Arc::new(RunDirAllocator::new(config.output_root())),
            Arc::new(DistributionCoordinator::local_only(executor)),
        ))
    }

    fn units(ids: &[&str]) -> Vec<TestUnit> {
        ids.iter()
            .map(|id| TestUnit::new(*id, vec!["true".into()]))
            .collect()
    }

    #[tokio::test]
    async fn test_flaky_unit_passes_after_retry() {
        let dir = tempdir().unwrap();
        let config = config(dir.path(), 1);

        // Stale output from an earlier run
        let stale = config.output_root().join("junit-7");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("open-test-report.xml"), "stale").unwrap();

        let executor = ScriptedExecutor::new().script("BTest", &[TestStatus::Fail]);
        let pipeline = RunPipeline::new(config.clone(), runner(&config, executor));
        let outcome = pipeline.run(units(&["ATest", "BTest", "CTest"])).await.unwrap();

        assert_eq!(
            outcome.states,
            vec![
                RunState::Pending,
                RunState::Cleaning,
                RunState::Executing,
                RunState::Retrying(1),
                RunState::Aggregating,
                RunState::Done,
            ]
        );
        assert_eq!(outcome.cleanup.targets_removed, 1);
        assert_eq!(outcome.summary.passed, 3);
        assert_eq!(outcome.summary.flaky, 1);
        assert_eq!(outcome.summary.exit_code(), 0);

        let runs: Vec<_> = list_run_directories(&config.output_root())
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(runs, vec!["junit-1", "junit-2"]);
        assert_eq!(outcome.report.runs.len(), 2);
        assert!(config.report_path().exists());
        assert!(config.history_path().exists());
    }

    #[tokio::test]
    async fn test_final_failure_sets_exit_code() {
        let dir = tempdir().unwrap();
        let config = config(dir.path(), 0);

        let executor = ScriptedExecutor::new().script("BTest", &[TestStatus::Fail]);
        let outcome = RunPipeline::new(config.clone(), runner(&config, executor))
            .run(units(&["ATest", "BTest"]))
            .await
            .unwrap();

        assert_eq!(outcome.summary.failed, 1);
        assert_eq!(outcome.summary.exit_code(), 1);
        assert!(!outcome.states.iter().any(|s| matches!(s, RunState::Retrying(_))));
        assert_eq!(*outcome.states.last().unwrap(), RunState::Done);
    }

    struct BrokenRunner;

    #[async_trait]
    impl AttemptRunner for BrokenRunner {
        async fn run_attempt(&self, _units: &[TestUnit], _attempt: u32) -> HarnessResult<AttemptRun> {
            Err(HarnessError::Config("runner unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_aggregation_runs_after_execution_failure() {
        let dir = tempdir().unwrap();
        let config = config(dir.path(), 2);

        let err = RunPipeline::new(config.clone(), Arc::new(BrokenRunner))
            .run(units(&["ATest"]))
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::Config(_)));
        assert!(config.report_path().exists());
    }

    /// Leaves an empty run directory behind, then fails on the retry
    struct HalfRunner {
        output_root: std::path::PathBuf,
    }

    #[async_trait]
    impl AttemptRunner for HalfRunner {
        async fn run_attempt(&self, units: &[TestUnit], attempt: u32) -> HarnessResult<AttemptRun> {
            if attempt > 1 {
                return Err(HarnessError::Config("agent lost".to_string()));
            }
            let run_dir = self.output_root.join("junit-1");
            fs::create_dir_all(&run_dir).unwrap();
            Ok(AttemptRun {
                run_dir,
                results: units
                    .iter()
                    .map(|u| AttemptResult::fail(&u.id, 1, "boom"))
                    .collect(),
            })
        }
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_aggregation_error_is_logged_when_execution_fails() {
        let dir = tempdir().unwrap();
        let config = config(dir.path(), 1);

        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let runner = HalfRunner {
            output_root: config.output_root(),
        };
        let err = RunPipeline::new(config.clone(), Arc::new(runner))
            .run(units(&["ATest"]))
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::Config(_)));
        let logs = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("Aggregation failed: Mandatory report input missing"));
    }

    #[tokio::test]
    async fn test_cleanup_failure_skips_execution() {
        let dir = tempdir().unwrap();
        let config = config(dir.path(), 0);

        // The output root is a file, so it cannot be listed
        fs::create_dir_all(config.output_root().parent().unwrap()).unwrap();
        fs::write(config.output_root(), "not a directory").unwrap();

        let executor = Arc::new(ScriptedExecutor::new());
        let local: Arc<dyn UnitExecutor> = executor.clone();
        let runner = TestRunner::new(
            ParallelExecutor::new(1),
            Arc::new(RunDirAllocator::new(config.output_root())),
            Arc::new(DistributionCoordinator::local_only(local)),
        );

        let err = RunPipeline::new(config.clone(), Arc::new(runner))
            .run(units(&["ATest"]))
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::Cleanup { .. }));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_remaining_selection_uses_history() {
        let dir = tempdir().unwrap();
        let mut params = BuildParameters::default();
        params.build_dir = dir.path().to_path_buf();
        params.testing.hide_report_generator_output = true;
        params.predictive_selection.enabled = true;

        // First predictive run has no history and selects everything
        let config = Arc::new(resolve(&params, None));
        let outcome = RunPipeline::new(config.clone(), runner(&config, ScriptedExecutor::new()))
            .run(units(&["ATest", "BTest"]))
            .await
            .unwrap();
        assert!(outcome.deselected.is_empty());

        // Adding a unit: relevant mode only picks the unit without history
        let outcome = RunPipeline::new(config.clone(), runner(&config, ScriptedExecutor::new()))
            .run(units(&["ATest", "BTest", "CTest"]))
            .await
            .unwrap();
        assert_eq!(outcome.deselected, vec!["ATest", "BTest"]);

        // Remaining mode picks what the relevant run left out
        params.predictive_selection.select_remaining = true;
        let config = Arc::new(resolve(&params, None));
        let outcome = RunPipeline::new(config.clone(), runner(&config, ScriptedExecutor::new()))
            .run(units(&["ATest", "BTest", "CTest"]))
            .await
            .unwrap();
        assert_eq!(outcome.summary.total, 2);
        assert_eq!(outcome.deselected, vec!["CTest"]);
    }
}
