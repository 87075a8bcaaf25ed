//! Test execution runner
//!
//! One runner invocation executes a set of units once, inside a freshly
//! allocated run directory, and writes that directory's event report.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::{ExecutionContext, ParallelExecutor};
use crate::distribution::DistributionCoordinator;
use crate::error::HarnessResult;
use crate::models::{AttemptResult, TestStatus, TestUnit};
use crate::results::{EventReport, RunDirAllocator};

/// Outcome of a single runner invocation
#[derive(Clone, Debug)]
pub struct AttemptRun {
    pub run_dir: PathBuf,
    pub results: Vec<AttemptResult>,
}

/// Runs one attempt round over a set of units
#[async_trait]
pub trait AttemptRunner: Send + Sync {
    async fn run_attempt(&self, units: &[TestUnit], attempt: u32) -> HarnessResult<AttemptRun>;
}

/// Runner executing units through the distribution plan
pub struct TestRunner {
    parallel: ParallelExecutor,
    allocator: Arc<RunDirAllocator>,
    distributor: Arc<DistributionCoordinator>,
}

impl TestRunner {
    pub fn new(
        parallel: ParallelExecutor,
        allocator: Arc<RunDirAllocator>,
        distributor: Arc<DistributionCoordinator>,
    ) -> Self {
        Self {
            parallel,
            allocator,
            distributor,
        }
    }

    fn log_result(result: &AttemptResult) {
        if result.status == TestStatus::Fail || result.status == TestStatus::Error {
            info!(
                "FAILED {} (attempt {}, {}): {}",
                result.unit_id,
                result.attempt,
                result.executor,
                result.message.as_deref().unwrap_or("no message")
            );
        } else {
            debug!("{result}");
        }
    }
}

#[async_trait]
impl AttemptRunner for TestRunner {
    async fn run_attempt(&self, units: &[TestUnit], attempt: u32) -> HarnessResult<AttemptRun> {
        let run_dir = self.allocator.allocate()?;
        info!(
            "Attempt {}: running {} units in {}",
            attempt,
            units.len(),
            run_dir.name
        );

        let start = Instant::now();
        let ctx = ExecutionContext::new(attempt, &run_dir.path);
        let assignments = self.distributor.plan(units);
        let results = self.parallel.run(assignments, &ctx).await;

        for result in &results {
            Self::log_result(result);
        }

        EventReport::from_results(&run_dir.name, units, &results).write(&run_dir.path)?;

        info!(
            "Attempt {} finished in {}ms",
            attempt,
            start.elapsed().as_millis()
        );

        Ok(AttemptRun {
            run_dir: run_dir.path,
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::ScriptedExecutor;
    use crate::executor::UnitExecutor;
    use crate::results::REPORT_FILE_NAME;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_run_attempt_writes_report() {
        let dir = tempdir().unwrap();
        let executor: Arc<dyn UnitExecutor> =
            Arc::new(ScriptedExecutor::new().script("BTest", &[TestStatus::Fail]));
        let runner = TestRunner::new(
            ParallelExecutor::new(4),
            Arc::new(RunDirAllocator::new(dir.path())),
            Arc::new(DistributionCoordinator::local_only(executor)),
        );

        let units = vec![
            TestUnit::new("ATest", vec!["true".into()]),
            TestUnit::new("BTest", vec!["true".into()]),
        ];

        let first = runner.run_attempt(&units, 1).await.unwrap();
        let second = runner.run_attempt(&units[1..], 2).await.unwrap();

        assert_eq!(first.run_dir, dir.path().join("junit-1"));
        assert_eq!(second.run_dir, dir.path().join("junit-2"));
        assert_eq!(first.results[1].status, TestStatus::Fail);
        assert_eq!(second.results[0].status, TestStatus::Pass);
        assert_eq!(second.results[0].attempt, 2);

        let report = EventReport::read(&first.run_dir.join(REPORT_FILE_NAME)).unwrap();
        assert_eq!(report.run, "junit-1");
        assert_eq!(report.events.len(), 4);
    }
}
