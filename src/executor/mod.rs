//! Test execution engine
//!
//! Units are executed through [`UnitExecutor`] implementations, fanned out
//! by a bounded worker pool, and re-run by the retry coordinator.

mod parallel;
mod process;
mod retry;
mod runner;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::models::{AttemptResult, TestUnit};

pub use parallel::ParallelExecutor;
pub use process::ProcessExecutor;
pub use retry::RetryCoordinator;
pub use runner::{AttemptRunner, TestRunner};

#[cfg(test)]
pub use runner::AttemptRun;

/// Per-attempt execution context handed to executors
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    pub attempt: u32,
    /// Run directory of the current attempt
    pub output_dir: PathBuf,
}

impl ExecutionContext {
    pub fn new(attempt: u32, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            attempt,
            output_dir: output_dir.into(),
        }
    }
}

/// Executes a single unit once.
///
/// A failing unit is an `Ok` result with a failing status; `Err` is reserved
/// for the executor itself breaking down, which the caller records as
/// [`crate::models::TestStatus::Error`].
#[async_trait]
pub trait UnitExecutor: Send + Sync {
    async fn execute(&self, unit: &TestUnit, ctx: &ExecutionContext)
        -> anyhow::Result<AttemptResult>;

    fn name(&self) -> String;
}

/// A unit bound to the executor that will run it
#[derive(Clone)]
pub struct Assignment {
    pub unit: TestUnit,
    pub executor: Arc<dyn UnitExecutor>,
}

impl Assignment {
    pub fn new(unit: TestUnit, executor: Arc<dyn UnitExecutor>) -> Self {
        Self { unit, executor }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted executors shared by tests across modules

    use super::*;
    use crate::models::TestStatus;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Returns scripted statuses per unit id, one per call; `Pass` once the
    /// script runs out
    #[derive(Default)]
    pub struct ScriptedExecutor {
        scripts: Mutex<HashMap<String, Vec<TestStatus>>>,
        calls: Mutex<Vec<(String, u32)>>,
    }

    impl ScriptedExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn script(self, unit_id: &str, statuses: &[TestStatus]) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .insert(unit_id.to_string(), statuses.iter().rev().copied().collect());
            self
        }

        pub fn calls(&self) -> Vec<(String, u32)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl UnitExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            unit: &TestUnit,
            ctx: &ExecutionContext,
        ) -> anyhow::Result<AttemptResult> {
            self.calls
                .lock()
                .unwrap()
                .push((unit.id.clone(), ctx.attempt));
            let status = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&unit.id)
                .and_then(|s| s.pop())
                .unwrap_or(TestStatus::Pass);

            let result = match status {
                TestStatus::Pass => AttemptResult::pass(&unit.id, 1),
                TestStatus::Fail => AttemptResult::fail(&unit.id, 1, "scripted failure"),
                TestStatus::Skip => AttemptResult::skip(&unit.id, "scripted skip"),
                TestStatus::Error => anyhow::bail!("scripted executor error"),
            };
            Ok(result.on_executor(self.name()))
        }

        fn name(&self) -> String {
            "scripted".to_string()
        }
    }
}
