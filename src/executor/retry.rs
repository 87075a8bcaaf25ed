//! Retry coordination
//!
//! Re-runs the units whose latest attempt failed, each round through a new
//! runner invocation, until they pass or the retry limit is spent.

use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, warn};

use super::AttemptRunner;
use crate::error::HarnessError;
use crate::models::{AttemptResult, TestUnit, UnitVerdict};

/// Result of a coordinated run
#[derive(Debug, Default)]
pub struct RetryOutcome {
    /// One verdict per input unit, in input order
    pub verdicts: Vec<UnitVerdict>,
    /// Run directories written, one per runner invocation
    pub run_dirs: Vec<PathBuf>,
    pub retry_rounds: u32,
    /// Set when a runner invocation failed; units it did not run are
    /// reported as errors
    pub error: Option<HarnessError>,
}

/// Retry coordinator
#[derive(Clone, Copy, Debug)]
pub struct RetryCoordinator {
    retry_limit: u32,
}

impl RetryCoordinator {
    pub fn new(retry_limit: u32) -> Self {
        Self { retry_limit }
    }

    /// Run the units, retrying failures. `on_retry` is told the number of
    /// each retry round before it starts.
    pub async fn run<R, F>(&self, runner: &R, units: &[TestUnit], mut on_retry: F) -> RetryOutcome
    where
        R: AttemptRunner + ?Sized,
        F: FnMut(u32),
    {
        let mut outcome = RetryOutcome::default();
        let mut attempts: HashMap<String, Vec<AttemptResult>> = HashMap::new();
        let mut pending: Vec<TestUnit> = units.to_vec();
        let mut attempt = 1;

        while !pending.is_empty() {
            let run = match runner.run_attempt(&pending, attempt).await {
                Ok(run) => run,
                Err(e) => {
                    outcome.error = Some(e);
                    break;
                }
            };
            outcome.run_dirs.push(run.run_dir);

            for result in run.results {
                attempts.entry(result.unit_id.clone()).or_default().push(result);
            }

            let failed: Vec<TestUnit> = pending
                .into_iter()
                .filter(|unit| {
                    attempts
                        .get(&unit.id)
                        .and_then(|a| a.last())
                        .map(|a| a.status.is_failure())
                        .unwrap_or(true)
                })
                .collect();

            if failed.is_empty() || attempt > self.retry_limit {
                break;
            }

            for unit in &failed {
                let message = attempts
                    .get(&unit.id)
                    .and_then(|a| a.last())
                    .and_then(|a| a.message.as_deref())
                    .unwrap_or("no result");
                warn!(
                    "{} failed on attempt {}, retrying ({}/{}): {}",
                    unit.id, attempt, attempt, self.retry_limit, message
                );
            }

            on_retry(attempt);
            outcome.retry_rounds = attempt;
            attempt += 1;
            pending = failed;
        }

        outcome.verdicts = units
            .iter()
            .map(|unit| UnitVerdict::from_attempts(&unit.id, attempts.remove(&unit.id).unwrap_or_default()))
            .collect();

        let flaky = outcome.verdicts.iter().filter(|v| v.is_flaky()).count();
        if flaky > 0 {
            info!("{flaky} units passed after retry");
        }

        outcome
    }
}
