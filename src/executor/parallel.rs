//! Parallel unit execution
//!
//! Runs assignments concurrently, bounded by a semaphore.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use super::{Assignment, ExecutionContext};
use crate::models::AttemptResult;

/// Parallel unit executor
#[derive(Clone, Debug)]
pub struct ParallelExecutor {
    max_concurrent: usize,
}

impl ParallelExecutor {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Run every assignment and return one result per assignment, in order.
    ///
    /// Executor errors and panicking tasks become `Error` results; they never
    /// stop the remaining units.
    pub async fn run(&self, assignments: Vec<Assignment>, ctx: &ExecutionContext) -> Vec<AttemptResult> {
        info!(
            "Running {} units (max {} concurrent)",
            assignments.len(),
            self.max_concurrent
        );

        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::new();
        let mut ids = Vec::new();

        for Assignment { unit, executor } in assignments {
            let semaphore = semaphore.clone();
            let ctx = ctx.clone();
            ids.push((unit.id.clone(), executor.name()));

            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return AttemptResult::error(&unit.id, e.to_string()),
                };

                debug!("Starting {} on {}", unit.id, executor.name());
                match executor.execute(&unit, &ctx).await {
                    Ok(result) => result,
                    Err(e) => {
                        error!("Executor {} failed on {}: {:#}", executor.name(), unit.id, e);
                        AttemptResult::error(&unit.id, format!("{e:#}")).on_executor(executor.name())
                    }
                }
            });

            handles.push(handle);
        }

        let results: Vec<AttemptResult> = join_all(handles)
            .await
            .into_iter()
            .zip(ids)
            .map(|(joined, (unit_id, executor))| match joined {
                Ok(result) => result,
                Err(e) => AttemptResult::error(unit_id, format!("task failed: {e}")).on_executor(executor),
            })
            .map(|result| result.with_attempt(ctx.attempt))
            .collect();

        info!(
            "Parallel execution completed in {}ms - {} results",
            start.elapsed().as_millis(),
            results.len()
        );

        results
    }
}
