//! Local process execution
//!
//! Runs a unit's declared command as a child process.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

use super::{ExecutionContext, UnitExecutor};
use crate::config::env::ACCESS_KEY_VAR;
use crate::config::TestRunConfiguration;
use crate::models::{AttemptResult, TestUnit, LOCAL_EXECUTOR};

/// Bytes of captured output attached to a failure message
const OUTPUT_TAIL_BYTES: usize = 4096;

/// Executes units as local child processes
#[derive(Clone, Debug)]
pub struct ProcessExecutor {
    timeout: Duration,
    dry_run: bool,
    capture_output: bool,
    profiling: bool,
    stripped_env: Vec<String>,
}

impl ProcessExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            dry_run: false,
            capture_output: true,
            profiling: false,
            stripped_env: Vec::new(),
        }
    }

    pub fn from_config(config: &TestRunConfiguration) -> Self {
        Self::new(config.unit_timeout)
            .with_dry_run(config.dry_run)
            .with_capture_output(config.capture_output)
            .with_profiling(config.profiling_enabled)
            .with_stripped_env(config.stripped_env_vars.clone())
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    pub fn with_profiling(mut self, profiling: bool) -> Self {
        self.profiling = profiling;
        self
    }

    pub fn with_stripped_env(mut self, vars: Vec<String>) -> Self {
        self.stripped_env = vars;
        self
    }

    fn build_command(&self, unit: &TestUnit, ctx: &ExecutionContext) -> Result<Command> {
        let (program, args) = unit
            .command
            .split_first()
            .with_context(|| format!("Unit {} has an empty command", unit.id))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&unit.env)
            .env("TESTRUN_OUTPUT_DIR", &ctx.output_dir)
            .env("TESTRUN_UNIT_ID", &unit.id)
            .env("TESTRUN_ATTEMPT", ctx.attempt.to_string())
            .env("TESTRUN_DRY_RUN", self.dry_run.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if self.profiling {
            let file = format!("{}.profile", sanitize_file_name(&unit.id));
            cmd.env("TESTRUN_PROFILE_OUTPUT", ctx.output_dir.join(file));
        }

        cmd.env_remove(ACCESS_KEY_VAR);
        for var in &self.stripped_env {
            cmd.env_remove(var);
        }

        if let Some(dir) = &unit.working_dir {
            cmd.current_dir(dir);
        }

        if self.capture_output {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        Ok(cmd)
    }
}

#[async_trait]
impl UnitExecutor for ProcessExecutor {
    async fn execute(&self, unit: &TestUnit, ctx: &ExecutionContext) -> Result<AttemptResult> {
        if unit.disabled {
            return Ok(AttemptResult::skip(&unit.id, "disabled"));
        }

        let mut cmd = self.build_command(unit, ctx)?;

        if self.dry_run {
            debug!("Dry run: {} not executed", unit.id);
            return Ok(AttemptResult::pass(&unit.id, 0).with_message("dry run"));
        }

        debug!("Executing {} ({})", unit.id, unit.command.join(" "));
        let start = Instant::now();
        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {}", unit.command[0]))?;

        // Dropping the child on timeout kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.with_context(|| format!("Failed to wait for {}", unit.id))?,
            Err(_) => {
                return Ok(AttemptResult::fail(
                    &unit.id,
                    start.elapsed().as_millis() as u64,
                    format!("timed out after {}s", self.timeout.as_secs_f64()),
                ))
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        if output.status.success() {
            return Ok(AttemptResult::pass(&unit.id, duration_ms));
        }

        let mut message = match output.status.code() {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        };
        for (label, bytes) in [("stdout", &output.stdout), ("stderr", &output.stderr)] {
            let tail = output_tail(bytes);
            if !tail.is_empty() {
                message.push_str(&format!("\n--- {label} ---\n{tail}"));
            }
        }

        Ok(AttemptResult::fail(&unit.id, duration_ms, message))
    }

    fn name(&self) -> String {
        LOCAL_EXECUTOR.to_string()
    }
}

fn output_tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim_end();
    if text.len() <= OUTPUT_TAIL_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - OUTPUT_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

fn sanitize_file_name(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}
