//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::BuildParameters;

/// Test execution harness with retries, distribution and report aggregation
#[derive(Parser, Debug)]
#[command(name = "testrun")]
#[command(version)]
#[command(about = "Run test suites with retries, distribution and predictive selection")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Build output directory
    #[arg(long, global = true)]
    pub build_dir: Option<PathBuf>,

    /// Suite manifest
    #[arg(short, long, global = true)]
    pub manifest: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Clean, execute, retry and aggregate a test run
    Run(RunArgs),

    /// Remove previous run directories
    Clean,

    /// Aggregate existing run directories into a report
    Report(ReportArgs),

    /// List the units of the suite manifest
    List(ListArgs),

    /// Show or export the predictive selection history
    History(HistoryArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Class name patterns to execute (`*` wildcard), replaces configured ones
    #[arg(short, long, value_delimiter = ',')]
    pub include: Vec<String>,

    /// Retry limit for failed units (default: 2 on CI, 0 locally)
    #[arg(short, long)]
    pub retries: Option<u32>,

    /// Run in CI mode
    #[arg(long)]
    pub ci: bool,

    /// Report units as executed without running them
    #[arg(long)]
    pub dry_run: bool,

    /// Expose a profile output path to unit processes
    #[arg(long)]
    pub profile: bool,

    /// Concurrent unit executions
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Per-unit timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Do not capture unit output
    #[arg(long)]
    pub no_capture: bool,

    /// Distribute units over local and remote executors
    #[arg(long)]
    pub distribution: bool,

    /// Local executor cap
    #[arg(long)]
    pub max_local_executors: Option<usize>,

    /// Remote executor cap
    #[arg(long)]
    pub max_remote_executors: Option<usize>,

    /// Required executor tags (key=value)
    #[arg(long = "require", value_delimiter = ',')]
    pub requirements: Vec<String>,

    /// Only run units predicted to be relevant
    #[arg(long)]
    pub predictive: bool,

    /// Run the units the previous predictive run left out
    #[arg(long)]
    pub select_remaining: bool,

    /// Paths changed since the last run (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub changed: Vec<String>,

    /// Suppress the report generator's console summary
    #[arg(long)]
    pub hide_report_output: bool,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Save the run summary as JSON
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl RunArgs {
    /// Apply flags that were given on top of file and environment parameters
    pub fn apply_to(&self, params: &mut BuildParameters) {
        if !self.include.is_empty() {
            params.testing.include = self.include.clone();
        }
        if self.retries.is_some() {
            params.testing.retries = self.retries;
        }
        if self.workers.is_some() {
            params.testing.max_workers = self.workers;
        }
        if let Some(timeout) = self.timeout {
            params.testing.timeout_secs = timeout;
        }
        if self.max_local_executors.is_some() {
            params.distribution.max_local_executors = self.max_local_executors;
        }
        if self.max_remote_executors.is_some() {
            params.distribution.max_remote_executors = self.max_remote_executors;
        }
        params
            .distribution
            .requirements
            .extend(self.requirements.iter().cloned());

        params.ci |= self.ci;
        params.testing.dry_run |= self.dry_run;
        params.testing.enable_profiling |= self.profile;
        params.testing.hide_report_generator_output |= self.hide_report_output;
        params.testing.capture_output &= !self.no_capture;
        params.distribution.enabled |= self.distribution;
        params.predictive_selection.enabled |= self.predictive || self.select_remaining;
        params.predictive_selection.select_remaining |= self.select_remaining;
    }
}

/// Arguments for report command
#[derive(Parser, Debug)]
pub struct ReportArgs {
    /// Report format (html, text, markdown)
    #[arg(short, long, default_value = "html")]
    pub format: String,

    /// Write the text or markdown report to a file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Show commands, tags and sources
    #[arg(short, long)]
    pub detailed: bool,

    /// Ignore include patterns
    #[arg(short, long)]
    pub all: bool,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

/// Arguments for history command
#[derive(Parser, Debug)]
pub struct HistoryArgs {
    /// Only show flaky units
    #[arg(long)]
    pub flaky: bool,

    /// Export the history to a CSV file
    #[arg(short, long)]
    pub export: Option<PathBuf>,

    /// Delete the history
    #[arg(long)]
    pub clear: bool,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Destination
        #[arg(default_value = "testrun.yaml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective build parameters
    Show,

    /// Validate a configuration file
    Validate {
        /// File to validate; the discovered one when omitted
        path: Option<PathBuf>,
    },

    /// Describe the supported environment variables
    Env,
}
