//! testrun - Test Execution Harness
//!
//! Runs a declared suite of test units with retries, optional distribution
//! over remote executors and predictive selection, then aggregates the
//! per-run event reports into a single HTML report.
//!
//! ## Features
//!
//! - Stale `junit-*` run directories are swept before every run
//! - Failed units are retried in fresh run directories (2 retries on CI)
//! - Units are spread over local slots and tagged remote agents
//! - Predictive selection from the persisted unit history
//! - Aggregated report at `<build_dir>/reports/open-test-report.html`
//!
//! ## Usage
//!
//! ```bash
//! # Run the suite declared in testrun-suite.yaml
//! testrun run
//!
//! # Run on CI with one retry and a JSON summary
//! testrun run --ci --retries 1 --format json
//!
//! # Run only relevant units, then the ones left out
//! testrun run --predictive --changed src/parser.rs
//! testrun run --select-remaining
//!
//! # Regenerate the aggregated report
//! testrun report
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

mod cleanup;
mod cli;
mod config;
mod discovery;
mod distribution;
mod error;
mod executor;
mod models;
mod output;
mod pipeline;
mod results;
mod selection;
mod utils;

use cli::Args;
use config::{BuildParameters, ConfigFile, EnvConfig, TestRunConfiguration};
use discovery::SuiteManifest;
use output::{OutputFormat, ResultFormatter};
use pipeline::RunPipeline;
use results::{render, ReportAggregator, ReportFormat};
use selection::HistoryStore;
use utils::logger::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let env = EnvConfig::load();

    init_logger(
        LogLevel::select(args.verbose, args.quiet, env.log_level.as_deref()),
        env.ci.unwrap_or(false),
    );

    let mut params = load_parameters(&args, &env)?;

    match args.command {
        cli::Command::Run(run_args) => {
            run_args.apply_to(&mut params);
            let code = run_tests(run_args, params, env.access_key).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        cli::Command::Clean => {
            clean(&config::resolve(&params, None))?;
        }
        cli::Command::Report(report_args) => {
            report(report_args, &config::resolve(&params, None))?;
        }
        cli::Command::List(list_args) => {
            list_units(list_args, &config::resolve(&params, None))?;
        }
        cli::Command::History(history_args) => {
            show_history(history_args, &config::resolve(&params, None))?;
        }
        cli::Command::Config(config_args) => {
            manage_config(config_args, &params)?;
        }
    }

    Ok(())
}

/// Layer parameters: config file, then environment, then global flags
fn load_parameters(args: &Args, env: &EnvConfig) -> Result<BuildParameters> {
    let mut file = ConfigFile::load_default()?;

    let explicit = args
        .config
        .clone()
        .or_else(|| env.config_file.as_ref().map(PathBuf::from));
    if let Some(path) = explicit {
        file.merge(ConfigFile::load(&path)?);
    }

    let mut params = file.parameters;
    env.apply_to(&mut params);

    if let Some(dir) = &args.build_dir {
        params.build_dir = dir.clone();
    }
    if let Some(manifest) = &args.manifest {
        params.manifest = manifest.clone();
    }

    Ok(params)
}

fn load_units(config: &TestRunConfiguration, include: &[String]) -> Result<Vec<models::TestUnit>> {
    let manifest = SuiteManifest::load(&config.manifest)
        .with_context(|| format!("Failed to load suite manifest {}", config.manifest.display()))?;
    Ok(discovery::discover(manifest, include)?)
}

fn formatter(format: &str, config: &TestRunConfiguration) -> ResultFormatter {
    let formatter = ResultFormatter::new(OutputFormat::from_str(format).unwrap_or(OutputFormat::Table));
    if config.ci {
        formatter.no_color()
    } else {
        formatter
    }
}

async fn run_tests(
    args: cli::RunArgs,
    params: BuildParameters,
    access_key: Option<String>,
) -> Result<i32> {
    let config = Arc::new(config::resolve(&params, access_key));
    let units = load_units(&config, &config.include)?;

    info!(
        "Running {} units (retry limit {}, {} selection, {} workers{})",
        units.len(),
        config.retry_limit,
        config.selection_mode,
        config.max_workers,
        if config.distribution.enabled { ", distributed" } else { "" }
    );

    let outcome = RunPipeline::from_config(config.clone())?
        .with_changed_paths(args.changed)
        .run(units)
        .await?;

    debug!(
        "Run states: {}",
        outcome
            .states
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" -> ")
    );
    if outcome.cleanup.targets_removed > 0 {
        info!(
            "Removed {} stale run directories before executing",
            outcome.cleanup.targets_removed
        );
    }
    info!(
        "Aggregated {} run reports ({} without a report) into {}",
        outcome.report.runs.len(),
        outcome.report.skipped.len(),
        config.report_path().display()
    );

    if !outcome.deselected.is_empty() {
        info!("{} units deselected by predictive selection", outcome.deselected.len());
    }

    println!("{}", formatter(&args.format, &config).format_summary(&outcome.summary));

    if let Some(path) = &args.output {
        let json = serde_json::to_string_pretty(&outcome.summary)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write summary: {}", path.display()))?;
        println!("Summary saved to {}", path.display());
    }

    Ok(outcome.summary.exit_code())
}

fn clean(config: &TestRunConfiguration) -> Result<()> {
    let stats = cleanup::CleanupSweeper::new(config.output_root()).sweep()?;
    println!(
        "✓ Removed {} run directories ({} files, {} subdirectories)",
        stats.targets_removed, stats.files_removed, stats.dirs_removed
    );
    Ok(())
}

fn report(args: cli::ReportArgs, config: &TestRunConfiguration) -> Result<()> {
    let format = ReportFormat::from_str(&args.format)
        .ok_or_else(|| anyhow::anyhow!("Unknown report format: {}", args.format))?;
    let aggregator = ReportAggregator::new(config.output_root(), config.report_path())
        .quiet(config.hide_report_generator_output);

    if format == ReportFormat::Html {
        aggregator.aggregate()?;
        return Ok(());
    }

    let rendered = render(&aggregator.collect()?, format);
    match &args.output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("Failed to write report: {}", path.display()))?;
            println!("Report saved to {}", path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

fn list_units(args: cli::ListArgs, config: &TestRunConfiguration) -> Result<()> {
    let include = if args.all {
        vec!["*".to_string()]
    } else {
        config.include.clone()
    };
    let units = load_units(config, &include)?;
    println!("{}", formatter(&args.format, config).format_units(&units, args.detailed));
    Ok(())
}

fn show_history(args: cli::HistoryArgs, config: &TestRunConfiguration) -> Result<()> {
    let store = HistoryStore::new(config.history_path());

    if args.clear {
        store.clear()?;
        println!("✓ History cleared: {}", store.path().display());
        return Ok(());
    }

    let history = store.load()?;
    if history.is_empty() {
        println!("No history recorded at {}", store.path().display());
        return Ok(());
    }

    if let Some(path) = &args.export {
        store.export_csv(&history, path)?;
        println!("✓ History exported to {}", path.display());
        return Ok(());
    }

    if args.flaky {
        let flaky = history.flaky_units();
        if flaky.is_empty() {
            println!("No flaky units recorded");
        }
        for (id, unit) in flaky {
            println!(
                "  {:<50} flaky {:>3}/{:<3} runs, {:.1}% failures",
                id,
                unit.flaky,
                unit.runs,
                unit.failure_rate() * 100.0
            );
        }
        return Ok(());
    }

    println!("{}", formatter(&args.format, config).format_history(&history));
    Ok(())
}

fn manage_config(args: cli::ConfigArgs, params: &BuildParameters) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { path, force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    path.display()
                );
            }

            ConfigFile::example().save(&path)?;
            println!("✓ Configuration file created: {}", path.display());
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show => {
            println!("{}", serde_yaml::to_string(params)?);
        }

        cli::ConfigAction::Validate { path } => {
            let path = path
                .or_else(ConfigFile::find)
                .ok_or_else(|| anyhow::anyhow!("No configuration file found"))?;

            match ConfigFile::load(&path) {
                Ok(_) => println!("✓ Configuration file is valid: {}", path.display()),
                Err(e) => {
                    println!("✗ Configuration file is invalid: {}", path.display());
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }

        cli::ConfigAction::Env => {
            config::env::print_env_help();
            println!();
            EnvConfig::load().print_summary();
        }
    }

    Ok(())
}
