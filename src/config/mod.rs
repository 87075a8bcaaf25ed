//! Configuration module
//!
//! Build parameters are loaded from file, environment and CLI (in increasing
//! precedence) and resolved once into an immutable [`TestRunConfiguration`]
//! that every component receives by reference.

pub mod env;
pub mod file;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::selection::SelectionMode;

pub use env::EnvConfig;
pub use file::ConfigFile;

/// Subdirectory of the build directory holding `junit-*` run directories
pub const TEST_RESULTS_DIR: &str = "test-results/test";

/// Aggregated report location relative to the build directory
pub const AGGREGATED_REPORT_PATH: &str = "reports/open-test-report.html";

/// Selection history location relative to the build directory
pub const HISTORY_PATH: &str = "testrun/history.json";

/// Variables removed from unit processes in CI so runner internals do not leak
pub const CI_STRIPPED_ENV_VARS: &[&str] = &["RUNNER_TEMP", "GITHUB_ACTION"];

/// Raw build parameters, as read from configuration sources
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildParameters {
    /// Running on a CI server
    #[serde(default)]
    pub ci: bool,

    /// Root of all generated output
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,

    /// Suite manifest declaring the test units
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,

    #[serde(default)]
    pub testing: TestingParameters,

    #[serde(default)]
    pub distribution: DistributionParameters,

    #[serde(default)]
    pub predictive_selection: PredictiveSelectionParameters,
}

impl Default for BuildParameters {
    fn default() -> Self {
        Self {
            ci: false,
            build_dir: default_build_dir(),
            manifest: default_manifest(),
            testing: TestingParameters::default(),
            distribution: DistributionParameters::default(),
            predictive_selection: PredictiveSelectionParameters::default(),
        }
    }
}

fn default_build_dir() -> PathBuf {
    PathBuf::from("build")
}

fn default_manifest() -> PathBuf {
    PathBuf::from("testrun-suite.yaml")
}

/// Test execution parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestingParameters {
    /// Retry override; the CI-dependent default applies when unset
    #[serde(default)]
    pub retries: Option<u32>,

    /// Report units as executed without running them
    #[serde(default)]
    pub dry_run: bool,

    /// Expose a profile output path to unit processes
    #[serde(default)]
    pub enable_profiling: bool,

    /// Suppress the aggregator's console summary
    #[serde(default)]
    pub hide_report_generator_output: bool,

    /// Concurrent unit executions; available parallelism when unset
    #[serde(default)]
    pub max_workers: Option<usize>,

    /// Per-unit timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Capture unit stdout/stderr and attach it to failures
    #[serde(default = "default_true")]
    pub capture_output: bool,

    /// Class name patterns of units to execute
    #[serde(default = "default_include")]
    pub include: Vec<String>,
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_include() -> Vec<String> {
    vec!["*Test".to_string(), "*Tests".to_string()]
}

impl Default for TestingParameters {
    fn default() -> Self {
        Self {
            retries: None,
            dry_run: false,
            enable_profiling: false,
            hide_report_generator_output: false,
            max_workers: None,
            timeout_secs: default_timeout_secs(),
            capture_output: true,
            include: default_include(),
        }
    }
}

/// Distribution parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DistributionParameters {
    #[serde(default)]
    pub enabled: bool,

    /// Local executor cap; available parallelism when unset
    #[serde(default)]
    pub max_local_executors: Option<usize>,

    /// Remote executor cap; all eligible executors when unset
    #[serde(default)]
    pub max_remote_executors: Option<usize>,

    /// Required executor tags, e.g. `os=linux`
    #[serde(default)]
    pub requirements: Vec<String>,

    /// Known remote executor agents
    #[serde(default)]
    pub executors: Vec<RemoteExecutorConfig>,

    /// Seconds before a remote call falls back to local execution
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,
}

fn default_remote_timeout_secs() -> u64 {
    600
}

impl Default for DistributionParameters {
    fn default() -> Self {
        Self {
            enabled: false,
            max_local_executors: None,
            max_remote_executors: None,
            requirements: Vec::new(),
            executors: Vec::new(),
            remote_timeout_secs: default_remote_timeout_secs(),
        }
    }
}

/// A remote executor agent
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteExecutorConfig {
    pub id: String,
    pub endpoint: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Predictive selection parameters
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PredictiveSelectionParameters {
    #[serde(default)]
    pub enabled: bool,

    /// Run the tests the previous selection left out
    #[serde(default)]
    pub select_remaining: bool,
}

/// Resolved distribution settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DistributionSettings {
    pub enabled: bool,
    pub max_local_executors: usize,
    pub max_remote_executors: usize,
    pub executors: Vec<RemoteExecutorConfig>,
    pub access_key: Option<String>,
    pub remote_timeout: Duration,
}

/// Immutable configuration of one test run
#[derive(Clone, Debug)]
pub struct TestRunConfiguration {
    pub ci: bool,
    pub retry_limit: u32,
    pub distribution: DistributionSettings,
    pub executor_requirements: BTreeSet<String>,
    pub selection_mode: SelectionMode,
    pub dry_run: bool,
    pub profiling_enabled: bool,
    pub hide_report_generator_output: bool,
    pub capture_output: bool,
    pub max_workers: usize,
    pub unit_timeout: Duration,
    pub include: Vec<String>,
    pub stripped_env_vars: Vec<String>,
    pub build_dir: PathBuf,
    pub manifest: PathBuf,
}

impl TestRunConfiguration {
    /// Root holding the `junit-*` run directories
    pub fn output_root(&self) -> PathBuf {
        self.build_dir.join(TEST_RESULTS_DIR)
    }

    /// Fixed location of the aggregated HTML report
    pub fn report_path(&self) -> PathBuf {
        self.build_dir.join(AGGREGATED_REPORT_PATH)
    }

    pub fn history_path(&self) -> PathBuf {
        self.build_dir.join(HISTORY_PATH)
    }
}

/// Retry policy: an explicit override wins, otherwise 2 on CI and 0 locally
pub fn retry_limit(retries: Option<u32>, ci: bool) -> u32 {
    retries.unwrap_or(if ci { 2 } else { 0 })
}

/// Requirement tag for the current operating system
pub fn current_os_requirement() -> Option<&'static str> {
    if cfg!(target_os = "linux") {
        Some("os=linux")
    } else if cfg!(target_os = "windows") {
        Some("os=windows")
    } else if cfg!(target_os = "macos") {
        Some("os=macos")
    } else {
        None
    }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Resolve raw parameters into the run configuration.
///
/// `access_key` is the remote-access credential; on CI, distribution is
/// only enabled when it is present and non-blank.
pub fn resolve(params: &BuildParameters, access_key: Option<String>) -> TestRunConfiguration {
    let access_key = access_key.filter(|k| !k.trim().is_empty());
    let dist = &params.distribution;

    let distribution_enabled = dist.enabled && (!params.ci || access_key.is_some());
    if dist.enabled && !distribution_enabled {
        tracing::warn!("Distribution access key missing on CI, executing locally only");
    }

    let mut executor_requirements: BTreeSet<String> = dist.requirements.iter().cloned().collect();
    if params.ci {
        if let Some(os) = current_os_requirement() {
            executor_requirements.insert(os.to_string());
        }
    }

    let selection_mode = if !params.predictive_selection.enabled {
        SelectionMode::All
    } else if params.predictive_selection.select_remaining {
        SelectionMode::Remaining
    } else {
        SelectionMode::Relevant
    };

    let stripped_env_vars = if params.ci {
        CI_STRIPPED_ENV_VARS.iter().map(|v| v.to_string()).collect()
    } else {
        Vec::new()
    };

    TestRunConfiguration {
        ci: params.ci,
        retry_limit: retry_limit(params.testing.retries, params.ci),
        distribution: DistributionSettings {
            enabled: distribution_enabled,
            max_local_executors: dist
                .max_local_executors
                .unwrap_or_else(|| available_parallelism().max(1)),
            max_remote_executors: dist.max_remote_executors.unwrap_or(dist.executors.len()),
            executors: dist.executors.clone(),
            access_key,
            remote_timeout: Duration::from_secs(dist.remote_timeout_secs),
        },
        executor_requirements,
        selection_mode,
        dry_run: params.testing.dry_run,
        profiling_enabled: params.testing.enable_profiling,
        hide_report_generator_output: params.testing.hide_report_generator_output,
        capture_output: params.testing.capture_output,
        max_workers: params
            .testing
            .max_workers
            .unwrap_or_else(available_parallelism)
            .max(1),
        unit_timeout: Duration::from_secs(params.testing.timeout_secs),
        include: params.testing.include.clone(),
        stripped_env_vars,
        build_dir: params.build_dir.clone(),
        manifest: params.manifest.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> BuildParameters {
        BuildParameters::default()
    }

    #[test]
    fn test_retry_policy() {
        assert_eq!(retry_limit(None, false), 0);
        assert_eq!(retry_limit(None, true), 2);
        assert_eq!(retry_limit(Some(5), true), 5);
        assert_eq!(retry_limit(Some(0), true), 0);
    }

    #[test]
    fn test_distribution_refused_on_ci_without_key() {
        let mut params = params();
        params.ci = true;
        params.distribution.enabled = true;

        assert!(!resolve(&params, None).distribution.enabled);
        assert!(!resolve(&params, Some("   ".to_string())).distribution.enabled);
        assert!(resolve(&params, Some("secret".to_string())).distribution.enabled);

        params.ci = false;
        assert!(resolve(&params, None).distribution.enabled);
    }

    #[test]
    fn test_ci_requirements_and_env() {
        let mut params = params();
        params.ci = true;
        params.distribution.requirements = vec!["gpu=true".to_string()];

        let config = resolve(&params, None);
        assert!(config.executor_requirements.contains("gpu=true"));
        if let Some(os) = current_os_requirement() {
            assert!(config.executor_requirements.contains(os));
        }
        assert_eq!(config.stripped_env_vars, vec!["RUNNER_TEMP", "GITHUB_ACTION"]);

        params.ci = false;
        let config = resolve(&params, None);
        assert!(config.stripped_env_vars.is_empty());
        assert_eq!(config.executor_requirements.len(), 1);
    }

    #[test]
    fn test_selection_mode() {
        let mut params = params();
        assert_eq!(resolve(&params, None).selection_mode, SelectionMode::All);

        params.predictive_selection.enabled = true;
        assert_eq!(resolve(&params, None).selection_mode, SelectionMode::Relevant);

        params.predictive_selection.select_remaining = true;
        assert_eq!(resolve(&params, None).selection_mode, SelectionMode::Remaining);
    }

    #[test]
    fn test_zero_local_executors_is_kept() {
        let mut params = params();
        params.distribution.enabled = true;
        params.distribution.max_local_executors = Some(0);
        assert_eq!(resolve(&params, None).distribution.max_local_executors, 0);

        params.distribution.max_local_executors = None;
        assert!(resolve(&params, None).distribution.max_local_executors >= 1);
    }

    #[test]
    fn test_paths() {
        let config = resolve(&params(), None);
        assert_eq!(config.output_root(), PathBuf::from("build/test-results/test"));
        assert_eq!(
            config.report_path(),
            PathBuf::from("build/reports/open-test-report.html")
        );
        assert!(config.max_workers >= 1);
    }
}
