//! Environment variable configuration
//!
//! Provides environment variable overrides for build parameters.

use std::env;

use super::BuildParameters;

/// Environment variable prefix
const ENV_PREFIX: &str = "TESTRUN";

/// Remote-access credential required for distribution on CI
pub const ACCESS_KEY_VAR: &str = "TESTRUN_DISTRIBUTION_ACCESS_KEY";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Retry override from TESTRUN_RETRIES
    pub retries: Option<u32>,
    /// CI flag from TESTRUN_CI, falling back to CI
    pub ci: Option<bool>,
    /// Dry run from TESTRUN_DRY_RUN
    pub dry_run: Option<bool>,
    /// Profiling from TESTRUN_PROFILE
    pub profiling: Option<bool>,
    /// Worker count from TESTRUN_WORKERS
    pub workers: Option<usize>,
    /// Unit timeout from TESTRUN_TIMEOUT
    pub timeout: Option<u64>,
    /// Distribution toggle from TESTRUN_DISTRIBUTION
    pub distribution: Option<bool>,
    /// Predictive selection toggle from TESTRUN_PREDICTIVE_SELECTION
    pub predictive_selection: Option<bool>,
    /// Remaining-tests mode from TESTRUN_SELECT_REMAINING
    pub select_remaining: Option<bool>,
    /// Build directory from TESTRUN_BUILD_DIR
    pub build_dir: Option<String>,
    /// Config file from TESTRUN_CONFIG
    pub config_file: Option<String>,
    /// Log level from TESTRUN_LOG_LEVEL, used when no -v/-q flag is given
    pub log_level: Option<String>,
    /// Distribution credential from TESTRUN_DISTRIBUTION_ACCESS_KEY
    pub access_key: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            retries: get_env_parse("RETRIES"),
            ci: get_env_bool("CI").or_else(|| env::var("CI").ok().map(|v| parse_bool(&v))),
            dry_run: get_env_bool("DRY_RUN"),
            profiling: get_env_bool("PROFILE"),
            workers: get_env_parse("WORKERS"),
            timeout: get_env_parse("TIMEOUT"),
            distribution: get_env_bool("DISTRIBUTION"),
            predictive_selection: get_env_bool("PREDICTIVE_SELECTION"),
            select_remaining: get_env_bool("SELECT_REMAINING"),
            build_dir: get_env("BUILD_DIR"),
            config_file: get_env("CONFIG"),
            log_level: get_env("LOG_LEVEL"),
            access_key: env::var(ACCESS_KEY_VAR).ok(),
        }
    }

    /// Check if any override variables are set
    pub fn has_any(&self) -> bool {
        self.retries.is_some()
            || self.ci.is_some()
            || self.dry_run.is_some()
            || self.profiling.is_some()
            || self.workers.is_some()
            || self.timeout.is_some()
            || self.distribution.is_some()
            || self.predictive_selection.is_some()
            || self.select_remaining.is_some()
            || self.build_dir.is_some()
            || self.config_file.is_some()
            || self.log_level.is_some()
    }

    /// Apply the variables that are set on top of file parameters
    pub fn apply_to(&self, params: &mut BuildParameters) {
        if let Some(ci) = self.ci {
            params.ci = ci;
        }
        if let Some(retries) = self.retries {
            params.testing.retries = Some(retries);
        }
        if let Some(dry_run) = self.dry_run {
            params.testing.dry_run = dry_run;
        }
        if let Some(profiling) = self.profiling {
            params.testing.enable_profiling = profiling;
        }
        if let Some(workers) = self.workers {
            params.testing.max_workers = Some(workers);
        }
        if let Some(timeout) = self.timeout {
            params.testing.timeout_secs = timeout;
        }
        if let Some(enabled) = self.distribution {
            params.distribution.enabled = enabled;
        }
        if let Some(enabled) = self.predictive_selection {
            params.predictive_selection.enabled = enabled;
        }
        if let Some(remaining) = self.select_remaining {
            params.predictive_selection.select_remaining = remaining;
        }
        if let Some(dir) = &self.build_dir {
            params.build_dir = dir.into();
        }
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_RETRIES:              {:?}", ENV_PREFIX, self.retries);
        println!("  {}_CI:                   {:?}", ENV_PREFIX, self.ci);
        println!("  {}_DRY_RUN:              {:?}", ENV_PREFIX, self.dry_run);
        println!("  {}_PROFILE:              {:?}", ENV_PREFIX, self.profiling);
        println!("  {}_WORKERS:              {:?}", ENV_PREFIX, self.workers);
        println!("  {}_TIMEOUT:              {:?}", ENV_PREFIX, self.timeout);
        println!("  {}_DISTRIBUTION:         {:?}", ENV_PREFIX, self.distribution);
        println!(
            "  {}_PREDICTIVE_SELECTION: {:?}",
            ENV_PREFIX, self.predictive_selection
        );
        println!("  {}_SELECT_REMAINING:     {:?}", ENV_PREFIX, self.select_remaining);
        println!("  {}_BUILD_DIR:            {:?}", ENV_PREFIX, self.build_dir);
        println!("  {}_CONFIG:               {:?}", ENV_PREFIX, self.config_file);
        println!("  {}_LOG_LEVEL:            {:?}", ENV_PREFIX, self.log_level);
        println!(
            "  {}:  {}",
            ACCESS_KEY_VAR,
            if self.access_key.is_some() { "<set>" } else { "<unset>" }
        );
        if !self.has_any() {
            println!();
            println!("  No {ENV_PREFIX}_* overrides are set.");
        }
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| parse_bool(&v))
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "enabled"
    )
}

/// Scoped environment overrides for tests
#[cfg(test)]
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

#[cfg(test)]
impl EnvBuilder {
    /// Create a new environment builder
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    fn var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_{name}"), value.into()));
        self
    }

    pub fn retries(self, retries: u32) -> Self {
        self.var("RETRIES", retries.to_string())
    }

    pub fn dry_run(self, dry_run: bool) -> Self {
        self.var("DRY_RUN", dry_run.to_string())
    }

    pub fn log_level(self, level: &str) -> Self {
        self.var("LOG_LEVEL", level)
    }

    /// Apply environment variables
    pub fn apply(self) {
        for (key, value) in self.vars {
            env::set_var(key, value);
        }
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        self.apply();

        EnvGuard { previous }
    }
}

#[cfg(test)]
impl Default for EnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that restores environment variables on drop
#[cfg(test)]
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

#[cfg(test)]
impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all TESTRUN environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_RETRIES               Retry override (default: 2 on CI, 0 locally)");
    println!("  {ENV_PREFIX}_CI / CI               Enable CI mode");
    println!("  {ENV_PREFIX}_DRY_RUN               Report units without executing them");
    println!("  {ENV_PREFIX}_PROFILE               Expose a profile output path to units");
    println!("  {ENV_PREFIX}_WORKERS               Concurrent unit executions");
    println!("  {ENV_PREFIX}_TIMEOUT               Per-unit timeout in seconds");
    println!("  {ENV_PREFIX}_DISTRIBUTION          Enable distributed execution");
    println!("  {ENV_PREFIX}_PREDICTIVE_SELECTION  Enable predictive test selection");
    println!("  {ENV_PREFIX}_SELECT_REMAINING      Run the tests the last selection skipped");
    println!("  {ENV_PREFIX}_BUILD_DIR             Build output directory");
    println!("  {ENV_PREFIX}_CONFIG                Path to configuration file");
    println!("  {ENV_PREFIX}_LOG_LEVEL             trace, debug, info, warn or error");
    println!("  {ACCESS_KEY_VAR}  Remote executor credential");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_RETRIES=1");
    println!("  testrun run");
}
