//! Configuration file management
//!
//! Handles finding, loading, and validating configuration files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{BuildParameters, RemoteExecutorConfig};

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./testrun.yaml",
    "./testrun.yml",
    "./.testrun/config.yaml",
    "~/.config/testrun/config.yaml",
];

/// Full configuration file structure
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Version of config file format
    #[serde(default = "default_version")]
    pub version: String,

    /// Build parameters
    #[serde(default)]
    pub parameters: BuildParameters,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            parameters: BuildParameters::default(),
        }
    }
}

impl ConfigFile {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self> {
        if let Some(path) = Self::find() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !["1.0"].contains(&self.version.as_str()) {
            anyhow::bail!("Unsupported config version: {}", self.version);
        }

        let params = &self.parameters;

        if params.testing.timeout_secs == 0 {
            anyhow::bail!("testing.timeout_secs must be greater than zero");
        }
        if params.testing.max_workers == Some(0) {
            anyhow::bail!("testing.max_workers must be greater than zero");
        }
        if params.testing.include.is_empty() {
            anyhow::bail!("testing.include must name at least one pattern");
        }

        let mut seen = std::collections::HashSet::new();
        for executor in &params.distribution.executors {
            if !seen.insert(executor.id.as_str()) {
                anyhow::bail!("Duplicate remote executor id: {}", executor.id);
            }
            if !executor.endpoint.starts_with("http://")
                && !executor.endpoint.starts_with("https://")
            {
                anyhow::bail!(
                    "Remote executor '{}' has invalid endpoint: {}",
                    executor.id,
                    executor.endpoint
                );
            }
        }

        for requirement in &params.distribution.requirements {
            if !requirement.contains('=') {
                anyhow::bail!("Executor requirement must be key=value: {requirement}");
            }
        }

        Ok(())
    }

    /// Generate example configuration
    pub fn example() -> Self {
        let mut parameters = BuildParameters::default();
        parameters.testing.retries = Some(1);
        parameters.testing.max_workers = Some(4);
        parameters.distribution.max_local_executors = Some(2);
        parameters.distribution.max_remote_executors = Some(4);
        parameters.distribution.executors = vec![
            RemoteExecutorConfig {
                id: "linux-agent-1".to_string(),
                endpoint: "http://10.0.0.21:8420".to_string(),
                tags: vec!["os=linux".to_string()],
            },
            RemoteExecutorConfig {
                id: "macos-agent-1".to_string(),
                endpoint: "http://10.0.0.31:8420".to_string(),
                tags: vec!["os=macos".to_string()],
            },
        ];

        Self {
            version: default_version(),
            parameters,
        }
    }

    /// Merge with another config (other takes precedence where it differs
    /// from the defaults)
    pub fn merge(&mut self, other: ConfigFile) {
        let defaults = BuildParameters::default();
        let params = &mut self.parameters;
        let other = other.parameters;

        if other.ci {
            params.ci = true;
        }
        if other.build_dir != defaults.build_dir {
            params.build_dir = other.build_dir;
        }
        if other.manifest != defaults.manifest {
            params.manifest = other.manifest;
        }
        if other.testing.retries.is_some() {
            params.testing.retries = other.testing.retries;
        }
        if other.testing.max_workers.is_some() {
            params.testing.max_workers = other.testing.max_workers;
        }
        if other.testing.timeout_secs != defaults.testing.timeout_secs {
            params.testing.timeout_secs = other.testing.timeout_secs;
        }
        if other.testing.include != defaults.testing.include {
            params.testing.include = other.testing.include;
        }
        if other.testing.capture_output != defaults.testing.capture_output {
            params.testing.capture_output = other.testing.capture_output;
        }
        params.testing.dry_run |= other.testing.dry_run;
        params.testing.enable_profiling |= other.testing.enable_profiling;
        params.testing.hide_report_generator_output |=
            other.testing.hide_report_generator_output;

        params.distribution.enabled |= other.distribution.enabled;
        if other.distribution.max_local_executors.is_some() {
            params.distribution.max_local_executors = other.distribution.max_local_executors;
        }
        if other.distribution.max_remote_executors.is_some() {
            params.distribution.max_remote_executors = other.distribution.max_remote_executors;
        }
        if other.distribution.remote_timeout_secs != defaults.distribution.remote_timeout_secs {
            params.distribution.remote_timeout_secs = other.distribution.remote_timeout_secs;
        }
        for requirement in other.distribution.requirements {
            if !params.distribution.requirements.contains(&requirement) {
                params.distribution.requirements.push(requirement);
            }
        }
        for executor in other.distribution.executors {
            if !params
                .distribution
                .executors
                .iter()
                .any(|e| e.id == executor.id)
            {
                params.distribution.executors.push(executor);
            }
        }

        params.predictive_selection.enabled |= other.predictive_selection.enabled;
        params.predictive_selection.select_remaining |=
            other.predictive_selection.select_remaining;
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_file_default() {
        let config = ConfigFile::default();
        assert_eq!(config.version, "1.0");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("testrun.yaml");

        let config = ConfigFile::example();
        config.save(&path).unwrap();

        let loaded = ConfigFile::load(&path).unwrap();
        assert_eq!(loaded.version, config.version);
        assert_eq!(loaded.parameters.testing.retries, Some(1));
        assert_eq!(loaded.parameters.distribution.executors.len(), 2);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("testrun.yml");
        std::fs::write(&path, "parameters:\n  ci: true\n  testing:\n    dry_run: true\n").unwrap();

        let loaded = ConfigFile::load(&path).unwrap();
        assert!(loaded.parameters.ci);
        assert!(loaded.parameters.testing.dry_run);
        assert_eq!(loaded.parameters.testing.timeout_secs, 300);
        assert_eq!(loaded.parameters.testing.include, vec!["*Test", "*Tests"]);
        assert_eq!(loaded.parameters.build_dir, PathBuf::from("build"));
    }

    #[test]
    fn test_validate_rejects_bad_executor() {
        let mut config = ConfigFile::default();
        config
            .parameters
            .distribution
            .executors
            .push(RemoteExecutorConfig {
                id: "agent".to_string(),
                endpoint: "ftp://agent".to_string(),
                tags: Vec::new(),
            });
        assert!(config.validate().is_err());

        let mut config = ConfigFile::default();
        config.parameters.distribution.requirements = vec!["linux".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge() {
        let mut base = ConfigFile::default();
        let mut other = ConfigFile::example();
        other.parameters.testing.dry_run = true;

        base.merge(other);
        assert_eq!(base.parameters.testing.retries, Some(1));
        assert!(base.parameters.testing.dry_run);
        assert_eq!(base.parameters.distribution.executors.len(), 2);
    }

    #[test]
    fn test_merge_keeps_explicit_capture_and_timeout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("explicit.yaml");
        std::fs::write(
            &path,
            "parameters:\n  testing:\n    capture_output: false\n  distribution:\n    remote_timeout_secs: 30\n",
        )
        .unwrap();

        let explicit = ConfigFile::load(&path).unwrap();
        assert!(!explicit.parameters.testing.capture_output);

        let mut base = ConfigFile::default();
        base.merge(explicit);
        assert!(!base.parameters.testing.capture_output);
        assert_eq!(base.parameters.distribution.remote_timeout_secs, 30);
    }

    #[test]
    fn test_expand_path() {
        let path = expand_path("./test.yaml");
        assert_eq!(path, PathBuf::from("./test.yaml"));
    }
}
