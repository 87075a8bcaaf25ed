//! Test unit model
//!
//! A unit is a single executable test case or test class, declared in the
//! suite manifest with the command that runs it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// A single executable test unit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestUnit {
    /// Unique id; derived from class and method when left empty
    #[serde(default)]
    pub id: String,

    /// Fully qualified class name, matched against include patterns
    pub class_name: String,

    /// Optional method within the class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Program and arguments that execute the unit
    pub command: Vec<String>,

    /// Working directory for the command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Free-form tags
    #[serde(default)]
    pub tags: Vec<String>,

    /// Source path prefixes this unit covers (used by predictive selection)
    #[serde(default)]
    pub sources: Vec<String>,

    /// Extra environment for the unit process
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Disabled units are reported as skipped without running
    #[serde(default)]
    pub disabled: bool,
}

impl TestUnit {
    pub fn new(class_name: impl Into<String>, command: Vec<String>) -> Self {
        let class_name = class_name.into();
        Self {
            id: class_name.clone(),
            class_name,
            method: None,
            command,
            working_dir: None,
            tags: Vec::new(),
            sources: Vec::new(),
            env: BTreeMap::new(),
            disabled: false,
        }
    }

    /// `Class#method`, or just the class name
    pub fn derived_id(&self) -> String {
        match &self.method {
            Some(method) => format!("{}#{}", self.class_name, method),
            None => self.class_name.clone(),
        }
    }

    /// Short display name: simple class name plus method
    pub fn display_name(&self) -> String {
        let simple = self
            .class_name
            .rsplit('.')
            .next()
            .unwrap_or(&self.class_name);
        match &self.method {
            Some(method) => format!("{simple}.{method}"),
            None => simple.to_string(),
        }
    }

    /// Whether any of the unit's source prefixes covers the given path
    pub fn covers(&self, path: &str) -> bool {
        self.sources
            .iter()
            .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
impl TestUnit {
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self.id = self.derived_id();
        self
    }

    pub fn with_sources(mut self, sources: &[&str]) -> Self {
        self.sources = sources.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

impl fmt::Display for TestUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
