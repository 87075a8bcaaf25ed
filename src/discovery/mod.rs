//! Suite manifest loading
//!
//! Test units are declared in a YAML or JSON manifest. Discovery loads the
//! manifest, fills in derived ids and keeps the units whose class name
//! matches one of the include patterns.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};
use crate::models::TestUnit;

/// Declared test suite
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SuiteManifest {
    #[serde(default)]
    pub units: Vec<TestUnit>,
}

impl SuiteManifest {
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> HarnessResult<Self> {
        let is_json = path.extension().map(|e| e == "json").unwrap_or(false);
        let result: Result<Self, String> = if is_json {
            serde_json::from_str(content).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(content).map_err(|e| e.to_string())
        };
        result.map_err(|e| HarnessError::Config(format!("{}: {e}", path.display())))
    }
}

/// Match a name against a pattern where `*` matches any run of characters
pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if name.len() < first.len() + last.len() || !name.starts_with(first) || !name.ends_with(last) {
        return false;
    }

    let mut rest = &name[first.len()..name.len() - last.len()];

    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    true
}

/// Filter and normalize manifest units
pub fn discover(manifest: SuiteManifest, include: &[String]) -> HarnessResult<Vec<TestUnit>> {
    let mut seen = HashSet::new();
    let mut units = Vec::new();

    for mut unit in manifest.units {
        if unit.id.is_empty() {
            unit.id = unit.derived_id();
        }
        if unit.command.is_empty() {
            return Err(HarnessError::Config(format!("unit {} has no command", unit.id)));
        }
        if !seen.insert(unit.id.clone()) {
            return Err(HarnessError::Config(format!("duplicate unit id {}", unit.id)));
        }

        let simple_name = unit.class_name.rsplit('.').next().unwrap_or(&unit.class_name);
        if include
            .iter()
            .any(|p| matches_pattern(p, &unit.class_name) || matches_pattern(p, simple_name))
        {
            units.push(unit);
        } else {
            debug!("{} excluded by include patterns", unit.id);
        }
    }

    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const MANIFEST: &str = r#"
units:
  - class_name: com.example.ParserTests
    command: ["sh", "-c", "exit 0"]
    sources: ["src/parser/"]
  - class_name: com.example.LexerTest
    method: tokens
    command: ["sh", "-c", "exit 1"]
  - class_name: com.example.Fixtures
    command: ["true"]
"#;

    fn include() -> Vec<String> {
        vec!["*Test".to_string(), "*Tests".to_string()]
    }

    #[test]
    fn test_matches_pattern() {
        assert!(matches_pattern("*Test", "LexerTest"));
        assert!(matches_pattern("*Tests", "com.example.ParserTests"));
        assert!(!matches_pattern("*Test", "ParserTests"));
        assert!(matches_pattern("com.*.Parser*", "com.example.ParserTests"));
        assert!(matches_pattern("Exact", "Exact"));
        assert!(!matches_pattern("a*a", "a"));
    }

    #[test]
    fn test_discover() {
        let manifest = SuiteManifest::parse(MANIFEST, &PathBuf::from("suite.yaml")).unwrap();
        let units = discover(manifest, &include()).unwrap();

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].id, "com.example.ParserTests");
        assert_eq!(units[1].id, "com.example.LexerTest#tokens");
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let manifest = SuiteManifest {
            units: vec![
                TestUnit::new("ATest", vec!["true".into()]),
                TestUnit::new("ATest", vec!["true".into()]),
            ],
        };
        assert!(matches!(
            discover(manifest, &include()),
            Err(HarnessError::Config(_))
        ));
    }

    #[test]
    fn test_missing_manifest() {
        let err = SuiteManifest::load(Path::new("/nonexistent/suite.yaml")).unwrap_err();
        assert!(matches!(err, HarnessError::Io { .. }));
    }
}
