use super::{ManagedProcessSpec, RawSpec};
use crate::error::{HerderError, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

/// An ordered set of validated app specs, as written to an ecosystem file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Ecosystem {
    pub apps: Vec<ManagedProcessSpec>,
}

/// An app entry that failed to load
#[derive(Debug)]
pub struct Rejected {
    /// Position of the entry in the `apps` list
    pub index: usize,
    /// Name of the entry, if it had a readable one
    pub name: Option<String>,
    pub error: HerderError,
}

impl Rejected {
    /// Name when available, otherwise `apps[index]`
    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("apps[{}]", self.index))
    }
}

/// Outcome of loading an ecosystem file: the accepted apps plus every
/// entry that was rejected on its own.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub ecosystem: Ecosystem,
    pub rejected: Vec<Rejected>,
}

impl LoadReport {
    pub fn specs(&self) -> &[ManagedProcessSpec] {
        &self.ecosystem.apps
    }

    /// True when every entry in the file was accepted
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

impl Ecosystem {
    /// Load an ecosystem file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<LoadReport> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            HerderError::InvalidConfig(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let report = match extension {
            "toml" => Self::from_toml_str(&contents)?,
            "json" => Self::from_json_str(&contents)?,
            _ => {
                return Err(HerderError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        debug!(
            "Loaded {} app(s) from {} ({} rejected)",
            report.ecosystem.apps.len(),
            path.display(),
            report.rejected.len()
        );

        Ok(report)
    }

    /// Parse a TOML ecosystem (`[[apps]]` tables or a single top-level app)
    pub fn from_toml_str(contents: &str) -> Result<LoadReport> {
        let root: Value = toml::from_str(contents)
            .map_err(|e| HerderError::InvalidConfig(format!("Failed to parse TOML: {}", e)))?;
        Ok(Self::from_entries(extract_entries(root)?))
    }

    /// Parse a JSON ecosystem (`{"apps": [...]}`, a bare array, or a single app)
    pub fn from_json_str(contents: &str) -> Result<LoadReport> {
        let root: Value = serde_json::from_str(contents)
            .map_err(|e| HerderError::InvalidConfig(format!("Failed to parse JSON: {}", e)))?;
        Ok(Self::from_entries(extract_entries(root)?))
    }

    /// Validate each entry on its own; a bad entry never affects its siblings
    fn from_entries(entries: Vec<Value>) -> LoadReport {
        let mut report = LoadReport::default();
        let mut seen: HashSet<String> = HashSet::new();

        for (index, entry) in entries.into_iter().enumerate() {
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string);
            let label = name.clone().unwrap_or_else(|| format!("apps[{}]", index));

            let result = serde_json::from_value::<RawSpec>(entry)
                .map_err(|e| HerderError::invalid_spec(label.clone(), e.to_string()))
                .and_then(|mut raw| {
                    raw.expand_env_vars();
                    ManagedProcessSpec::try_from(raw)
                })
                .and_then(|spec| {
                    if seen.contains(spec.name()) {
                        Err(HerderError::invalid_spec(
                            spec.name(),
                            "duplicate name; names must be unique",
                        ))
                    } else {
                        Ok(spec)
                    }
                });

            match result {
                Ok(spec) => {
                    seen.insert(spec.name().to_string());
                    report.ecosystem.apps.push(spec);
                }
                Err(error) => {
                    warn!("Skipping app {}: {}", label, error);
                    report.rejected.push(Rejected { index, name, error });
                }
            }
        }

        report
    }

    /// Serialize as TOML with one `[[apps]]` table per spec
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| HerderError::Serialization(e.to_string()))
    }

    /// Serialize as pretty-printed JSON
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| HerderError::Serialization(e.to_string()))
    }

    pub fn find(&self, name: &str) -> Option<&ManagedProcessSpec> {
        self.apps.iter().find(|spec| spec.name() == name)
    }
}

fn extract_entries(root: Value) -> Result<Vec<Value>> {
    let entries = match root {
        Value::Object(mut map) => match map.remove("apps") {
            Some(Value::Array(apps)) => apps,
            Some(_) => {
                return Err(HerderError::InvalidConfig(
                    "`apps` must be a list of app definitions".to_string(),
                ))
            }
            None if map.contains_key("name") => vec![Value::Object(map)],
            None => Vec::new(),
        },
        Value::Array(apps) => apps,
        _ => {
            return Err(HerderError::InvalidConfig(
                "Expected a table or list of app definitions".to_string(),
            ))
        }
    };

    if entries.is_empty() {
        return Err(HerderError::InvalidConfig(
            "No app definitions found in file".to_string(),
        ));
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const TWO_APPS_TOML: &str = r#"
        [[apps]]
        name = "web"
        script = "server.py"
        interpreter = "python3"
        cwd = "/srv/web"
        out_file = "/tmp/web-out.log"
        error_file = "/tmp/web-err.log"

        [[apps]]
        name = "worker"
        script = "/usr/local/bin/worker"
        cwd = "/srv/worker"
        out_file = "/tmp/worker-out.log"
        error_file = "/tmp/worker-err.log"
        autorestart = false
    "#;

    #[test]
    fn test_parse_toml_multiple() {
        let report = Ecosystem::from_toml_str(TWO_APPS_TOML).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.specs().len(), 2);
        assert_eq!(report.specs()[0].name(), "web");
        assert_eq!(report.specs()[1].name(), "worker");
        assert!(!report.specs()[1].restart_policy().autorestart);
    }

    #[test]
    fn test_parse_toml_single() {
        let toml_content = r#"
            name = "solo"
            script = "/bin/true"
            cwd = "/"
            out_file = "/tmp/solo-out.log"
            error_file = "/tmp/solo-err.log"
        "#;

        let report = Ecosystem::from_toml_str(toml_content).unwrap();
        assert_eq!(report.specs().len(), 1);
        assert_eq!(report.specs()[0].name(), "solo");
    }

    #[test]
    fn test_parse_json_apps() {
        let json_content = r#"
            {
                "apps": [
                    {
                        "name": "fte-watcher",
                        "script": "watchers/filesystem_watcher.py",
                        "interpreter": "python3",
                        "cwd": "/srv/fte",
                        "restart_delay": 5000,
                        "env": { "LOG_LEVEL": "INFO" },
                        "out_file": "/tmp/fte-out.log",
                        "error_file": "/tmp/fte-err.log",
                        "merge_logs": true
                    }
                ]
            }
        "#;

        let report = Ecosystem::from_json_str(json_content).unwrap();
        let spec = &report.specs()[0];
        assert_eq!(spec.name(), "fte-watcher");
        assert!(spec.logging().merge_logs);
        assert_eq!(spec.env().get("LOG_LEVEL"), Some(&"INFO".to_string()));
    }

    #[test]
    fn test_invalid_entry_does_not_block_siblings() {
        let json_content = r#"
            {
                "apps": [
                    { "name": "bad", "script": "x", "cwd": "relative",
                      "out_file": "/tmp/o.log", "error_file": "/tmp/e.log" },
                    { "name": "good", "script": "x", "cwd": "/srv",
                      "out_file": "/tmp/o.log", "error_file": "/tmp/e.log" },
                    { "script": "x", "cwd": "/srv", "max_restarts": "lots",
                      "out_file": "/tmp/o.log", "error_file": "/tmp/e.log" }
                ]
            }
        "#;

        let report = Ecosystem::from_json_str(json_content).unwrap();
        assert_eq!(report.specs().len(), 1);
        assert_eq!(report.specs()[0].name(), "good");

        assert_eq!(report.rejected.len(), 2);
        assert_eq!(report.rejected[0].label(), "bad");
        assert_eq!(report.rejected[1].label(), "apps[2]");
        assert!(report
            .rejected
            .iter()
            .all(|r| matches!(r.error, HerderError::InvalidSpec { .. })));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let toml_content = r#"
            [[apps]]
            name = "dup"
            script = "a"
            cwd = "/srv"
            out_file = "/tmp/a.log"
            error_file = "/tmp/a.err"

            [[apps]]
            name = "dup"
            script = "b"
            cwd = "/srv"
            out_file = "/tmp/b.log"
            error_file = "/tmp/b.err"
        "#;

        let report = Ecosystem::from_toml_str(toml_content).unwrap();
        assert_eq!(report.specs().len(), 1);
        assert_eq!(report.specs()[0].command().script, PathBuf::from("a"));
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].index, 1);
    }

    #[test]
    fn test_empty_apps_is_config_error() {
        let result = Ecosystem::from_json_str(r#"{ "apps": [] }"#);
        assert!(matches!(result, Err(HerderError::InvalidConfig(_))));
    }

    #[test]
    fn test_unparsable_file_is_config_error() {
        let result = Ecosystem::from_toml_str("[[apps]\nname = ");
        assert!(matches!(result, Err(HerderError::InvalidConfig(_))));
    }

    #[test]
    fn test_toml_round_trip() {
        let report = Ecosystem::from_toml_str(TWO_APPS_TOML).unwrap();
        let serialized = report.ecosystem.to_toml_string().unwrap();

        let reloaded = Ecosystem::from_toml_str(&serialized).unwrap();
        assert!(reloaded.is_clean());
        assert_eq!(reloaded.ecosystem, report.ecosystem);
    }

    #[test]
    fn test_json_round_trip() {
        let report = Ecosystem::from_toml_str(TWO_APPS_TOML).unwrap();
        let serialized = report.ecosystem.to_json_string().unwrap();

        let reloaded = Ecosystem::from_json_str(&serialized).unwrap();
        assert_eq!(reloaded.ecosystem, report.ecosystem);
    }

    #[test]
    fn test_from_file_unsupported_format() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("ecosystem.yaml");
        fs::write(&config_path, "apps: []").unwrap();

        let result = Ecosystem::from_file(&config_path);
        assert!(matches!(result, Err(HerderError::InvalidConfig(_))));
    }

    #[test]
    fn test_from_file_missing() {
        let result = Ecosystem::from_file(Path::new("/nonexistent/ecosystem.toml"));
        assert!(matches!(result, Err(HerderError::InvalidConfig(_))));
    }
}
