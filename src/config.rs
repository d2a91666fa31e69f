//! Stack configuration file.
//!
//! `homestack.toml` (or `homestack.json`) holds named scopes of scalar
//! values:
//!
//! ```toml
//! [mongodb]
//! storageClass = "fast-ssd"
//! dataSize = "50Gi"
//! ```
//!
//! A missing file is not an error; every key is then absent and callers
//! fall back to their defaults.

use anyhow::{Context, Result, bail};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths;

/// Config file names, in order of preference
pub const CONFIG_FILES: [&str; 2] = ["homestack.toml", "homestack.json"];

type Scopes = BTreeMap<String, BTreeMap<String, String>>;

/// Loaded configuration: every scope, with values stringified
#[derive(Debug, Clone, Default)]
pub struct StackConfig {
    path: Option<PathBuf>,
    scopes: Scopes,
}

impl StackConfig {
    /// Find the config file.
    ///
    /// An explicit path must exist. Otherwise the config directory is
    /// searched and `None` means no file was found.
    pub fn locate(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            return Ok(Some(path.to_path_buf()));
        }

        let dir = paths::config_dir()?;
        Ok(CONFIG_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.exists()))
    }

    /// Locate and load the config file
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match Self::locate(explicit)? {
            Some(path) => Self::load_from(&path),
            None => {
                log::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load a specific file, choosing the format by extension
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config = if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::debug!("Loaded config from {}", path.display());
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: BTreeMap<String, BTreeMap<String, Value>> = toml::from_str(content)?;
        Self::from_raw(raw)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: BTreeMap<String, BTreeMap<String, Value>> = serde_json::from_str(content)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: BTreeMap<String, BTreeMap<String, Value>>) -> Result<Self> {
        let mut scopes = Scopes::new();
        for (scope, values) in raw {
            let mut table = BTreeMap::new();
            for (key, value) in values {
                let value = stringify(&value)
                    .with_context(|| format!("{scope}.{key} must be a string, number or boolean"))?;
                table.insert(key, value);
            }
            scopes.insert(scope, table);
        }
        Ok(Self { path: None, scopes })
    }

    /// Layer `scope.key=value` overrides on top of the file
    pub fn apply_overrides(&mut self, overrides: &[String]) -> Result<()> {
        for entry in overrides {
            let (name, value) = entry
                .split_once('=')
                .with_context(|| format!("Invalid override '{entry}', expected scope.key=value"))?;
            let (scope, key) = name
                .split_once('.')
                .filter(|(scope, key)| !scope.is_empty() && !key.is_empty())
                .with_context(|| format!("Invalid override '{entry}', expected scope.key=value"))?;
            log::debug!("Override {scope}.{key}");
            self.scopes
                .entry(scope.to_string())
                .or_default()
                .insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    /// The file this config was loaded from, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// View of a single named scope
    pub fn scope(&self, name: &str) -> ConfigScope<'_> {
        ConfigScope {
            name: name.to_string(),
            values: self.scopes.get(name),
        }
    }
}

/// Scalar to string; `None` for tables, arrays and nulls
fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A named configuration scope
#[derive(Debug, Clone)]
pub struct ConfigScope<'a> {
    name: String,
    values: Option<&'a BTreeMap<String, String>>,
}

impl ConfigScope<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configured value, if any
    pub fn get_opt(&self, key: &str) -> Option<&str> {
        self.values?.get(key).map(String::as_str)
    }

    /// The configured value, or `default` when the key is absent
    pub fn get(&self, key: &str, default: &str) -> String {
        self.get_opt(key).unwrap_or(default).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_with_default() {
        let config = StackConfig::from_toml_str(
            r#"
[mongodb]
storageClass = "fast-ssd"
"#,
        )
        .unwrap();
        let scope = config.scope("mongodb");

        assert_eq!(scope.get("storageClass", "truenas-hdd-mirror-nfs"), "fast-ssd");
        assert_eq!(scope.get("dataSize", "20Gi"), "20Gi");
        assert_eq!(config.scope("other").get("dataSize", "20Gi"), "20Gi");
    }

    #[test]
    fn test_scalars_stringified() {
        let config = StackConfig::from_toml_str(
            r#"
[mongodb]
basicAuthEnabled = false
cpuLimit = 4
"#,
        )
        .unwrap();
        let scope = config.scope("mongodb");

        assert_eq!(scope.get("basicAuthEnabled", "true"), "false");
        assert_eq!(scope.get("cpuLimit", "2"), "4");
    }

    #[test]
    fn test_rejects_non_scalars() {
        let result = StackConfig::from_toml_str(
            r#"
[mongodb]
cpu = ["500m"]
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_json_config() {
        let config =
            StackConfig::from_json_str(r#"{ "mongodb": { "namespace": "db", "dataSize": 50 } }"#)
                .unwrap();
        assert_eq!(config.scope("mongodb").get("namespace", "mongodb"), "db");
        assert_eq!(config.scope("mongodb").get("dataSize", "20Gi"), "50");
    }

    #[test]
    fn test_overrides() {
        let mut config = StackConfig::from_toml_str("[mongodb]\nnamespace = \"db\"\n").unwrap();
        config
            .apply_overrides(&[
                "mongodb.namespace=data".to_string(),
                "mongodb.cpu=250m".to_string(),
                "mongodb.memory=a=b".to_string(),
            ])
            .unwrap();
        let scope = config.scope("mongodb");

        assert_eq!(scope.get("namespace", "mongodb"), "data");
        assert_eq!(scope.get("cpu", "500m"), "250m");
        assert_eq!(scope.get("memory", "1Gi"), "a=b");

        assert!(config.apply_overrides(&["namespace=data".to_string()]).is_err());
        assert!(config.apply_overrides(&["mongodb.cpu".to_string()]).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("homestack.toml");
        fs::write(&path, "[mongodb]\ndataSize = \"5Gi\"\n").unwrap();

        let config = StackConfig::load(Some(&path)).unwrap();
        assert_eq!(config.path(), Some(path.as_path()));
        assert_eq!(config.scope("mongodb").get("dataSize", "20Gi"), "5Gi");

        let missing = dir.path().join("missing.toml");
        assert!(StackConfig::load(Some(&missing)).is_err());
    }
}
