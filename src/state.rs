//! Record of the last apply or destroy.
//!
//! Stored as TOML at `<state_dir>/state.toml`. The record is informational:
//! the cluster is the source of truth, and `status`/`outputs` read it only to
//! report what the last run did.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use declarative::{ExecuteSummary, Outputs, ResourceStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths;

const STATE_FILE: &str = "state.toml";

/// Which operation produced the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Apply,
    Destroy,
}

/// Outcome of one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub resource_type: String,
    /// Final lifecycle status ("ready", "failed", ...)
    pub status: String,
    /// What the run did ("created", "unchanged", ...)
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: Outputs,
}

/// The last recorded run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackState {
    pub operation: Operation,
    pub backend: String,
    pub finished_at: DateTime<Utc>,
    /// Stack outputs by key
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    /// Per-resource records by resource id
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceRecord>,
}

impl StackState {
    /// Build a record from an execution summary
    pub fn from_summary(
        operation: Operation,
        backend: &str,
        summary: &ExecuteSummary,
        outputs: BTreeMap<String, String>,
    ) -> Self {
        let resources = summary
            .outcomes
            .iter()
            .map(|outcome| {
                let error = match &outcome.status {
                    ResourceStatus::Failed { error } => Some(error.clone()),
                    _ => None,
                };
                let record = ResourceRecord {
                    resource_type: outcome.resource_type.clone(),
                    status: outcome.status.label().to_string(),
                    result: outcome.result.to_string(),
                    error,
                    outputs: outcome.outputs.clone(),
                };
                (outcome.resource_id.clone(), record)
            })
            .collect();

        Self {
            operation,
            backend: backend.to_string(),
            finished_at: Utc::now(),
            outputs,
            resources,
        }
    }

    /// Whether any resource failed in the recorded run
    pub fn has_failures(&self) -> bool {
        self.resources.values().any(|r| r.error.is_some())
    }

    /// Default state file path
    pub fn default_path() -> Result<PathBuf> {
        Ok(paths::state_dir()?.join(STATE_FILE))
    }

    /// Load the last record; `None` when nothing was recorded yet
    pub fn load() -> Result<Option<Self>> {
        Self::load_from(&Self::default_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            log::debug!("State file does not exist: {}", path.display());
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        let state: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;

        log::debug!("Loaded state from {}", path.display());
        Ok(Some(state))
    }

    /// Save to the default location
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::default_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize state to TOML")?;
        fs::write(path, &content)
            .with_context(|| format!("Failed to write state file: {}", path.display()))?;

        log::debug!("Saved state to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{ApplyResult, ResourceOutcome};

    fn summary() -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        summary.add_outcome(ResourceOutcome {
            resource_id: "namespace/mongodb".to_string(),
            resource_type: "namespace".to_string(),
            status: ResourceStatus::Ready,
            result: ApplyResult::Created,
            outputs: Outputs::from([("name".to_string(), "mongodb".to_string())]),
            hint: None,
        });
        summary.add_outcome(ResourceOutcome {
            resource_id: "app/mongodb/mongodb".to_string(),
            resource_type: "app".to_string(),
            status: ResourceStatus::Failed {
                error: "invalid cpu".to_string(),
            },
            result: ApplyResult::Failed {
                error: "invalid cpu".to_string(),
            },
            outputs: Outputs::new(),
            hint: None,
        });
        summary
    }

    #[test]
    fn test_from_summary() {
        let state = StackState::from_summary(
            Operation::Apply,
            "memory",
            &summary(),
            BTreeMap::from([("namespace".to_string(), "mongodb".to_string())]),
        );

        assert_eq!(state.resources.len(), 2);
        let ns = &state.resources["namespace/mongodb"];
        assert_eq!(ns.status, "ready");
        assert_eq!(ns.result, "created");
        assert_eq!(ns.outputs.get("name").map(String::as_str), Some("mongodb"));

        let app = &state.resources["app/mongodb/mongodb"];
        assert_eq!(app.error.as_deref(), Some("invalid cpu"));
        assert!(state.has_failures());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(STATE_FILE);

        assert!(StackState::load_from(&path).unwrap().is_none());

        let state = StackState::from_summary(
            Operation::Destroy,
            "kubectl",
            &summary(),
            BTreeMap::new(),
        );
        state.save_to(&path).unwrap();

        let loaded = StackState::load_from(&path).unwrap().unwrap();
        assert_eq!(loaded.operation, Operation::Destroy);
        assert_eq!(loaded.backend, "kubectl");
        assert_eq!(loaded.resources, state.resources);
        assert_eq!(loaded.finished_at, state.finished_at);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STATE_FILE);
        fs::write(&path, "operation = [").unwrap();
        assert!(StackState::load_from(&path).is_err());
    }
}
