//! Core types for declarative resource management

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Platform-assigned identity exposed by a materialized resource
pub type Outputs = BTreeMap<String, String>;

/// Current or desired state of a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
    /// Resource exists/is configured
    Present { details: Option<String> },
    /// Resource does not exist/is not configured
    Absent,
    /// Resource exists but differs from desired
    Modified { from: String, to: String },
    /// State cannot be determined
    Unknown,
}

impl ResourceState {
    /// Check if state represents presence
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present { .. })
    }

    /// Check if state represents absence
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

/// Result of applying a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyResult {
    /// No changes needed
    NoChange,
    /// Resource was created
    Created,
    /// Resource was modified
    Modified,
    /// Resource was removed
    Removed,
    /// Apply failed
    Failed { error: String },
    /// Apply was skipped
    Skipped { reason: String },
}

impl ApplyResult {
    /// Check if the result represents success (no failure)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Check if the result represents a change
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Modified | Self::Removed)
    }
}

impl fmt::Display for ApplyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoChange => write!(f, "unchanged"),
            Self::Created => write!(f, "created"),
            Self::Modified => write!(f, "updated"),
            Self::Removed => write!(f, "removed"),
            Self::Failed { error } => write!(f, "failed: {error}"),
            Self::Skipped { reason } => write!(f, "skipped: {reason}"),
        }
    }
}

/// How a caller should treat a failed resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureHint {
    /// Running the pass again may succeed
    pub retryable: bool,
    /// What to do about the failure, if known
    pub advice: Option<String>,
}

impl FailureHint {
    pub fn retryable(advice: impl Into<String>) -> Self {
        Self {
            retryable: true,
            advice: Some(advice.into()),
        }
    }

    pub fn permanent(advice: impl Into<String>) -> Self {
        Self {
            retryable: false,
            advice: Some(advice.into()),
        }
    }
}

/// Lifecycle of a single resource during one provisioning pass
///
/// ```text
/// Declared -> Pending -> Applying -> Ready | Failed
///                     \----------> Ready        (already converged)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceStatus {
    /// Registered in the graph, not yet considered
    Declared,
    /// Waiting on dependencies
    Pending,
    /// Create/update in flight
    Applying,
    /// Usable by dependents
    Ready,
    /// Rejected by the platform; not retried
    Failed { error: String },
}

impl ResourceStatus {
    /// Terminal states never transition again within a pass
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed { .. })
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Whether moving from `self` to `next` is a legal edge
    pub fn can_transition_to(&self, next: &ResourceStatus) -> bool {
        matches!(
            (self, next),
            (Self::Declared, Self::Pending)
                | (Self::Pending, Self::Applying)
                | (Self::Pending, Self::Ready)
                | (Self::Pending, Self::Failed { .. })
                | (Self::Applying, Self::Ready)
                | (Self::Applying, Self::Failed { .. })
        )
    }

    /// Short label for display
    pub fn label(&self) -> &'static str {
        match self {
            Self::Declared => "declared",
            Self::Pending => "pending",
            Self::Applying => "applying",
            Self::Ready => "ready",
            Self::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { error } => write!(f, "failed ({error})"),
            other => f.write_str(other.label()),
        }
    }
}

/// A single recorded state transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// Global order in which the transition happened
    pub seq: usize,
    pub resource_id: String,
    pub from: ResourceStatus,
    pub to: ResourceStatus,
}

/// Thread-safe record of resource statuses and the transitions between them
#[derive(Debug, Default)]
pub struct StatusTracker {
    inner: Mutex<TrackerState>,
}

#[derive(Debug, Default)]
struct TrackerState {
    statuses: BTreeMap<String, ResourceStatus>,
    transitions: Vec<Transition>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource in the `Declared` state
    pub fn declare(&self, id: &str) {
        let mut state = self.lock();
        state
            .statuses
            .insert(id.to_string(), ResourceStatus::Declared);
    }

    /// Move a resource to `next`, rejecting illegal edges
    pub fn transition(&self, id: &str, next: ResourceStatus) -> Result<()> {
        let mut state = self.lock();
        let current = state
            .statuses
            .get(id)
            .cloned()
            .unwrap_or(ResourceStatus::Declared);

        if !current.can_transition_to(&next) {
            return Err(Error::InvalidTransition {
                resource: id.to_string(),
                from: current.label().to_string(),
                to: next.label().to_string(),
            });
        }

        let seq = state.transitions.len();
        state.transitions.push(Transition {
            seq,
            resource_id: id.to_string(),
            from: current,
            to: next.clone(),
        });
        state.statuses.insert(id.to_string(), next);
        Ok(())
    }

    /// Current status of a resource, if it was ever declared
    pub fn status(&self, id: &str) -> Option<ResourceStatus> {
        self.lock().statuses.get(id).cloned()
    }

    /// All transitions recorded so far, in order
    pub fn transitions(&self) -> Vec<Transition> {
        self.lock().transitions.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        // A poisoned tracker still holds consistent data: every write is a single insert/push
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Final record for one resource after a pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceOutcome {
    pub resource_id: String,
    pub resource_type: String,
    pub status: ResourceStatus,
    pub result: ApplyResult,
    #[serde(default)]
    pub outputs: Outputs,
    /// Set for failed resources
    #[serde(default)]
    pub hint: Option<FailureHint>,
}

impl ResourceOutcome {
    /// The outcome as a provisioning error, if the resource failed
    pub fn failure(&self) -> Option<Error> {
        match &self.result {
            ApplyResult::Failed { error } => Some(Error::Provisioning {
                resource: self.resource_id.clone(),
                message: error.clone(),
                retryable: self.hint.as_ref().is_some_and(|h| h.retryable),
            }),
            _ => None,
        }
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub modified: usize,
    pub removed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub no_change: usize,
    /// Per-resource outcomes in execution order
    #[serde(default)]
    pub outcomes: Vec<ResourceOutcome>,
    /// Every status transition observed during the pass
    #[serde(default)]
    pub transitions: Vec<Transition>,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.modified + self.removed
    }

    /// Check if execution was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Total number of resources processed
    pub fn total(&self) -> usize {
        self.created + self.modified + self.removed + self.skipped + self.failed + self.no_change
    }

    /// Add a result to the summary
    pub fn add_result(&mut self, result: &ApplyResult) {
        match result {
            ApplyResult::NoChange => self.no_change += 1,
            ApplyResult::Created => self.created += 1,
            ApplyResult::Modified => self.modified += 1,
            ApplyResult::Removed => self.removed += 1,
            ApplyResult::Failed { .. } => self.failed += 1,
            ApplyResult::Skipped { .. } => self.skipped += 1,
        }
    }

    /// Record a resource outcome and count its result
    pub fn add_outcome(&mut self, outcome: ResourceOutcome) {
        self.add_result(&outcome.result);
        self.outcomes.push(outcome);
    }

    /// Look up the outcome for a resource
    pub fn outcome(&self, id: &str) -> Option<&ResourceOutcome> {
        self.outcomes.iter().find(|o| o.resource_id == id)
    }

    /// Outputs exposed by a resource, if it was materialized
    pub fn outputs_of(&self, id: &str) -> Option<&Outputs> {
        self.outcome(id).map(|o| &o.outputs)
    }

    /// The first failure as a provisioning error carrying the resource identity
    pub fn first_failure(&self) -> Option<Error> {
        self.outcomes.iter().find_map(ResourceOutcome::failure)
    }

    /// The first failure that another pass might get past
    pub fn retryable_failure(&self) -> Option<Error> {
        self.outcomes
            .iter()
            .filter_map(ResourceOutcome::failure)
            .find(Error::is_retryable)
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Don't make changes, just show what would happen
    pub dry_run: bool,
    /// Number of parallel jobs within a wave
    pub jobs: usize,
    /// Verbose output
    pub verbose: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            jobs: 4,
            verbose: false,
        }
    }
}
