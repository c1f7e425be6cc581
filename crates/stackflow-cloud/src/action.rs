//! Plan and action types for cloud resource management

use crate::error::ApplyError;
use crate::provider::Outputs;
use serde::{Deserialize, Serialize};
use stackflow_core::Resource;

/// Type of action to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new resource
    Create,
    /// Update an existing resource
    Update,
    /// Delete a resource
    Delete,
    /// No changes needed
    NoOp,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// A planned action for one resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// Desired resource, or the recorded one for deletions
    pub resource: Resource,

    /// Type of action to perform
    pub action: ActionType,

    /// Human-readable reason for the classification
    pub reason: String,

    /// Provider-side ID for update/delete/no-op steps
    pub provider_id: Option<String>,

    /// Logical IDs of steps that must complete before this one
    pub depends_on: Vec<String>,

    /// Update whose comparison waits for dependency outputs
    ///
    /// The executor turns it into a no-op when the resolved properties
    /// match what was applied last time.
    pub deferred: bool,

    /// No-op whose recorded dependencies no longer match the declaration
    ///
    /// The executor rewrites the state record without calling the provider,
    /// so later deletions are ordered from the current dependencies.
    pub refresh: bool,
}

impl PlanStep {
    pub fn new(resource: Resource, action: ActionType, reason: impl Into<String>) -> Self {
        Self {
            resource,
            action,
            reason: reason.into(),
            provider_id: None,
            depends_on: Vec::new(),
            deferred: false,
            refresh: false,
        }
    }

    pub fn logical_id(&self) -> &str {
        &self.resource.logical_id
    }

    pub fn kind(&self) -> &str {
        &self.resource.kind
    }

    pub fn with_provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    pub fn refresh(mut self) -> Self {
        self.refresh = true;
        self
    }
}

/// Plan containing all steps to be applied, in execution order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Ordered steps
    pub steps: Vec<PlanStep>,

    /// Whether the plan has any changes
    pub has_changes: bool,
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        let has_changes = steps
            .iter()
            .any(|s| s.action != ActionType::NoOp || s.refresh);
        Self { steps, has_changes }
    }

    pub fn empty() -> Self {
        Self {
            steps: Vec::new(),
            has_changes: false,
        }
    }

    /// Get steps by type
    pub fn steps_by_action(&self, action: ActionType) -> Vec<&PlanStep> {
        self.steps.iter().filter(|s| s.action == action).collect()
    }

    /// Find the step for a logical ID
    pub fn step(&self, logical_id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.logical_id() == logical_id)
    }

    /// Summary of the plan
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.steps_by_action(ActionType::Create).len(),
            update: self.steps_by_action(ActionType::Update).len(),
            delete: self.steps_by_action(ActionType::Delete).len(),
            no_change: self.steps_by_action(ActionType::NoOp).len(),
        }
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub no_change: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} unchanged",
            self.create, self.update, self.delete, self.no_change
        )
    }
}

/// Outcome of one plan step
pub type StepResult = std::result::Result<Outputs, ApplyError>;

/// Result of applying a plan
///
/// `results[i]` belongs to `plan.steps[i]`.
#[derive(Debug)]
pub struct ApplyResult {
    /// One result per plan step, in plan order
    pub results: Vec<StepResult>,

    /// Number of provider calls that were issued (retries included)
    pub provider_calls: usize,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl ApplyResult {
    pub fn new() -> Self {
        Self {
            results: Vec::new(),
            provider_calls: 0,
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| r.is_ok())
    }

    /// Successfully applied steps
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    /// Failed steps, in plan order
    pub fn errors(&self) -> impl Iterator<Item = &ApplyError> {
        self.results.iter().filter_map(|r| r.as_ref().err())
    }

    /// First failure that actually ran, falling back to the first failure
    pub fn first_error(&self) -> Option<&ApplyError> {
        self.errors()
            .find(|e| !e.is_not_started())
            .or_else(|| self.errors().next())
    }
}

impl Default for ApplyResult {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StepFailure;

    fn step(id: &str, action: ActionType) -> PlanStep {
        PlanStep::new(Resource::new("x", id), action, "test")
    }

    #[test]
    fn test_plan_summary() {
        let plan = Plan::new(vec![
            step("a", ActionType::Create),
            step("b", ActionType::NoOp),
            step("c", ActionType::Update),
            step("d", ActionType::Delete),
            step("e", ActionType::NoOp),
        ]);

        assert!(plan.has_changes);
        assert_eq!(
            plan.summary().to_string(),
            "1 to create, 1 to update, 1 to delete, 2 unchanged"
        );
        assert_eq!(plan.step("c").unwrap().action, ActionType::Update);
    }

    #[test]
    fn test_plan_without_changes() {
        let plan = Plan::new(vec![step("a", ActionType::NoOp)]);
        assert!(!plan.has_changes);
        assert!(!Plan::empty().has_changes);
    }

    #[test]
    fn test_first_error_prefers_started_steps() {
        let mut result = ApplyResult::new();
        result.results.push(Err(ApplyError::new(
            "b",
            ActionType::Create,
            StepFailure::DependencyFailed {
                dependency: "c".to_string(),
            },
        )));
        result.results.push(Err(ApplyError::new(
            "c",
            ActionType::Create,
            StepFailure::Provider(crate::CloudError::ProviderRejected("bad".to_string())),
        )));

        assert!(!result.is_success());
        assert_eq!(result.first_error().unwrap().logical_id, "c");
    }
}
