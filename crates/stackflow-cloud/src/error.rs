//! Cloud engine error types

use crate::action::ActionType;
use stackflow_core::{FlowError, Reference};
use thiserror::Error;

/// Errors raised by providers, the state store and plan construction
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Provider throttled the request: {0}")]
    ProviderThrottled(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Provider rejected the request: {0}")]
    ProviderRejected(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Whether the failure is worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CloudError::ProviderThrottled(_) | CloudError::ProviderUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

/// Why a single plan step did not complete
#[derive(Error, Debug)]
pub enum StepFailure {
    #[error(transparent)]
    Provider(CloudError),

    #[error("unresolved dependency output: {reference}")]
    UnresolvedDependency { reference: Reference },

    #[error("dependency '{dependency}' did not complete")]
    DependencyFailed { dependency: String },

    #[error("state update failed: {0}")]
    State(CloudError),

    #[error("cancelled before start")]
    Cancelled,

    #[error("aborted after fatal error in '{by}'")]
    Aborted { by: String },
}

/// Step-level failure carrying the offending resource and action
#[derive(Error, Debug)]
#[error("{action} {logical_id} failed: {cause}")]
pub struct ApplyError {
    pub logical_id: String,
    pub action: ActionType,
    pub cause: StepFailure,
}

impl ApplyError {
    pub fn new(logical_id: impl Into<String>, action: ActionType, cause: StepFailure) -> Self {
        Self {
            logical_id: logical_id.into(),
            action,
            cause,
        }
    }

    /// Fatal errors abort the remaining plan rather than just dependents
    ///
    /// A failed state write after a successful provider call leaves the
    /// store behind the remote side, so it stops the run as well.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.cause,
            StepFailure::UnresolvedDependency { .. } | StepFailure::State(_)
        )
    }

    /// Whether this step never reached the provider
    pub fn is_not_started(&self) -> bool {
        matches!(
            self.cause,
            StepFailure::Cancelled
                | StepFailure::Aborted { .. }
                | StepFailure::DependencyFailed { .. }
        )
    }
}
