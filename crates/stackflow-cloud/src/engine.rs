//! Engine facade tying graph, diff, executor and state together

use crate::action::{ApplyResult, Plan};
use crate::diff::{delete_steps, diff};
use crate::error::{CloudError, Result};
use crate::executor::{DEFAULT_CONCURRENCY, Executor};
use crate::provider::{CloudProvider, RetryConfig};
use crate::retry::CallPolicy;
use crate::state::{StateRecord, StateStore};
use stackflow_core::{DependencyGraph, Reference, Stack, order};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Execution settings for an engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of provider operations in flight
    pub concurrency: usize,

    /// Backoff for transient provider failures
    pub retry: RetryConfig,

    /// Upper bound for a single provider call
    pub call_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryConfig::default(),
            call_timeout: Duration::from_secs(120),
        }
    }
}

/// Plans and applies stacks against one provider and one state store
pub struct Engine {
    provider: Arc<dyn CloudProvider>,
    store: Arc<dyn StateStore>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        store: Arc<dyn StateStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            store,
            config,
        }
    }

    pub fn provider(&self) -> &dyn CloudProvider {
        self.provider.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compute the plan that brings the recorded state to `stack`
    ///
    /// Graph errors (unknown reference, cycle) surface here, before any
    /// provider call.
    pub async fn plan(&self, stack: &Stack) -> Result<Plan> {
        let graph = DependencyGraph::build(&stack.declaration)?;
        let state = self.store.load().await?;

        let plan = Plan::new(diff(&order(&graph), &graph, &state));
        tracing::info!(stack = %stack.name, summary = %plan.summary(), "Computed plan");
        Ok(plan)
    }

    /// Plan that deletes every recorded resource, dependents first
    pub async fn destroy_plan(&self) -> Result<Plan> {
        let state = self.store.load().await?;
        let records: Vec<&StateRecord> = state.iter().map(|(_, r)| r).collect();

        let plan = Plan::new(delete_steps(&records));
        tracing::info!(summary = %plan.summary(), "Computed destroy plan");
        Ok(plan)
    }

    /// Execute a plan
    pub async fn apply(&self, plan: &Plan, cancel: &CancellationToken) -> ApplyResult {
        Executor::new(self.provider.clone(), self.store.clone())
            .with_concurrency(self.config.concurrency)
            .with_policy(CallPolicy {
                retry: self.config.retry.clone(),
                timeout: self.config.call_timeout,
            })
            .apply(plan, cancel)
            .await
    }

    /// Resolve the stack's declared outputs from recorded state
    ///
    /// Returned in declaration order.
    pub async fn outputs(&self, stack: &Stack) -> Result<Vec<(String, serde_json::Value)>> {
        let state = self.store.load().await?;
        let lookup = |reference: &Reference| {
            state
                .get(&reference.logical_id)
                .and_then(|r| r.output(&reference.attribute))
        };

        stack
            .outputs
            .iter()
            .map(|output| {
                output
                    .value
                    .resolve(&lookup)
                    .map(|value| (output.name.clone(), value))
                    .map_err(|reference| {
                        CloudError::ResourceNotFound(format!(
                            "output '{}' needs {} which has not been applied",
                            output.name, reference
                        ))
                    })
            })
            .collect()
    }
}
