//! Apply executor
//!
//! Runs plan steps against a provider. Independent steps run concurrently,
//! bounded by a semaphore; a step starts only after every step it depends on
//! completed successfully. State is written after each successful provider
//! call, so a failed run leaves exactly what succeeded recorded.

use crate::action::{ActionType, ApplyResult, Plan, PlanStep, StepResult};
use crate::diff::dependencies_changed;
use crate::error::{ApplyError, CloudError, StepFailure};
use crate::provider::{CloudProvider, Outputs};
use crate::retry::{CallPolicy, with_retry};
use crate::state::{GlobalState, StateRecord, StateStore};
use stackflow_core::{Reference, resolve_properties};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;

/// Default number of steps in flight
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Executes plans against a provider and records the outcome in a state store
pub struct Executor {
    provider: Arc<dyn CloudProvider>,
    store: Arc<dyn StateStore>,
    concurrency: usize,
    policy: CallPolicy,
}

impl Executor {
    pub fn new(provider: Arc<dyn CloudProvider>, store: Arc<dyn StateStore>) -> Self {
        Self {
            provider,
            store,
            concurrency: DEFAULT_CONCURRENCY,
            policy: CallPolicy::default(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_policy(mut self, policy: CallPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Apply every step of `plan`
    ///
    /// Returns one result per step, in plan order. Cancelling `cancel` stops
    /// dispatch; calls already in flight finish and are recorded.
    pub async fn apply(&self, plan: &Plan, cancel: &CancellationToken) -> ApplyResult {
        let started = Instant::now();
        let calls = Arc::new(AtomicUsize::new(0));

        if plan.steps.is_empty() {
            return ApplyResult::new();
        }

        let state = match self.store.load().await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!("Failed to load state: {}", e);
                let mut result = ApplyResult::new();
                result.results = abort_all(&plan.steps, e);
                return result;
            }
        };

        let mut run = Run::new(&plan.steps, state);
        // Fatal step errors cancel this token without touching the caller's
        let token = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<StepResult> = JoinSet::new();
        let mut task_index: HashMap<Id, usize> = HashMap::new();

        tracing::info!(
            steps = plan.steps.len(),
            concurrency = self.concurrency,
            provider = self.provider.name(),
            "Applying plan"
        );

        loop {
            if run.aborted_by.is_none() && !cancel.is_cancelled() {
                self.dispatch(&mut run, &semaphore, &token, &calls, &mut tasks, &mut task_index);
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };

            let (i, result) = match joined {
                Ok((id, result)) => match task_index.remove(&id) {
                    Some(i) => (i, result),
                    None => continue,
                },
                Err(e) => {
                    let Some(i) = task_index.remove(&e.id()) else {
                        continue;
                    };
                    let step = &plan.steps[i];
                    let failure = StepFailure::Provider(CloudError::ProviderUnavailable(format!(
                        "step task failed: {e}"
                    )));
                    (i, Err(ApplyError::new(step.logical_id(), step.action, failure)))
                }
            };

            if let Err(error) = &result {
                if error.is_fatal() && run.aborted_by.is_none() {
                    tracing::error!("Aborting run: {}", error);
                    run.aborted_by = Some(error.logical_id.clone());
                    token.cancel();
                }
            }
            run.finish(i, result);
        }

        run.finish_pending(cancel.is_cancelled());

        let result = ApplyResult {
            results: run.into_results(),
            provider_calls: calls.load(Ordering::SeqCst),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        tracing::info!(
            succeeded = result.succeeded(),
            failed = result.results.len() - result.succeeded(),
            provider_calls = result.provider_calls,
            duration_ms = result.duration_ms,
            "Apply finished"
        );
        result
    }

    /// Start every ready step, in plan order, while permits are available
    fn dispatch(
        &self,
        run: &mut Run<'_>,
        semaphore: &Arc<Semaphore>,
        token: &CancellationToken,
        calls: &Arc<AtomicUsize>,
        tasks: &mut JoinSet<StepResult>,
        task_index: &mut HashMap<Id, usize>,
    ) {
        let steps = run.steps;

        for (i, step) in steps.iter().enumerate() {
            if run.status[i] != Status::Pending {
                continue;
            }

            match run.readiness(i) {
                Readiness::Blocked => continue,
                Readiness::DependencyFailed(dependency) => {
                    let failure = StepFailure::DependencyFailed { dependency };
                    run.finish(i, Err(ApplyError::new(step.logical_id(), step.action, failure)));
                    continue;
                }
                Readiness::Ready => {}
            }

            let properties = match step.action {
                ActionType::NoOp | ActionType::Delete => serde_json::Value::Null,
                ActionType::Create | ActionType::Update => match run.resolve(step) {
                    Ok(properties) => properties,
                    Err(reference) => {
                        let error = ApplyError::new(
                            step.logical_id(),
                            step.action,
                            StepFailure::UnresolvedDependency { reference },
                        );
                        tracing::error!("Aborting run: {}", error);
                        run.aborted_by = Some(step.logical_id().to_string());
                        run.finish(i, Err(error));
                        token.cancel();
                        return;
                    }
                },
            };

            let unchanged = step.action == ActionType::NoOp
                || (step.deferred && run.unchanged(step, &properties));
            if unchanged {
                if step.deferred {
                    tracing::debug!(logical_id = step.logical_id(), "Deferred update resolved to no-op");
                }
                let outputs = run.recorded_outputs(step);
                let Some(record) = run.refreshed_record(step) else {
                    run.finish(i, Ok(outputs));
                    continue;
                };

                // State-only write, no provider call
                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    return;
                };
                let store = self.store.clone();
                let (logical_id, action) = (step.logical_id().to_string(), step.action);
                run.status[i] = Status::Running;
                let handle = tasks.spawn(async move {
                    let _permit = permit;
                    match store.put(record).await {
                        Ok(()) => {
                            tracing::info!(logical_id = %logical_id, "Refreshed recorded dependencies");
                            Ok(outputs)
                        }
                        Err(e) => Err(ApplyError::new(logical_id, action, StepFailure::State(e))),
                    }
                });
                task_index.insert(handle.id(), i);
                continue;
            }

            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                return;
            };

            let task = StepTask {
                provider: self.provider.clone(),
                store: self.store.clone(),
                policy: self.policy.clone(),
                cancel: token.clone(),
                calls: calls.clone(),
                step: step.clone(),
                properties,
            };

            run.status[i] = Status::Running;
            let handle = tasks.spawn(async move {
                let _permit = permit;
                task.run().await
            });
            task_index.insert(handle.id(), i);
        }
    }
}

/// Every step fails; the first one carries the state error
fn abort_all(steps: &[PlanStep], error: CloudError) -> Vec<StepResult> {
    let first = steps[0].logical_id().to_string();
    let mut error = Some(error);
    steps
        .iter()
        .map(|step| {
            let cause = match error.take() {
                Some(e) => StepFailure::State(e),
                None => StepFailure::Aborted { by: first.clone() },
            };
            Err(ApplyError::new(step.logical_id(), step.action, cause))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Pending,
    Running,
    Succeeded,
    Failed,
}

enum Readiness {
    Ready,
    Blocked,
    DependencyFailed(String),
}

/// Bookkeeping for one apply run
struct Run<'p> {
    steps: &'p [PlanStep],
    index: HashMap<&'p str, usize>,
    state: GlobalState,
    status: Vec<Status>,
    results: Vec<Option<StepResult>>,
    outputs: HashMap<String, Outputs>,
    aborted_by: Option<String>,
}

impl<'p> Run<'p> {
    fn new(steps: &'p [PlanStep], state: GlobalState) -> Self {
        Self {
            steps,
            index: steps
                .iter()
                .enumerate()
                .map(|(i, s)| (s.logical_id(), i))
                .collect(),
            state,
            status: vec![Status::Pending; steps.len()],
            results: steps.iter().map(|_| None).collect(),
            outputs: HashMap::new(),
            aborted_by: None,
        }
    }

    fn readiness(&self, i: usize) -> Readiness {
        let step = &self.steps[i];
        let mut blocked = false;

        for dependency in &step.depends_on {
            // Dependencies outside the plan are already applied
            let Some(&j) = self.index.get(dependency.as_str()) else {
                continue;
            };
            match self.status[j] {
                Status::Succeeded => {}
                Status::Failed => return Readiness::DependencyFailed(dependency.clone()),
                Status::Pending | Status::Running => blocked = true,
            }
        }

        if step.action == ActionType::Delete {
            // Deletes wait for every other step to finish
            let unfinished = self.steps.iter().zip(&self.status).any(|(s, status)| {
                s.action != ActionType::Delete
                    && matches!(status, Status::Pending | Status::Running)
            });
            blocked |= unfinished;
        }

        if blocked {
            Readiness::Blocked
        } else {
            Readiness::Ready
        }
    }

    /// Resolve references against outputs published earlier in this run
    fn resolve(&self, step: &PlanStep) -> Result<serde_json::Value, Reference> {
        let lookup = |reference: &Reference| -> Option<serde_json::Value> {
            if let Some(outputs) = self.outputs.get(&reference.logical_id) {
                return outputs.get(&reference.attribute).cloned();
            }
            if self.index.contains_key(reference.logical_id.as_str()) {
                return None;
            }
            self.state
                .get(&reference.logical_id)
                .and_then(|r| r.output(&reference.attribute))
        };
        resolve_properties(&step.resource.properties, &lookup)
    }

    /// Whether the resolved properties match the recorded ones
    fn unchanged(&self, step: &PlanStep, properties: &serde_json::Value) -> bool {
        self.state
            .get(step.logical_id())
            .is_some_and(|r| r.kind == step.kind() && r.applied_properties == *properties)
    }

    /// Recorded state with the declared dependencies, when they differ
    fn refreshed_record(&self, step: &PlanStep) -> Option<StateRecord> {
        let record = self.state.get(step.logical_id())?;
        if !dependencies_changed(&step.resource, record) {
            return None;
        }
        let dependencies = step
            .resource
            .dependency_ids()
            .into_iter()
            .map(String::from)
            .collect();
        Some(record.clone().with_dependencies(dependencies))
    }

    /// First dependency of step `i` that has not succeeded
    ///
    /// Deletes also wait on every non-delete step, so an unfinished one
    /// counts as blocking.
    fn blocking_step(&self, i: usize) -> Option<&'p str> {
        let steps = self.steps;
        let step = &steps[i];
        let unfinished = |j: usize| self.status[j] != Status::Succeeded;

        step.depends_on
            .iter()
            .filter_map(|d| self.index.get_key_value(d.as_str()))
            .find(|&(_, &j)| unfinished(j))
            .map(|(&id, _)| id)
            .or_else(|| {
                if step.action != ActionType::Delete {
                    return None;
                }
                steps
                    .iter()
                    .enumerate()
                    .find(|&(j, s)| s.action != ActionType::Delete && self.status[j] == Status::Pending)
                    .map(|(_, s)| s.logical_id())
            })
    }

    fn recorded_outputs(&self, step: &PlanStep) -> Outputs {
        let mut outputs = self
            .state
            .get(step.logical_id())
            .map(|r| r.outputs.clone())
            .unwrap_or_default();
        if let Some(provider_id) = &step.provider_id {
            outputs
                .entry(ID_OUTPUT.to_string())
                .or_insert_with(|| serde_json::Value::String(provider_id.clone()));
        }
        outputs
    }

    fn finish(&mut self, i: usize, result: StepResult) {
        match &result {
            Ok(outputs) => {
                self.status[i] = Status::Succeeded;
                self.outputs
                    .insert(self.steps[i].logical_id().to_string(), outputs.clone());
            }
            Err(error) => {
                self.status[i] = Status::Failed;
                if error.is_not_started() {
                    tracing::warn!("{}", error);
                } else {
                    tracing::error!("{}", error);
                }
            }
        }
        self.results[i] = Some(result);
    }

    /// Report every step that never started
    fn finish_pending(&mut self, cancelled: bool) {
        let steps = self.steps;
        for (i, step) in steps.iter().enumerate() {
            if self.status[i] != Status::Pending {
                continue;
            }
            let cause = match (&self.aborted_by, cancelled) {
                (Some(by), _) => StepFailure::Aborted { by: by.clone() },
                (None, true) => StepFailure::Cancelled,
                (None, false) => match self.blocking_step(i) {
                    Some(dependency) => StepFailure::DependencyFailed {
                        dependency: dependency.to_string(),
                    },
                    None => {
                        tracing::warn!(
                            logical_id = step.logical_id(),
                            "Step never became ready and has no blocking dependency"
                        );
                        StepFailure::Cancelled
                    }
                },
            };
            self.finish(i, Err(ApplyError::new(step.logical_id(), step.action, cause)));
        }
    }

    fn into_results(self) -> Vec<StepResult> {
        let steps = self.steps;
        self.results
            .into_iter()
            .enumerate()
            .map(|(i, result)| {
                result.unwrap_or_else(|| {
                    Err(ApplyError::new(
                        steps[i].logical_id(),
                        steps[i].action,
                        StepFailure::Cancelled,
                    ))
                })
            })
            .collect()
    }
}

const ID_OUTPUT: &str = Reference::ID_ATTRIBUTE;

/// One provider operation plus its state write, run on the worker set
struct StepTask {
    provider: Arc<dyn CloudProvider>,
    store: Arc<dyn StateStore>,
    policy: CallPolicy,
    cancel: CancellationToken,
    calls: Arc<AtomicUsize>,
    step: PlanStep,
    properties: serde_json::Value,
}

impl StepTask {
    async fn run(self) -> StepResult {
        let logical_id = self.step.logical_id();
        let kind = self.step.kind();
        let action = self.step.action;
        let fail = |cause: StepFailure| ApplyError::new(logical_id, action, cause);

        let provider = &self.provider;
        let properties = &self.properties;

        match action {
            ActionType::Create => {
                let created = self
                    .call("create", || provider.create(kind, properties))
                    .await
                    .map_err(|e| fail(StepFailure::Provider(e)))?;

                let mut outputs = created.outputs;
                outputs.insert(
                    ID_OUTPUT.to_string(),
                    serde_json::Value::String(created.provider_id.clone()),
                );
                self.record(&created.provider_id, &outputs)
                    .await
                    .map_err(|e| fail(StepFailure::State(e)))?;

                tracing::info!(logical_id, kind, provider_id = %created.provider_id, "Created resource");
                Ok(outputs)
            }
            ActionType::Update => {
                let provider_id = self.provider_id().map_err(|e| fail(StepFailure::Provider(e)))?;
                let mut outputs = self
                    .call("update", || provider.update(provider_id, kind, properties))
                    .await
                    .map_err(|e| fail(StepFailure::Provider(e)))?;

                outputs.insert(
                    ID_OUTPUT.to_string(),
                    serde_json::Value::String(provider_id.to_string()),
                );
                self.record(provider_id, &outputs)
                    .await
                    .map_err(|e| fail(StepFailure::State(e)))?;

                tracing::info!(logical_id, kind, provider_id, "Updated resource");
                Ok(outputs)
            }
            ActionType::Delete => {
                let provider_id = self.provider_id().map_err(|e| fail(StepFailure::Provider(e)))?;
                match self.call("delete", || provider.delete(provider_id, kind)).await {
                    Ok(()) => {}
                    Err(CloudError::ResourceNotFound(message)) => {
                        tracing::warn!(logical_id, "Resource already gone: {}", message);
                    }
                    Err(e) => return Err(fail(StepFailure::Provider(e))),
                }
                self.store
                    .remove(logical_id)
                    .await
                    .map_err(|e| fail(StepFailure::State(e)))?;

                tracing::info!(logical_id, kind, provider_id, "Deleted resource");
                Ok(Outputs::new())
            }
            ActionType::NoOp => Ok(Outputs::new()),
        }
    }

    async fn call<T, F, Fut>(&self, operation: &str, call: F) -> crate::error::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = crate::error::Result<T>>,
    {
        let operation = format!("{} {}", operation, self.step.logical_id());
        with_retry(&self.policy, &self.cancel, &self.calls, &operation, call).await
    }

    fn provider_id(&self) -> crate::error::Result<&str> {
        self.step.provider_id.as_deref().ok_or_else(|| {
            CloudError::StateError(format!(
                "no provider ID recorded for '{}'",
                self.step.logical_id()
            ))
        })
    }

    async fn record(&self, provider_id: &str, outputs: &Outputs) -> crate::error::Result<()> {
        let record = StateRecord::new(self.step.logical_id(), self.step.kind(), provider_id)
            .with_properties(self.properties.clone())
            .with_outputs(outputs.clone())
            .with_dependencies(
                self.step
                    .resource
                    .dependency_ids()
                    .into_iter()
                    .map(String::from)
                    .collect(),
            );
        self.store.put(record).await
    }
}
