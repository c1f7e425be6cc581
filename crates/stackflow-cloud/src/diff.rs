//! Diff engine
//!
//! Compares desired resources against the recorded state and classifies
//! each one as create, update, delete or no-op.

use crate::action::{ActionType, PlanStep};
use crate::state::{GlobalState, StateRecord};
use stackflow_core::{
    DependencyGraph, Reference, Resource, order_ids, properties_from_json, resolve_properties,
};
use std::collections::{BTreeSet, HashMap};

/// Build plan steps for `desired` (already in dependency order)
///
/// Deletions of recorded resources that are no longer declared are appended
/// after every other step, dependents first.
pub fn diff(desired: &[&Resource], graph: &DependencyGraph, current: &GlobalState) -> Vec<PlanStep> {
    let mut steps = Vec::with_capacity(desired.len());
    let mut actions: HashMap<&str, ActionType> = HashMap::new();

    for resource in desired {
        let depends_on: Vec<String> = graph
            .dependencies(&resource.logical_id)
            .into_iter()
            .map(String::from)
            .collect();

        let step = match current.get(&resource.logical_id) {
            None => PlanStep::new((*resource).clone(), ActionType::Create, "not in state"),
            Some(record) => classify(resource, record, current, &actions),
        }
        .with_depends_on(depends_on);

        tracing::debug!(
            logical_id = %resource.logical_id,
            action = %step.action,
            reason = %step.reason,
            "Classified resource"
        );
        actions.insert(&resource.logical_id, step.action);
        steps.push(step);
    }

    steps.extend(deletions(graph, current));
    steps
}

/// Steps that delete every recorded resource missing from `graph`
pub fn deletions(graph: &DependencyGraph, current: &GlobalState) -> Vec<PlanStep> {
    let orphaned: Vec<&StateRecord> = current
        .iter()
        .filter(|(id, _)| !graph.contains(id))
        .map(|(_, record)| record)
        .collect();
    delete_steps(&orphaned)
}

/// Delete steps for `records`, dependents before their dependencies
pub fn delete_steps(records: &[&StateRecord]) -> Vec<PlanStep> {
    let by_id: HashMap<&str, &StateRecord> = records
        .iter()
        .map(|r| (r.logical_id.as_str(), *r))
        .collect();
    let ids: Vec<String> = records.iter().map(|r| r.logical_id.clone()).collect();

    let mut ordered = order_ids(&ids, |id| {
        by_id
            .get(id)
            .map(|r| r.dependencies.clone())
            .unwrap_or_default()
    });
    ordered.reverse();

    ordered
        .iter()
        .filter_map(|id| by_id.get(id.as_str()))
        .map(|record| {
            // Dependents in the same set have to be gone first
            let dependents: Vec<String> = ordered
                .iter()
                .filter(|other| {
                    by_id
                        .get(other.as_str())
                        .is_some_and(|r| r.dependencies.contains(&record.logical_id))
                })
                .cloned()
                .collect();

            let mut resource = Resource::new(&record.kind, &record.logical_id);
            resource.properties = properties_from_json(&record.applied_properties);

            PlanStep::new(resource, ActionType::Delete, "no longer declared")
                .with_provider_id(&record.provider_id)
                .with_depends_on(dependents)
        })
        .collect()
}

fn classify(
    resource: &Resource,
    record: &StateRecord,
    current: &GlobalState,
    actions: &HashMap<&str, ActionType>,
) -> PlanStep {
    // Outputs of resources that change in this run are not known yet
    let lookup = |reference: &Reference| -> Option<serde_json::Value> {
        match actions.get(reference.logical_id.as_str()) {
            Some(ActionType::NoOp) => current
                .get(&reference.logical_id)
                .and_then(|r| r.output(&reference.attribute)),
            _ => None,
        }
    };

    let step = match resolve_properties(&resource.properties, &lookup) {
        Ok(_) if record.kind != resource.kind => PlanStep::new(
            resource.clone(),
            ActionType::Update,
            format!("kind changed from {} to {}", record.kind, resource.kind),
        ),
        Ok(resolved) if resolved == record.applied_properties => {
            if dependencies_changed(resource, record) {
                PlanStep::new(resource.clone(), ActionType::NoOp, "dependencies changed").refresh()
            } else {
                PlanStep::new(resource.clone(), ActionType::NoOp, "up to date")
            }
        }
        Ok(_) => PlanStep::new(resource.clone(), ActionType::Update, "properties changed"),
        Err(reference) => PlanStep::new(
            resource.clone(),
            ActionType::Update,
            format!("waiting on output {reference}"),
        )
        .deferred(),
    };

    step.with_provider_id(&record.provider_id)
}

/// Whether the recorded dependencies differ from the declared ones
pub(crate) fn dependencies_changed(resource: &Resource, record: &StateRecord) -> bool {
    let recorded: BTreeSet<&str> = record.dependencies.iter().map(String::as_str).collect();
    recorded != resource.dependency_ids()
}
