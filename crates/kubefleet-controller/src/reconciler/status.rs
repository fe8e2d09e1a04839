//! Placement status synthesis, §4.3.1.
//!
//! This is pure: given the placement, the policy snapshot the scheduler
//! last acted on, the resource snapshot group currently selected, and the
//! bindings that exist right now, compute the [`PlacementStatus`] the
//! reconciler should write. No I/O, no clock other than what's passed in —
//! everything here is a table-testable function, the way
//! `stackable-operator::status::condition` keeps condition computation
//! separate from the controller loop that calls it.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kubefleet_core::condition::{aggregate, Condition, ConditionStatus, PlacementConditionType, PolicySnapshotConditionType};
use kubefleet_core::entities::{
    Binding, ClusterDecision, ClusterPlacementStatus, Placement, PlacementStatus, Policy,
    PolicySnapshot, ResourceSnapshotGroup,
};

/// Recompute `placement.status` from scratch given everything currently
/// observed. Called on every reconcile; idempotent.
pub fn synthesize(
    placement: &Placement,
    policy_snapshot: Option<&PolicySnapshot>,
    resource_group: Option<&ResourceSnapshotGroup>,
    bindings: &[Binding],
    now: &Time,
) -> PlacementStatus {
    let mut status = PlacementStatus::default();
    let latest_resource_snapshot_name = resource_group.map(|g| g.master.meta.name.as_str());

    let scheduled = scheduled_condition(placement, policy_snapshot);
    status.conditions.set(scheduled.clone(), now.clone());

    let report_diff = placement.report_diff();
    let ladder = PlacementConditionType::ladder_for(report_diff);
    let external = placement.spec.strategy.is_external();

    if let Some(snapshot) = policy_snapshot {
        if snapshot.observed_placement_generation >= placement.meta.generation {
            let policy = placement.spec.effective_policy();
            for decision in &snapshot.status.cluster_decisions {
                if let Some(cluster_status) = per_cluster_status(
                    &policy,
                    decision,
                    bindings,
                    ladder,
                    latest_resource_snapshot_name,
                    now,
                ) {
                    status.placement_statuses.push(cluster_status);
                }
            }
            status
                .placement_statuses
                .extend(shortfall_entries(&policy, &snapshot.status.cluster_decisions, now));
        }
    }

    // `ladder[0]` is always `Scheduled`, already set above from the policy
    // snapshot directly (its reason/message carries more detail than the
    // generic aggregate values below would).
    let mut stopped = false;
    for condition_type in ladder.iter().skip(1) {
        if external && *condition_type != PlacementConditionType::RolloutStarted {
            // §4.3.1 "External rollout mode": downstream conditions are
            // removed once `RolloutStarted` itself is governed by the
            // external controller rather than our own ladder.
            status.conditions.remove(*condition_type);
            continue;
        }
        if stopped {
            status.conditions.set(
                Condition::new(*condition_type, ConditionStatus::Unknown, "NotYetEvaluated")
                    .with_message("an earlier condition in the ladder is not True"),
                now.clone(),
            );
            continue;
        }
        let value = top_level_value(*condition_type, &status.placement_statuses, external);
        if value.0 != ConditionStatus::True {
            stopped = true;
        }
        status.conditions.set(
            Condition::new(*condition_type, value.0, value.1).with_message(value.2),
            now.clone(),
        );
    }

    if external {
        let names: std::collections::HashSet<&str> = bindings
            .iter()
            .map(|b| b.spec.resource_snapshot_name.as_str())
            .collect();
        let disagreement = names.len() > 1 || names.iter().all(|n| n.is_empty());
        if disagreement {
            status.conditions.set(
                Condition::new(
                    PlacementConditionType::RolloutStarted,
                    ConditionStatus::Unknown,
                    "ControlledByExternal",
                )
                .with_message("bindings disagree on the observed resource snapshot"),
                now.clone(),
            );
            return status;
        }
    }

    if let Some(group) = resource_group {
        let follows_bindings = external
            && bindings
                .iter()
                .any(|b| !b.spec.resource_snapshot_name.is_empty());
        let index_string = if follows_bindings {
            bindings
                .iter()
                .map(|b| b.spec.resource_snapshot_name.clone())
                .next()
                .unwrap_or_default()
        } else {
            group.index.to_string()
        };
        status.observed_resource_index = Some(index_string);
        status.selected_resources = group
            .all_resources()
            .iter()
            .map(|r| {
                format!(
                    "{}/{}/{}/{}/{}",
                    r.identifier.group,
                    r.identifier.version,
                    r.identifier.kind,
                    r.identifier.namespace.as_deref().unwrap_or(""),
                    r.identifier.name
                )
            })
            .collect();
    }

    status
}

fn scheduled_condition(
    placement: &Placement,
    policy_snapshot: Option<&PolicySnapshot>,
) -> Condition<PlacementConditionType> {
    match policy_snapshot {
        None => Condition::new(
            PlacementConditionType::Scheduled,
            ConditionStatus::Unknown,
            "SchedulingNotStarted",
        )
        .with_message("no policy snapshot has been produced yet"),
        Some(snapshot) if snapshot.observed_placement_generation < placement.meta.generation => {
            Condition::new(
                PlacementConditionType::Scheduled,
                ConditionStatus::Unknown,
                "SchedulingPending",
            )
            .with_message("scheduling has not completed")
            .with_observed_generation(snapshot.observed_placement_generation)
        }
        Some(snapshot) => match snapshot.status.conditions.get(PolicySnapshotConditionType::Scheduled) {
            Some(c) => {
                let mut copied =
                    Condition::new(PlacementConditionType::Scheduled, c.status, c.reason.clone().unwrap_or_default());
                copied.message = c.message.clone();
                copied.observed_generation = Some(placement.meta.generation);
                copied
            }
            None => Condition::new(
                PlacementConditionType::Scheduled,
                ConditionStatus::Unknown,
                "SchedulingNotStarted",
            ),
        },
    }
}

/// One cluster's row of `placementStatuses`, or `None` when `decision`
/// doesn't warrant an entry at all (an unselected cluster under
/// `PickAll`, which simply means the cluster was ineligible — not a
/// scheduling failure worth reporting, §4.3.1).
fn per_cluster_status(
    policy: &Policy,
    decision: &ClusterDecision,
    bindings: &[Binding],
    ladder: &[PlacementConditionType],
    latest_resource_snapshot_name: Option<&str>,
    now: &Time,
) -> Option<ClusterPlacementStatus> {
    if !decision.selected {
        if matches!(policy, Policy::PickAll) {
            return None;
        }
        return None; // shortfall entries are synthesised separately, see `shortfall_entries`.
    }

    let mut entry = ClusterPlacementStatus {
        cluster_name: decision.cluster_name.clone(),
        ..Default::default()
    };
    entry.conditions.set(
        Condition::new(PlacementConditionType::Scheduled, ConditionStatus::True, "Scheduled")
            .with_message(decision.reason.clone()),
        now.clone(),
    );

    let binding = bindings
        .iter()
        .find(|b| b.spec.target_cluster == decision.cluster_name);

    let Some(binding) = binding else {
        entry.conditions.set(
            Condition::new(PlacementConditionType::RolloutStarted, ConditionStatus::Unknown, "BindingNotCreated"),
            now.clone(),
        );
        return Some(entry);
    };

    let out_of_date = latest_resource_snapshot_name
        .map(|latest| binding.spec.resource_snapshot_name != latest)
        .unwrap_or(false);
    let no_overrides = binding.spec.cluster_resource_override_snapshots.is_empty()
        && binding.spec.resource_override_snapshots.is_empty();

    let mut stopped = false;
    for condition_type in ladder.iter().skip(1) {
        if stopped {
            continue;
        }
        let binding_condition = binding.status.conditions.get(*condition_type);

        if *condition_type == PlacementConditionType::RolloutStarted && out_of_date {
            let value = match binding_condition.map(|c| c.status) {
                Some(ConditionStatus::False) => {
                    (ConditionStatus::False, "RolloutBlocked".to_string())
                }
                _ => (ConditionStatus::Unknown, "RolloutPending".to_string()),
            };
            if value.0 != ConditionStatus::True {
                stopped = true;
            }
            entry.conditions.set(
                Condition::new(PlacementConditionType::RolloutStarted, value.0, value.1),
                now.clone(),
            );
            continue;
        }

        match binding_condition {
            Some(c) if c.observed_generation.map_or(false, |g| g >= binding.meta.generation) => {
                let reason = if *condition_type == PlacementConditionType::Overridden
                    && c.status.is_true()
                    && no_overrides
                {
                    "OverrideNotSpecified".to_string()
                } else {
                    c.reason.clone().unwrap_or_default()
                };
                if c.status != ConditionStatus::True {
                    stopped = true;
                }
                let mut copied = Condition::new(*condition_type, c.status, reason);
                copied.message = c.message.clone();
                copied.last_transition_time = c.last_transition_time.clone();
                entry.conditions.set(copied, now.clone());
            }
            _ => {
                stopped = true;
                entry.conditions.set(
                    Condition::new(*condition_type, ConditionStatus::Unknown, "Pending"),
                    now.clone(),
                );
            }
        }
    }

    Some(entry)
}

/// For `PickN`/`PickFixed`, the gap between desired and actually-selected
/// clusters becomes phantom per-cluster entries so the shortfall is
/// visible in `placementStatuses` rather than silently absent, §4.3.1
/// "Failed-to-schedule phantom entries". `PickAll` never has a shortfall:
/// every eligible cluster that exists is selected by definition.
fn shortfall_entries(
    policy: &Policy,
    decisions: &[ClusterDecision],
    now: &Time,
) -> Vec<ClusterPlacementStatus> {
    if matches!(policy, Policy::PickAll) {
        return Vec::new();
    }
    decisions
        .iter()
        .filter(|d| !d.selected)
        .map(|d| {
            let mut entry = ClusterPlacementStatus {
                cluster_name: d.cluster_name.clone(),
                scheduler_reason: Some(d.reason.clone()),
                ..Default::default()
            };
            entry.conditions.set(
                Condition::new(PlacementConditionType::Scheduled, ConditionStatus::False, "ResourceScheduleFailed")
                    .with_message(d.reason.clone()),
                now.clone(),
            );
            entry
        })
        .collect()
}

/// `(status, reason, message)` for one ladder rung's top-level aggregate,
/// §4.3.1 "the ladder short-circuits on the first non-True rung": once an
/// earlier rung isn't `True`, every later rung reports `Unknown` without
/// even inspecting per-cluster values, since those controllers haven't had
/// a chance to act yet. Phantom (failed-to-schedule) entries only ever
/// carry `Scheduled`, so they drop out of the aggregate for later rungs —
/// a cluster that was never picked has nothing to report on `Applied`.
fn top_level_value(
    condition_type: PlacementConditionType,
    per_cluster: &[ClusterPlacementStatus],
    external: bool,
) -> (ConditionStatus, &'static str, String) {
    let applicable: Vec<&ClusterPlacementStatus> = per_cluster
        .iter()
        .filter(|c| c.conditions.get(condition_type).is_some())
        .collect();

    if applicable.is_empty() {
        return (ConditionStatus::Unknown, "NoClustersReported", String::new());
    }

    let values: Vec<ConditionStatus> = applicable
        .iter()
        .map(|c| c.conditions.get(condition_type).map(|cond| cond.status).unwrap())
        .collect();

    let aggregated = aggregate(values.iter().copied());
    let total = applicable.len();
    let ready = values.iter().filter(|v| v.is_true()).count();

    if condition_type == PlacementConditionType::RolloutStarted && aggregated == ConditionStatus::Unknown && external {
        let offender = applicable
            .iter()
            .find(|c| c.conditions.get(condition_type).map(|cond| cond.status) == Some(ConditionStatus::Unknown))
            .map(|c| c.cluster_name.as_str())
            .unwrap_or("");
        return (
            ConditionStatus::Unknown,
            "ControlledByExternal",
            format!("cluster {offender} has not reported a resource-snapshot observation"),
        );
    }

    let reason: &'static str = match aggregated {
        ConditionStatus::True => "AllClustersReady",
        ConditionStatus::False => "SomeClustersNotReady",
        ConditionStatus::Unknown => "WaitingForClusters",
    };
    (aggregated, reason, format!("{ready}/{total} clusters ready"))
}
