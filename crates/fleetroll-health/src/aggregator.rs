//! Load-balancer health aggregation.
//!
//! An instance counts as healthy only if the group itself reports it viable
//! *and* every attached classic balancer reports it `InService` *and* every
//! attached target group reports it `healthy`. The per-resource results are
//! intersected, never unioned.

use std::collections::BTreeSet;

use tracing::debug;

use fleetroll_core::*;

/// Number of `candidates` healthy on every attached balancer and target
/// group, optionally restricted to members on `config`.
///
/// Returns 0 without calling out when no candidate is viable or when nothing
/// is attached. An instance a balancer does not know yet counts as zero
/// healthy on that balancer rather than as a fault.
pub async fn healthy_count(
    plane: &ControlPlane,
    group: &Group,
    candidates: &[InstanceId],
    config: Option<&str>,
) -> FleetResult<u32> {
    let viable: BTreeSet<InstanceId> = candidates
        .iter()
        .filter_map(|id| group.member(id))
        .filter(|m| m.is_viable())
        .filter(|m| config.is_none_or(|c| m.launch_config.as_deref() == Some(c)))
        .map(|m| m.instance_id.clone())
        .collect();

    if viable.is_empty() {
        debug!(group = %group.name, "no viable candidates, skipping balancer checks");
        return Ok(0);
    }
    if group.load_balancers.is_empty() && group.target_groups.is_empty() {
        return Ok(0);
    }

    let ids: Vec<InstanceId> = viable.iter().cloned().collect();
    let mut healthy = viable;

    for lb in &group.load_balancers {
        let here: BTreeSet<InstanceId> =
            match plane.balancers.describe_instance_health(lb, Some(&ids)).await {
                Ok(states) => states
                    .into_iter()
                    .filter(InstanceHealth::in_service)
                    .map(|s| s.instance_id)
                    .collect(),
                Err(err) if not_known_yet(&err) => {
                    debug!(load_balancer = %lb, %err, "instances not registered yet");
                    BTreeSet::new()
                }
                Err(err) => return Err(err.into()),
            };
        healthy = healthy.intersection(&here).cloned().collect();
        debug!(load_balancer = %lb, healthy = here.len(), "balancer health");
    }

    for tg in &group.target_groups {
        let here: BTreeSet<InstanceId> =
            match plane.balancers.describe_target_health(tg, Some(&ids)).await {
                Ok(states) => states
                    .into_iter()
                    .filter(TargetHealth::healthy)
                    .map(|s| s.target_id)
                    .collect(),
                Err(err) if not_known_yet(&err) => {
                    debug!(target_group = %tg, %err, "targets not registered yet");
                    BTreeSet::new()
                }
                Err(err) => return Err(err.into()),
            };
        healthy = healthy.intersection(&here).cloned().collect();
        debug!(target_group = %tg, healthy = here.len(), "target group health");
    }

    Ok(healthy.len() as u32)
}

fn not_known_yet(err: &ApiError) -> bool {
    matches!(
        err,
        ApiError::InvalidInstance { .. } | ApiError::GroupNotFound(_)
    )
}
