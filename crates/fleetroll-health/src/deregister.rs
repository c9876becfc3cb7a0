//! Deregistration coordinator.
//!
//! Removes one instance from every balancer and target group attached to
//! its group, then waits until none of them still reports it in service.
//! The caller must not terminate the instance until this returns `Ok`.

use tracing::{debug, info};

use fleetroll_core::*;

use crate::wait::Waiter;

/// Deregister `instance_id` from everything attached to `group`.
///
/// No-op unless the group judges health by load balancer. Classic balancers
/// are only asked to deregister when they currently list the instance;
/// target groups are always asked. Returns the number of deregister calls
/// issued.
pub async fn deregister(
    plane: &ControlPlane,
    waiter: &Waiter,
    group: &str,
    instance_id: &str,
) -> FleetResult<usize> {
    let snapshot = plane.read_group(group).await?;
    if !snapshot.uses_load_balancer_health() {
        return Ok(0);
    }

    let target = [instance_id.to_string()];
    let mut calls = 0;

    for lb in &snapshot.load_balancers {
        let listed = plane
            .balancers
            .describe_instance_health(lb, None)
            .await?
            .iter()
            .any(|s| s.instance_id == instance_id);
        if listed {
            info!(%instance_id, load_balancer = %lb, "deregistering from load balancer");
            plane.balancers.deregister_instances(lb, &target).await?;
            calls += 1;
        }
    }
    for tg in &snapshot.target_groups {
        info!(%instance_id, target_group = %tg, "deregistering from target group");
        plane.balancers.deregister_targets(tg, &target).await?;
        calls += 1;
    }

    let what = format!("{instance_id} to leave the load balancers of {group}");
    let snapshot = &snapshot;
    waiter
        .until(&what, || async move {
            let remaining = still_in_service(plane, snapshot, instance_id).await?;
            debug!(%instance_id, remaining, "in-service registrations");
            Ok(remaining == 0)
        })
        .await?;

    Ok(calls)
}

/// How many attached resources still report the instance as serving.
async fn still_in_service(
    plane: &ControlPlane,
    group: &Group,
    instance_id: &str,
) -> FleetResult<usize> {
    let mut count = 0;
    for lb in &group.load_balancers {
        count += plane
            .balancers
            .describe_instance_health(lb, None)
            .await?
            .iter()
            .filter(|s| s.instance_id == instance_id && s.in_service())
            .count();
    }
    let target = [instance_id.to_string()];
    for tg in &group.target_groups {
        count += plane
            .balancers
            .describe_target_health(tg, Some(&target))
            .await?
            .iter()
            .filter(|s| s.target_id == instance_id && s.healthy())
            .count();
    }
    Ok(count)
}
