//! The three convergence waits the orchestrator composes.

use tracing::debug;

use fleetroll_core::*;

use crate::aggregator::healthy_count;
use crate::wait::Waiter;

/// Wait until the group has at least `count` viable members.
pub async fn wait_for_viable(
    plane: &ControlPlane,
    waiter: &Waiter,
    group: &str,
    count: u32,
) -> FleetResult<()> {
    let what = format!("{count} viable members in {group}");
    waiter
        .until(&what, || async move {
            let viable = plane.read_group(group).await?.viable_count();
            debug!(%group, viable, wanted = count, "waiting for viable members");
            Ok(viable >= count)
        })
        .await
}

/// Wait until none of `instance_ids` is still terminating or unhealthy.
/// Members that have left the group entirely count as done.
pub async fn wait_for_terminated(
    plane: &ControlPlane,
    waiter: &Waiter,
    group: &str,
    instance_ids: &[InstanceId],
) -> FleetResult<()> {
    if instance_ids.is_empty() {
        return Ok(());
    }
    let what = format!("{} members of {group} to terminate", instance_ids.len());
    waiter
        .until(&what, || async move {
            let snapshot = plane.read_group(group).await?;
            let settling = instance_ids
                .iter()
                .filter_map(|id| snapshot.member(id))
                .filter(|m| m.is_settling())
                .count();
            debug!(%group, settling, "waiting for terminations");
            Ok(settling == 0)
        })
        .await
}

/// Wait until the load balancers report at least `min_healthy` members
/// (optionally on `config`) healthy. Returns immediately when the group
/// does not judge health by load balancer.
pub async fn wait_for_lb_health(
    plane: &ControlPlane,
    waiter: &Waiter,
    group: &str,
    config: Option<&str>,
    min_healthy: u32,
) -> FleetResult<()> {
    let snapshot = plane.read_group(group).await?;
    if !snapshot.uses_load_balancer_health() {
        return Ok(());
    }
    let what = format!("load balancers of {group} to report {min_healthy} healthy members");
    waiter
        .until(&what, || async move {
            let snapshot = plane.read_group(group).await?;
            let healthy = healthy_count(plane, &snapshot, &snapshot.member_ids(), config).await?;
            debug!(%group, healthy, wanted = min_healthy, "waiting for load balancer health");
            Ok(healthy >= min_healthy)
        })
        .await
}
