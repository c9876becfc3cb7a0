//! Capacity controller — the only path through which group bounds change.
//!
//! Desired capacity is always pulled into `[min, max]` before anything is
//! submitted. Callers routinely compute desired independently of the new
//! bounds (e.g. when shrinking back to the original size), so the clamp
//! is not optional.

use std::sync::Arc;

use tracing::{debug, info};

use fleetroll_core::*;

/// Applies size and attribute updates to groups.
#[derive(Clone)]
pub struct CapacityController {
    groups: Arc<dyn GroupApi>,
}

impl CapacityController {
    pub fn new(plane: &ControlPlane) -> Self {
        Self {
            groups: plane.groups.clone(),
        }
    }

    /// Set `(min, max, desired)` on a group. Returns what was submitted.
    pub async fn apply(&self, group: &str, requested: Capacity) -> FleetResult<Capacity> {
        let capacity = checked(group, requested)?;
        if capacity != requested {
            debug!(
                %group,
                requested = requested.desired_capacity,
                clamped = capacity.desired_capacity,
                "desired capacity clamped into bounds"
            );
        }

        info!(
            %group,
            min = capacity.min_size,
            max = capacity.max_size,
            desired = capacity.desired_capacity,
            "setting group size"
        );
        self.groups
            .update_group(&GroupUpdate::capacity(group, capacity))
            .await?;
        Ok(capacity)
    }

    /// Submit an attribute update against the given snapshot.
    ///
    /// Bounds the update leaves unset are taken from `current` when
    /// clamping, and a clamped desired value is always sent along so the
    /// server never sees an out-of-range combination.
    pub async fn apply_update(&self, current: &Group, update: &GroupUpdate) -> FleetResult<()> {
        let update = clamp_update(current, update)?;
        if update.is_empty() {
            debug!(group = %update.name, "nothing to update");
            return Ok(());
        }
        info!(group = %update.name, "updating group attributes");
        self.groups.update_group(&update).await?;
        Ok(())
    }
}

/// Clamp and verify a capacity triple.
pub fn checked(group: &str, requested: Capacity) -> FleetResult<Capacity> {
    let capacity = requested.clamped();
    if !capacity.is_consistent() {
        return Err(FleetError::InvariantViolation(format!(
            "group {group}: desired capacity cannot satisfy {capacity}"
        )));
    }
    Ok(capacity)
}

/// Fill in and clamp desired capacity for an update touching any bound.
fn clamp_update(current: &Group, update: &GroupUpdate) -> FleetResult<GroupUpdate> {
    let touches_bounds =
        update.min_size.is_some() || update.max_size.is_some() || update.desired_capacity.is_some();
    if !touches_bounds {
        return Ok(update.clone());
    }

    let effective = Capacity {
        min_size: update.min_size.unwrap_or(current.min_size),
        max_size: update.max_size.unwrap_or(current.max_size),
        desired_capacity: update.desired_capacity.unwrap_or(current.desired_capacity),
    };
    let capacity = checked(&update.name, effective)?;

    let mut update = update.clone();
    if capacity.desired_capacity != current.desired_capacity || update.desired_capacity.is_some() {
        update.desired_capacity = Some(capacity.desired_capacity);
    }
    Ok(update)
}
