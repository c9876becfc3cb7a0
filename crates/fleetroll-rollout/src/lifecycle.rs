//! Group lifecycle — create-or-update and delete.
//!
//! Neither flow touches members directly; both steer capacity and let the
//! group converge, waiting where asked.

use std::collections::BTreeSet;

use tracing::info;

use fleetroll_capacity::{CapacityController, checked};
use fleetroll_core::*;
use fleetroll_health::{Waiter, wait_for_lb_health, wait_for_viable};

/// Desired shape of a group. `None` fields keep whatever the group has
/// (or the default, on creation).
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GroupSpec {
    pub name: GroupName,
    pub launch_config: String,
    pub min_size: u32,
    pub max_size: u32,
    /// Defaults to `min_size` on creation.
    pub desired_capacity: Option<u32>,
    pub load_balancers: Option<BTreeSet<String>>,
    pub target_groups: Option<BTreeSet<String>>,
    pub health_check_type: Option<HealthCheckType>,
    pub health_check_grace_period: Option<u32>,
    pub default_cooldown: Option<u32>,
    pub availability_zones: Option<BTreeSet<String>>,
    pub vpc_subnets: Option<BTreeSet<String>>,
    pub termination_policies: Option<Vec<String>>,
    /// Wait for `desired` viable members and balancer health afterwards.
    pub wait_for_instances: bool,
}

impl GroupSpec {
    /// The full group record to create.
    fn to_group(&self) -> Group {
        Group {
            name: self.name.clone(),
            min_size: self.min_size,
            max_size: self.max_size,
            desired_capacity: self.desired_capacity.unwrap_or(self.min_size),
            launch_config: self.launch_config.clone(),
            load_balancers: self.load_balancers.clone().unwrap_or_default(),
            target_groups: self.target_groups.clone().unwrap_or_default(),
            health_check_type: self.health_check_type.unwrap_or_default(),
            health_check_grace_period: self.health_check_grace_period.unwrap_or(300),
            default_cooldown: self.default_cooldown.unwrap_or(300),
            availability_zones: self.availability_zones.clone().unwrap_or_default(),
            vpc_subnets: self.vpc_subnets.clone().unwrap_or_default(),
            termination_policies: self
                .termination_policies
                .clone()
                .unwrap_or_else(|| vec!["Default".to_string()]),
            members: Vec::new(),
        }
    }

    /// Allow-listed fields that differ from `current`.
    pub fn diff(&self, current: &Group) -> GroupUpdate {
        fn changed<T: PartialEq + Clone>(wanted: Option<&T>, current: &T) -> Option<T> {
            wanted.filter(|w| *w != current).cloned()
        }

        GroupUpdate {
            launch_config: changed(Some(&self.launch_config), &current.launch_config),
            min_size: changed(Some(&self.min_size), &current.min_size),
            max_size: changed(Some(&self.max_size), &current.max_size),
            desired_capacity: changed(self.desired_capacity.as_ref(), &current.desired_capacity),
            load_balancers: changed(self.load_balancers.as_ref(), &current.load_balancers),
            target_groups: changed(self.target_groups.as_ref(), &current.target_groups),
            health_check_type: changed(self.health_check_type.as_ref(), &current.health_check_type),
            health_check_grace_period: changed(
                self.health_check_grace_period.as_ref(),
                &current.health_check_grace_period,
            ),
            default_cooldown: changed(self.default_cooldown.as_ref(), &current.default_cooldown),
            availability_zones: changed(
                self.availability_zones.as_ref(),
                &current.availability_zones,
            ),
            vpc_subnets: changed(self.vpc_subnets.as_ref(), &current.vpc_subnets),
            termination_policies: changed(
                self.termination_policies.as_ref(),
                &current.termination_policies,
            ),
            ..GroupUpdate::named(&self.name)
        }
    }
}

/// Result of an ensure call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EnsureOutcome {
    pub changed: bool,
    pub group: Group,
}

/// Create, update and delete groups.
pub struct Lifecycle {
    plane: ControlPlane,
    capacity: CapacityController,
    waiter: Waiter,
}

impl Lifecycle {
    pub fn new(plane: ControlPlane, waiter: Waiter) -> Self {
        let capacity = CapacityController::new(&plane);
        Self {
            plane,
            capacity,
            waiter,
        }
    }

    /// Make the group match `spec`, creating it if needed.
    pub async fn ensure(&self, spec: &GroupSpec) -> FleetResult<EnsureOutcome> {
        let name = spec.name.as_str();
        let changed = match self.plane.groups.describe_group(name).await? {
            None => {
                let group = spec.to_group();
                checked(name, group.capacity())?;
                info!(group = %name, capacity = %group.capacity(), "creating group");
                self.plane.groups.create_group(&group).await?;
                true
            }
            Some(current) => {
                let update = spec.diff(&current);
                if update.is_empty() {
                    false
                } else {
                    self.capacity.apply_update(&current, &update).await?;
                    true
                }
            }
        };

        if spec.wait_for_instances {
            let group = self.plane.read_group(name).await?;
            wait_for_viable(&self.plane, &self.waiter, name, group.desired_capacity).await?;
            wait_for_lb_health(&self.plane, &self.waiter, name, None, group.min_size).await?;
        }

        Ok(EnsureOutcome {
            changed,
            group: self.plane.read_group(name).await?,
        })
    }

    /// Drain and delete a group. Returns `false` when it did not exist.
    pub async fn delete(&self, name: &str) -> FleetResult<bool> {
        if self.plane.groups.describe_group(name).await?.is_none() {
            return Ok(false);
        }

        info!(group = %name, "draining group before delete");
        self.capacity.apply(name, Capacity::new(0, 0, 0)).await?;

        let plane = &self.plane;
        self.waiter
            .until(&format!("members of {name} to terminate"), || async move {
                Ok(plane.read_group(name).await?.members.is_empty())
            })
            .await?;

        info!(group = %name, "deleting group");
        self.plane.groups.delete_group(name).await?;
        self.waiter
            .until(&format!("{name} to disappear"), || async move {
                Ok(plane.groups.describe_group(name).await?.is_none())
            })
            .await?;
        Ok(true)
    }
}
