//! Simulated fleet state and its tick model.
//!
//! All mutation happens here, synchronously. [`crate::SimFleet`] wraps a
//! [`FleetState`] in a mutex and exposes it through the control-plane
//! traits.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use fleetroll_core::*;

/// Timing knobs, in ticks. One tick passes per group describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimTuning {
    /// Ticks a launched member stays `Pending`.
    pub boot_ticks: u32,
    /// Ticks a terminated member stays `Terminating`.
    pub drain_ticks: u32,
    /// Ticks between a member entering service and a balancer reporting it.
    pub register_lag_ticks: u32,
    /// Leave surplus members running instead of scaling in.
    pub suspend_scale_in: bool,
}

impl Default for SimTuning {
    fn default() -> Self {
        Self {
            boot_ticks: 1,
            drain_ticks: 1,
            register_lag_ticks: 0,
            suspend_scale_in: false,
        }
    }
}

/// A group plus the per-member countdowns the simulator tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimGroup {
    pub group: Group,
    /// Ticks left before a `Pending`/`Terminating` member transitions.
    #[serde(default)]
    pub timers: BTreeMap<InstanceId, u32>,
}

/// Instances registered with one balancer or target group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registrations {
    /// Instance id → ticks until the balancer reports it.
    #[serde(default)]
    pub instances: BTreeMap<InstanceId, u32>,
    /// When set, every registered instance is reported unhealthy.
    #[serde(default)]
    pub faulted: bool,
}

/// One recorded control-plane call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    DescribeGroup(String),
    CreateGroup(String),
    UpdateGroup(GroupUpdate),
    TerminateMember {
        instance_id: String,
        decrement: bool,
    },
    DeleteGroup(String),
    DescribeInstanceHealth {
        load_balancer: String,
    },
    DeregisterInstances {
        load_balancer: String,
        instance_ids: Vec<String>,
    },
    DescribeTargetHealth {
        target_group: String,
    },
    DeregisterTargets {
        target_group: String,
        target_ids: Vec<String>,
    },
}

impl Call {
    /// Whether the call changes remote state.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Call::DescribeGroup(_)
                | Call::DescribeInstanceHealth { .. }
                | Call::DescribeTargetHealth { .. }
        )
    }
}

/// Everything the simulator knows. Serializes to the CLI's fleet file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetState {
    #[serde(default)]
    pub tuning: SimTuning,
    #[serde(default)]
    pub groups: BTreeMap<GroupName, SimGroup>,
    #[serde(default)]
    pub load_balancers: BTreeMap<String, Registrations>,
    #[serde(default)]
    pub target_groups: BTreeMap<String, Registrations>,
    /// Counter for generated instance ids.
    #[serde(default)]
    pub next_instance: u64,
    #[serde(skip)]
    pub calls: Vec<Call>,
    /// Mutating calls that went through.
    #[serde(skip)]
    pub applied: u32,
}

impl FleetState {
    pub fn with_tuning(mut self, tuning: SimTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Add a group as-is. In-service members are registered with every
    /// attached balancer and target group, which are created on demand.
    pub fn with_group(mut self, group: Group) -> Self {
        for lb in &group.load_balancers {
            self.load_balancers.entry(lb.clone()).or_default();
        }
        for tg in &group.target_groups {
            self.target_groups.entry(tg.clone()).or_default();
        }
        let in_service: Vec<InstanceId> = group
            .members
            .iter()
            .filter(|m| m.lifecycle_state == LifecycleState::InService)
            .map(|m| m.instance_id.clone())
            .collect();
        for id in &in_service {
            register(&mut self.load_balancers, &group.load_balancers, id, 0);
            register(&mut self.target_groups, &group.target_groups, id, 0);
        }
        self.groups.insert(
            group.name.clone(),
            SimGroup {
                group,
                timers: BTreeMap::new(),
            },
        );
        self
    }

    pub fn with_load_balancer(mut self, name: &str) -> Self {
        self.load_balancers.entry(name.to_string()).or_default();
        self
    }

    pub fn with_target_group(mut self, name: &str) -> Self {
        self.target_groups.entry(name.to_string()).or_default();
        self
    }

    /// Group record without advancing time.
    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name).map(|g| &g.group)
    }

    // ── Tick model ────────────────────────────────────────────────

    /// Advance one tick for the named group and return its snapshot.
    pub fn tick(&mut self, name: &str) -> Option<Group> {
        let tuning = self.tuning;
        for regs in self
            .load_balancers
            .values_mut()
            .chain(self.target_groups.values_mut())
        {
            for lag in regs.instances.values_mut() {
                *lag = lag.saturating_sub(1);
            }
        }

        let sim = self.groups.get_mut(name)?;
        let mut entered_service = Vec::new();
        let mut gone = Vec::new();

        for member in &mut sim.group.members {
            let Some(left) = sim.timers.get_mut(&member.instance_id) else {
                continue;
            };
            *left = left.saturating_sub(1);
            if *left > 0 {
                continue;
            }
            sim.timers.remove(&member.instance_id);
            match member.lifecycle_state {
                LifecycleState::Pending => {
                    member.lifecycle_state = LifecycleState::InService;
                    member.health_status = HealthStatus::Healthy;
                    entered_service.push(member.instance_id.clone());
                }
                LifecycleState::Terminating => gone.push(member.instance_id.clone()),
                _ => {}
            }
        }
        sim.group.members.retain(|m| !gone.contains(&m.instance_id));
        let lbs = sim.group.load_balancers.clone();
        let tgs = sim.group.target_groups.clone();

        for id in &entered_service {
            register(&mut self.load_balancers, &lbs, id, tuning.register_lag_ticks);
            register(&mut self.target_groups, &tgs, id, tuning.register_lag_ticks);
        }
        for id in &gone {
            self.forget_everywhere(id);
        }

        self.reconcile(name);
        self.group(name).cloned()
    }

    /// Launch or terminate members until the active count matches desired.
    fn reconcile(&mut self, name: &str) {
        let tuning = self.tuning;
        let Some(sim) = self.groups.get_mut(name) else {
            return;
        };
        let group = &mut sim.group;
        let active = group
            .members
            .iter()
            .filter(|m| m.lifecycle_state != LifecycleState::Terminating)
            .count() as u32;

        if active < group.desired_capacity {
            for _ in active..group.desired_capacity {
                self.next_instance += 1;
                let id = format!("i-{:08x}", self.next_instance);
                debug!(group = %name, instance_id = %id, "launching member");
                group.members.push(Member {
                    instance_id: id.clone(),
                    lifecycle_state: LifecycleState::Pending,
                    health_status: HealthStatus::Healthy,
                    launch_config: Some(group.launch_config.clone()),
                });
                sim.timers.insert(id, tuning.boot_ticks.max(1));
            }
        } else if active > group.desired_capacity && !tuning.suspend_scale_in {
            let surplus = (active - group.desired_capacity) as usize;
            // Old configuration first, then newest first.
            let mut victims: Vec<(bool, usize)> = group
                .members
                .iter()
                .enumerate()
                .filter(|(_, m)| m.lifecycle_state != LifecycleState::Terminating)
                .map(|(idx, m)| (group.is_current(m), idx))
                .collect();
            victims.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
            for (_, idx) in victims.into_iter().take(surplus) {
                let member = &mut group.members[idx];
                debug!(group = %name, instance_id = %member.instance_id, "scaling in member");
                member.lifecycle_state = LifecycleState::Terminating;
                sim.timers
                    .insert(member.instance_id.clone(), tuning.drain_ticks.max(1));
            }
        }
    }

    fn forget_everywhere(&mut self, instance_id: &str) {
        for regs in self
            .load_balancers
            .values_mut()
            .chain(self.target_groups.values_mut())
        {
            regs.instances.remove(instance_id);
        }
    }

    fn member_viable(&self, instance_id: &str) -> bool {
        self.groups
            .values()
            .filter_map(|g| g.group.member(instance_id))
            .any(|m| m.is_viable())
    }

    // ── Group manager ─────────────────────────────────────────────

    pub fn create_group(&mut self, group: &Group) -> ApiResult<()> {
        if self.groups.contains_key(&group.name) {
            return Err(ApiError::rejected(
                "CreateGroup",
                format!("group {} already exists", group.name),
            ));
        }
        check_bounds("CreateGroup", &group.capacity())?;
        let mut group = group.clone();
        group.members.clear();
        for lb in &group.load_balancers {
            self.load_balancers.entry(lb.clone()).or_default();
        }
        for tg in &group.target_groups {
            self.target_groups.entry(tg.clone()).or_default();
        }
        self.groups.insert(
            group.name.clone(),
            SimGroup {
                group,
                timers: BTreeMap::new(),
            },
        );
        Ok(())
    }

    pub fn update_group(&mut self, update: &GroupUpdate) -> ApiResult<()> {
        let sim = self
            .groups
            .get_mut(&update.name)
            .ok_or_else(|| ApiError::GroupNotFound(update.name.clone()))?;
        let mut next = sim.group.clone();
        update.apply_to(&mut next);
        check_bounds("UpdateGroup", &next.capacity())?;

        let attached_lbs: Vec<String> = next
            .load_balancers
            .difference(&sim.group.load_balancers)
            .cloned()
            .collect();
        let detached_lbs: Vec<String> = sim
            .group
            .load_balancers
            .difference(&next.load_balancers)
            .cloned()
            .collect();
        let attached_tgs: Vec<String> = next
            .target_groups
            .difference(&sim.group.target_groups)
            .cloned()
            .collect();
        let detached_tgs: Vec<String> = sim
            .group
            .target_groups
            .difference(&next.target_groups)
            .cloned()
            .collect();
        let in_service: Vec<InstanceId> = next
            .members
            .iter()
            .filter(|m| m.lifecycle_state == LifecycleState::InService)
            .map(|m| m.instance_id.clone())
            .collect();
        let all_ids = next.member_ids();
        sim.group = next;

        for lb in &detached_lbs {
            if let Some(regs) = self.load_balancers.get_mut(lb) {
                regs.instances.retain(|id, _| !all_ids.contains(id));
            }
        }
        for tg in &detached_tgs {
            if let Some(regs) = self.target_groups.get_mut(tg) {
                regs.instances.retain(|id, _| !all_ids.contains(id));
            }
        }
        let attached_lbs: BTreeSet<String> = attached_lbs.into_iter().collect();
        let attached_tgs: BTreeSet<String> = attached_tgs.into_iter().collect();
        for id in &in_service {
            register(&mut self.load_balancers, &attached_lbs, id, 0);
            register(&mut self.target_groups, &attached_tgs, id, 0);
        }
        Ok(())
    }

    pub fn terminate_member(&mut self, instance_id: &str, decrement: bool) -> ApiResult<()> {
        let drain = self.tuning.drain_ticks.max(1);
        let sim = self
            .groups
            .values_mut()
            .find(|g| g.group.member(instance_id).is_some())
            .ok_or_else(|| {
                ApiError::rejected(
                    "TerminateMember",
                    format!("instance {instance_id} is not in any group"),
                )
            })?;

        let already_terminating = sim
            .group
            .member(instance_id)
            .is_some_and(|m| m.lifecycle_state == LifecycleState::Terminating);
        if already_terminating {
            return Ok(());
        }

        if decrement {
            if sim.group.desired_capacity <= sim.group.min_size {
                return Err(ApiError::rejected(
                    "TerminateMember",
                    format!(
                        "decrementing desired capacity of {} would drop below min size {}",
                        sim.group.name, sim.group.min_size
                    ),
                ));
            }
            sim.group.desired_capacity -= 1;
        }

        if let Some(member) = sim
            .group
            .members
            .iter_mut()
            .find(|m| m.instance_id == instance_id)
        {
            member.lifecycle_state = LifecycleState::Terminating;
        }
        sim.timers.insert(instance_id.to_string(), drain);
        Ok(())
    }

    pub fn delete_group(&mut self, name: &str) -> ApiResult<()> {
        let sim = self
            .groups
            .get(name)
            .ok_or_else(|| ApiError::GroupNotFound(name.to_string()))?;
        if !sim.group.members.is_empty() {
            return Err(ApiError::rejected(
                "DeleteGroup",
                format!("group {name} still has {} members", sim.group.members.len()),
            ));
        }
        self.groups.remove(name);
        Ok(())
    }

    // ── Load balancing ────────────────────────────────────────────

    pub fn instance_health(
        &self,
        load_balancer: &str,
        instance_ids: Option<&[String]>,
    ) -> ApiResult<Vec<InstanceHealth>> {
        let regs = self.load_balancers.get(load_balancer).ok_or_else(|| {
            ApiError::rejected(
                "DescribeInstanceHealth",
                format!("load balancer {load_balancer} not found"),
            )
        })?;
        let ids: Vec<String> = match instance_ids {
            Some(ids) => {
                if let Some(unknown) = ids.iter().find(|id| !regs.instances.contains_key(*id)) {
                    return Err(ApiError::InvalidInstance {
                        resource: load_balancer.to_string(),
                        instance_id: unknown.clone(),
                    });
                }
                ids.to_vec()
            }
            None => regs.instances.keys().cloned().collect(),
        };
        Ok(ids
            .into_iter()
            .map(|id| {
                let up = !regs.faulted
                    && regs.instances.get(&id) == Some(&0)
                    && self.member_viable(&id);
                InstanceHealth {
                    instance_id: id,
                    state: if up { "InService" } else { "OutOfService" }.to_string(),
                }
            })
            .collect())
    }

    pub fn deregister_instances(
        &mut self,
        load_balancer: &str,
        instance_ids: &[String],
    ) -> ApiResult<()> {
        let regs = self.load_balancers.get_mut(load_balancer).ok_or_else(|| {
            ApiError::rejected(
                "DeregisterInstances",
                format!("load balancer {load_balancer} not found"),
            )
        })?;
        if let Some(unknown) = instance_ids
            .iter()
            .find(|id| !regs.instances.contains_key(*id))
        {
            return Err(ApiError::InvalidInstance {
                resource: load_balancer.to_string(),
                instance_id: unknown.clone(),
            });
        }
        for id in instance_ids {
            regs.instances.remove(id);
        }
        Ok(())
    }

    pub fn target_health(
        &self,
        target_group: &str,
        target_ids: Option<&[String]>,
    ) -> ApiResult<Vec<TargetHealth>> {
        let regs = self.target_groups.get(target_group).ok_or_else(|| {
            ApiError::rejected(
                "DescribeTargetHealth",
                format!("target group {target_group} not found"),
            )
        })?;
        let ids: Vec<String> = match target_ids {
            Some(ids) => ids.to_vec(),
            None => regs.instances.keys().cloned().collect(),
        };
        Ok(ids
            .into_iter()
            .map(|id| {
                let state = match regs.instances.get(&id) {
                    None => "unused",
                    Some(lag) if *lag > 0 => "initial",
                    Some(_) if regs.faulted || !self.member_viable(&id) => "unhealthy",
                    Some(_) => "healthy",
                };
                TargetHealth {
                    target_id: id,
                    state: state.to_string(),
                }
            })
            .collect())
    }

    pub fn deregister_targets(&mut self, target_group: &str, target_ids: &[String]) -> ApiResult<()> {
        let regs = self.target_groups.get_mut(target_group).ok_or_else(|| {
            ApiError::rejected(
                "DeregisterTargets",
                format!("target group {target_group} not found"),
            )
        })?;
        for id in target_ids {
            regs.instances.remove(id);
        }
        Ok(())
    }
}

fn register(
    registry: &mut BTreeMap<String, Registrations>,
    names: &BTreeSet<String>,
    instance_id: &str,
    lag: u32,
) {
    for name in names {
        registry
            .entry(name.clone())
            .or_default()
            .instances
            .insert(instance_id.to_string(), lag);
    }
}

fn check_bounds(operation: &str, capacity: &Capacity) -> ApiResult<()> {
    if capacity.is_consistent() {
        Ok(())
    } else {
        Err(ApiError::rejected(
            operation,
            format!("bounds violate min <= desired <= max ({capacity})"),
        ))
    }
}
