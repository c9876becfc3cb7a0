//! Control-plane interfaces consumed by the orchestrator.
//!
//! Two services sit behind these traits: the group manager
//! ([`GroupApi`]) and the load-balancing service ([`LoadBalancerApi`]).
//! Both are injected, so the orchestrator never knows whether it talks to
//! a real backend or the in-memory simulator.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ApiResult, FleetError, FleetResult};
use crate::types::{Capacity, Group, HealthCheckType, InstanceHealth, TargetHealth};

/// Boxed future returned by every control-plane call.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = ApiResult<T>> + Send + 'a>>;

/// The group manager.
pub trait GroupApi: Send + Sync {
    /// Fetch the named group. `Ok(None)` when it does not exist.
    fn describe_group<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Option<Group>>;

    /// Create a group from a full description. Members are ignored.
    fn create_group<'a>(&'a self, group: &'a Group) -> ApiFuture<'a, ()>;

    /// Apply a partial update. Fields left `None` are untouched server-side.
    fn update_group<'a>(&'a self, update: &'a GroupUpdate) -> ApiFuture<'a, ()>;

    /// Terminate one member, optionally lowering desired capacity by one.
    fn terminate_member<'a>(
        &'a self,
        instance_id: &'a str,
        decrement_desired_capacity: bool,
    ) -> ApiFuture<'a, ()>;

    fn delete_group<'a>(&'a self, name: &'a str) -> ApiFuture<'a, ()>;
}

/// Classic load balancers and target groups.
pub trait LoadBalancerApi: Send + Sync {
    /// Per-instance health on a classic balancer. `None` lists every
    /// registered instance.
    fn describe_instance_health<'a>(
        &'a self,
        load_balancer: &'a str,
        instance_ids: Option<&'a [String]>,
    ) -> ApiFuture<'a, Vec<InstanceHealth>>;

    fn deregister_instances<'a>(
        &'a self,
        load_balancer: &'a str,
        instance_ids: &'a [String],
    ) -> ApiFuture<'a, ()>;

    /// Per-target health on a target group. `None` lists every target.
    fn describe_target_health<'a>(
        &'a self,
        target_group: &'a str,
        target_ids: Option<&'a [String]>,
    ) -> ApiFuture<'a, Vec<TargetHealth>>;

    fn deregister_targets<'a>(
        &'a self,
        target_group: &'a str,
        target_ids: &'a [String],
    ) -> ApiFuture<'a, ()>;
}

/// Both services, shareable across components.
#[derive(Clone)]
pub struct ControlPlane {
    pub groups: Arc<dyn GroupApi>,
    pub balancers: Arc<dyn LoadBalancerApi>,
}

impl ControlPlane {
    pub fn new(groups: Arc<dyn GroupApi>, balancers: Arc<dyn LoadBalancerApi>) -> Self {
        Self { groups, balancers }
    }

    /// Use one backend for both services.
    pub fn from_shared<B>(backend: Arc<B>) -> Self
    where
        B: GroupApi + LoadBalancerApi + 'static,
    {
        Self {
            groups: backend.clone(),
            balancers: backend,
        }
    }

    /// Fresh snapshot of a group. Never cached; two reads may differ.
    pub async fn read_group(&self, name: &str) -> FleetResult<Group> {
        self.groups
            .describe_group(name)
            .await?
            .ok_or_else(|| FleetError::NotFound(name.to_string()))
    }
}

/// The updatable attribute set of a group.
///
/// Only these fields can ever be submitted in an update; everything else
/// on a [`Group`] is read-only from the orchestrator's point of view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupUpdate {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_config: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired_capacity: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancers: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_groups: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_type: Option<HealthCheckType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_grace_period: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_cooldown: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zones: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc_subnets: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_policies: Option<Vec<String>>,
}

impl GroupUpdate {
    /// An update touching nothing.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// An update touching only the size bounds.
    pub fn capacity(name: &str, capacity: Capacity) -> Self {
        Self {
            min_size: Some(capacity.min_size),
            max_size: Some(capacity.max_size),
            desired_capacity: Some(capacity.desired_capacity),
            ..Self::named(name)
        }
    }

    /// Whether any attribute is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::named(&self.name)
    }

    /// Apply the set fields onto a group record.
    pub fn apply_to(&self, group: &mut Group) {
        if let Some(v) = &self.launch_config {
            group.launch_config = v.clone();
        }
        if let Some(v) = self.min_size {
            group.min_size = v;
        }
        if let Some(v) = self.max_size {
            group.max_size = v;
        }
        if let Some(v) = self.desired_capacity {
            group.desired_capacity = v;
        }
        if let Some(v) = &self.load_balancers {
            group.load_balancers = v.clone();
        }
        if let Some(v) = &self.target_groups {
            group.target_groups = v.clone();
        }
        if let Some(v) = self.health_check_type {
            group.health_check_type = v;
        }
        if let Some(v) = self.health_check_grace_period {
            group.health_check_grace_period = v;
        }
        if let Some(v) = self.default_cooldown {
            group.default_cooldown = v;
        }
        if let Some(v) = &self.availability_zones {
            group.availability_zones = v.clone();
        }
        if let Some(v) = &self.vpc_subnets {
            group.vpc_subnets = v.clone();
        }
        if let Some(v) = &self.termination_policies {
            group.termination_policies = v.clone();
        }
    }
}
